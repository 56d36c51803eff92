pub mod error;
pub mod keys;
pub mod orchestrator;
pub mod registry;
pub mod resolver;
pub mod validator;

pub use error::{BatchFailure, ErrorKind, UploadError, UploadResult, ValidationError};
pub use keys::FilenameGenerator;
pub use orchestrator::{OrchestratorSettings, UploadOrchestrator};
pub use registry::{MetadataRegistry, RegistryError, SqliteRegistry};
pub use resolver::UrlResolver;
pub use validator::{FileValidator, UploadPolicy};
