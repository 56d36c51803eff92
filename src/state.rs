use crate::backends::LocalBackend;
use crate::services::{MetadataRegistry, UploadOrchestrator};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: UploadOrchestrator,
    pub registry: Arc<dyn MetadataRegistry>,
    /// Present when local files are served from this process.
    pub local: Option<Arc<LocalBackend>>,
}

impl AppState {
    pub fn new(
        orchestrator: UploadOrchestrator,
        registry: Arc<dyn MetadataRegistry>,
        local: Option<Arc<LocalBackend>>,
    ) -> Self {
        Self {
            orchestrator,
            registry,
            local,
        }
    }
}
