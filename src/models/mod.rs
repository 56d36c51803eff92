//! Core data models for the upload service.
//!
//! `FileObject` is the durable record the registry keeps for every stored file;
//! the `upload` module holds the request and result types exchanged with callers.

pub mod file_object;
pub mod upload;

pub use file_object::{BackendKind, Category, FileObject, FileState, ParseEnumError, Visibility};
pub use upload::{
    BatchReport, DeleteOutcome, FileOutcome, FileSummary, IncomingFile, ListQuery, ListScope,
    PurgeReport, ResolveOptions, UploadOptions, UploadReceipt,
};
