//! Represents a stored file and the enums that classify it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};
use thiserror::Error;
use uuid::Uuid;

/// Returned when a textual enum value (from the registry or a request) is not recognised.
#[derive(Debug, Clone, Error)]
#[error("unknown {kind} `{value}`")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Coarse file-type classification driving validation policy and storage routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Audio,
    Video,
    Document,
    Image,
}

impl Category {
    /// Resolution order when an extension belongs to more than one category.
    pub const ALL: [Category; 4] = [
        Category::Audio,
        Category::Video,
        Category::Document,
        Category::Image,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Audio => "audio",
            Category::Video => "video",
            Category::Document => "document",
            Category::Image => "image",
        }
    }

    /// Directory name used by the local backend.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::Audio => "audio",
            Category::Video => "video",
            Category::Document => "documents",
            Category::Image => "images",
        }
    }

    pub fn from_dir_name(dir: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.dir_name() == dir)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseEnumError::new("category", s))
    }
}

/// Concrete storage provider holding an object's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Local,
    ObjectStore,
    ManagedMedia,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [
        BackendKind::Local,
        BackendKind::ObjectStore,
        BackendKind::ManagedMedia,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::ObjectStore => "object-store",
            BackendKind::ManagedMedia => "managed-media",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ParseEnumError;

    /// Accepts the canonical names plus the provider aliases callers already send
    /// (`s3`, `cloudinary`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "object-store" | "object_store" | "s3" => Ok(BackendKind::ObjectStore),
            "managed-media" | "managed_media" | "media" | "cloudinary" => {
                Ok(BackendKind::ManagedMedia)
            }
            _ => Err(ParseEnumError::new("storage provider", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    #[default]
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl FromStr for Visibility {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" | "true" => Ok(Visibility::Public),
            "private" | "false" => Ok(Visibility::Private),
            _ => Err(ParseEnumError::new("visibility", s)),
        }
    }
}

/// Lifecycle of a FileObject.
///
/// `pending -> stored -> tombstoned -> purged`, with `failed` as the terminal
/// state of an upload whose rollback completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    Pending,
    Stored,
    Failed,
    Tombstoned,
    Purged,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::Pending => "pending",
            FileState::Stored => "stored",
            FileState::Failed => "failed",
            FileState::Tombstoned => "tombstoned",
            FileState::Purged => "purged",
        }
    }
}

impl FromStr for FileState {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FileState::Pending),
            "stored" => Ok(FileState::Stored),
            "failed" => Ok(FileState::Failed),
            "tombstoned" => Ok(FileState::Tombstoned),
            "purged" => Ok(FileState::Purged),
            other => Err(ParseEnumError::new("file state", other)),
        }
    }
}

/// A user-submitted file persisted through one of the storage backends.
///
/// The struct carries metadata only; the bytes live in the backend under
/// `stored_key` (prefixed by `folder` on backends that use folders).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FileObject {
    /// Registry identifier.
    pub id: Uuid,

    /// Opaque caller identity that owns the file.
    pub owner_id: String,

    /// Parent project, when the upload was attached to one.
    pub project_id: Option<String>,

    /// Filename as declared by the client. Never used as a storage path.
    pub original_name: String,

    /// Generated key, unique within `backend`.
    pub stored_key: String,

    /// Sanitised key prefix (`users/{owner}` by default).
    pub folder: Option<String>,

    pub size_bytes: u64,
    pub mime_type: String,
    pub category: Category,
    pub backend: BackendKind,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,

    /// String-keyed annotations (`originalName`, `uploadedBy`, `etag`, caller fields).
    pub metadata: BTreeMap<String, String>,

    pub state: FileState,
}

impl FileObject {
    /// Key prefixed by the folder, as used by folder-aware backends and list prefixes.
    pub fn logical_path(&self) -> String {
        match &self.folder {
            Some(folder) if !folder.is_empty() => format!("{}/{}", folder, self.stored_key),
            _ => self.stored_key.clone(),
        }
    }

    pub fn is_stored(&self) -> bool {
        self.state == FileState::Stored
    }
}
