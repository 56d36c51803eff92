//! FileValidator — pure acceptance check of a declared name, mime type, and size
//! against the per-category policy table. No I/O happens here.

use crate::models::Category;
use crate::services::error::{ValidationError, ValidationResult};
use std::collections::{BTreeMap, BTreeSet};

pub const MIB: u64 = 1024 * 1024;

/// Mime values that carry no type information and fall back to the extension.
const GENERIC_MIME_TYPES: [&str; 2] = ["application/octet-stream", "binary/octet-stream"];
const FALLBACK_MIME: &str = "application/octet-stream";

const AUDIO_MIME: &[&str] = &[
    "audio/mpeg",
    "audio/mp3",
    "audio/wav",
    "audio/wave",
    "audio/x-wav",
    "audio/ogg",
    "audio/webm",
    "audio/flac",
    "audio/x-m4a",
    "audio/mp4",
    "audio/aac",
];
const AUDIO_EXT: &[&str] = &[
    "mp3", "wav", "ogg", "oga", "flac", "m4a", "aac", "wma", "opus", "weba",
];
const VIDEO_MIME: &[&str] = &[
    "video/mp4",
    "video/mpeg",
    "video/webm",
    "video/ogg",
    "video/quicktime",
    "video/x-msvideo",
    "video/x-matroska",
    "video/x-flv",
    "video/avi",
];
const VIDEO_EXT: &[&str] = &[
    "mp4", "m4v", "avi", "mkv", "mov", "webm", "flv", "wmv", "mpeg", "mpg", "ogv",
];
const DOCUMENT_MIME: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "text/plain",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];
const DOCUMENT_EXT: &[&str] = &["pdf", "doc", "docx", "txt", "xls", "xlsx"];
const IMAGE_MIME: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];
const IMAGE_EXT: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// Allow-lists and size cap for one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryPolicy {
    pub mime_types: BTreeSet<String>,
    pub extensions: BTreeSet<String>,
    pub max_bytes: u64,
}

impl CategoryPolicy {
    pub fn new(mime_types: &[&str], extensions: &[&str], max_bytes: u64) -> Self {
        Self {
            mime_types: mime_types.iter().map(|m| m.to_ascii_lowercase()).collect(),
            extensions: extensions.iter().map(|e| normalize_extension(e)).collect(),
            max_bytes,
        }
    }
}

/// Canonical policy table, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    categories: BTreeMap<Category, CategoryPolicy>,
    /// `(mime category, extension category)` pairs accepted despite disagreeing;
    /// the mime category wins.
    crossovers: Vec<(Category, Category)>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        let mut categories = BTreeMap::new();
        categories.insert(
            Category::Audio,
            CategoryPolicy::new(AUDIO_MIME, AUDIO_EXT, 500 * MIB),
        );
        categories.insert(
            Category::Video,
            CategoryPolicy::new(VIDEO_MIME, VIDEO_EXT, 500 * MIB),
        );
        categories.insert(
            Category::Document,
            CategoryPolicy::new(DOCUMENT_MIME, DOCUMENT_EXT, 50 * MIB),
        );
        categories.insert(
            Category::Image,
            CategoryPolicy::new(IMAGE_MIME, IMAGE_EXT, 20 * MIB),
        );
        Self {
            categories,
            // audio stream in a video container (`audio/mp4` + `.mp4`)
            crossovers: vec![(Category::Audio, Category::Video)],
        }
    }
}

impl UploadPolicy {
    pub fn category(&self, category: Category) -> &CategoryPolicy {
        // every category is inserted by `default()` and never removed
        &self.categories[&category]
    }

    pub fn max_bytes(&self, category: Category) -> u64 {
        self.category(category).max_bytes
    }

    /// Largest per-category limit; bounds request bodies at the HTTP layer.
    pub fn largest_limit(&self) -> u64 {
        self.categories
            .values()
            .map(|p| p.max_bytes)
            .max()
            .unwrap_or(0)
    }

    pub fn with_max_bytes(mut self, category: Category, max_bytes: u64) -> Self {
        if let Some(policy) = self.categories.get_mut(&category) {
            policy.max_bytes = max_bytes;
        }
        self
    }

    pub fn with_mime_types<S: AsRef<str>>(mut self, category: Category, mime_types: &[S]) -> Self {
        if let Some(policy) = self.categories.get_mut(&category) {
            policy.mime_types = mime_types
                .iter()
                .map(|m| m.as_ref().trim().to_ascii_lowercase())
                .filter(|m| !m.is_empty())
                .collect();
        }
        self
    }

    pub fn with_extensions<S: AsRef<str>>(mut self, category: Category, extensions: &[S]) -> Self {
        if let Some(policy) = self.categories.get_mut(&category) {
            policy.extensions = extensions
                .iter()
                .map(|e| normalize_extension(e.as_ref()))
                .filter(|e| !e.is_empty())
                .collect();
        }
        self
    }

    fn category_for_mime(&self, mime: &str) -> Option<Category> {
        Category::ALL
            .into_iter()
            .find(|c| self.category(*c).mime_types.contains(mime))
    }

    fn categories_for_extension(&self, extension: &str) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|c| self.category(*c).extensions.contains(extension))
            .collect()
    }

    fn allows_crossover(&self, mime_category: Category, extension_category: Category) -> bool {
        self.crossovers
            .iter()
            .any(|(m, e)| *m == mime_category && *e == extension_category)
    }
}

/// Outcome of a successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFile {
    pub category: Category,
    /// Declared mime when recognised, otherwise inferred from the extension.
    pub mime_type: String,
    pub extension: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FileValidator {
    policy: UploadPolicy,
}

impl FileValidator {
    pub fn new(policy: UploadPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// Accept when the mime OR the extension is on a category's allow-list.
    ///
    /// Check order: empty payload, type recognition, mime/extension agreement,
    /// category size limit.
    pub fn validate(
        &self,
        declared_name: &str,
        declared_mime: Option<&str>,
        size_bytes: u64,
    ) -> ValidationResult<ValidatedFile> {
        if size_bytes == 0 {
            return Err(ValidationError::EmptyFile);
        }

        let extension = extension_of(declared_name);
        let mime = declared_mime.and_then(normalize_mime);
        let mime_category = mime.as_deref().and_then(|m| self.policy.category_for_mime(m));
        let extension_categories = extension
            .as_deref()
            .map(|e| self.policy.categories_for_extension(e))
            .unwrap_or_default();

        let category = match mime_category {
            Some(from_mime)
                if extension_categories.is_empty()
                    || extension_categories.contains(&from_mime)
                    || extension_categories
                        .iter()
                        .any(|e| self.policy.allows_crossover(from_mime, *e)) =>
            {
                from_mime
            }
            Some(from_mime) => {
                return Err(ValidationError::TypeMismatch {
                    mime: mime.unwrap_or_default(),
                    extension: extension.unwrap_or_default(),
                    mime_category: from_mime,
                    extension_category: extension_categories[0],
                });
            }
            None => match extension_categories.first() {
                Some(from_extension) => *from_extension,
                None => {
                    return Err(ValidationError::UnsupportedType {
                        mime: declared_mime.unwrap_or("").trim().to_string(),
                        extension: extension
                            .map(|e| format!(".{}", e))
                            .unwrap_or_else(|| "no extension".into()),
                    });
                }
            },
        };

        let max_bytes = self.policy.max_bytes(category);
        if size_bytes > max_bytes {
            return Err(ValidationError::TooLarge {
                category,
                size_bytes,
                max_bytes,
            });
        }

        let mime_type = match (mime_category, mime) {
            (Some(_), Some(mime)) => mime,
            _ => extension
                .as_deref()
                .and_then(|e| mime_guess::from_ext(e).first_raw())
                .unwrap_or(FALLBACK_MIME)
                .to_string(),
        };

        Ok(ValidatedFile {
            category,
            mime_type,
            extension,
        })
    }
}

/// Lowercased mime without parameters; `None` for absent or generic values.
fn normalize_mime(raw: &str) -> Option<String> {
    let essence = raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    if essence.is_empty() || GENERIC_MIME_TYPES.contains(&essence.as_str()) {
        None
    } else {
        Some(essence)
    }
}

fn normalize_extension(raw: &str) -> String {
    raw.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Lowercased extension of the last path component. Dotfiles have none.
pub(crate) fn extension_of(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext.to_ascii_lowercase()),
        _ => None,
    }
}
