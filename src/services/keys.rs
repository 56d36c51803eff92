//! Storage key generation.
//!
//! Key format: `{base}-{unix micros}-{16 hex chars}.{ext}` where `base` is the
//! declared filename stem reduced to `[a-z0-9-_]`. The random token carries
//! 64 bits of entropy, so uniqueness needs no registry round-trip. Folders are
//! kept separate from keys and use the same character set per segment.

use chrono::Utc;

const MAX_BASE_LEN: usize = 48;
const MAX_EXTENSION_LEN: usize = 10;
const MAX_FOLDER_DEPTH: usize = 8;
const DEFAULT_BASE: &str = "file";
const DEFAULT_EXTENSION: &str = "bin";

#[derive(Debug, Clone, Copy, Default)]
pub struct FilenameGenerator;

impl FilenameGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Build a fresh collision-resistant key for `original_name`.
    ///
    /// The original name only contributes its sanitised stem and extension; it
    /// is never used as a path component.
    pub fn generate(&self, original_name: &str) -> String {
        let leaf = original_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(original_name);
        let (stem, extension) = match leaf.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, ext),
            _ => (leaf, ""),
        };

        let mut base: String = stem
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
            .map(|c| c.to_ascii_lowercase())
            .take(MAX_BASE_LEN)
            .collect();
        if base.is_empty() {
            base.push_str(DEFAULT_BASE);
        }

        let mut extension: String = extension
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .take(MAX_EXTENSION_LEN)
            .collect();
        if extension.is_empty() {
            extension.push_str(DEFAULT_EXTENSION);
        }

        let timestamp = Utc::now().timestamp_micros();
        let token: [u8; 8] = rand::random();

        format!("{}-{}-{}.{}", base, timestamp, hex::encode(token), extension)
    }
}

/// True when `key` can be used verbatim as a single path component.
pub fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 255
        && !key.starts_with('.')
        && !key.contains("..")
        && key
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.'))
}

/// Reduce a caller-supplied folder to `/`-joined `[a-z0-9-_]` segments.
///
/// Empty, `.` and `..` segments are dropped. Returns `None` when nothing is left.
pub fn sanitize_folder(folder: &str) -> Option<String> {
    let segments: Vec<String> = folder
        .split(['/', '\\'])
        .map(|segment| {
            segment
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
                .map(|c| c.to_ascii_lowercase())
                .collect::<String>()
        })
        .filter(|segment| !segment.is_empty())
        .take(MAX_FOLDER_DEPTH)
        .collect();

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}
