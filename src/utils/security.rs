//! Security utilities for input validation and sanitization
//!
//! Every backend routes user-influenced path components through these checks
//! before touching storage, so they are the one place traversal, hidden-file
//! and tenant-id rules are enforced.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;
use uuid::Uuid;

use crate::errors::{Result, StorageError};

/// Longest filename (in bytes) the sanitizer will emit
const MAX_FILENAME_BYTES: usize = 255;

static WINDOWS_ABSOLUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]:[\\/]").expect("valid drive-letter regex"));

static ENCODED_TRAVERSAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)%(2e|2f|5c|00)").expect("valid encoded traversal regex"));

static WINDOWS_RESERVED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(con|prn|aux|nul|com[0-9]|lpt[0-9])(\..*)?$").expect("valid reserved-name regex")
});

/// Check a single path component for traversal sequences.
///
/// Flags `..`, percent-encoded dots, slashes, backslashes and nulls, raw null
/// bytes, drive-letter paths and UNC prefixes. A plain absolute Unix path is
/// not a traversal on its own; `is_unsafe_file_path` covers that.
pub fn is_path_traversal(segment: &str) -> bool {
    if segment.contains("..") || segment.contains('\0') {
        return true;
    }
    if ENCODED_TRAVERSAL.is_match(segment) {
        return true;
    }
    if WINDOWS_ABSOLUTE.is_match(segment) || segment.starts_with("\\\\") {
        return true;
    }
    false
}

/// Stricter variant used for filenames: traversal or any absolute-path marker
pub fn is_unsafe_file_path(name: &str) -> bool {
    is_path_traversal(name) || name.starts_with('/') || name.starts_with('\\')
}

/// Validate and sanitize a filename (or a single path segment).
///
/// Rejects empty and unsafe names up front, then runs the character-level
/// sanitizer and strips leading dots so hidden or relative-jump names cannot
/// be produced.
pub fn sanitize_filename(name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(StorageError::InvalidFilename("filename cannot be empty".to_string()));
    }

    if is_unsafe_file_path(name) {
        warn!("Rejected unsafe filename: {:?}", name);
        return Err(StorageError::InvalidFilename(format!("unsafe filename: {}", name)));
    }

    let cleaned = sanitize_characters(name);
    let sanitized = cleaned.trim_start_matches('.');

    if sanitized.is_empty() {
        return Err(StorageError::InvalidFilename(format!(
            "filename is empty after sanitization: {}",
            name
        )));
    }

    if sanitized.contains('/') || sanitized.contains('\\') {
        return Err(StorageError::InvalidFilename(format!(
            "filename cannot contain path separators: {}",
            name
        )));
    }

    Ok(sanitized.to_string())
}

/// Character-level sanitizer.
///
/// Drops characters that are illegal on common filesystems and control
/// characters, blanks out `.`/`..`-only names and Windows reserved device
/// names, trims trailing dots and spaces, and truncates to 255 bytes on a
/// char boundary.
fn sanitize_characters(input: &str) -> String {
    let mut sanitized: String = input
        .chars()
        .filter(|ch| !matches!(ch, '/' | '?' | '<' | '>' | '\\' | ':' | '*' | '|' | '"'))
        .filter(|ch| !ch.is_control())
        .collect();

    if sanitized.chars().all(|ch| ch == '.') {
        return String::new();
    }

    if WINDOWS_RESERVED.is_match(&sanitized) {
        return String::new();
    }

    let trimmed_len = sanitized.trim_end_matches(['.', ' ']).len();
    sanitized.truncate(trimmed_len);

    if sanitized.len() > MAX_FILENAME_BYTES {
        let mut cut = MAX_FILENAME_BYTES;
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
    }

    sanitized
}

/// A chatflow id must be a hyphenated UUID
pub fn validate_chatflow_id(id: &str) -> Result<()> {
    if id.len() != 36 || Uuid::parse_str(id).is_err() {
        return Err(StorageError::InvalidTenantId(format!(
            "invalid chatflow id format: {}",
            id
        )));
    }
    Ok(())
}

/// Organization ids are opaque but must be usable as a single path segment
pub fn validate_org_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(StorageError::InvalidTenantId("organization id cannot be empty".to_string()));
    }
    if id.contains('/') || id.contains('\\') || is_path_traversal(id) {
        return Err(StorageError::InvalidTenantId(format!("invalid organization id: {}", id)));
    }
    Ok(())
}

/// Check each segment independently for traversal sequences
pub fn validate_path_security(segments: &[&str]) -> Result<()> {
    for segment in segments {
        if is_path_traversal(segment) {
            warn!("Path traversal attempt detected: {:?}", segment);
            return Err(StorageError::PathTraversal((*segment).to_string()));
        }
    }
    Ok(())
}

/// Sanitize every segment and join them into a `/`-separated object key
pub fn join_key(segments: &[&str]) -> Result<String> {
    let parts = segments
        .iter()
        .map(|segment| sanitize_filename(segment))
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("/"))
}
