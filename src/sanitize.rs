//! Filename and relative-path sanitization for user supplied upload names.

use crate::validation::ValidationError;

const MAX_FILE_NAME_LEN: usize = 128;

/// Reduce an arbitrary client filename to `[A-Za-z0-9._-]`, without directories.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let mut out = String::with_capacity(base.len());
    for c in base.chars() {
        let mapped = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            c
        } else {
            '_'
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }

    let trimmed = out.trim_start_matches('.');
    let mut cleaned = truncate_keeping_extension(trimmed, MAX_FILE_NAME_LEN);
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        cleaned = "file".to_string();
    }
    cleaned
}

/// Normalize a client supplied relative path (as sent for folder uploads).
///
/// Rejects traversal and absolute paths; every component is passed through
/// [`sanitize_file_name`].
pub fn sanitize_relative_path(path: &str) -> Result<String, ValidationError> {
    let raw = path.trim();
    let invalid = || ValidationError::InvalidPath(path.to_string());

    if raw.starts_with('/') || raw.starts_with('\\') || has_drive_prefix(raw) {
        return Err(invalid());
    }

    let mut parts = Vec::new();
    for component in raw.split(['/', '\\']) {
        match component {
            "" | "." => continue,
            ".." => return Err(invalid()),
            other => parts.push(sanitize_file_name(other)),
        }
    }

    if parts.is_empty() {
        return Err(invalid());
    }
    Ok(parts.join("/"))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn truncate_keeping_extension(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }
    // Sanitized names are ASCII, so byte slicing is safe.
    match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= 16 => {
            let ext = &name[dot..];
            format!("{}{}", &name[..max - ext.len()], ext)
        }
        _ => name[..max].to_string(),
    }
}
