//! Input checks applied to a build submission before anything leaves the process.
//!
//! Every failure maps to a distinct machine-readable code so clients can tell
//! a bad package identifier from a bad icon without parsing messages.

use thiserror::Error;
use uuid::Uuid;

const APP_NAME_MAX_CHARS: usize = 50;
const PACKAGE_NAME_MAX_LEN: usize = 255;

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const ZIP_LOCAL_HEADER: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_ARCHIVE: &[u8] = b"PK\x05\x06";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid app name: {0}")]
    InvalidAppName(String),
    #[error("invalid package name `{name}`: {reason}")]
    InvalidPackageName { name: String, reason: String },
    #[error("icon must be a PNG, JPEG or WebP image")]
    InvalidIcon,
    #[error("invalid archive: {0}")]
    InvalidArchive(String),
    #[error("invalid file path `{0}`")]
    InvalidPath(String),
    #[error("duplicate file path `{0}`")]
    DuplicatePath(String),
    #[error("provide either an archive or loose files, not both")]
    ConflictingSources,
    #[error("build id `{0}` is not a valid identifier")]
    InvalidBuildId(String),
}

impl ValidationError {
    /// Stable code returned in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::InvalidAppName(_) => "invalid_app_name",
            Self::InvalidPackageName { .. } => "invalid_package_name",
            Self::InvalidIcon => "invalid_icon",
            Self::InvalidArchive(_) => "invalid_archive",
            Self::InvalidPath(_) => "invalid_path",
            Self::DuplicatePath(_) => "duplicate_path",
            Self::ConflictingSources => "conflicting_sources",
            Self::InvalidBuildId(_) => "invalid_build_id",
        }
    }
}

/// Trim and check a human-readable application name.
pub fn validate_app_name(raw: &str) -> Result<String, ValidationError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ValidationError::MissingField("app_name"));
    }
    if name.chars().count() > APP_NAME_MAX_CHARS {
        return Err(ValidationError::InvalidAppName(format!(
            "must be at most {} characters",
            APP_NAME_MAX_CHARS
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(ValidationError::InvalidAppName(
            "must not contain control characters".into(),
        ));
    }
    Ok(name.to_string())
}

/// Check a reverse-DNS application identifier such as `com.example.app`.
pub fn validate_package_name(raw: &str) -> Result<String, ValidationError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ValidationError::MissingField("package_name"));
    }
    let invalid = |reason: &str| ValidationError::InvalidPackageName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.len() > PACKAGE_NAME_MAX_LEN {
        return Err(invalid("too long"));
    }

    let segments: Vec<&str> = name.split('.').collect();
    if segments.len() < 2 {
        return Err(invalid("needs at least two dot-separated segments"));
    }
    for segment in segments {
        let mut chars = segment.chars();
        match chars.next() {
            None => return Err(invalid("contains an empty segment")),
            Some(first) if !first.is_ascii_alphabetic() => {
                return Err(invalid("each segment must start with a letter"));
            }
            Some(_) => {}
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid(
                "segments may only contain letters, digits and underscores",
            ));
        }
    }
    Ok(name.to_string())
}

/// Check the leading bytes of an icon upload. The declared content type is not trusted.
pub fn validate_icon(head: &[u8]) -> Result<(), ValidationError> {
    let is_webp = head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WEBP";
    if head.starts_with(PNG_MAGIC) || head.starts_with(JPEG_MAGIC) || is_webp {
        Ok(())
    } else {
        Err(ValidationError::InvalidIcon)
    }
}

/// Check that an uploaded archive looks like a ZIP file.
pub fn validate_archive(head: &[u8]) -> Result<(), ValidationError> {
    if head.starts_with(ZIP_LOCAL_HEADER) || head.starts_with(ZIP_EMPTY_ARCHIVE) {
        Ok(())
    } else {
        Err(ValidationError::InvalidArchive(
            "expected a ZIP archive".into(),
        ))
    }
}

pub fn parse_build_id(raw: &str) -> Result<Uuid, ValidationError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ValidationError::InvalidBuildId(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_name_is_trimmed() {
        assert_eq!(validate_app_name("  My App ").unwrap(), "My App");
    }

    #[test]
    fn blank_app_name_is_missing() {
        assert_eq!(
            validate_app_name("   "),
            Err(ValidationError::MissingField("app_name"))
        );
    }

    #[test]
    fn app_name_rejects_control_characters_and_length() {
        assert_eq!(
            validate_app_name("bad\u{0007}name").unwrap_err().code(),
            "invalid_app_name"
        );
        let long = "x".repeat(51);
        assert_eq!(
            validate_app_name(&long).unwrap_err().code(),
            "invalid_app_name"
        );
        assert!(validate_app_name(&"é".repeat(50)).is_ok());
    }

    #[test]
    fn package_names() {
        assert!(validate_package_name("com.example.app").is_ok());
        assert!(validate_package_name("io.acme_labs.App2").is_ok());

        for bad in ["example", "com..app", "com.1app", "com.example-app", ".com.app", "com.app."] {
            assert_eq!(
                validate_package_name(bad).unwrap_err().code(),
                "invalid_package_name",
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn icon_magic_bytes() {
        assert!(validate_icon(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR").is_ok());
        assert!(validate_icon(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]).is_ok());
        assert!(validate_icon(b"RIFF\x10\0\0\0WEBPVP8 ").is_ok());
        assert_eq!(validate_icon(b"GIF89a"), Err(ValidationError::InvalidIcon));
        assert_eq!(validate_icon(b""), Err(ValidationError::InvalidIcon));
    }

    #[test]
    fn archive_signature() {
        assert!(validate_archive(b"PK\x03\x04rest").is_ok());
        assert!(validate_archive(b"PK\x05\x06").is_ok());
        assert_eq!(
            validate_archive(b"Rar!\x1a\x07").unwrap_err().code(),
            "invalid_archive"
        );
    }

    #[test]
    fn build_id_must_be_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(parse_build_id(&id.to_string()).unwrap(), id);
        assert_eq!(
            parse_build_id("../etc").unwrap_err().code(),
            "invalid_build_id"
        );
    }
}
