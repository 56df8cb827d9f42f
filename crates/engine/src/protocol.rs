//! tus 1.0 protocol constants and header value parsing.
//!
//! Only the core protocol plus the `creation` and `termination` extensions
//! are served.

use crate::error::{EngineError, EngineResult};

/// The only protocol version spoken.
pub const TUS_VERSION: &str = "1.0.0";

/// Comma separated list advertised in `Tus-Extension`.
pub const TUS_EXTENSIONS: &str = "creation,termination";

/// Content type required on PATCH requests.
pub const OFFSET_CONTENT_TYPE: &str = "application/offset+octet-stream";

pub const TUS_RESUMABLE: &str = "tus-resumable";
pub const TUS_VERSION_HEADER: &str = "tus-version";
pub const TUS_EXTENSION: &str = "tus-extension";
pub const TUS_MAX_SIZE: &str = "tus-max-size";
pub const UPLOAD_OFFSET: &str = "upload-offset";
pub const UPLOAD_LENGTH: &str = "upload-length";
pub const UPLOAD_METADATA: &str = "upload-metadata";
pub const UPLOAD_DEFER_LENGTH: &str = "upload-defer-length";

/// Check the `Tus-Resumable` header sent by the client.
pub fn check_resumable(value: Option<&str>) -> EngineResult<()> {
    match value.map(str::trim) {
        Some(TUS_VERSION) => Ok(()),
        Some(other) => Err(EngineError::UnsupportedVersion(other.to_string())),
        None => Err(EngineError::UnsupportedVersion("missing".to_string())),
    }
}

/// Parse a non-negative decimal header value such as `Upload-Offset`.
pub fn parse_length(name: &str, value: Option<&str>) -> EngineResult<u64> {
    let value = value.ok_or_else(|| EngineError::InvalidRequest(format!("missing {name}")))?;
    let value = value.trim();
    // Reject signs and whitespace that u64::from_str would otherwise allow
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EngineError::InvalidRequest(format!(
            "invalid {name}: {value:?}"
        )));
    }
    value
        .parse()
        .map_err(|_| EngineError::InvalidRequest(format!("invalid {name}: {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resumable_accepts_only_1_0_0() {
        assert!(check_resumable(Some("1.0.0")).is_ok());
        assert!(check_resumable(Some(" 1.0.0 ")).is_ok());
        assert!(matches!(
            check_resumable(Some("0.2.2")),
            Err(EngineError::UnsupportedVersion(v)) if v == "0.2.2"
        ));
        assert!(check_resumable(None).is_err());
    }

    #[test]
    fn parse_length_accepts_digits() {
        assert_eq!(parse_length(UPLOAD_LENGTH, Some("0")).unwrap(), 0);
        assert_eq!(parse_length(UPLOAD_LENGTH, Some("1048576")).unwrap(), 1_048_576);
    }

    #[test]
    fn parse_length_rejects_garbage() {
        for value in ["", "-1", "+5", "1.5", "abc", "99999999999999999999999"] {
            assert!(
                parse_length(UPLOAD_OFFSET, Some(value)).is_err(),
                "{value:?} should be rejected"
            );
        }
        assert!(parse_length(UPLOAD_OFFSET, None).is_err());
    }
}
