//! Upload identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum accepted length of an upload id.
const MAX_UPLOAD_ID_LEN: usize = 128;

/// Engine-assigned identifier of an upload.
///
/// Ids double as file names inside the storage directory, so only ASCII
/// alphanumerics, `-` and `_` are accepted.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UploadId(String);

impl UploadId {
    /// Generate a new random upload id (32 lowercase hex characters).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Parse and validate an id taken from a request path or a database row.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() || s.len() > MAX_UPLOAD_ID_LEN {
            return Err(crate::Error::InvalidUploadId(format!(
                "length must be between 1 and {MAX_UPLOAD_ID_LEN}"
            )));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(crate::Error::InvalidUploadId(format!(
                "unexpected characters in {s:?}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UploadId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<UploadId> for String {
    fn from(id: UploadId) -> Self {
        id.0
    }
}

impl AsRef<str> for UploadId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
