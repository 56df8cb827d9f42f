//! `Upload-Metadata` header codec.
//!
//! The header is a comma separated list of `key base64(value)` pairs. A key
//! may appear without a value, which decodes to the empty string.

use crate::token::UserId;
use crate::{FILENAME_METADATA_KEY, OWNER_METADATA_KEY};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum accepted size of a raw `Upload-Metadata` header.
pub const MAX_METADATA_HEADER_LEN: usize = 4096;

/// Decoded upload metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadMetadata(BTreeMap<String, String>);

impl UploadMetadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw header value.
    pub fn parse(header: &str) -> crate::Result<Self> {
        if header.len() > MAX_METADATA_HEADER_LEN {
            return Err(crate::Error::InvalidMetadata(format!(
                "header exceeds {MAX_METADATA_HEADER_LEN} bytes"
            )));
        }

        let mut entries = BTreeMap::new();
        for pair in header.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }

            let (key, encoded) = match pair.split_once(' ') {
                Some((key, encoded)) => (key, encoded.trim()),
                None => (pair, ""),
            };
            if key.is_empty() {
                return Err(crate::Error::InvalidMetadata("empty key".to_string()));
            }

            let bytes = STANDARD.decode(encoded).map_err(|e| {
                crate::Error::InvalidMetadata(format!("value of {key:?} is not base64: {e}"))
            })?;
            let value = String::from_utf8(bytes).map_err(|_| {
                crate::Error::InvalidMetadata(format!("value of {key:?} is not UTF-8"))
            })?;
            entries.insert(key.to_string(), value);
        }

        Ok(Self(entries))
    }

    /// Encode back into header form. Keys are emitted in sorted order.
    pub fn to_header(&self) -> String {
        self.0
            .iter()
            .map(|(key, value)| {
                if value.is_empty() {
                    key.clone()
                } else {
                    format!("{key} {}", STANDARD.encode(value))
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Look up a value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Insert or replace a value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Remove a value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The client supplied filename, if any.
    pub fn filename(&self) -> Option<&str> {
        self.get(FILENAME_METADATA_KEY).filter(|name| !name.is_empty())
    }

    /// Replace whatever owner the client sent with the authenticated user.
    pub fn set_owner(&mut self, user_id: UserId) {
        self.insert(OWNER_METADATA_KEY, user_id.to_string());
    }

    /// Parse the owner injected by the server.
    ///
    /// Returns `None` when the key is missing and an error when it is present
    /// but not a non-negative integer.
    pub fn owner(&self) -> Option<crate::Result<UserId>> {
        self.get(OWNER_METADATA_KEY).map(|raw| {
            raw.trim()
                .parse::<UserId>()
                .ok()
                .filter(|id| *id >= 0)
                .ok_or_else(|| crate::Error::InvalidMetadata(format!("invalid owner {raw:?}")))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for UploadMetadata {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
