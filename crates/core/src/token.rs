//! Bearer token issuance and verification.
//!
//! Tokens are HS256 JWTs signed with a single shared secret. The identity
//! claim is `user_id`, always written as a JSON number and read back leniently
//! (number or numeric string) so tokens minted by older clients keep working.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Numeric user identity, as stored in the `users` table.
pub type UserId = i64;

/// Token verification failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token")]
    Invalid,
    #[error("token has expired")]
    Expired,
    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Decoded token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(deserialize_with = "deserialize_user_id")]
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Random per-token id, so two tokens minted in the same second differ.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawUserId {
    Number(i64),
    Text(String),
}

fn deserialize_user_id<'de, D>(deserializer: D) -> Result<UserId, D::Error>
where
    D: Deserializer<'de>,
{
    let id = match RawUserId::deserialize(deserializer)? {
        RawUserId::Number(n) => n,
        RawUserId::Text(s) => s
            .trim()
            .parse::<UserId>()
            .map_err(|_| serde::de::Error::custom(format!("user_id {s:?} is not numeric")))?,
    };
    if id < 0 {
        return Err(serde::de::Error::custom("user_id must not be negative"));
    }
    Ok(id)
}

/// Mints and verifies bearer tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Option<Duration>,
}

impl TokenIssuer {
    /// Create an issuer from the shared secret.
    ///
    /// `ttl` of `None` produces tokens without an `exp` claim.
    pub fn new(secret: &[u8], ttl: Option<Duration>) -> crate::Result<Self> {
        if secret.is_empty() {
            return Err(crate::Error::ConfigMissing("auth.jwt_secret".to_string()));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        })
    }

    /// Create an issuer from the auth configuration.
    pub fn from_config(config: &crate::config::AuthConfig) -> crate::Result<Self> {
        let secret = config
            .jwt_secret
            .as_deref()
            .ok_or_else(|| crate::Error::ConfigMissing("auth.jwt_secret".to_string()))?;
        Self::new(secret.as_bytes(), config.token_ttl())
    }

    /// Sign a token carrying `user_id`.
    pub fn issue(&self, user_id: UserId) -> Result<String, TokenError> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            user_id,
            iat: Some(now.unix_timestamp()),
            exp: self.ttl.map(|ttl| (now + ttl).unix_timestamp()),
            jti: Some(Uuid::new_v4().simple().to_string()),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verify the signature and expiry of a token and return its claims.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // `exp` is only present when a TTL is configured.
        validation.required_spec_claims = HashSet::new();

        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })
    }
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("secret", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// SHA-256 digest of a token, hex encoded. Only digests are persisted.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
