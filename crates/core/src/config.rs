//! Configuration types shared across crates.

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use time::Duration;

/// Prefix for environment variable overrides (`UPVAULT_SERVER__BIND=...`).
pub const ENV_PREFIX: &str = "UPVAULT_";

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Request timeout in seconds (0 disables the timeout).
    /// Applies to every request, including long PATCH bodies.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Largest `Upload-Length` accepted on creation. `None` means unlimited.
    #[serde(default)]
    pub max_upload_size: Option<u64>,
    /// Expose `/metrics` for Prometheus scraping.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Log a sample token for user 123 at startup.
    #[serde(default)]
    pub debug: bool,
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout_secs(),
            max_upload_size: None,
            metrics_enabled: default_metrics_enabled(),
            debug: false,
        }
    }
}

impl ServerConfig {
    /// Request timeout, if enabled.
    pub fn request_timeout(&self) -> Option<std::time::Duration> {
        (self.request_timeout_secs > 0)
            .then(|| std::time::Duration::from_secs(self.request_timeout_secs))
    }
}

/// Upload storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding upload data and `.info` sidecars.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("tusd-files")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (development and tests).
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over the individual fields.
        url: Option<String>,
        host: Option<String>,
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        username: Option<String>,
        /// Prefer `UPVAULT_METADATA__PASSWORD` (or legacy `db_password`) over the config file.
        password: Option<String>,
        database: Option<String>,
        ssl_mode: Option<PgSslMode>,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// PostgreSQL cancels statements running longer than this.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) | (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => Err(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ),
                (None, Some(_), None) => Err(
                    "postgres config requires 'database' when using individual fields".to_string(),
                ),
            },
        }
    }
}

impl fmt::Debug for MetadataConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite { path } => f.debug_struct("Sqlite").field("path", path).finish(),
            Self::Postgres {
                host,
                port,
                username,
                database,
                ssl_mode,
                max_connections,
                ..
            } => f
                .debug_struct("Postgres")
                .field("host", host)
                .field("port", port)
                .field("username", username)
                .field("database", database)
                .field("ssl_mode", ssl_mode)
                .field("max_connections", max_connections)
                .finish_non_exhaustive(),
        }
    }
}

/// Token signing configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret. The server refuses to start without it.
    #[serde(default)]
    pub jwt_secret: Option<String>,
    /// Token lifetime in seconds (0 = tokens never expire).
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    /// bcrypt work factor for password hashes (4..=31).
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

fn default_token_ttl_secs() -> u64 {
    7 * 24 * 3600
}

fn default_bcrypt_cost() -> u32 {
    12
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_secs: default_token_ttl_secs(),
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

impl AuthConfig {
    /// Token lifetime, if tokens expire.
    pub fn token_ttl(&self) -> Option<Duration> {
        (self.token_ttl_secs > 0).then(|| {
            // Saturate at i64::MAX to prevent overflow wrapping to negative
            Duration::seconds(i64::try_from(self.token_ttl_secs).unwrap_or(i64::MAX))
        })
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .finish()
    }
}

/// Lifecycle synchronizer configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Buffered events per channel before the engine waits on the consumer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Seconds between reconciliation sweeps (0 disables the sweep).
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    /// Ledger rows younger than this are never pruned by the sweep.
    #[serde(default = "default_reconcile_grace_secs")]
    pub reconcile_grace_secs: u64,
}

fn default_channel_capacity() -> usize {
    256
}

fn default_reconcile_interval_secs() -> u64 {
    300
}

fn default_reconcile_grace_secs() -> u64 {
    60
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
            reconcile_grace_secs: default_reconcile_grace_secs(),
        }
    }
}

impl SyncConfig {
    /// Interval between sweeps, if enabled.
    pub fn reconcile_interval(&self) -> Option<std::time::Duration> {
        (self.reconcile_interval_secs > 0)
            .then(|| std::time::Duration::from_secs(self.reconcile_interval_secs))
    }

    pub fn reconcile_grace(&self) -> Duration {
        Duration::seconds(i64::try_from(self.reconcile_grace_secs).unwrap_or(i64::MAX))
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl AppConfig {
    /// Layer the configuration sources, lowest precedence first:
    /// the optional TOML file, the legacy bare variables
    /// (`db_user`, `db_password`, `db_name`, `JWTAuthSecret`), then
    /// `UPVAULT_`-prefixed variables with `__` as the nesting separator.
    pub fn figment(config_file: Option<&Path>) -> Figment {
        let mut figment = Figment::new();
        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        }

        // The legacy variables always described a PostgreSQL deployment.
        if std::env::var_os("db_name").is_some() {
            figment = figment
                .merge(Serialized::default("metadata.type", "postgres"))
                .merge(Serialized::default("metadata.host", "localhost"))
                .merge(Serialized::default("metadata.ssl_mode", "disable"));
        }

        figment
            .merge(legacy_env())
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check the invariants the server relies on at startup.
    pub fn validate(&self) -> crate::Result<()> {
        match self.auth.jwt_secret.as_deref() {
            Some(secret) if !secret.is_empty() => {}
            _ => return Err(crate::Error::ConfigMissing("auth.jwt_secret".to_string())),
        }
        if !(4..=31).contains(&self.auth.bcrypt_cost) {
            return Err(crate::Error::Config(format!(
                "auth.bcrypt_cost must be between 4 and 31, got {}",
                self.auth.bcrypt_cost
            )));
        }
        if self.sync.channel_capacity == 0 {
            return Err(crate::Error::Config(
                "sync.channel_capacity must be at least 1".to_string(),
            ));
        }
        self.metadata.validate().map_err(crate::Error::Config)?;
        Ok(())
    }

    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses a fixed signing secret and SQLite metadata.
    pub fn for_testing() -> Self {
        Self {
            auth: AuthConfig {
                jwt_secret: Some("test-signing-secret".to_string()),
                token_ttl_secs: default_token_ttl_secs(),
                bcrypt_cost: 4,
            },
            sync: SyncConfig {
                reconcile_interval_secs: 0,
                ..SyncConfig::default()
            },
            ..Self::default()
        }
    }
}

/// Bare environment variables understood for compatibility with existing
/// deployments.
pub fn legacy_env() -> Env {
    Env::raw().filter_map(|key| match key.as_str().to_ascii_lowercase().as_str() {
        "db_user" => Some("metadata.username".into()),
        "db_password" => Some("metadata.password".into()),
        "db_name" => Some("metadata.database".into()),
        "jwtauthsecret" => Some("auth.jwt_secret".into()),
        _ => None,
    })
}
