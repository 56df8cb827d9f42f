//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{CredentialRepo, UploadRepo, UserRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: UserRepo + CredentialRepo + UploadRepo + Send + Sync {
    /// Create the schema if it does not exist.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection avoids
            // persistent "database is locked" failures under axum concurrency.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(path = %path.display(), "opened SQLite metadata store");

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::repos::CredentialMinter;
    use time::OffsetDateTime;
    use upvault_core::token::hash_token;

    #[async_trait]
    impl UserRepo for SqliteStore {
        async fn create_user(
            &self,
            email: &str,
            password_hash: &str,
            minter: &dyn CredentialMinter,
        ) -> MetadataResult<(UserRow, String)> {
            let now = OffsetDateTime::now_utc();
            let mut tx = self.pool.begin().await?;

            let user = sqlx::query_as::<_, UserRow>(
                "INSERT INTO users (email, password_hash, created_at) VALUES (?, ?, ?) RETURNING *",
            )
            .bind(email)
            .bind(password_hash)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| MetadataError::on_insert(e, || format!("email {email} already taken")))?;

            // Dropping the transaction on any error below rolls the user back
            let token = minter.mint(user.id).map_err(MetadataError::Internal)?;
            sqlx::query("INSERT INTO tokens (uid, token_hash, created_at) VALUES (?, ?, ?)")
                .bind(user.id)
                .bind(hash_token(&token))
                .bind(now)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok((user, token))
        }

        async fn get_user(&self, user_id: i64) -> MetadataResult<Option<UserRow>> {
            let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_user_by_email(&self, email: &str) -> MetadataResult<Option<UserRow>> {
            let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = ?")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn delete_user(&self, email: &str) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;

            let user_id: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
                .bind(email)
                .fetch_optional(&mut *tx)
                .await?;
            let Some(user_id) = user_id else {
                return Err(MetadataError::NotFound(format!("user {email} not found")));
            };

            sqlx::query("DELETE FROM tokens WHERE uid = ?")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM users WHERE id = ?")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(())
        }
    }

    #[async_trait]
    impl CredentialRepo for SqliteStore {
        async fn issue_credential(
            &self,
            user_id: i64,
            minter: &dyn CredentialMinter,
        ) -> MetadataResult<String> {
            let token = minter.mint(user_id).map_err(MetadataError::Internal)?;
            sqlx::query(
                r#"
                INSERT INTO tokens (uid, token_hash, created_at) VALUES (?, ?, ?)
                ON CONFLICT(uid) DO UPDATE SET
                    token_hash = excluded.token_hash,
                    created_at = excluded.created_at
                "#,
            )
            .bind(user_id)
            .bind(hash_token(&token))
            .bind(OffsetDateTime::now_utc())
            .execute(&self.pool)
            .await
            .map_err(|e| MetadataError::on_insert(e, || format!("user {user_id}")))?;
            Ok(token)
        }

        async fn get_credential(&self, user_id: i64) -> MetadataResult<Option<CredentialRow>> {
            let row = sqlx::query_as::<_, CredentialRow>("SELECT * FROM tokens WHERE uid = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_credential_by_hash(
            &self,
            token_hash: &str,
        ) -> MetadataResult<Option<CredentialRow>> {
            let row =
                sqlx::query_as::<_, CredentialRow>("SELECT * FROM tokens WHERE token_hash = ?")
                    .bind(token_hash)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn revoke_credential(&self, user_id: i64) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM tokens WHERE uid = ?")
                .bind(user_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "no credential for user {user_id}"
                )));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl UploadRepo for SqliteStore {
        async fn create_upload(
            &self,
            upload_id: &str,
            owner: i64,
            filename: &str,
            size: i64,
        ) -> MetadataResult<UploadRow> {
            let row = sqlx::query_as::<_, UploadRow>(
                r#"
                INSERT INTO files (file_id, owner, filename, size, completed, created_at)
                VALUES (?, ?, ?, ?, 0, ?)
                RETURNING *
                "#,
            )
            .bind(upload_id)
            .bind(owner)
            .bind(filename)
            .bind(size)
            .bind(OffsetDateTime::now_utc())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MetadataError::on_insert(e, || format!("upload {upload_id}")))?;
            Ok(row)
        }

        async fn mark_completed(&self, upload_id: &str) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE files SET completed = 1, completed_at = COALESCE(completed_at, ?) WHERE file_id = ?",
            )
            .bind(OffsetDateTime::now_utc())
            .bind(upload_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "upload {upload_id} not found"
                )));
            }
            Ok(())
        }

        async fn list_uploads_by_owner(&self, owner: i64) -> MetadataResult<Vec<UploadRow>> {
            let rows =
                sqlx::query_as::<_, UploadRow>("SELECT * FROM files WHERE owner = ? ORDER BY id")
                    .bind(owner)
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows)
        }

        async fn get_upload(&self, upload_id: &str) -> MetadataResult<Option<UploadRow>> {
            let row = sqlx::query_as::<_, UploadRow>("SELECT * FROM files WHERE file_id = ?")
                .bind(upload_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn authorize_and_delete(
            &self,
            requester: i64,
            upload_id: &str,
        ) -> MetadataResult<()> {
            let owner: Option<i64> = sqlx::query_scalar("SELECT owner FROM files WHERE file_id = ?")
                .bind(upload_id)
                .fetch_optional(&self.pool)
                .await?;
            match owner {
                None => {
                    return Err(MetadataError::NotFound(format!(
                        "upload {upload_id} not found"
                    )));
                }
                Some(owner) if owner != requester => {
                    return Err(MetadataError::Unauthorized(format!(
                        "upload {upload_id} is owned by another user"
                    )));
                }
                Some(_) => {}
            }

            // Conditional on the owner so a lost race deletes nothing
            let result = sqlx::query("DELETE FROM files WHERE file_id = ? AND owner = ?")
                .bind(upload_id)
                .bind(requester)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "upload {upload_id} not found"
                )));
            }
            Ok(())
        }

        async fn list_uploads_created_before(
            &self,
            cutoff: OffsetDateTime,
        ) -> MetadataResult<Vec<UploadRow>> {
            let rows = sqlx::query_as::<_, UploadRow>(
                "SELECT * FROM files WHERE created_at < ? ORDER BY created_at, id",
            )
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_upload(&self, upload_id: &str) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM files WHERE file_id = ?")
                .bind(upload_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "upload {upload_id} not found"
                )));
            }
            Ok(())
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Accounts
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- One active credential per user; only the SHA-256 of the token is kept
CREATE TABLE IF NOT EXISTS tokens (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
    token_hash TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

-- Upload ownership ledger
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id TEXT NOT NULL UNIQUE,
    owner INTEGER NOT NULL,
    filename TEXT NOT NULL,
    size INTEGER NOT NULL,
    completed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_files_owner ON files(owner);
CREATE INDEX IF NOT EXISTS idx_files_created_at ON files(created_at);
"#;
