//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::{CredentialMinter, CredentialRepo, UploadRepo, UserRepo};
use crate::store::MetadataStore;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;
use upvault_core::config::PgSslMode;
use upvault_core::token::hash_token;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// This is how the legacy `db_user` / `db_password` / `db_name`
    /// variables are applied.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement,
        // so we split the schema and execute each statement separately.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl UserRepo for PostgresStore {
    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        minter: &dyn CredentialMinter,
    ) -> MetadataResult<(UserRow, String)> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (email, password_hash, created_at) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(email)
        .bind(password_hash)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| MetadataError::on_insert(e, || format!("email {email} already taken")))?;

        // Dropping the transaction on any error below rolls the user back
        let token = minter.mint(user.id).map_err(MetadataError::Internal)?;
        sqlx::query("INSERT INTO tokens (uid, token_hash, created_at) VALUES ($1, $2, $3)")
            .bind(user.id)
            .bind(hash_token(&token))
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((user, token))
    }

    async fn get_user(&self, user_id: i64) -> MetadataResult<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_user_by_email(&self, email: &str) -> MetadataResult<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn delete_user(&self, email: &str) -> MetadataResult<()> {
        let mut tx = self.pool.begin().await?;

        let user_id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM users WHERE email = $1 FOR UPDATE")
                .bind(email)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(user_id) = user_id else {
            return Err(MetadataError::NotFound(format!("user {email} not found")));
        };

        sqlx::query("DELETE FROM tokens WHERE uid = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialRepo for PostgresStore {
    async fn issue_credential(
        &self,
        user_id: i64,
        minter: &dyn CredentialMinter,
    ) -> MetadataResult<String> {
        let token = minter.mint(user_id).map_err(MetadataError::Internal)?;
        sqlx::query(
            r#"
            INSERT INTO tokens (uid, token_hash, created_at) VALUES ($1, $2, $3)
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
        let row = sqlx::query_as::<_, CredentialRow>("SELECT * FROM tokens WHERE uid = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_credential_by_hash(
        &self,
        token_hash: &str,
    ) -> MetadataResult<Option<CredentialRow>> {
        let row = sqlx::query_as::<_, CredentialRow>("SELECT * FROM tokens WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn revoke_credential(&self, user_id: i64) -> MetadataResult<()> {
        let result = sqlx::query("DELETE FROM tokens WHERE uid = $1")
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
impl UploadRepo for PostgresStore {
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
            VALUES ($1, $2, $3, $4, FALSE, $5)
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
            "UPDATE files SET completed = TRUE, completed_at = COALESCE(completed_at, $1) WHERE file_id = $2",
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
            sqlx::query_as::<_, UploadRow>("SELECT * FROM files WHERE owner = $1 ORDER BY id")
                .bind(owner)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    async fn get_upload(&self, upload_id: &str) -> MetadataResult<Option<UploadRow>> {
        let row = sqlx::query_as::<_, UploadRow>("SELECT * FROM files WHERE file_id = $1")
            .bind(upload_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn authorize_and_delete(&self, requester: i64, upload_id: &str) -> MetadataResult<()> {
        let owner: Option<i64> = sqlx::query_scalar("SELECT owner FROM files WHERE file_id = $1")
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
        let result = sqlx::query("DELETE FROM files WHERE file_id = $1 AND owner = $2")
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
            "SELECT * FROM files WHERE created_at < $1 ORDER BY created_at, id",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_upload(&self, upload_id: &str) -> MetadataResult<()> {
        let result = sqlx::query("DELETE FROM files WHERE file_id = $1")
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
