//! Server test utilities.

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;
use upvault_core::config::{AppConfig, MetadataConfig, StorageConfig};
use upvault_core::{TokenIssuer, UserId};
use upvault_engine::{EventReceivers, FilesystemStore, UploadEngine, event_channels};
use upvault_metadata::models::UploadRow;
use upvault_metadata::{MetadataStore, SqliteStore, UploadRepo};
use upvault_server::{AppState, SyncHandle, Synchronizer, create_router};

/// A buffered response.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    /// SQLite file behind `state.metadata`.
    pub db_path: PathBuf,
    sync: Option<SyncHandle>,
    /// Held when the synchronizer is not running, so the engine never
    /// blocks on a closed channel.
    _events: Option<EventReceivers>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage and a running
    /// lifecycle synchronizer.
    pub async fn new() -> Self {
        Self::build(|_| {}, true).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, true).await
    }

    /// Create a test server whose lifecycle events are never consumed.
    pub async fn without_sync() -> Self {
        Self::build(|_| {}, false).await
    }

    async fn build<F>(modifier: F, run_sync: bool) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let storage_path = temp_dir.path().join("tusd-files");
        let db_path = temp_dir.path().join("metadata.db");

        let mut config = AppConfig::for_testing();
        config.storage = StorageConfig {
            path: storage_path.clone(),
        };
        config.metadata = MetadataConfig::Sqlite {
            path: db_path.clone(),
        };
        modifier(&mut config);

        let store = Arc::new(
            FilesystemStore::new(&storage_path)
                .await
                .expect("Failed to create upload store"),
        );
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path)
                .await
                .expect("Failed to create metadata store"),
        );

        let (senders, receivers) = event_channels(config.sync.channel_capacity);
        let engine = Arc::new(
            UploadEngine::new(store, senders).with_max_size(config.server.max_upload_size),
        );
        let (sync, events) = if run_sync {
            (Some(Synchronizer::new(metadata.clone()).spawn(receivers)), None)
        } else {
            (None, Some(receivers))
        };

        let issuer = TokenIssuer::from_config(&config.auth).expect("Failed to create issuer");
        let state = AppState::new(config, metadata, engine, issuer);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            db_path,
            sync,
            _events: events,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Stop the synchronizer after it drains buffered events.
    pub async fn shutdown_sync(&mut self) {
        if let Some(sync) = self.sync.take() {
            sync.shutdown().await.expect("synchronizer failed");
        }
    }

    /// Send a request through the router and buffer the response.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Send a request with an optional JSON body and bearer token.
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let body = match body {
            Some(v) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).unwrap()).await
    }

    /// Sign up and log in, returning the user id and bearer token.
    pub async fn register(&self, email: &str, password: &str) -> (UserId, String) {
        let credentials = serde_json::json!({ "email": email, "password": password });

        let signup = self
            .request("POST", "/signup", Some(credentials.clone()), None)
            .await;
        assert_eq!(signup.status, StatusCode::CREATED, "{}", signup.text());

        let login = self.request("POST", "/login", Some(credentials), None).await;
        assert_eq!(login.status, StatusCode::OK, "{}", login.text());
        let body = login.json();
        (
            body["owning_user_id"].as_i64().expect("owning_user_id"),
            body["token"].as_str().expect("token").to_string(),
        )
    }

    /// Create an upload through `POST /tus` and return its id.
    pub async fn create_upload(&self, token: &str, size: u64, metadata: &str) -> String {
        let request = Request::builder()
            .method("POST")
            .uri("/tus")
            .header("Authorization", format!("Bearer {token}"))
            .header("Tus-Resumable", "1.0.0")
            .header("Upload-Length", size.to_string())
            .header("Upload-Metadata", metadata)
            .body(Body::empty())
            .unwrap();
        let response = self.send(request).await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.text());

        let location = response.header("location").expect("Location header");
        location
            .rsplit('/')
            .next()
            .expect("upload id in Location")
            .to_string()
    }

    /// Append `data` at `offset` through `PATCH /tus/{id}`.
    pub async fn patch_upload(
        &self,
        token: &str,
        upload_id: &str,
        offset: u64,
        data: Vec<u8>,
    ) -> TestResponse {
        let request = Request::builder()
            .method("PATCH")
            .uri(format!("/tus/{upload_id}"))
            .header("Authorization", format!("Bearer {token}"))
            .header("Tus-Resumable", "1.0.0")
            .header("Content-Type", "application/offset+octet-stream")
            .header("Upload-Offset", offset.to_string())
            .header("Content-Length", data.len().to_string())
            .body(Body::from(data))
            .unwrap();
        self.send(request).await
    }

    /// Poll the ledger until the row for `upload_id` satisfies `ready`.
    pub async fn wait_for_row<F>(&self, upload_id: &str, ready: F) -> UploadRow
    where
        F: Fn(&UploadRow) -> bool,
    {
        for _ in 0..500 {
            if let Some(row) = self.metadata().get_upload(upload_id).await.unwrap()
                && ready(&row)
            {
                return row;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("ledger row for {upload_id} never became ready");
    }
}
