//! Local filesystem upload store.
//!
//! Every upload is two files under the root: `<id>` holds the received
//! bytes and `<id>.info` holds the JSON-encoded [`UploadInfo`].

use crate::error::{EngineError, EngineResult};
use crate::traits::{BodyStream, ByteStream, UploadInfo, UploadStore};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{instrument, warn};
use upvault_core::UploadId;
use uuid::Uuid;

/// Default chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

const INFO_SUFFIX: &str = ".info";
const TEMP_MARKER: &str = ".tmp.";

/// Upload store backed by a local directory.
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    /// Create a new filesystem store, creating the root if needed.
    pub async fn new(root: impl AsRef<Path>) -> EngineResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a file name under the root, rejecting anything that is not a
    /// single normal path component.
    fn child_path(&self, name: &str) -> EngineResult<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(name)),
            _ => Err(EngineError::InvalidId(format!(
                "path traversal not allowed: {name}"
            ))),
        }
    }

    fn data_path(&self, id: &UploadId) -> EngineResult<PathBuf> {
        self.child_path(id.as_str())
    }

    fn info_path(&self, id: &UploadId) -> EngineResult<PathBuf> {
        self.child_path(&format!("{}{INFO_SUFFIX}", id.as_str()))
    }

    /// Write the info sidecar atomically: temp file, fsync, rename.
    async fn write_info(&self, info: &UploadInfo) -> EngineResult<()> {
        let path = self.info_path(&info.id)?;
        let data = serde_json::to_vec(info)?;

        // Unique temp name so concurrent writers never share a file
        let temp_path = self.child_path(&format!(
            "{}{INFO_SUFFIX}{TEMP_MARKER}{}",
            info.id.as_str(),
            Uuid::new_v4().simple()
        ))?;
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
        }
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

fn not_found(id: &UploadId) -> impl FnOnce(std::io::Error) -> EngineError + '_ {
    move |e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            EngineError::NotFound(id.to_string())
        } else {
            EngineError::Io(e)
        }
    }
}

#[async_trait]
impl UploadStore for FilesystemStore {
    #[instrument(skip(self, info), fields(backend = "filesystem", upload_id = %info.id))]
    async fn create(&self, info: &UploadInfo) -> EngineResult<()> {
        let data_path = self.data_path(&info.id)?;

        // create_new makes id collisions fail instead of truncating
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&data_path)
            .await
        {
            Ok(file) => file.sync_all().await?,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(EngineError::AlreadyExists(info.id.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.write_info(info).await {
            let _ = fs::remove_file(&data_path).await;
            return Err(e);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn info(&self, id: &UploadId) -> EngineResult<UploadInfo> {
        let path = self.info_path(id)?;
        let data = fs::read(&path).await.map_err(not_found(id))?;
        Ok(serde_json::from_slice(&data)?)
    }

    #[instrument(skip(self, body), fields(backend = "filesystem"))]
    async fn write(
        &self,
        id: &UploadId,
        offset: u64,
        limit: u64,
        mut body: BodyStream,
    ) -> EngineResult<u64> {
        let mut info = self.info(id).await?;
        if info.offset != offset {
            return Err(EngineError::OffsetMismatch {
                expected: info.offset,
                actual: offset,
            });
        }

        let data_path = self.data_path(id)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .open(&data_path)
            .await
            .map_err(not_found(id))?;
        // Drop any bytes past the recorded offset left by an interrupted write
        file.set_len(offset).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;

        let mut written: u64 = 0;
        let mut failure = None;
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    failure = Some(EngineError::Body(e.to_string()));
                    break;
                }
            };
            let room = limit - written;
            let accepted = (chunk.len() as u64).min(room);
            if accepted > 0 {
                let end = usize::try_from(accepted).unwrap_or(chunk.len());
                if let Err(e) = file.write_all(&chunk[..end]).await {
                    failure = Some(EngineError::Io(e));
                    break;
                }
                written += accepted;
            }
            if accepted < chunk.len() as u64 {
                failure = Some(EngineError::LengthExceeded {
                    declared: info.size,
                    received: offset + written + (chunk.len() as u64 - accepted),
                });
                break;
            }
        }

        file.sync_all().await?;
        drop(file);

        if written > 0 {
            info.offset = offset + written;
            self.write_info(&info).await?;
        }

        match failure {
            Some(err) => {
                warn!(upload_id = %id, written, error = %err, "upload chunk interrupted");
                Err(err)
            }
            None => Ok(info.offset),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn read(&self, id: &UploadId) -> EngineResult<ByteStream> {
        let info = self.info(id).await?;
        let path = self.data_path(id)?;
        let file = fs::File::open(&path).await.map_err(not_found(id))?;

        // Stream the file in chunks instead of loading entirely into memory
        let stream = async_stream::try_stream! {
            let mut file = file.take(info.offset);
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn terminate(&self, id: &UploadId) -> EngineResult<()> {
        let info_path = self.info_path(id)?;
        fs::remove_file(&info_path).await.map_err(not_found(id))?;

        let data_path = self.data_path(id)?;
        match fs::remove_file(&data_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list_ids(&self) -> EngineResult<Vec<UploadId>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            // Use file_type() to skip symlinks and directories
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(stem) = name.strip_suffix(INFO_SUFFIX)
                && let Ok(id) = UploadId::parse(stem)
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> EngineResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            EngineError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {}", e),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}
