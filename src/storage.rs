//! Transient video blob storage.
//!
//! Uploaded videos live here between upload-to-storage and the last
//! successful platform upload. Paths are namespaced per user so ownership
//! can be checked from the path alone.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, data: Bytes) -> Result<(), BlobError>;

    async fn get(&self, path: &str) -> Result<Bytes, BlobError>;

    async fn delete(&self, path: &str) -> Result<(), BlobError>;

    async fn exists(&self, path: &str) -> Result<bool, BlobError>;
}

pub fn get_extension(content_type: &str) -> &'static str {
    match content_type {
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        "video/x-msvideo" => "avi",
        "video/x-matroska" => "mkv",
        _ => "bin",
    }
}

/// Inverse of [`get_extension`], for blobs read back for upload
pub fn content_type_for(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext) {
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        Some("mkv") => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

/// Namespace prefix for a user's blobs
pub fn user_prefix(user_id: i64) -> String {
    format!("videos/user_{}/", user_id)
}

/// Path: videos/user_123/2025-12-06/1733500000000-3f2a9c1e.mp4
pub fn video_blob_path(user_id: i64, content_type: &str) -> String {
    let now = Utc::now();
    let suffix: u32 = rand::rng().random();
    format!(
        "{}{}/{}-{:08x}.{}",
        user_prefix(user_id),
        now.format("%Y-%m-%d"),
        now.timestamp_millis(),
        suffix,
        get_extension(content_type)
    )
}

/// True when `path` sits inside the user's namespace and cannot escape it
pub fn is_owned_by(path: &str, user_id: i64) -> bool {
    path.starts_with(&user_prefix(user_id))
        && !path.split('/').any(|segment| segment == ".." || segment.is_empty())
}

/// Filesystem store rooted at `LOCAL_STORAGE_PATH`
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

fn map_io(path: &str, e: std::io::Error) -> BlobError {
    if e.kind() == std::io::ErrorKind::NotFound {
        BlobError::NotFound(path.to_string())
    } else {
        BlobError::Io(e)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, path: &str, data: Bytes) -> Result<(), BlobError> {
        let full_path = self.root.join(path);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, &data).await?;
        debug!(path, bytes = data.len(), "Stored blob locally");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Bytes, BlobError> {
        let data = tokio::fs::read(self.root.join(path))
            .await
            .map_err(|e| map_io(path, e))?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, path: &str) -> Result<(), BlobError> {
        tokio::fs::remove_file(self.root.join(path))
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn exists(&self, path: &str) -> Result<bool, BlobError> {
        Ok(tokio::fs::try_exists(self.root.join(path)).await?)
    }
}

/// Google Cloud Storage backed store
pub struct GcsBlobStore {
    gcs: google_cloud_storage::client::Storage,
    bucket_name: String,
}

impl GcsBlobStore {
    pub fn new(gcs: google_cloud_storage::client::Storage, bucket_name: impl Into<String>) -> Self {
        Self {
            gcs,
            bucket_name: bucket_name.into(),
        }
    }

    fn bucket(&self) -> String {
        format!("projects/_/buckets/{}", self.bucket_name)
    }
}

fn map_gcs(path: &str, e: google_cloud_storage::Error) -> BlobError {
    if e.http_status_code() == Some(404) {
        BlobError::NotFound(path.to_string())
    } else {
        BlobError::Backend(e.to_string())
    }
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    async fn put(&self, path: &str, data: Bytes) -> Result<(), BlobError> {
        self.gcs
            .write_object(&self.bucket(), path, data)
            .send_buffered()
            .await
            .map_err(|e| map_gcs(path, e))?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Bytes, BlobError> {
        let mut resp = self
            .gcs
            .read_object(&self.bucket(), path)
            .send()
            .await
            .map_err(|e| map_gcs(path, e))?;

        let mut data = Vec::new();
        while let Some(chunk) = resp.next().await {
            data.extend_from_slice(&chunk.map_err(|e| map_gcs(path, e))?);
        }
        Ok(Bytes::from(data))
    }

    async fn delete(&self, path: &str) -> Result<(), BlobError> {
        let client = cloud_storage::Client::default();
        client
            .object()
            .delete(&self.bucket_name, path)
            .await
            .map_err(|e| BlobError::Backend(e.to_string()))
    }

    /// Metadata lookup only; the object body is never fetched
    async fn exists(&self, path: &str) -> Result<bool, BlobError> {
        let client = cloud_storage::Client::default();
        match client.object().read(&self.bucket_name, path).await {
            Ok(_) => Ok(true),
            Err(cloud_storage::Error::Google(response)) if response.error.code == 404 => Ok(false),
            Err(e) => Err(BlobError::Backend(e.to_string())),
        }
    }
}

/// Process-local store for tests. Counts deletes per path.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Bytes>>,
    deletes: Mutex<HashMap<String, usize>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delete_count(&self, path: &str) -> usize {
        self.deletes
            .lock()
            .map(|d| d.get(path).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

fn lock_err() -> BlobError {
    BlobError::Backend("memory store lock poisoned".to_string())
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, data: Bytes) -> Result<(), BlobError> {
        self.blobs
            .lock()
            .map_err(|_| lock_err())?
            .insert(path.to_string(), data);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Bytes, BlobError> {
        self.blobs
            .lock()
            .map_err(|_| lock_err())?
            .get(path)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(path.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<(), BlobError> {
        let removed = self.blobs.lock().map_err(|_| lock_err())?.remove(path);
        *self
            .deletes
            .lock()
            .map_err(|_| lock_err())?
            .entry(path.to_string())
            .or_default() += 1;
        removed
            .map(|_| ())
            .ok_or_else(|| BlobError::NotFound(path.to_string()))
    }

    async fn exists(&self, path: &str) -> Result<bool, BlobError> {
        Ok(self.blobs.lock().map_err(|_| lock_err())?.contains_key(path))
    }
}
