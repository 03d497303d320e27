//! Object storage capability used by the transcoding job.

use async_trait::async_trait;
use std::path::Path;

use crate::error::StorageResult;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download `bucket/key` to `path`, creating parent directories.
    async fn download_file(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<()>;

    /// Upload a local file to `bucket/key`.
    async fn upload_file(&self, bucket: &str, key: &str, path: &Path, content_type: &str) -> StorageResult<()>;

    /// Upload an in-memory body to `bucket/key`.
    async fn upload_bytes(&self, bucket: &str, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()>;
}
