//! Work directory cleanup.

use std::path::Path;

use tracing::{debug, warn};

/// Remove a job's scratch directory. Failures are logged and never
/// returned; the result reports whether the directory is gone.
pub async fn remove_work_dir(path: &Path) -> bool {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed work directory");
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!(path = %path.display(), "Failed to remove work directory: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_removes_nested_tree() {
        let root = tempfile::tempdir().unwrap();
        let job_dir = root.path().join("alice###trip-1");
        tokio::fs::create_dir_all(job_dir.join("output/360p")).await.unwrap();
        tokio::fs::write(job_dir.join("output/360p/index.m3u8"), "#EXTM3U\n").await.unwrap();

        assert!(remove_work_dir(&job_dir).await);
        assert!(!job_dir.exists());
        assert!(root.path().exists());
    }

    #[tokio::test]
    async fn test_missing_directory_is_not_an_error() {
        let root = tempfile::tempdir().unwrap();
        assert!(remove_work_dir(&root.path().join("never-created")).await);
    }
}
