//! Job error types.

use thiserror::Error;

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid launch parameters: {0}")]
    InvalidSpec(#[from] vodpipe_models::JobSpecError),

    #[error("Rejected source key: {0}")]
    InvalidKey(#[from] vodpipe_models::ValidationError),

    #[error("Download of {bucket}/{key} failed: {source}")]
    DownloadFailed {
        bucket: String,
        key: String,
        #[source]
        source: vodpipe_storage::StorageError,
    },

    #[error("Upload of {key} failed: {source}")]
    UploadFailed {
        key: String,
        #[source]
        source: vodpipe_storage::StorageError,
    },

    #[error("Media error: {}", .0.detailed_message())]
    Media(#[from] vodpipe_media::MediaError),

    #[error("Status write failed: {0}")]
    Status(#[from] vodpipe_firestore::FirestoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl JobError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn download_failed(bucket: &str, key: &str, source: vodpipe_storage::StorageError) -> Self {
        Self::DownloadFailed {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source,
        }
    }

    pub fn upload_failed(key: &str, source: vodpipe_storage::StorageError) -> Self {
        Self::UploadFailed {
            key: key.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vodpipe_storage::StorageError;

    #[test]
    fn test_messages_name_the_object() {
        let err = JobError::download_failed("B", "alice###trip.mp4", StorageError::not_found("B", "alice###trip.mp4"));
        let msg = err.to_string();
        assert!(msg.contains("B/alice###trip.mp4"));
    }

    #[test]
    fn test_media_message_carries_stderr() {
        let err = JobError::from(vodpipe_media::MediaError::ffmpeg_failed(
            "Encode 480p failed",
            Some("Invalid data found when processing input".to_string()),
            Some(1),
        ));
        assert!(err.to_string().contains("Invalid data found"));
    }
}
