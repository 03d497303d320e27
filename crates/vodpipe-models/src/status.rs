//! Status record and the companion result file.

use chrono::{DateTime, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::video::VideoId;

/// Processing status of one video run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoStatus {
    /// Job launched, not yet started
    #[default]
    Pending,
    /// Job is running
    Processing,
    /// All outputs uploaded
    Completed,
    /// Pipeline failed
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Pending => "PENDING",
            VideoStatus::Processing => "PROCESSING",
            VideoStatus::Completed => "COMPLETED",
            VideoStatus::Failed => "FAILED",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStatus::Completed | VideoStatus::Failed)
    }
}

impl std::fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VideoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(VideoStatus::Pending),
            "PROCESSING" => Ok(VideoStatus::Processing),
            "COMPLETED" => Ok(VideoStatus::Completed),
            "FAILED" => Ok(VideoStatus::Failed),
            other => Err(format!("unknown video status: {}", other)),
        }
    }
}

/// Durable per-video record in the metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    /// Video identifier (document id)
    pub video_id: VideoId,
    /// Tenant that uploaded the source
    pub owner: String,
    /// Current status
    pub status: VideoStatus,
    /// Bucket holding the source object
    pub source_bucket: String,
    /// Source object key
    pub source_key: String,
    /// Output prefix in the destination bucket
    pub output_prefix: String,
    /// Public URL of the sprite sheet (COMPLETED only)
    pub thumbnail_url: Option<String>,
    /// Public URL of the master manifest (COMPLETED only)
    pub master_playlist_url: Option<String>,
    /// Failure message (FAILED only)
    pub error: Option<String>,
    /// When the record was first written
    pub created_at: DateTime<Utc>,
    /// When the record was last written
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    /// Creates a `PENDING` record.
    pub fn pending(
        video_id: VideoId,
        owner: impl Into<String>,
        source_bucket: impl Into<String>,
        source_key: impl Into<String>,
        output_prefix: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            video_id,
            owner: owner.into(),
            status: VideoStatus::Pending,
            source_bucket: source_bucket.into(),
            source_key: source_key.into(),
            output_prefix: output_prefix.into(),
            thumbnail_url: None,
            master_playlist_url: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a `PROCESSING` record.
    pub fn processing(
        video_id: VideoId,
        owner: impl Into<String>,
        source_bucket: impl Into<String>,
        source_key: impl Into<String>,
        output_prefix: impl Into<String>,
    ) -> Self {
        let mut record = Self::pending(video_id, owner, source_bucket, source_key, output_prefix);
        record.status = VideoStatus::Processing;
        record
    }

    /// Marks the record `COMPLETED` with its output references.
    pub fn complete(&mut self, thumbnail_url: impl Into<String>, master_playlist_url: impl Into<String>) {
        self.status = VideoStatus::Completed;
        self.thumbnail_url = Some(thumbnail_url.into());
        self.master_playlist_url = Some(master_playlist_url.into());
        self.error = None;
        self.updated_at = Utc::now();
    }

    /// Marks the record `FAILED` and drops any output references.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = VideoStatus::Failed;
        self.thumbnail_url = None;
        self.master_playlist_url = None;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
    }
}

/// Machine-readable mirror of the status record, stored as `result.json`
/// under the output prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResultFile {
    pub status: VideoStatus,
    pub source_video: String,
    pub output_prefix: String,
    /// Manifest key relative to the bucket (COMPLETED only)
    pub master_playlist: Option<String>,
    pub thumbnail_url: Option<String>,
    pub master_playlist_url: Option<String>,
    /// RFC 3339 UTC
    pub timestamp: String,
    pub error: Option<String>,
}

impl ResultFile {
    /// Builds the result file for a record.
    pub fn from_record(record: &StatusRecord, master_playlist: Option<String>) -> Self {
        let completed = record.status == VideoStatus::Completed;
        Self {
            status: record.status,
            source_video: record.source_key.clone(),
            output_prefix: record.output_prefix.clone(),
            master_playlist: if completed { master_playlist } else { None },
            thumbnail_url: record.thumbnail_url.clone(),
            master_playlist_url: record.master_playlist_url.clone(),
            timestamp: record.updated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            error: record.error.clone(),
        }
    }
}
