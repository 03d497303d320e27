//! Job launch parameters, bound into the Job as environment variables.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::filename::FilenameIdentity;
use crate::video::VideoId;

pub const ENV_SOURCE_BUCKET: &str = "SOURCE_BUCKET";
pub const ENV_DESTINATION_BUCKET: &str = "DESTINATION_BUCKET";
pub const ENV_VIDEO_KEY: &str = "VIDEO_KEY";
pub const ENV_OUTPUT_PREFIX: &str = "OUTPUT_PREFIX";
pub const ENV_WATERMARK_KEY: &str = "WATERMARK_KEY";

/// Root under which every run's outputs are written.
pub const OUTPUT_ROOT: &str = "processed";

/// Errors reading a JobSpec back from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobSpecError {
    #[error("Missing required variable {0}")]
    MissingVar(&'static str),

    #[error("Output prefix {0:?} has no video identifier segment")]
    InvalidOutputPrefix(String),
}

/// Parameters of one Job execution. Immutable once launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub source_bucket: String,
    /// Decoded source object key
    pub video_key: String,
    pub destination_bucket: String,
    /// `processed/{video_id}/`
    pub output_prefix: String,
    /// Resolved overlay object key, if any
    pub watermark_key: Option<String>,
}

/// Output prefix for a video identifier.
pub fn output_prefix_for(video_id: &VideoId) -> String {
    format!("{}/{}/", OUTPUT_ROOT, video_id)
}

impl JobSpec {
    /// Build the launch parameters for an accepted key. `disambiguator` makes the output
    /// prefix unique per run (Unix millis at dispatch).
    pub fn new(
        identity: &FilenameIdentity,
        source_bucket: impl Into<String>,
        video_key: impl Into<String>,
        destination_bucket: impl Into<String>,
        disambiguator: i64,
    ) -> Self {
        Self {
            source_bucket: source_bucket.into(),
            video_key: video_key.into(),
            destination_bucket: destination_bucket.into(),
            output_prefix: output_prefix_for(&identity.video_id(disambiguator)),
            watermark_key: None,
        }
    }

    pub fn with_watermark(mut self, key: impl Into<String>) -> Self {
        self.watermark_key = Some(key.into());
        self
    }

    /// Video identifier: the last non-empty segment of the output prefix.
    pub fn video_id(&self) -> Result<VideoId, JobSpecError> {
        self.output_prefix
            .split('/')
            .filter(|s| !s.is_empty())
            .last()
            .map(VideoId::from)
            .ok_or_else(|| JobSpecError::InvalidOutputPrefix(self.output_prefix.clone()))
    }

    /// Environment bindings for the launched Job.
    pub fn to_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            (ENV_SOURCE_BUCKET.to_string(), self.source_bucket.clone()),
            (ENV_DESTINATION_BUCKET.to_string(), self.destination_bucket.clone()),
            (ENV_VIDEO_KEY.to_string(), self.video_key.clone()),
            (ENV_OUTPUT_PREFIX.to_string(), self.output_prefix.clone()),
        ];
        if let Some(key) = &self.watermark_key {
            env.push((ENV_WATERMARK_KEY.to_string(), key.clone()));
        }
        env
    }

    /// Read the launch parameters from the process environment.
    pub fn from_env() -> Result<Self, JobSpecError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the launch parameters through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, JobSpecError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or(JobSpecError::MissingVar(name))
        };

        let spec = Self {
            source_bucket: required(ENV_SOURCE_BUCKET)?,
            video_key: required(ENV_VIDEO_KEY)?,
            destination_bucket: required(ENV_DESTINATION_BUCKET)?,
            output_prefix: required(ENV_OUTPUT_PREFIX)?,
            watermark_key: lookup(ENV_WATERMARK_KEY).filter(|v| !v.is_empty()),
        };
        spec.video_id()?;
        Ok(spec)
    }
}
