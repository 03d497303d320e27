//! Job configuration.

use std::path::PathBuf;

use vodpipe_media::SpriteLayout;
use vodpipe_models::encoding::DEFAULT_HLS_SEGMENT_SECONDS;
use vodpipe_models::{default_catalog, EncodingConfig, RenditionProfile};

use crate::error::{JobError, JobResult};

/// Job configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Root for per-video scratch directories
    pub work_dir: PathBuf,
    /// Base of public output URLs; defaults to the destination bucket's S3 host
    pub public_base_url: Option<String>,
    /// HLS segment duration in seconds
    pub segment_seconds: u32,
    /// Per-invocation FFmpeg timeout, 0 disables
    pub ffmpeg_timeout_secs: u64,
    /// Ordered rendition catalog
    pub catalog: Vec<RenditionProfile>,
    /// Bucket holding overlay images; defaults to the source bucket
    pub overlay_bucket: Option<String>,
    pub sprite_layout: SpriteLayout,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/vodpipe"),
            public_base_url: None,
            segment_seconds: DEFAULT_HLS_SEGMENT_SECONDS,
            ffmpeg_timeout_secs: 3600,
            catalog: default_catalog(),
            overlay_bucket: None,
            sprite_layout: SpriteLayout::default(),
        }
    }
}

impl JobConfig {
    /// Create config from environment variables.
    pub fn from_env() -> JobResult<Self> {
        let defaults = Self::default();

        let catalog = match std::env::var("RENDITION_PROFILES") {
            Ok(json) if !json.trim().is_empty() => parse_catalog(&json)?,
            _ => defaults.catalog,
        };

        Ok(Self {
            work_dir: std::env::var("JOB_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            public_base_url: non_empty("PUBLIC_BASE_URL"),
            segment_seconds: std::env::var("HLS_SEGMENT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.segment_seconds),
            ffmpeg_timeout_secs: std::env::var("FFMPEG_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.ffmpeg_timeout_secs),
            catalog,
            overlay_bucket: non_empty("OVERLAY_BUCKET"),
            sprite_layout: defaults.sprite_layout,
        })
    }

    pub fn encoding(&self) -> EncodingConfig {
        EncodingConfig::default().with_segment_seconds(self.segment_seconds)
    }

    /// Public URL of `key` in `bucket`, with each path segment percent-encoded.
    pub fn public_url(&self, bucket: &str, key: &str) -> String {
        let base = match &self.public_base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}.s3.amazonaws.com", bucket),
        };
        let path: Vec<String> = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/{}", base, path.join("/"))
    }
}

fn non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a `RENDITION_PROFILES` JSON array.
pub fn parse_catalog(json: &str) -> JobResult<Vec<RenditionProfile>> {
    let catalog: Vec<RenditionProfile> = serde_json::from_str(json)
        .map_err(|e| JobError::config_error(format!("RENDITION_PROFILES is not a valid profile list: {}", e)))?;
    if catalog.is_empty() {
        return Err(JobError::config_error("RENDITION_PROFILES must list at least one rendition"));
    }
    Ok(catalog)
}
