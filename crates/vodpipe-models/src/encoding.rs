//! Rendition catalog and encoding configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "veryfast";
/// Default HLS segment length in seconds
pub const DEFAULT_HLS_SEGMENT_SECONDS: u32 = 6;

/// Per-rendition playlist file name
pub const RENDITION_PLAYLIST_NAME: &str = "index.m3u8";
/// Per-rendition segment file pattern
pub const RENDITION_SEGMENT_PATTERN: &str = "segment_%03d.ts";
/// Top-level manifest file name
pub const MASTER_PLAYLIST_NAME: &str = "master.m3u8";
/// Sprite sheet file name
pub const SPRITE_FILE_NAME: &str = "sprite.jpg";
/// Timeline index file name
pub const TIMELINE_FILE_NAME: &str = "thumbnails.vtt";
/// Result file name
pub const RESULT_FILE_NAME: &str = "result.json";

/// Invalid compact bitrate strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BitrateError {
    #[error("Bitrate is empty")]
    Empty,

    #[error("Invalid bitrate {0:?}")]
    Invalid(String),
}

/// Parse a compact bitrate such as `800k`, `2.5M` or `96000` into bits/s.
pub fn parse_bitrate(value: &str) -> Result<u64, BitrateError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(BitrateError::Empty);
    }

    let (number, multiplier) = match value.chars().last() {
        Some('k' | 'K') => (&value[..value.len() - 1], 1_000u64),
        Some('m' | 'M') => (&value[..value.len() - 1], 1_000_000u64),
        _ => (value, 1u64),
    };

    if multiplier == 1 {
        return number
            .parse::<u64>()
            .map_err(|_| BitrateError::Invalid(value.to_string()));
    }

    let parsed: f64 = number
        .parse()
        .map_err(|_| BitrateError::Invalid(value.to_string()))?;
    if !parsed.is_finite() || parsed < 0.0 {
        return Err(BitrateError::Invalid(value.to_string()));
    }

    Ok((parsed * multiplier as f64).round() as u64)
}

/// One target rendition in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenditionProfile {
    /// Rendition name, also the output subdirectory (e.g. "360p")
    pub name: String,
    /// Target width in pixels
    pub width: u32,
    /// Target height in pixels
    pub height: u32,
    /// Target video bitrate (compact form, e.g. "800k")
    pub video_bitrate: String,
    /// Target audio bitrate (compact form, e.g. "96k")
    pub audio_bitrate: String,
}

impl RenditionProfile {
    pub fn new(
        name: impl Into<String>,
        width: u32,
        height: u32,
        video_bitrate: impl Into<String>,
        audio_bitrate: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            video_bitrate: video_bitrate.into(),
            audio_bitrate: audio_bitrate.into(),
        }
    }

    /// Video bitrate in bits/s.
    pub fn video_bps(&self) -> Result<u64, BitrateError> {
        parse_bitrate(&self.video_bitrate)
    }

    /// Audio bitrate in bits/s.
    pub fn audio_bps(&self) -> Result<u64, BitrateError> {
        parse_bitrate(&self.audio_bitrate)
    }

    /// Resolution as `WIDTHxHEIGHT`.
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// The reference three-rendition catalog, lowest first.
pub fn default_catalog() -> Vec<RenditionProfile> {
    vec![
        RenditionProfile::new("360p", 640, 360, "800k", "96k"),
        RenditionProfile::new("480p", 854, 480, "1400k", "128k"),
        RenditionProfile::new("720p", 1280, 720, "2800k", "128k"),
    ]
}

/// Codec settings shared by every rendition encode.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EncodingConfig {
    /// Video codec (e.g., "libx264")
    #[serde(default = "default_video_codec")]
    pub codec: String,

    /// Encoding preset (e.g., "veryfast", "medium")
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Audio codec
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,

    /// HLS segment duration in seconds
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: u32,
}

fn default_video_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}
fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}
fn default_audio_codec() -> String {
    DEFAULT_AUDIO_CODEC.to_string()
}
fn default_segment_seconds() -> u32 {
    DEFAULT_HLS_SEGMENT_SECONDS
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: DEFAULT_VIDEO_CODEC.to_string(),
            preset: DEFAULT_PRESET.to_string(),
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            segment_seconds: DEFAULT_HLS_SEGMENT_SECONDS,
        }
    }
}

impl EncodingConfig {
    /// Returns a new config with a different segment length.
    pub fn with_segment_seconds(mut self, seconds: u32) -> Self {
        self.segment_seconds = seconds.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bitrate_units() {
        assert_eq!(parse_bitrate("800k"), Ok(800_000));
        assert_eq!(parse_bitrate("96K"), Ok(96_000));
        assert_eq!(parse_bitrate("2.5M"), Ok(2_500_000));
        assert_eq!(parse_bitrate("128000"), Ok(128_000));
        assert_eq!(parse_bitrate(" 1m "), Ok(1_000_000));
    }

    #[test]
    fn test_parse_bitrate_rejects_garbage() {
        assert_eq!(parse_bitrate(""), Err(BitrateError::Empty));
        assert!(parse_bitrate("fast").is_err());
        assert!(parse_bitrate("12.5").is_err());
        assert!(parse_bitrate("-3k").is_err());
        assert!(parse_bitrate("k").is_err());
    }

    #[test]
    fn test_default_catalog_order() {
        let names: Vec<_> = default_catalog().into_iter().map(|p| p.name).collect();
        assert_eq!(names, ["360p", "480p", "720p"]);
    }

    #[test]
    fn test_profile_resolution() {
        let profile = RenditionProfile::new("720p", 1280, 720, "2800k", "128k");
        assert_eq!(profile.resolution(), "1280x720");
    }

    #[test]
    fn test_catalog_json_shape() {
        let json = r#"[{"name":"1080p","width":1920,"height":1080,"videoBitrate":"5M","audioBitrate":"192k"}]"#;
        let catalog: Vec<RenditionProfile> = serde_json::from_str(json).unwrap();
        assert_eq!(catalog[0].video_bps(), Ok(5_000_000));
        assert_eq!(catalog[0].audio_bps(), Ok(192_000));
    }
}
