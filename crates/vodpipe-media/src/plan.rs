//! Rendition planner.
//!
//! Turns the ordered rendition catalog into per-rendition encode parameters.
//! Planning is pure: no filesystem or process access, so every number the
//! manifest and FFmpeg receive can be checked in isolation.

use std::collections::HashSet;

use vodpipe_models::encoding::{EncodingConfig, RENDITION_PLAYLIST_NAME, RENDITION_SEGMENT_PATTERN};
use vodpipe_models::RenditionProfile;

use crate::error::{MediaError, MediaResult};

/// Peak rate allowed above the target video bitrate.
pub const MAXRATE_FACTOR: f64 = 1.07;
/// Decoder buffer size relative to the target video bitrate.
pub const BUFSIZE_FACTOR: f64 = 1.5;

/// Encode parameters for one rendition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenditionPlan {
    pub profile: RenditionProfile,
    pub video_bps: u64,
    pub audio_bps: u64,
    pub maxrate_bps: u64,
    pub bufsize_bps: u64,
}

impl RenditionPlan {
    /// Plan a single profile.
    pub fn from_profile(profile: &RenditionProfile) -> MediaResult<Self> {
        validate_name(&profile.name)?;
        if profile.width == 0 || profile.height == 0 {
            return Err(MediaError::planning(format!(
                "rendition {} has zero dimension {}",
                profile.name,
                profile.resolution()
            )));
        }
        if profile.width % 2 != 0 || profile.height % 2 != 0 {
            return Err(MediaError::planning(format!(
                "rendition {} needs even dimensions for yuv420p, got {}",
                profile.name,
                profile.resolution()
            )));
        }

        let video_bps = profile
            .video_bps()
            .map_err(|e| MediaError::planning(format!("rendition {}: {}", profile.name, e)))?;
        let audio_bps = profile
            .audio_bps()
            .map_err(|e| MediaError::planning(format!("rendition {}: {}", profile.name, e)))?;
        if video_bps == 0 {
            return Err(MediaError::planning(format!(
                "rendition {} has zero video bitrate",
                profile.name
            )));
        }

        Ok(Self {
            profile: profile.clone(),
            video_bps,
            audio_bps,
            maxrate_bps: (video_bps as f64 * MAXRATE_FACTOR).round() as u64,
            bufsize_bps: (video_bps as f64 * BUFSIZE_FACTOR).round() as u64,
        })
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    /// Declared manifest bandwidth (video + audio).
    pub fn bandwidth(&self) -> u64 {
        self.video_bps + self.audio_bps
    }

    /// Playlist path relative to the output root.
    pub fn playlist_path(&self) -> String {
        format!("{}/{}", self.profile.name, RENDITION_PLAYLIST_NAME)
    }

    /// Segment file pattern relative to the output root.
    pub fn segment_pattern(&self) -> String {
        format!("{}/{}", self.profile.name, RENDITION_SEGMENT_PATTERN)
    }

    /// Scale-and-pad filter to the exact rendition size.
    pub fn scale_filter(&self) -> String {
        let (w, h) = (self.profile.width, self.profile.height);
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1"
        )
    }

    /// FFmpeg output arguments excluding `-vf`, the segment path and the
    /// playlist path.
    pub fn codec_args(&self, encoding: &EncodingConfig) -> Vec<String> {
        vec![
            "-c:v".to_string(),
            encoding.codec.clone(),
            "-preset".to_string(),
            encoding.preset.clone(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-b:v".to_string(),
            self.video_bps.to_string(),
            "-maxrate".to_string(),
            self.maxrate_bps.to_string(),
            "-bufsize".to_string(),
            self.bufsize_bps.to_string(),
            "-c:a".to_string(),
            encoding.audio_codec.clone(),
            "-b:a".to_string(),
            self.audio_bps.to_string(),
            "-ac".to_string(),
            "2".to_string(),
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            encoding.segment_seconds.to_string(),
            "-hls_playlist_type".to_string(),
            "vod".to_string(),
        ]
    }
}

/// Plan every profile in catalog order.
pub fn plan_renditions(catalog: &[RenditionProfile]) -> MediaResult<Vec<RenditionPlan>> {
    if catalog.is_empty() {
        return Err(MediaError::planning("rendition catalog is empty"));
    }

    let mut seen = HashSet::new();
    catalog
        .iter()
        .map(|profile| {
            if !seen.insert(profile.name.as_str()) {
                return Err(MediaError::planning(format!(
                    "duplicate rendition name {}",
                    profile.name
                )));
            }
            RenditionPlan::from_profile(profile)
        })
        .collect()
}

// Names become output subdirectories
fn validate_name(name: &str) -> MediaResult<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(MediaError::planning(format!("invalid rendition name {:?}", name)))
    }
}
