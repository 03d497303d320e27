//! FFmpeg CLI wrapper for the transcoding job.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building and a runner with timeout support
//! - Progress parsing from `-progress pipe:2`
//! - FFprobe duration probing
//! - The rendition planner (pure bitrate and argument computation)
//! - Master manifest assembly and sprite timeline math
//! - The `Encoder` capability trait and its FFmpeg implementation

pub mod command;
pub mod encoder;
pub mod error;
pub mod manifest;
pub mod plan;
pub mod probe;
pub mod progress;
pub mod sprite;
pub mod watermark;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use encoder::{Encoder, FfmpegEncoder, RenditionOutput};
pub use error::{MediaError, MediaResult};
pub use manifest::build_master_manifest;
pub use plan::{plan_renditions, RenditionPlan};
pub use probe::{probe_video, VideoInfo};
pub use progress::FfmpegProgress;
pub use sprite::{SpriteLayout, SpriteTimeline, TimelineEntry};
pub use watermark::OverlayConfig;
