//! Encoder capability and its FFmpeg implementation.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use vodpipe_models::encoding::RENDITION_PLAYLIST_NAME;
use vodpipe_models::EncodingConfig;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::plan::RenditionPlan;
use crate::probe::probe_video;
use crate::sprite::SpriteTimeline;
use crate::watermark::{video_filter, OverlayConfig};

/// A finished rendition on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenditionOutput {
    pub name: String,
    pub bandwidth: u64,
    pub width: u32,
    pub height: u32,
    /// Playlist path relative to the output root
    pub playlist_path: String,
    /// Local directory holding the playlist and segments
    pub dir: PathBuf,
}

impl RenditionOutput {
    pub fn from_plan(plan: &RenditionPlan, dir: PathBuf) -> Self {
        Self {
            name: plan.name().to_string(),
            bandwidth: plan.bandwidth(),
            width: plan.profile.width,
            height: plan.profile.height,
            playlist_path: plan.playlist_path(),
            dir,
        }
    }
}

/// Media operations the transcoding job depends on.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Source duration in seconds.
    async fn probe(&self, input: &Path) -> MediaResult<f64>;

    /// Encode one rendition as HLS under `output_root/{name}/`.
    async fn encode(
        &self,
        input: &Path,
        plan: &RenditionPlan,
        output_root: &Path,
        overlay: Option<&OverlayConfig>,
    ) -> MediaResult<RenditionOutput>;

    /// Render the sprite sheet for `timeline` to `output`.
    async fn generate_sprite(&self, input: &Path, timeline: &SpriteTimeline, output: &Path) -> MediaResult<()>;
}

/// `Encoder` backed by the `ffmpeg` and `ffprobe` binaries.
#[derive(Debug, Clone, Default)]
pub struct FfmpegEncoder {
    encoding: EncodingConfig,
    runner: FfmpegRunner,
}

impl FfmpegEncoder {
    pub fn new(encoding: EncodingConfig) -> Self {
        Self {
            encoding,
            runner: FfmpegRunner::new(),
        }
    }

    /// Kill any single FFmpeg invocation running longer than `secs`.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.runner = self.runner.with_timeout(secs);
        self
    }

    /// Command for one rendition encode.
    pub fn rendition_command(
        &self,
        input: &Path,
        plan: &RenditionPlan,
        output_root: &Path,
        overlay: Option<&OverlayConfig>,
    ) -> FfmpegCommand {
        let dir = output_root.join(plan.name());
        let filter = video_filter(&plan.scale_filter(), overlay);

        FfmpegCommand::new(input, dir.join(RENDITION_PLAYLIST_NAME))
            .video_filter(filter)
            .output_args(plan.codec_args(&self.encoding))
            .output_arg("-hls_segment_filename")
            .output_arg(output_root.join(plan.segment_pattern()).to_string_lossy().to_string())
    }

    /// Command for the sprite sheet.
    pub fn sprite_command(&self, input: &Path, timeline: &SpriteTimeline, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(input, output)
            .video_filter(timeline.ffmpeg_filter())
            .frames(1)
            .output_arg("-q:v")
            .output_arg("3")
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn probe(&self, input: &Path) -> MediaResult<f64> {
        let info = probe_video(input).await?;
        debug!(
            duration = info.duration,
            width = info.width,
            height = info.height,
            codec = %info.codec,
            has_audio = info.has_audio,
            "Probed source"
        );
        Ok(info.duration)
    }

    async fn encode(
        &self,
        input: &Path,
        plan: &RenditionPlan,
        output_root: &Path,
        overlay: Option<&OverlayConfig>,
    ) -> MediaResult<RenditionOutput> {
        let dir = output_root.join(plan.name());
        tokio::fs::create_dir_all(&dir).await?;

        let cmd = self.rendition_command(input, plan, output_root, overlay);
        let rendition = plan.name().to_string();

        info!(rendition = %rendition, bandwidth = plan.bandwidth(), "Encoding rendition");
        self.runner
            .run_with_progress(&cmd, move |progress| {
                debug!(
                    rendition = %rendition,
                    out_time_ms = progress.out_time_ms,
                    speed = progress.speed,
                    "Encode progress"
                );
            })
            .await
            .map_err(|e| match e {
                MediaError::FfmpegFailed {
                    stderr, exit_code, ..
                } => MediaError::ffmpeg_failed(format!("Encode {} failed", plan.name()), stderr, exit_code),
                other => other,
            })?;

        if !cmd.output().exists() {
            return Err(MediaError::FileNotFound(cmd.output().to_path_buf()));
        }

        Ok(RenditionOutput::from_plan(plan, dir))
    }

    async fn generate_sprite(&self, input: &Path, timeline: &SpriteTimeline, output: &Path) -> MediaResult<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let cmd = self.sprite_command(input, timeline, output);
        info!(tiles = timeline.entries.len(), rows = timeline.rows, "Generating sprite sheet");
        self.runner.run(&cmd).await.map_err(|e| match e {
            MediaError::FfmpegFailed {
                stderr, exit_code, ..
            } => MediaError::ffmpeg_failed("Sprite generation failed", stderr, exit_code),
            other => other,
        })?;

        if !output.exists() {
            return Err(MediaError::FileNotFound(output.to_path_buf()));
        }
        Ok(())
    }
}
