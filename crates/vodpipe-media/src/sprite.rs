//! Sprite sheet layout and the WebVTT timeline index.
//!
//! The sheet is a single JPEG tiling one frame every `interval_secs`
//! seconds in row-major order. Columns are fixed; rows grow with the
//! duration, so long sources produce taller sheets until the JPEG
//! dimension limit is reached.

use std::fmt::Write;

use crate::error::{MediaError, MediaResult};

/// Largest image dimension a baseline JPEG can encode.
pub const MAX_SHEET_DIMENSION: u64 = 65_535;

/// Grid and sampling parameters of the sprite sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpriteLayout {
    /// Seconds between sampled frames
    pub interval_secs: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub columns: u32,
}

impl Default for SpriteLayout {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            tile_width: 160,
            tile_height: 90,
            columns: 10,
        }
    }
}

/// One cue of the timeline index.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    /// Start of the covered range in seconds
    pub start: f64,
    /// End of the covered range in seconds (exclusive)
    pub end: f64,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Tile positions for a source of known duration.
#[derive(Debug, Clone, PartialEq)]
pub struct SpriteTimeline {
    pub layout: SpriteLayout,
    pub rows: u32,
    pub entries: Vec<TimelineEntry>,
}

impl SpriteTimeline {
    /// Compute `ceil(duration / interval)` entries in chronological order.
    pub fn compute(duration: f64, layout: SpriteLayout) -> MediaResult<Self> {
        if !duration.is_finite() || duration < 0.0 {
            return Err(MediaError::InvalidVideo(format!(
                "invalid duration {} for sprite timeline",
                duration
            )));
        }
        if layout.interval_secs == 0 || layout.columns == 0 || layout.tile_width == 0 || layout.tile_height == 0 {
            return Err(MediaError::planning("sprite layout has a zero dimension"));
        }

        let interval = f64::from(layout.interval_secs);
        let count = (duration / interval).ceil() as u64;
        let columns = u64::from(layout.columns);
        let rows = count.div_ceil(columns).max(1);

        let sheet_height = rows * u64::from(layout.tile_height);
        if sheet_height > MAX_SHEET_DIMENSION {
            return Err(MediaError::SpriteTooLarge {
                height: sheet_height,
                limit: MAX_SHEET_DIMENSION,
            });
        }
        let sheet_width = columns * u64::from(layout.tile_width);
        if sheet_width > MAX_SHEET_DIMENSION {
            return Err(MediaError::planning(format!(
                "sprite sheet width {}px exceeds the image limit",
                sheet_width
            )));
        }

        let entries = (0..count)
            .map(|i| TimelineEntry {
                start: i as f64 * interval,
                end: ((i + 1) as f64 * interval).min(duration),
                x: (i % columns) as u32 * layout.tile_width,
                y: (i / columns) as u32 * layout.tile_height,
                width: layout.tile_width,
                height: layout.tile_height,
            })
            .collect();

        Ok(Self {
            layout,
            rows: rows as u32,
            entries,
        })
    }

    /// FFmpeg filter that samples and tiles the whole source into one frame.
    pub fn ffmpeg_filter(&self) -> String {
        format!(
            "fps=1/{},scale={}:{},tile={}x{}",
            self.layout.interval_secs,
            self.layout.tile_width,
            self.layout.tile_height,
            self.layout.columns,
            self.rows
        )
    }

    /// Render the WebVTT index referencing `sprite_file`.
    pub fn to_vtt(&self, sprite_file: &str) -> String {
        let mut vtt = String::from("WEBVTT\n\n");
        for entry in &self.entries {
            let _ = write!(
                vtt,
                "{} --> {}\n{}#xywh={},{},{},{}\n\n",
                format_timestamp(entry.start),
                format_timestamp(entry.end),
                sprite_file,
                entry.x,
                entry.y,
                entry.width,
                entry.height
            );
        }
        vtt
    }
}

/// Format seconds as zero-padded `HH:MM:SS.mmm`.
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60,
        ms
    )
}
