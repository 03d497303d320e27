//! Per-owner overlay burned into every rendition.
//!
//! The overlay image is pulled in with the `movie` source filter so each
//! encode keeps a single FFmpeg input.

use std::path::{Path, PathBuf};

/// Overlay placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Local path to the overlay image (PNG with transparency)
    pub image_path: PathBuf,
    /// Horizontal offset from right edge (pixels)
    pub offset_x: u32,
    /// Vertical offset from bottom edge (pixels)
    pub offset_y: u32,
}

impl OverlayConfig {
    /// Bottom-right placement with a 20px margin.
    pub fn new(image_path: impl AsRef<Path>) -> Self {
        Self {
            image_path: image_path.as_ref().to_path_buf(),
            offset_x: 20,
            offset_y: 20,
        }
    }

    /// Set offset from bottom-right corner.
    pub fn with_offset(mut self, x: u32, y: u32) -> Self {
        self.offset_x = x;
        self.offset_y = y;
        self
    }

    /// Single-input filter graph applying `base_filter` then the overlay.
    pub fn filter_graph(&self, base_filter: &str) -> String {
        let escaped_path = escape_filter_path(&self.image_path.to_string_lossy());
        format!(
            "[in]{}[base];movie='{}'[wm];[base][wm]overlay=W-w-{}:H-h-{}:format=auto",
            base_filter, escaped_path, self.offset_x, self.offset_y
        )
    }
}

/// Video filter for an encode, with the overlay applied when present.
pub fn video_filter(base_filter: &str, overlay: Option<&OverlayConfig>) -> String {
    match overlay {
        Some(config) => config.filter_graph(base_filter),
        None => base_filter.to_string(),
    }
}

fn escape_filter_path(path: &str) -> String {
    path.replace('\\', "\\\\").replace('\'', "\\'").replace(':', "\\:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_graph_bottom_right() {
        let config = OverlayConfig::new("/work/vid/overlay.png");
        assert_eq!(
            config.filter_graph("scale=640:360"),
            "[in]scale=640:360[base];movie='/work/vid/overlay.png'[wm];[base][wm]overlay=W-w-20:H-h-20:format=auto"
        );
    }

    #[test]
    fn test_without_overlay_filter_is_unchanged() {
        assert_eq!(video_filter("scale=640:360", None), "scale=640:360");
    }

    #[test]
    fn test_escapes_special_characters() {
        assert_eq!(escape_filter_path("C:\\a'b"), "C\\:\\\\a\\'b");
        let config = OverlayConfig::new("/tmp/it's:here.png").with_offset(5, 10);
        let graph = config.filter_graph("null");
        assert!(graph.contains("movie='/tmp/it\\'s\\:here.png'"));
        assert!(graph.ends_with("overlay=W-w-5:H-h-10:format=auto"));
    }
}
