//! HLS master manifest assembly.

use std::fmt::Write;

use crate::encoder::RenditionOutput;

/// Build the master playlist text, one stream entry per rendition in the
/// order given.
pub fn build_master_manifest(renditions: &[RenditionOutput]) -> String {
    let mut manifest = String::from("#EXTM3U\n");
    for rendition in renditions {
        // Writing into a String cannot fail
        let _ = writeln!(
            manifest,
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}",
            rendition.bandwidth, rendition.width, rendition.height
        );
        let _ = writeln!(manifest, "{}", rendition.playlist_path);
    }
    manifest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::plan_renditions;
    use std::path::PathBuf;
    use vodpipe_models::default_catalog;

    fn outputs() -> Vec<RenditionOutput> {
        plan_renditions(&default_catalog())
            .unwrap()
            .iter()
            .map(|plan| RenditionOutput::from_plan(plan, PathBuf::from("/work/out").join(plan.name())))
            .collect()
    }

    #[test]
    fn test_master_manifest_text() {
        let manifest = build_master_manifest(&outputs());
        assert_eq!(
            manifest,
            "#EXTM3U\n\
             #EXT-X-STREAM-INF:BANDWIDTH=896000,RESOLUTION=640x360\n\
             360p/index.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=1528000,RESOLUTION=854x480\n\
             480p/index.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=2928000,RESOLUTION=1280x720\n\
             720p/index.m3u8\n"
        );
    }

    #[test]
    fn test_manifest_is_reproducible() {
        let outputs = outputs();
        assert_eq!(build_master_manifest(&outputs), build_master_manifest(&outputs));
    }

    #[test]
    fn test_empty_manifest_has_header_only() {
        assert_eq!(build_master_manifest(&[]), "#EXTM3U\n");
    }
}
