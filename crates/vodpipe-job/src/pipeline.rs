//! Transcoding pipeline.
//!
//! `DOWNLOADING -> ENCODING -> ASSEMBLING -> UPLOADING -> COMPLETED | FAILED`,
//! with the work directory removed after the terminal status is written.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tracing::Instrument;

use vodpipe_firestore::StatusStore;
use vodpipe_media::{
    build_master_manifest, plan_renditions, Encoder, MediaResult, OverlayConfig, RenditionPlan, SpriteTimeline,
};
use vodpipe_models::encoding::{MASTER_PLAYLIST_NAME, SPRITE_FILE_NAME, TIMELINE_FILE_NAME};
use vodpipe_models::{validate_key, JobSpec, StatusRecord, VideoId};
use vodpipe_storage::{content_type_for, ObjectStore};

use crate::cleanup;
use crate::config::JobConfig;
use crate::error::{JobError, JobResult};
use crate::logging::JobLogger;
use crate::result;

/// Concurrent object uploads.
const UPLOAD_CONCURRENCY: usize = 16;

/// Pipeline stage, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Downloading,
    Encoding,
    Assembling,
    Uploading,
    Completed,
    Failed,
    Cleanup,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Downloading => "DOWNLOADING",
            Stage::Encoding => "ENCODING",
            Stage::Assembling => "ASSEMBLING",
            Stage::Uploading => "UPLOADING",
            Stage::Completed => "COMPLETED",
            Stage::Failed => "FAILED",
            Stage::Cleanup => "CLEANUP",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub video_id: VideoId,
    /// Rendition names in catalog order
    pub renditions: Vec<String>,
    pub master_playlist_url: String,
    pub thumbnail_url: String,
    /// Number of objects uploaded, the result file included
    pub uploaded_files: usize,
}

/// What a successful pipeline pass produced.
struct Outputs {
    renditions: Vec<String>,
    master_playlist_url: String,
    thumbnail_url: String,
    uploaded_files: usize,
}

/// Local inputs after DOWNLOADING.
struct Inputs {
    source: PathBuf,
    overlay: Option<OverlayConfig>,
}

/// One transcoding job for one source video.
pub struct TranscodeJob {
    config: JobConfig,
    spec: JobSpec,
    encoder: Arc<dyn Encoder>,
    storage: Arc<dyn ObjectStore>,
    status: Arc<dyn StatusStore>,
}

impl TranscodeJob {
    pub fn new(
        config: JobConfig,
        spec: JobSpec,
        encoder: Arc<dyn Encoder>,
        storage: Arc<dyn ObjectStore>,
        status: Arc<dyn StatusStore>,
    ) -> Self {
        Self {
            config,
            spec,
            encoder,
            storage,
            status,
        }
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    /// Local scratch directory of this run.
    pub fn job_dir(&self, video_id: &VideoId) -> PathBuf {
        self.config.work_dir.join(video_id.as_str())
    }

    /// Run the pipeline to a terminal status.
    ///
    /// Any pipeline failure is recorded as `FAILED` and returned. The work
    /// directory is removed on every path.
    pub async fn run(&self) -> JobResult<JobReport> {
        let video_id = self.spec.video_id()?;
        let logger = JobLogger::new(&video_id);
        let job_dir = self.job_dir(&video_id);
        let span = logger.create_span();

        async {
            let outcome = self.execute(&video_id, &job_dir, &logger).await;

            logger.log_stage(Stage::Cleanup, "Removing work directory");
            if !cleanup::remove_work_dir(&job_dir).await {
                logger.log_warning(Stage::Cleanup, "Work directory was not fully removed");
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, video_id: &VideoId, job_dir: &Path, logger: &JobLogger) -> JobResult<JobReport> {
        logger.log_start(&format!("{}/{}", self.spec.source_bucket, self.spec.video_key));

        let identity = validate_key(&self.spec.video_key);
        let owner = identity.as_ref().map(|i| i.owner.clone()).unwrap_or_default();

        let mut record = StatusRecord::processing(
            video_id.clone(),
            owner,
            self.spec.source_bucket.as_str(),
            self.spec.video_key.as_str(),
            self.spec.output_prefix.as_str(),
        );
        if let Err(e) = self.status.upsert(&record).await {
            logger.log_warning(Stage::Downloading, &format!("Failed to record PROCESSING: {}", e));
        }

        let produced = match identity {
            Ok(_) => self.produce(job_dir, logger).await,
            Err(e) => Err(e.into()),
        };

        let produced = match produced {
            Ok(outputs) => {
                record.complete(outputs.thumbnail_url.as_str(), outputs.master_playlist_url.as_str());
                result::upload(self.storage.as_ref(), &self.spec.destination_bucket, &record)
                    .await
                    .map(|()| outputs)
            }
            Err(e) => Err(e),
        };

        match produced {
            Ok(outputs) => {
                self.status.upsert(&record).await?;
                logger.log_stage(Stage::Completed, "Recorded COMPLETED");
                logger.log_completion(&outputs.master_playlist_url);
                Ok(JobReport {
                    video_id: video_id.clone(),
                    renditions: outputs.renditions,
                    master_playlist_url: outputs.master_playlist_url,
                    thumbnail_url: outputs.thumbnail_url,
                    uploaded_files: outputs.uploaded_files + 1,
                })
            }
            Err(e) => {
                let message = e.to_string();
                logger.log_error(&message);
                record.fail(message);

                if let Err(status_err) = self.status.upsert(&record).await {
                    logger.log_warning(Stage::Failed, &format!("Failed to record FAILED: {}", status_err));
                }
                if let Err(upload_err) =
                    result::upload(self.storage.as_ref(), &self.spec.destination_bucket, &record).await
                {
                    logger.log_warning(Stage::Failed, &format!("Failed to upload result file: {}", upload_err));
                }
                Err(e)
            }
        }
    }

    async fn produce(&self, job_dir: &Path, logger: &JobLogger) -> JobResult<Outputs> {
        let plans = plan_renditions(&self.config.catalog)?;

        logger.log_stage(Stage::Downloading, "Fetching source");
        let inputs = self.download(job_dir).await?;

        logger.log_stage(Stage::Encoding, &format!("Encoding {} renditions and sprite", plans.len()));
        let output_root = job_dir.join("output");
        let (renditions, timeline) = self.encode(&inputs, &plans, &output_root).await?;

        logger.log_stage(Stage::Assembling, "Writing manifest and timeline");
        tokio::fs::write(output_root.join(MASTER_PLAYLIST_NAME), build_master_manifest(&renditions)).await?;
        tokio::fs::write(output_root.join(TIMELINE_FILE_NAME), timeline.to_vtt(SPRITE_FILE_NAME)).await?;

        logger.log_stage(Stage::Uploading, "Uploading outputs");
        let uploaded_files = self.upload_outputs(&output_root).await?;

        let prefix = &self.spec.output_prefix;
        let bucket = &self.spec.destination_bucket;
        Ok(Outputs {
            renditions: renditions.into_iter().map(|r| r.name).collect(),
            master_playlist_url: self.config.public_url(bucket, &result::master_key(prefix)),
            thumbnail_url: self.config.public_url(bucket, &format!("{}{}", prefix, SPRITE_FILE_NAME)),
            uploaded_files,
        })
    }

    async fn download(&self, job_dir: &Path) -> JobResult<Inputs> {
        let bucket = &self.spec.source_bucket;
        let key = &self.spec.video_key;
        let source = job_dir.join("source").join(file_name(key));
        self.storage
            .download_file(bucket, key, &source)
            .await
            .map_err(|e| JobError::download_failed(bucket, key, e))?;

        let overlay = match &self.spec.watermark_key {
            Some(overlay_key) => {
                let overlay_bucket = self.config.overlay_bucket.as_ref().unwrap_or(bucket);
                let path = job_dir.join("overlay").join(file_name(overlay_key));
                self.storage
                    .download_file(overlay_bucket, overlay_key, &path)
                    .await
                    .map_err(|e| JobError::download_failed(overlay_bucket, overlay_key, e))?;
                Some(OverlayConfig::new(path))
            }
            None => None,
        };

        Ok(Inputs { source, overlay })
    }

    /// Encode every rendition and the sprite sheet concurrently. All must
    /// succeed; the first failure in catalog order is returned, then the
    /// sprite's.
    async fn encode(
        &self,
        inputs: &Inputs,
        plans: &[RenditionPlan],
        output_root: &Path,
    ) -> JobResult<(Vec<vodpipe_media::RenditionOutput>, SpriteTimeline)> {
        let duration = self.encoder.probe(&inputs.source).await?;
        let timeline = SpriteTimeline::compute(duration, self.config.sprite_layout)?;
        let sprite_path = output_root.join(SPRITE_FILE_NAME);

        let encodes = join_all(
            plans
                .iter()
                .map(|plan| self.encoder.encode(&inputs.source, plan, output_root, inputs.overlay.as_ref())),
        );
        let sprite = self.encoder.generate_sprite(&inputs.source, &timeline, &sprite_path);
        let (encoded, sprite_result) = tokio::join!(encodes, sprite);

        let renditions = encoded.into_iter().collect::<MediaResult<Vec<_>>>()?;
        sprite_result?;
        Ok((renditions, timeline))
    }

    /// Upload the output tree under the output prefix. The master manifest
    /// goes last so it never references a missing playlist.
    async fn upload_outputs(&self, output_root: &Path) -> JobResult<usize> {
        let files = collect_files(output_root).await?;
        let prefix = &self.spec.output_prefix;
        let bucket = &self.spec.destination_bucket;

        let (manifest, rest): (Vec<_>, Vec<_>) = files
            .into_iter()
            .map(|path| {
                let relative = relative_key(output_root, &path);
                (path, relative)
            })
            .partition(|(_, relative)| relative == MASTER_PLAYLIST_NAME);
        let with_keys = |entries: Vec<(PathBuf, String)>| -> Vec<(PathBuf, String)> {
            entries
                .into_iter()
                .map(|(path, relative)| (path, format!("{}{}", prefix, relative)))
                .collect()
        };
        let (manifest, rest) = (with_keys(manifest), with_keys(rest));

        let count = manifest.len() + rest.len();
        let storage = &self.storage;
        let uploads = rest.iter().map(|(path, key)| async move {
            storage
                .upload_file(bucket, key, path, content_type_for(path))
                .await
                .map_err(|e| JobError::upload_failed(key, e))
        });
        let results: Vec<JobResult<()>> = stream::iter(uploads).buffer_unordered(UPLOAD_CONCURRENCY).collect().await;
        results.into_iter().collect::<JobResult<()>>()?;

        for (path, key) in &manifest {
            storage
                .upload_file(bucket, key, path, content_type_for(path))
                .await
                .map_err(|e| JobError::upload_failed(key, e))?;
        }
        Ok(count)
    }
}

/// Final path segment of an object key.
fn file_name(key: &str) -> &str {
    key.rsplit('/').find(|s| !s.is_empty()).unwrap_or("source")
}

/// `path` relative to `root`, `/`-separated.
fn relative_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Every regular file under `root`, sorted.
async fn collect_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Downloading.to_string(), "DOWNLOADING");
        assert_eq!(Stage::Cleanup.to_string(), "CLEANUP");
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("videos/alice###trip.mp4"), "alice###trip.mp4");
        assert_eq!(file_name("alice###trip.mp4"), "alice###trip.mp4");
    }

    #[test]
    fn test_relative_key() {
        let root = Path::new("/w/output");
        assert_eq!(relative_key(root, Path::new("/w/output/360p/index.m3u8")), "360p/index.m3u8");
        assert_eq!(relative_key(root, Path::new("/w/output/sprite.jpg")), "sprite.jpg");
    }

    #[tokio::test]
    async fn test_collect_files_sorted_and_recursive() {
        let root = tempfile::tempdir().unwrap();
        for rel in ["720p/index.m3u8", "360p/segment_000.ts", "360p/index.m3u8", "sprite.jpg"] {
            let path = root.path().join(rel);
            tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
            tokio::fs::write(&path, b"x").await.unwrap();
        }

        let files: Vec<String> = collect_files(root.path())
            .await
            .unwrap()
            .iter()
            .map(|p| relative_key(root.path(), p))
            .collect();
        assert_eq!(
            files,
            vec!["360p/index.m3u8", "360p/segment_000.ts", "720p/index.m3u8", "sprite.jpg"]
        );
    }
}
