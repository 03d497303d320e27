//! Transcoding job binary. One invocation processes one source video
//! described by the launch variables.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vodpipe_firestore::{FirestoreClient, StatusRepository};
use vodpipe_job::{JobConfig, TranscodeJob};
use vodpipe_media::FfmpegEncoder;
use vodpipe_models::JobSpec;
use vodpipe_storage::S3Client;

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    init_tracing();

    if let Err(e) = run().await {
        error!("Job failed: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vodpipe=info".parse().expect("valid directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
}

async fn run() -> anyhow::Result<()> {
    let spec = JobSpec::from_env().context("invalid launch parameters")?;
    let config = JobConfig::from_env().context("invalid job configuration")?;
    info!(
        source = %format!("{}/{}", spec.source_bucket, spec.video_key),
        output_prefix = %spec.output_prefix,
        renditions = config.catalog.len(),
        watermark = spec.watermark_key.is_some(),
        "Starting vodpipe-job"
    );

    let storage = S3Client::from_env().await.context("failed to create S3 client")?;
    let firestore = FirestoreClient::from_env().await.context("failed to create Firestore client")?;
    let status = StatusRepository::from_env(firestore);
    let encoder = FfmpegEncoder::new(config.encoding()).with_timeout(config.ffmpeg_timeout_secs);

    let job = TranscodeJob::new(config, spec, Arc::new(encoder), Arc::new(storage), Arc::new(status));
    let report = job.run().await?;

    info!(
        video_id = %report.video_id,
        uploaded = report.uploaded_files,
        master = %report.master_playlist_url,
        "Transcoding complete"
    );
    Ok(())
}
