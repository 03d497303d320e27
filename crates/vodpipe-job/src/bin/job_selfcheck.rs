use std::path::Path;

use vodpipe_job::JobConfig;
use vodpipe_media::{check_ffmpeg, check_ffprobe};
use vodpipe_models::JobSpec;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = JobConfig::from_env()?;

    println!(
        "job-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_workdir(&config.work_dir).await?;
    ensure_media_tools()?;
    JobSpec::from_env().map_err(|e| anyhow::anyhow!("launch parameters: {}", e))?;

    println!("job-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir(path: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path).await?;
    let probe = path.join(".selfcheck");
    tokio::fs::write(&probe, b"ok")
        .await
        .map_err(|e| anyhow::anyhow!("work dir {} not writable: {}", path.display(), e))?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}

fn ensure_media_tools() -> anyhow::Result<()> {
    let ffmpeg = check_ffmpeg().map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;
    let ffprobe = check_ffprobe().map_err(|e| anyhow::anyhow!("ffprobe not available: {}", e))?;
    println!("job-selfcheck: ffmpeg={} ffprobe={}", ffmpeg.display(), ffprobe.display());
    Ok(())
}
