//! Dispatcher configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DispatchError, DispatchResult};
use crate::overlay::OverlayPolicy;

/// Variables passed through to launched jobs verbatim.
const FORWARDED_VARS: &[&str] = &[
    "GOOGLE_APPLICATION_CREDENTIALS",
    "LOG_FORMAT",
    "RUST_LOG",
    "JOB_WORK_DIR",
    "PUBLIC_BASE_URL",
    "HLS_SEGMENT_SECONDS",
    "FFMPEG_TIMEOUT_SECS",
    "RENDITION_PROFILES",
    "OVERLAY_BUCKET",
];

/// Variable prefixes passed through to launched jobs.
const FORWARDED_PREFIXES: &[&str] = &["S3_", "AWS_", "GCP_", "FIREBASE_", "FIRESTORE_"];

/// How jobs are started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LauncherConfig {
    /// One auto-removed container per job via the Docker Engine API
    Docker {
        host_url: String,
        image: String,
        network: Option<String>,
    },
    /// One detached child process per job
    Process { binary: PathBuf },
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Bucket receiving every job's outputs
    pub destination_bucket: String,
    /// Maximum messages per receive
    pub batch_size: usize,
    /// Long-poll wait per receive
    pub wait: Duration,
    /// Pause after a failed poll
    pub error_backoff: Duration,
    pub overlay_policy: OverlayPolicy,
    /// Key prefix of owner overlay entries in Redis
    pub overlay_key_prefix: String,
    /// Dedup claim lifetime; `None` disables the ledger
    pub dedup_ttl: Option<Duration>,
    pub launcher: LauncherConfig,
    /// Prometheus listener, when set
    pub metrics_addr: Option<SocketAddr>,
    /// Infrastructure variables handed to every job
    pub forwarded_env: Vec<(String, String)>,
}

impl DispatcherConfig {
    /// Create config from environment variables.
    pub fn from_env() -> DispatchResult<Self> {
        let destination_bucket = std::env::var("DESTINATION_BUCKET")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| DispatchError::config_error("DESTINATION_BUCKET must be set"))?;

        let batch_size = std::env::var("DISPATCH_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(1);

        let overlay_policy = match std::env::var("OVERLAY_POLICY") {
            Ok(value) if !value.is_empty() => value.parse::<OverlayPolicy>().map_err(DispatchError::config_error)?,
            _ => OverlayPolicy::Disabled,
        };

        let dedup_ttl = std::env::var("DISPATCH_DEDUP_TTL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let metrics_addr = match std::env::var("METRICS_ADDR") {
            Ok(addr) if !addr.is_empty() => Some(
                addr.parse::<SocketAddr>()
                    .map_err(|e| DispatchError::config_error(format!("METRICS_ADDR {:?}: {}", addr, e)))?,
            ),
            _ => None,
        };

        Ok(Self {
            destination_bucket,
            batch_size,
            wait: Duration::from_secs(secs("DISPATCH_WAIT_SECS", 20)),
            error_backoff: Duration::from_secs(secs("DISPATCH_ERROR_BACKOFF_SECS", 5)),
            overlay_policy,
            overlay_key_prefix: std::env::var("OVERLAY_KEY_PREFIX").unwrap_or_else(|_| "overlay:".to_string()),
            dedup_ttl,
            launcher: LauncherConfig::from_env()?,
            metrics_addr,
            forwarded_env: forwarded_env(std::env::vars()),
        })
    }
}

impl LauncherConfig {
    /// Create config from `LAUNCHER` and the launcher-specific variables.
    pub fn from_env() -> DispatchResult<Self> {
        let kind = std::env::var("LAUNCHER").unwrap_or_else(|_| "docker".to_string());
        match kind.to_lowercase().as_str() {
            "docker" => {
                let image = std::env::var("JOB_IMAGE")
                    .ok()
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| DispatchError::config_error("JOB_IMAGE must be set for the docker launcher"))?;
                Ok(Self::Docker {
                    host_url: std::env::var("DOCKER_HOST_URL").unwrap_or_else(|_| "http://localhost:2375".to_string()),
                    image,
                    network: std::env::var("JOB_NETWORK").ok().filter(|v| !v.is_empty()),
                })
            }
            "process" => Ok(Self::Process {
                binary: std::env::var("JOB_BINARY")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("vodpipe-job")),
            }),
            other => Err(DispatchError::config_error(format!(
                "LAUNCHER must be docker or process, got {:?}",
                other
            ))),
        }
    }
}

fn secs(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Select the variables a launched job inherits, sorted by name.
pub fn forwarded_env<I>(vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut forwarded: Vec<(String, String)> = vars
        .into_iter()
        .filter(|(name, _)| {
            FORWARDED_VARS.contains(&name.as_str()) || FORWARDED_PREFIXES.iter().any(|p| name.starts_with(p))
        })
        .collect();
    forwarded.sort();
    forwarded
}
