//! Local child-process launcher.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info, warn};

use vodpipe_models::JobSpec;

use super::{job_environment, TaskLauncher};
use crate::error::{DispatchError, DispatchResult};

/// Runs each job as a child process of the dispatcher.
///
/// The child is not waited on by the dispatch path; a background task reaps
/// it and logs its exit status.
pub struct ProcessLauncher {
    binary: PathBuf,
    forwarded_env: Vec<(String, String)>,
}

impl ProcessLauncher {
    pub fn new(binary: impl Into<PathBuf>, forwarded_env: Vec<(String, String)>) -> Self {
        Self {
            binary: binary.into(),
            forwarded_env,
        }
    }
}

#[async_trait]
impl TaskLauncher for ProcessLauncher {
    fn kind(&self) -> &'static str {
        "process"
    }

    async fn launch(&self, spec: &JobSpec) -> DispatchResult<String> {
        let mut child = Command::new(&self.binary)
            .envs(job_environment(spec, &self.forwarded_env))
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| DispatchError::launch(format!("Failed to spawn {}: {}", self.binary.display(), e)))?;

        let task_id = child
            .id()
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| "exited".to_string());
        info!(pid = %task_id, output_prefix = %spec.output_prefix, "Spawned job process");

        let output_prefix = spec.output_prefix.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => info!(output_prefix = %output_prefix, "Job process exited"),
                Ok(status) => warn!(output_prefix = %output_prefix, "Job process exited with {}", status),
                Err(e) => error!(output_prefix = %output_prefix, "Failed to wait for job process: {}", e),
            }
        });

        Ok(task_id)
    }
}
