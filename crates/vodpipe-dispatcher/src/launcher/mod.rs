//! Job launchers.

mod docker;
mod process;

pub use docker::DockerLauncher;
pub use process::ProcessLauncher;

use async_trait::async_trait;

use vodpipe_models::JobSpec;

use crate::error::DispatchResult;

/// Starts one isolated job execution per `JobSpec`.
#[async_trait]
pub trait TaskLauncher: Send + Sync {
    /// Short name used in logs and metrics.
    fn kind(&self) -> &'static str;

    /// Start the job and return its task identifier.
    ///
    /// Returning `Ok` means the job was accepted by the runtime, not that it
    /// finished.
    async fn launch(&self, spec: &JobSpec) -> DispatchResult<String>;
}

/// Environment for a launched job: forwarded infrastructure variables
/// followed by the `JobSpec` bindings, which take precedence.
pub fn job_environment(spec: &JobSpec, forwarded: &[(String, String)]) -> Vec<(String, String)> {
    let bound = spec.to_env();
    let mut env: Vec<(String, String)> = forwarded
        .iter()
        .filter(|(name, _)| !bound.iter().any(|(b, _)| b == name))
        .cloned()
        .collect();
    env.extend(bound);
    env
}
