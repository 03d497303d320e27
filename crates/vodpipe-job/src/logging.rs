//! Structured job logging utilities.
//!
//! Every line carries the video identifier and the pipeline stage so a
//! single run can be followed through the logs.

use tracing::{error, info, warn, Span};

use vodpipe_models::VideoId;

use crate::pipeline::Stage;

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    video_id: String,
}

impl JobLogger {
    pub fn new(video_id: &VideoId) -> Self {
        Self {
            video_id: video_id.to_string(),
        }
    }

    /// Log the start of the job.
    pub fn log_start(&self, message: &str) {
        info!(video_id = %self.video_id, "Job started: {}", message);
    }

    /// Log entry into a pipeline stage.
    pub fn log_stage(&self, stage: Stage, message: &str) {
        info!(video_id = %self.video_id, stage = %stage, "{}", message);
    }

    pub fn log_warning(&self, stage: Stage, message: &str) {
        warn!(video_id = %self.video_id, stage = %stage, "Job warning: {}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(video_id = %self.video_id, "Job failed: {}", message);
    }

    pub fn log_completion(&self, message: &str) {
        info!(video_id = %self.video_id, "Job completed: {}", message);
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    /// Span wrapping the whole run.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("transcode_job", video_id = %self.video_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let logger = JobLogger::new(&VideoId::from("alice###trip-1"));
        assert_eq!(logger.video_id(), "alice###trip-1");
    }
}
