//! Transcoding job.
//!
//! One process per source video: download, concurrent rendition and
//! sprite encodes, manifest assembly, parallel upload and a final status
//! write. The local work directory is removed on every exit path.

pub mod cleanup;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod result;

pub use config::JobConfig;
pub use error::{JobError, JobResult};
pub use logging::JobLogger;
pub use pipeline::{JobReport, Stage, TranscodeJob};
