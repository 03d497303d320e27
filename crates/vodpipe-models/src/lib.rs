//! Shared data models for the VodPipe backend.
//!
//! This crate provides Serde-serializable types for:
//! - Object-key validation and owner/title identity
//! - Ingestion notifications delivered through the queue
//! - Job launch parameters bound as environment variables
//! - Rendition catalog and bitrate parsing
//! - Status records and the companion result file

pub mod encoding;
pub mod event;
pub mod filename;
pub mod job;
pub mod status;
pub mod video;

// Re-export common types
pub use encoding::{default_catalog, parse_bitrate, BitrateError, EncodingConfig, RenditionProfile};
pub use event::{parse_event, EventError, IngestionEvent, ObjectCreatedRecord};
pub use filename::{decode_object_key, validate_key, FilenameIdentity, ValidationError, SEPARATOR};
pub use job::{JobSpec, JobSpecError};
pub use status::{ResultFile, StatusRecord, VideoStatus};
pub use video::VideoId;
