//! S3-compatible object storage for the VodPipe backend.
//!
//! One client serves every bucket; the bucket is passed per call since
//! sources and outputs live in different buckets.

pub mod client;
pub mod content_type;
pub mod error;
pub mod store;

pub use client::{S3Client, S3Config};
pub use content_type::content_type_for;
pub use error::{StorageError, StorageResult};
pub use store::ObjectStore;
