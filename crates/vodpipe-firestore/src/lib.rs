//! Firestore REST API client.
//!
//! This crate provides:
//! - The video status repository behind the `StatusStore` trait
//! - Service account authentication via gcp_auth, or the local emulator
//! - Merge updates with field masks and retry logic

pub mod client;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod status_repo;
pub mod token_cache;
pub mod types;

pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use retry::RetryConfig;
pub use status_repo::{StatusRepository, StatusStore, DEFAULT_STATUS_COLLECTION};
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};
