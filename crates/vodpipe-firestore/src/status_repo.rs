//! Video status repository.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use vodpipe_models::{StatusRecord, VideoId, VideoStatus};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::types::{Document, ToFirestoreValue, Value};

/// Collection holding one document per video identifier.
pub const DEFAULT_STATUS_COLLECTION: &str = "videos";

/// Every field a status write replaces. `created_at` is only written on
/// creation so later writes keep the original value.
const UPSERT_MASK: &[&str] = &[
    "video_id",
    "owner",
    "status",
    "source_bucket",
    "source_key",
    "output_prefix",
    "thumbnail_url",
    "master_playlist_url",
    "error",
    "updated_at",
];

/// Durable store for status records. Writes are last-write-wins.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Create the record if no document exists yet.
    ///
    /// Returns `false` when a record was already present.
    async fn create_pending(&self, record: &StatusRecord) -> FirestoreResult<bool>;

    /// Create or overwrite the record.
    async fn upsert(&self, record: &StatusRecord) -> FirestoreResult<()>;

    async fn get(&self, video_id: &VideoId) -> FirestoreResult<Option<StatusRecord>>;
}

/// Firestore-backed `StatusStore`.
#[derive(Clone)]
pub struct StatusRepository {
    client: FirestoreClient,
    collection: String,
}

impl StatusRepository {
    pub fn new(client: FirestoreClient, collection: impl Into<String>) -> Self {
        Self {
            client,
            collection: collection.into(),
        }
    }

    /// Repository on `FIRESTORE_STATUS_COLLECTION`, default `videos`.
    pub fn from_env(client: FirestoreClient) -> Self {
        let collection = std::env::var("FIRESTORE_STATUS_COLLECTION")
            .ok()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_STATUS_COLLECTION.to_string());
        Self::new(client, collection)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

#[async_trait]
impl StatusStore for StatusRepository {
    async fn create_pending(&self, record: &StatusRecord) -> FirestoreResult<bool> {
        let mut fields = record_to_fields(record);
        fields.insert("created_at".to_string(), record.created_at.to_firestore_value());

        match self
            .client
            .create_document(&self.collection, record.video_id.as_str(), fields)
            .await
        {
            Ok(_) => {
                info!(video_id = %record.video_id, status = %record.status, "Created status record");
                Ok(true)
            }
            Err(FirestoreError::AlreadyExists(_)) => {
                debug!(video_id = %record.video_id, "Status record already exists");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn upsert(&self, record: &StatusRecord) -> FirestoreResult<()> {
        self.client
            .update_document(
                &self.collection,
                record.video_id.as_str(),
                record_to_fields(record),
                Some(UPSERT_MASK),
            )
            .await?;
        info!(video_id = %record.video_id, status = %record.status, "Wrote status record");
        Ok(())
    }

    async fn get(&self, video_id: &VideoId) -> FirestoreResult<Option<StatusRecord>> {
        let doc = self.client.get_document(&self.collection, video_id.as_str()).await?;
        doc.map(|d| document_to_record(&d, video_id)).transpose()
    }
}

fn record_to_fields(record: &StatusRecord) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("video_id".to_string(), record.video_id.as_str().to_firestore_value());
    fields.insert("owner".to_string(), record.owner.to_firestore_value());
    fields.insert("status".to_string(), record.status.as_str().to_firestore_value());
    fields.insert("source_bucket".to_string(), record.source_bucket.to_firestore_value());
    fields.insert("source_key".to_string(), record.source_key.to_firestore_value());
    fields.insert("output_prefix".to_string(), record.output_prefix.to_firestore_value());
    fields.insert("thumbnail_url".to_string(), record.thumbnail_url.to_firestore_value());
    fields.insert(
        "master_playlist_url".to_string(),
        record.master_playlist_url.to_firestore_value(),
    );
    fields.insert("error".to_string(), record.error.to_firestore_value());
    fields.insert("updated_at".to_string(), record.updated_at.to_firestore_value());
    fields
}

fn document_to_record(doc: &Document, video_id: &VideoId) -> FirestoreResult<StatusRecord> {
    let status = doc
        .get::<String>("status")
        .ok_or_else(|| FirestoreError::invalid_response(format!("{} has no status", video_id)))?
        .parse::<VideoStatus>()
        .map_err(FirestoreError::invalid_response)?;

    let updated_at = doc.get::<DateTime<Utc>>("updated_at").unwrap_or_else(Utc::now);
    // Records first written by the job carry no created_at field
    let created_at = doc
        .get::<DateTime<Utc>>("created_at")
        .or_else(|| {
            doc.create_time
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|dt| dt.with_timezone(&Utc))
        })
        .unwrap_or(updated_at);

    Ok(StatusRecord {
        video_id: video_id.clone(),
        owner: doc.get("owner").unwrap_or_default(),
        status,
        source_bucket: doc.get("source_bucket").unwrap_or_default(),
        source_key: doc.get("source_key").unwrap_or_default(),
        output_prefix: doc.get("output_prefix").unwrap_or_default(),
        thumbnail_url: doc.get("thumbnail_url"),
        master_playlist_url: doc.get("master_playlist_url"),
        error: doc.get("error"),
        created_at,
        updated_at,
    })
}
