//! Storage notification bodies delivered through the ingestion queue.

use serde::Deserialize;
use thiserror::Error;

use crate::filename::{decode_object_key, ValidationError};

/// Marker carried by the synthetic connectivity-test notification.
pub const TEST_EVENT: &str = "s3:TestEvent";

/// Errors parsing a queue message body.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Message body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message body matches neither the test nor the notification shape")]
    UnrecognizedShape,
}

/// One parsed queue message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestionEvent {
    /// Synthetic connectivity test sent when notifications are configured
    TestEvent,
    /// Real notification with one or more object records
    Notification(Vec<ObjectCreatedRecord>),
}

/// A single object record from a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectCreatedRecord {
    /// Event name such as `ObjectCreated:Put`, when present
    pub event_name: Option<String>,
    /// Source bucket name
    pub bucket: String,
    /// URL-escaped object key as delivered
    pub raw_key: String,
    /// Object size in bytes, when present
    pub size: Option<u64>,
    /// Per-key ordering token, when present
    pub sequencer: Option<String>,
}

impl ObjectCreatedRecord {
    /// True unless the record names a non-creation event.
    pub fn is_object_created(&self) -> bool {
        self.event_name
            .as_deref()
            .map(|name| name.starts_with("ObjectCreated"))
            .unwrap_or(true)
    }

    /// Decoded object key.
    pub fn decoded_key(&self) -> Result<String, ValidationError> {
        decode_object_key(&self.raw_key)
    }
}

#[derive(Debug, Deserialize)]
struct RawBody {
    #[serde(rename = "Event")]
    event: Option<String>,
    #[serde(rename = "Records")]
    records: Option<Vec<RawRecord>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    event_name: Option<String>,
    s3: RawS3,
}

#[derive(Debug, Deserialize)]
struct RawS3 {
    bucket: RawBucket,
    object: RawObject,
}

#[derive(Debug, Deserialize)]
struct RawBucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawObject {
    key: String,
    size: Option<u64>,
    sequencer: Option<String>,
}

/// Parse a queue message body.
pub fn parse_event(body: &str) -> Result<IngestionEvent, EventError> {
    let raw: RawBody = serde_json::from_str(body)?;

    if raw.event.as_deref() == Some(TEST_EVENT) {
        return Ok(IngestionEvent::TestEvent);
    }

    let records = raw.records.ok_or(EventError::UnrecognizedShape)?;

    Ok(IngestionEvent::Notification(
        records
            .into_iter()
            .map(|r| ObjectCreatedRecord {
                event_name: r.event_name,
                bucket: r.s3.bucket.name,
                raw_key: r.s3.object.key,
                size: r.s3.object.size,
                sequencer: r.s3.object.sequencer,
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_test_event() {
        let body = r#"{"Service":"Amazon S3","Event":"s3:TestEvent","Bucket":"uploads"}"#;
        assert_eq!(parse_event(body).unwrap(), IngestionEvent::TestEvent);
    }

    #[test]
    fn test_parse_notification() {
        let body = r#"{
            "Records": [{
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": {"name": "uploads"},
                    "object": {"key": "alice%23%23%23trip.mp4", "size": 1024, "sequencer": "0055AED6DCD90281E5"}
                }
            }]
        }"#;

        let IngestionEvent::Notification(records) = parse_event(body).unwrap() else {
            panic!("expected notification");
        };
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.bucket, "uploads");
        assert_eq!(record.size, Some(1024));
        assert!(record.is_object_created());
        assert_eq!(record.decoded_key().unwrap(), "alice###trip.mp4");
    }

    #[test]
    fn test_minimal_record_shape() {
        let body = r#"{"Records":[{"s3":{"bucket":{"name":"b"},"object":{"key":"k"}}}]}"#;
        let IngestionEvent::Notification(records) = parse_event(body).unwrap() else {
            panic!("expected notification");
        };
        assert_eq!(records[0].event_name, None);
        assert!(records[0].is_object_created());
    }

    #[test]
    fn test_removal_events_are_not_creations() {
        let record = ObjectCreatedRecord {
            event_name: Some("ObjectRemoved:Delete".to_string()),
            bucket: "b".to_string(),
            raw_key: "k".to_string(),
            size: None,
            sequencer: None,
        };
        assert!(!record.is_object_created());
    }

    #[test]
    fn test_rejects_unknown_shapes() {
        assert!(matches!(
            parse_event(r#"{"hello":"world"}"#),
            Err(EventError::UnrecognizedShape)
        ));
        assert!(matches!(parse_event("not json"), Err(EventError::Json(_))));
    }
}
