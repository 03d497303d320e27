//! `result.json` companion file.

use vodpipe_models::encoding::{MASTER_PLAYLIST_NAME, RESULT_FILE_NAME};
use vodpipe_models::{ResultFile, StatusRecord};
use vodpipe_storage::ObjectStore;

use crate::error::{JobError, JobResult};

/// Object key of the result file under `output_prefix`.
pub fn result_key(output_prefix: &str) -> String {
    format!("{}{}", output_prefix, RESULT_FILE_NAME)
}

/// Object key of the master manifest under `output_prefix`.
pub fn master_key(output_prefix: &str) -> String {
    format!("{}{}", output_prefix, MASTER_PLAYLIST_NAME)
}

/// Serialized result file for `record`.
pub fn render(record: &StatusRecord) -> JobResult<Vec<u8>> {
    let file = ResultFile::from_record(record, Some(master_key(&record.output_prefix)));
    Ok(serde_json::to_vec_pretty(&file)?)
}

/// Upload the result file mirroring `record` to `bucket`.
pub async fn upload(store: &dyn ObjectStore, bucket: &str, record: &StatusRecord) -> JobResult<()> {
    let key = result_key(&record.output_prefix);
    let body = render(record)?;
    store
        .upload_bytes(bucket, &key, body, "application/json")
        .await
        .map_err(|e| JobError::upload_failed(&key, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vodpipe_models::{VideoId, VideoStatus};

    fn record() -> StatusRecord {
        StatusRecord::processing(
            VideoId::from("alice###trip-1700000000000"),
            "alice",
            "B",
            "alice###trip.mp4",
            "processed/alice###trip-1700000000000/",
        )
    }

    #[test]
    fn test_completed_result_names_manifest() {
        let mut record = record();
        record.complete("https://x/sprite.jpg", "https://x/master.m3u8");

        let json: serde_json::Value = serde_json::from_slice(&render(&record).unwrap()).unwrap();
        assert_eq!(json["status"], "COMPLETED");
        assert_eq!(json["sourceVideo"], "alice###trip.mp4");
        assert_eq!(
            json["masterPlaylist"],
            "processed/alice###trip-1700000000000/master.m3u8"
        );
        assert!(json["error"].is_null());
    }

    #[test]
    fn test_failed_result_has_no_manifest() {
        let mut record = record();
        record.fail("Encode 480p failed");

        let parsed: ResultFile = serde_json::from_slice(&render(&record).unwrap()).unwrap();
        assert_eq!(parsed.status, VideoStatus::Failed);
        assert_eq!(parsed.master_playlist, None);
        assert_eq!(parsed.error.as_deref(), Some("Encode 480p failed"));
    }

    #[test]
    fn test_keys_under_prefix() {
        assert_eq!(result_key("processed/a###b-1/"), "processed/a###b-1/result.json");
        assert_eq!(master_key("processed/a###b-1/"), "processed/a###b-1/master.m3u8");
    }
}
