//! Dispatch loop.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

use vodpipe_firestore::StatusStore;
use vodpipe_models::{parse_event, validate_key, IngestionEvent, JobSpec, ObjectCreatedRecord, StatusRecord, VideoId};
use vodpipe_queue::{EventQueue, QueueMessage};

use crate::config::DispatcherConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::launcher::TaskLauncher;
use crate::ledger::{ledger_key, ClaimState, DispatchLedger, LAUNCH_LEASE};
use crate::metrics;
use crate::overlay::{OverlayPolicy, OverlayResolver};

/// What happened to one notification record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Not an object-creation event
    Skipped,
    /// Key failed validation; never retried
    Rejected(String),
    /// Overlay required but the owner has none
    OverlayMissing,
    /// Already launched for an earlier delivery
    Duplicate,
    Launched { video_id: VideoId, task_id: String },
}

impl RecordOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Rejected(_) => "rejected",
            Self::OverlayMissing => "overlay_missing",
            Self::Duplicate => "duplicate",
            Self::Launched { .. } => "launched",
        }
    }
}

/// What happened to one queue message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Body was not a recognizable notification; acknowledged
    Invalid,
    /// Connectivity test; acknowledged
    TestEvent,
    /// Every record was handled; acknowledged
    Handled(Vec<RecordOutcome>),
    /// At least one record failed transiently; left for redelivery
    Retained,
}

impl MessageOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::TestEvent => "test_event",
            Self::Handled(_) => "handled",
            Self::Retained => "retained",
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        !matches!(self, Self::Retained)
    }
}

enum OverlayDecision {
    Proceed(Option<String>),
    Drop,
}

/// Consumes ingestion notifications and launches one job per accepted object.
pub struct Dispatcher {
    config: DispatcherConfig,
    queue: Arc<dyn EventQueue>,
    launcher: Arc<dyn TaskLauncher>,
    status: Arc<dyn StatusStore>,
    overlay: Option<Arc<dyn OverlayResolver>>,
    ledger: Option<Arc<dyn DispatchLedger>>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        queue: Arc<dyn EventQueue>,
        launcher: Arc<dyn TaskLauncher>,
        status: Arc<dyn StatusStore>,
    ) -> Self {
        Self {
            config,
            queue,
            launcher,
            status,
            overlay: None,
            ledger: None,
        }
    }

    pub fn with_overlay_resolver(mut self, resolver: Arc<dyn OverlayResolver>) -> Self {
        self.overlay = Some(resolver);
        self
    }

    /// Ledger consulted when `dedup_ttl` is configured.
    pub fn with_ledger(mut self, ledger: Arc<dyn DispatchLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Poll until `shutdown` is set, finishing the current batch first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            launcher = self.launcher.kind(),
            overlay_policy = ?self.config.overlay_policy,
            dedup = self.config.dedup_ttl.is_some(),
            "Starting dispatcher"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.queue.receive(self.config.batch_size, self.config.wait) => result,
            };

            let failed = match received {
                Ok(messages) => self.process_messages(&messages).await > 0,
                Err(e) => {
                    error!("Error receiving messages: {}", e);
                    metrics::record_poll_error();
                    true
                }
            };

            if failed {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(self.config.error_backoff) => {}
                }
            }
        }

        info!("Dispatcher stopped");
    }

    /// Receive one batch and handle it. Returns the number of messages received.
    pub async fn poll_once(&self) -> DispatchResult<usize> {
        let messages = self
            .queue
            .receive(self.config.batch_size, self.config.wait)
            .await?;
        self.process_messages(&messages).await;
        Ok(messages.len())
    }

    /// Handle a batch. Returns how many messages failed to be handled.
    async fn process_messages(&self, messages: &[QueueMessage]) -> usize {
        let mut failures = 0;
        for message in messages {
            let span = info_span!(
                "dispatch_message",
                message_id = %message.id,
                receive_count = message.receive_count
            );
            if let Err(e) = self.handle_message(message).instrument(span).await {
                error!(message_id = %message.id, "Failed to handle message: {}", e);
                failures += 1;
            }
        }
        failures
    }

    /// Handle one message, acknowledging it unless a record failed transiently.
    pub async fn handle_message(&self, message: &QueueMessage) -> DispatchResult<MessageOutcome> {
        let outcome = match parse_event(&message.body) {
            Err(e) => {
                warn!("Discarding unparseable message: {}", e);
                MessageOutcome::Invalid
            }
            Ok(IngestionEvent::TestEvent) => {
                info!("Received connectivity test event");
                MessageOutcome::TestEvent
            }
            Ok(IngestionEvent::Notification(records)) => self.handle_records(&records).await,
        };

        metrics::record_message(outcome.label());

        if outcome.is_acknowledged() {
            self.queue.ack(&message.id).await?;
            debug!("Acknowledged message");
        } else {
            warn!("Leaving message for redelivery");
        }
        Ok(outcome)
    }

    async fn handle_records(&self, records: &[ObjectCreatedRecord]) -> MessageOutcome {
        let mut outcomes = Vec::with_capacity(records.len());
        let mut retained = false;

        // Later records still launch when an earlier one fails
        for record in records {
            match self.handle_record(record).await {
                Ok(outcome) => {
                    metrics::record_record(outcome.label());
                    outcomes.push(outcome);
                }
                Err(e) => {
                    error!(bucket = %record.bucket, key = %record.raw_key, "Record dispatch failed: {}", e);
                    metrics::record_record("failed");
                    retained = true;
                }
            }
        }

        if retained {
            MessageOutcome::Retained
        } else {
            MessageOutcome::Handled(outcomes)
        }
    }

    async fn handle_record(&self, record: &ObjectCreatedRecord) -> DispatchResult<RecordOutcome> {
        if !record.is_object_created() {
            debug!(event_name = ?record.event_name, "Skipping non-creation record");
            return Ok(RecordOutcome::Skipped);
        }

        let (key, identity) = match record
            .decoded_key()
            .and_then(|key| validate_key(&key).map(|identity| (key, identity)))
        {
            Ok(accepted) => accepted,
            Err(reason) => {
                warn!(bucket = %record.bucket, key = %record.raw_key, "Rejected object key: {}", reason);
                return Ok(RecordOutcome::Rejected(reason.to_string()));
            }
        };

        let watermark = match self.resolve_overlay(&identity.owner).await? {
            OverlayDecision::Proceed(watermark) => watermark,
            OverlayDecision::Drop => {
                warn!(owner = %identity.owner, key = %key, "No overlay for owner, dropping record");
                return Ok(RecordOutcome::OverlayMissing);
            }
        };

        let claim = match (&self.ledger, self.config.dedup_ttl) {
            (Some(ledger), Some(ttl)) => {
                let claim = ledger_key(record, &key);
                match ledger.claim(&claim, LAUNCH_LEASE.min(ttl)).await? {
                    ClaimState::Acquired => Some((ledger, claim, ttl)),
                    ClaimState::Launched => {
                        info!(key = %key, claim = %claim, "Record already dispatched, skipping relaunch");
                        return Ok(RecordOutcome::Duplicate);
                    }
                    ClaimState::InFlight => {
                        return Err(DispatchError::ledger(format!("launch of {} is still in flight", claim)));
                    }
                }
            }
            _ => None,
        };

        let disambiguator = chrono::Utc::now().timestamp_millis();
        let video_id = identity.video_id(disambiguator);
        let mut spec = JobSpec::new(
            &identity,
            &record.bucket,
            &key,
            &self.config.destination_bucket,
            disambiguator,
        );
        if let Some(watermark) = watermark {
            spec = spec.with_watermark(watermark);
        }

        let task_id = match self.launcher.launch(&spec).await {
            Ok(task_id) => task_id,
            Err(e) => {
                metrics::record_launch_failure(self.launcher.kind());
                if let Some((ledger, claim, _)) = &claim {
                    if let Err(release_err) = ledger.release(claim).await {
                        warn!(claim = %claim, launch_error = %e, "Failed to release dispatch claim: {}", release_err);
                        return Err(release_err);
                    }
                }
                return Err(e);
            }
        };
        if let Some((ledger, claim, ttl)) = &claim {
            if let Err(e) = ledger.mark_launched(claim, *ttl).await {
                warn!(claim = %claim, "Failed to mark dispatch claim launched: {}", e);
            }
        }
        metrics::record_launch(self.launcher.kind());
        info!(
            video_id = %video_id,
            task_id = %task_id,
            output_prefix = %spec.output_prefix,
            watermark = spec.watermark_key.is_some(),
            "Launched job"
        );

        let pending = StatusRecord::pending(
            video_id.clone(),
            identity.owner.as_str(),
            record.bucket.as_str(),
            key.as_str(),
            spec.output_prefix.as_str(),
        );
        match self.status.create_pending(&pending).await {
            Ok(true) => debug!(video_id = %video_id, "Recorded PENDING status"),
            Ok(false) => debug!(video_id = %video_id, "Job already wrote its status"),
            Err(e) => warn!(video_id = %video_id, "Failed to record PENDING status: {}", e),
        }

        Ok(RecordOutcome::Launched { video_id, task_id })
    }

    async fn resolve_overlay(&self, owner: &str) -> DispatchResult<OverlayDecision> {
        if self.config.overlay_policy == OverlayPolicy::Disabled {
            return Ok(OverlayDecision::Proceed(None));
        }

        let resolver = self
            .overlay
            .as_ref()
            .ok_or_else(|| DispatchError::config_error("overlay policy is enabled but no resolver is configured"))?;

        match (resolver.resolve(owner).await?, self.config.overlay_policy) {
            (Some(key), _) => Ok(OverlayDecision::Proceed(Some(key))),
            (None, OverlayPolicy::RequiredDropOnMiss) => Ok(OverlayDecision::Drop),
            (None, _) => Ok(OverlayDecision::Proceed(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use mockall::mock;

    use vodpipe_firestore::{FirestoreError, FirestoreResult};
    use vodpipe_models::VideoStatus;
    use vodpipe_queue::{QueueError, QueueResult};

    use super::*;
    use crate::config::LauncherConfig;

    mock! {
        Launcher {}

        #[async_trait]
        impl TaskLauncher for Launcher {
            fn kind(&self) -> &'static str;
            async fn launch(&self, spec: &JobSpec) -> DispatchResult<String>;
        }
    }

    #[derive(Default)]
    struct MemoryQueue {
        pending: Mutex<VecDeque<QueueMessage>>,
        acked: Mutex<Vec<String>>,
    }

    impl MemoryQueue {
        fn with_bodies(bodies: &[&str]) -> Self {
            let queue = Self::default();
            for (i, body) in bodies.iter().enumerate() {
                queue
                    .pending
                    .lock()
                    .unwrap()
                    .push_back(QueueMessage::new(format!("{}-0", i + 1), *body, 1));
            }
            queue
        }

        fn acked(&self) -> Vec<String> {
            self.acked.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventQueue for MemoryQueue {
        async fn receive(&self, max: usize, wait: Duration) -> QueueResult<Vec<QueueMessage>> {
            let batch: Vec<QueueMessage> = {
                let mut pending = self.pending.lock().unwrap();
                let n = max.min(pending.len());
                pending.drain(..n).collect()
            };
            if batch.is_empty() {
                tokio::time::sleep(wait).await;
            }
            Ok(batch)
        }

        async fn ack(&self, message_id: &str) -> QueueResult<()> {
            self.acked.lock().unwrap().push(message_id.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryStatusStore {
        records: Mutex<HashMap<String, StatusRecord>>,
        unavailable: bool,
    }

    #[async_trait]
    impl StatusStore for MemoryStatusStore {
        async fn create_pending(&self, record: &StatusRecord) -> FirestoreResult<bool> {
            if self.unavailable {
                return Err(FirestoreError::ServerError(503, "unavailable".into()));
            }
            let mut records = self.records.lock().unwrap();
            if records.contains_key(record.video_id.as_str()) {
                return Ok(false);
            }
            records.insert(record.video_id.to_string(), record.clone());
            Ok(true)
        }

        async fn upsert(&self, record: &StatusRecord) -> FirestoreResult<()> {
            self.records
                .lock()
                .unwrap()
                .insert(record.video_id.to_string(), record.clone());
            Ok(())
        }

        async fn get(&self, video_id: &VideoId) -> FirestoreResult<Option<StatusRecord>> {
            Ok(self.records.lock().unwrap().get(video_id.as_str()).cloned())
        }
    }

    struct StaticOverlays {
        overlays: HashMap<String, String>,
        failing: bool,
    }

    #[async_trait]
    impl OverlayResolver for StaticOverlays {
        async fn resolve(&self, owner: &str) -> DispatchResult<Option<String>> {
            if self.failing {
                return Err(DispatchError::overlay_lookup("connection refused"));
            }
            Ok(self.overlays.get(owner).cloned())
        }
    }

    /// Ledger entries map to whether the launch completed.
    #[derive(Default)]
    struct MemoryLedger {
        entries: Mutex<HashMap<String, bool>>,
        fail_release: bool,
    }

    impl MemoryLedger {
        fn expire_leases(&self) {
            self.entries.lock().unwrap().retain(|_, launched| *launched);
        }
    }

    #[async_trait]
    impl DispatchLedger for MemoryLedger {
        async fn claim(&self, key: &str, _lease: Duration) -> DispatchResult<ClaimState> {
            let mut entries = self.entries.lock().unwrap();
            Ok(match entries.get(key) {
                Some(true) => ClaimState::Launched,
                Some(false) => ClaimState::InFlight,
                None => {
                    entries.insert(key.to_string(), false);
                    ClaimState::Acquired
                }
            })
        }

        async fn mark_launched(&self, key: &str, _ttl: Duration) -> DispatchResult<()> {
            self.entries.lock().unwrap().insert(key.to_string(), true);
            Ok(())
        }

        async fn release(&self, key: &str) -> DispatchResult<()> {
            if self.fail_release {
                return Err(DispatchError::ledger("connection reset"));
            }
            self.entries.lock().unwrap().remove(key);
            Ok(())
        }
    }

    /// Redelivers the same notification forever and fails every ack.
    #[derive(Default)]
    struct StuckQueue {
        receives: AtomicUsize,
    }

    #[async_trait]
    impl EventQueue for StuckQueue {
        async fn receive(&self, _max: usize, _wait: Duration) -> QueueResult<Vec<QueueMessage>> {
            let n = self.receives.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(vec![QueueMessage::new("1-0", notification("alice%23%23%23trip.mp4"), n as u64)])
        }

        async fn ack(&self, _message_id: &str) -> QueueResult<()> {
            Err(QueueError::connection_failed("broken pipe"))
        }
    }

    fn config(policy: OverlayPolicy) -> DispatcherConfig {
        DispatcherConfig {
            destination_bucket: "outputs".to_string(),
            batch_size: 10,
            wait: Duration::from_millis(10),
            error_backoff: Duration::from_millis(10),
            overlay_policy: policy,
            overlay_key_prefix: "overlay:".to_string(),
            dedup_ttl: None,
            launcher: LauncherConfig::Process {
                binary: "vodpipe-job".into(),
            },
            metrics_addr: None,
            forwarded_env: Vec::new(),
        }
    }

    fn notification(key: &str) -> String {
        serde_json::json!({
            "Records": [{
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": {"name": "B"},
                    "object": {"key": key, "size": 1024, "sequencer": "0A1B"}
                }
            }]
        })
        .to_string()
    }

    fn launcher_ok(times: usize) -> MockLauncher {
        let mut launcher = MockLauncher::new();
        launcher.expect_kind().return_const("mock");
        launcher
            .expect_launch()
            .times(times)
            .returning(|_| Ok("task-1".to_string()));
        launcher
    }

    fn dispatcher(
        policy: OverlayPolicy,
        queue: Arc<MemoryQueue>,
        launcher: MockLauncher,
        status: Arc<MemoryStatusStore>,
    ) -> Dispatcher {
        Dispatcher::new(config(policy), queue, Arc::new(launcher), status)
    }

    #[tokio::test]
    async fn test_accepted_key_launches_then_acks() {
        let queue = Arc::new(MemoryQueue::with_bodies(&[&notification("alice%23%23%23trip.mp4")]));
        let status = Arc::new(MemoryStatusStore::default());

        let mut launcher = MockLauncher::new();
        launcher.expect_kind().return_const("mock");
        launcher
            .expect_launch()
            .withf(|spec: &JobSpec| {
                spec.source_bucket == "B"
                    && spec.video_key == "alice###trip.mp4"
                    && spec.destination_bucket == "outputs"
                    && spec.output_prefix.starts_with("processed/alice###trip-")
                    && spec.output_prefix.ends_with('/')
                    && spec.watermark_key.is_none()
            })
            .times(1)
            .returning(|_| Ok("container-1".to_string()));

        let dispatcher = dispatcher(OverlayPolicy::Disabled, queue.clone(), launcher, status.clone());
        assert_eq!(dispatcher.poll_once().await.unwrap(), 1);

        assert_eq!(queue.acked(), vec!["1-0"]);
        let records = status.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        let record = records.values().next().unwrap();
        assert_eq!(record.status, VideoStatus::Pending);
        assert_eq!(record.owner, "alice");
        assert_eq!(record.source_key, "alice###trip.mp4");
    }

    #[tokio::test]
    async fn test_launch_failure_leaves_message_unacked() {
        let queue = Arc::new(MemoryQueue::with_bodies(&[&notification("alice%23%23%23trip.mp4")]));
        let status = Arc::new(MemoryStatusStore::default());

        let mut launcher = MockLauncher::new();
        launcher.expect_kind().return_const("mock");
        launcher
            .expect_launch()
            .times(1)
            .returning(|_| Err(DispatchError::launch("docker daemon unavailable")));

        let dispatcher = dispatcher(OverlayPolicy::Disabled, queue.clone(), launcher, status.clone());
        dispatcher.poll_once().await.unwrap();

        assert!(queue.acked().is_empty());
        assert!(status.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_keys_are_acked_without_launch() {
        let queue = Arc::new(MemoryQueue::with_bodies(&[
            &notification("videos/alice-myclip.mp4"),
            &notification("..%2Fetc%23%23%23passwd"),
            &notification("alice%23%23%23a%01b.mp4"),
        ]));
        let status = Arc::new(MemoryStatusStore::default());
        let dispatcher = dispatcher(OverlayPolicy::Disabled, queue.clone(), launcher_ok(0), status.clone());

        assert_eq!(dispatcher.poll_once().await.unwrap(), 3);
        assert_eq!(queue.acked(), vec!["1-0", "2-0", "3-0"]);
        assert!(status.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_test_event_and_garbage_are_acked() {
        let queue = Arc::new(MemoryQueue::default());
        let dispatcher = dispatcher(
            OverlayPolicy::Disabled,
            queue.clone(),
            launcher_ok(0),
            Arc::new(MemoryStatusStore::default()),
        );

        let test = dispatcher
            .handle_message(&QueueMessage::new("1-0", r#"{"Event":"s3:TestEvent"}"#, 1))
            .await
            .unwrap();
        let garbage = dispatcher
            .handle_message(&QueueMessage::new("2-0", "not json", 1))
            .await
            .unwrap();
        let shapeless = dispatcher
            .handle_message(&QueueMessage::new("3-0", r#"{"Service":"x"}"#, 1))
            .await
            .unwrap();

        assert_eq!(test, MessageOutcome::TestEvent);
        assert_eq!(garbage, MessageOutcome::Invalid);
        assert_eq!(shapeless, MessageOutcome::Invalid);
        assert_eq!(queue.acked(), vec!["1-0", "2-0", "3-0"]);
    }

    #[tokio::test]
    async fn test_non_creation_records_are_skipped() {
        let body = serde_json::json!({
            "Records": [{
                "eventName": "ObjectRemoved:Delete",
                "s3": {"bucket": {"name": "B"}, "object": {"key": "alice%23%23%23trip.mp4"}}
            }]
        })
        .to_string();
        let queue = Arc::new(MemoryQueue::default());
        let dispatcher = dispatcher(
            OverlayPolicy::Disabled,
            queue.clone(),
            launcher_ok(0),
            Arc::new(MemoryStatusStore::default()),
        );

        let outcome = dispatcher.handle_message(&QueueMessage::new("1-0", body, 1)).await.unwrap();
        assert_eq!(outcome, MessageOutcome::Handled(vec![RecordOutcome::Skipped]));
        assert_eq!(queue.acked(), vec!["1-0"]);
    }

    #[tokio::test]
    async fn test_required_overlay_miss_drops_record() {
        let queue = Arc::new(MemoryQueue::default());
        let dispatcher = dispatcher(
            OverlayPolicy::RequiredDropOnMiss,
            queue.clone(),
            launcher_ok(0),
            Arc::new(MemoryStatusStore::default()),
        )
        .with_overlay_resolver(Arc::new(StaticOverlays {
            overlays: HashMap::new(),
            failing: false,
        }));

        let outcome = dispatcher
            .handle_message(&QueueMessage::new("1-0", notification("alice%23%23%23trip.mp4"), 1))
            .await
            .unwrap();

        assert_eq!(outcome, MessageOutcome::Handled(vec![RecordOutcome::OverlayMissing]));
        assert_eq!(queue.acked(), vec!["1-0"]);
    }

    #[tokio::test]
    async fn test_optional_overlay_is_bound_when_present() {
        let queue = Arc::new(MemoryQueue::default());
        let mut launcher = MockLauncher::new();
        launcher.expect_kind().return_const("mock");
        launcher
            .expect_launch()
            .withf(|spec: &JobSpec| spec.watermark_key.as_deref() == Some("overlays/alice.png"))
            .times(1)
            .returning(|_| Ok("task".to_string()));

        let overlays = HashMap::from([("alice".to_string(), "overlays/alice.png".to_string())]);
        let dispatcher = dispatcher(
            OverlayPolicy::Optional,
            queue.clone(),
            launcher,
            Arc::new(MemoryStatusStore::default()),
        )
        .with_overlay_resolver(Arc::new(StaticOverlays {
            overlays,
            failing: false,
        }));

        dispatcher
            .handle_message(&QueueMessage::new("1-0", notification("alice%23%23%23trip.mp4"), 1))
            .await
            .unwrap();
        assert_eq!(queue.acked(), vec!["1-0"]);
    }

    #[tokio::test]
    async fn test_optional_overlay_miss_launches_without_watermark() {
        let queue = Arc::new(MemoryQueue::default());
        let mut launcher = MockLauncher::new();
        launcher.expect_kind().return_const("mock");
        launcher
            .expect_launch()
            .withf(|spec: &JobSpec| spec.watermark_key.is_none())
            .times(1)
            .returning(|_| Ok("task".to_string()));

        let dispatcher = dispatcher(
            OverlayPolicy::Optional,
            queue.clone(),
            launcher,
            Arc::new(MemoryStatusStore::default()),
        )
        .with_overlay_resolver(Arc::new(StaticOverlays {
            overlays: HashMap::new(),
            failing: false,
        }));

        let outcome = dispatcher
            .handle_message(&QueueMessage::new("1-0", notification("bob%23%23%23clip.mov"), 1))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            MessageOutcome::Handled(ref records) if matches!(records[0], RecordOutcome::Launched { .. })
        ));
    }

    #[tokio::test]
    async fn test_overlay_lookup_error_is_transient() {
        let queue = Arc::new(MemoryQueue::default());
        let dispatcher = dispatcher(
            OverlayPolicy::Optional,
            queue.clone(),
            launcher_ok(0),
            Arc::new(MemoryStatusStore::default()),
        )
        .with_overlay_resolver(Arc::new(StaticOverlays {
            overlays: HashMap::new(),
            failing: true,
        }));

        let outcome = dispatcher
            .handle_message(&QueueMessage::new("1-0", notification("alice%23%23%23trip.mp4"), 1))
            .await
            .unwrap();
        assert_eq!(outcome, MessageOutcome::Retained);
        assert!(queue.acked().is_empty());
    }

    #[tokio::test]
    async fn test_pending_write_failure_does_not_block_ack() {
        let queue = Arc::new(MemoryQueue::default());
        let status = Arc::new(MemoryStatusStore {
            unavailable: true,
            ..Default::default()
        });
        let dispatcher = dispatcher(OverlayPolicy::Disabled, queue.clone(), launcher_ok(1), status);

        let outcome = dispatcher
            .handle_message(&QueueMessage::new("1-0", notification("alice%23%23%23trip.mp4"), 1))
            .await
            .unwrap();
        assert!(outcome.is_acknowledged());
        assert_eq!(queue.acked(), vec!["1-0"]);
    }

    #[tokio::test]
    async fn test_one_failed_record_retains_whole_message() {
        let body = serde_json::json!({
            "Records": [
                {"eventName": "ObjectCreated:Put", "s3": {"bucket": {"name": "B"}, "object": {"key": "alice%23%23%23a.mp4"}}},
                {"eventName": "ObjectCreated:Put", "s3": {"bucket": {"name": "B"}, "object": {"key": "bob%23%23%23b.mp4"}}}
            ]
        })
        .to_string();

        let mut launcher = MockLauncher::new();
        launcher.expect_kind().return_const("mock");
        launcher
            .expect_launch()
            .withf(|spec: &JobSpec| spec.video_key.starts_with("alice"))
            .times(1)
            .returning(|_| Ok("task-a".to_string()));
        launcher
            .expect_launch()
            .withf(|spec: &JobSpec| spec.video_key.starts_with("bob"))
            .times(1)
            .returning(|_| Err(DispatchError::launch("quota")));

        let queue = Arc::new(MemoryQueue::default());
        let dispatcher = dispatcher(
            OverlayPolicy::Disabled,
            queue.clone(),
            launcher,
            Arc::new(MemoryStatusStore::default()),
        );

        let outcome = dispatcher.handle_message(&QueueMessage::new("1-0", body, 1)).await.unwrap();
        assert_eq!(outcome, MessageOutcome::Retained);
        assert!(queue.acked().is_empty());
    }

    #[tokio::test]
    async fn test_ledger_suppresses_relaunch_of_redelivered_record() {
        let queue = Arc::new(MemoryQueue::default());
        let mut config = config(OverlayPolicy::Disabled);
        config.dedup_ttl = Some(Duration::from_secs(3600));
        let dispatcher = Dispatcher::new(
            config,
            queue.clone(),
            Arc::new(launcher_ok(1)),
            Arc::new(MemoryStatusStore::default()),
        )
        .with_ledger(Arc::new(MemoryLedger::default()));

        let body = notification("alice%23%23%23trip.mp4");
        let first = dispatcher.handle_message(&QueueMessage::new("1-0", body.clone(), 1)).await.unwrap();
        let second = dispatcher.handle_message(&QueueMessage::new("1-0", body, 2)).await.unwrap();

        assert!(matches!(first, MessageOutcome::Handled(ref r) if matches!(r[0], RecordOutcome::Launched { .. })));
        assert_eq!(second, MessageOutcome::Handled(vec![RecordOutcome::Duplicate]));
        assert_eq!(queue.acked(), vec!["1-0", "1-0"]);
    }

    #[tokio::test]
    async fn test_failed_launch_releases_ledger_claim() {
        let ledger = Arc::new(MemoryLedger::default());
        let mut launcher = MockLauncher::new();
        launcher.expect_kind().return_const("mock");
        let mut calls = 0;
        launcher.expect_launch().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(DispatchError::launch("transient"))
            } else {
                Ok("task".to_string())
            }
        });

        let mut config = config(OverlayPolicy::Disabled);
        config.dedup_ttl = Some(Duration::from_secs(3600));
        let queue = Arc::new(MemoryQueue::default());
        let dispatcher = Dispatcher::new(
            config,
            queue.clone(),
            Arc::new(launcher),
            Arc::new(MemoryStatusStore::default()),
        )
        .with_ledger(ledger.clone());

        let body = notification("alice%23%23%23trip.mp4");
        let first = dispatcher.handle_message(&QueueMessage::new("1-0", body.clone(), 1)).await.unwrap();
        assert_eq!(first, MessageOutcome::Retained);
        assert!(ledger.entries.lock().unwrap().is_empty());

        let second = dispatcher.handle_message(&QueueMessage::new("1-0", body, 2)).await.unwrap();
        assert!(second.is_acknowledged());
        assert_eq!(queue.acked(), vec!["1-0"]);
    }

    #[tokio::test]
    async fn test_unreleased_lease_retains_until_it_expires() {
        let ledger = Arc::new(MemoryLedger {
            fail_release: true,
            ..Default::default()
        });
        let mut launcher = MockLauncher::new();
        launcher.expect_kind().return_const("mock");
        let mut calls = 0;
        launcher.expect_launch().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(DispatchError::launch("transient"))
            } else {
                Ok("task".to_string())
            }
        });

        let mut config = config(OverlayPolicy::Disabled);
        config.dedup_ttl = Some(Duration::from_secs(3600));
        let queue = Arc::new(MemoryQueue::default());
        let dispatcher = Dispatcher::new(
            config,
            queue.clone(),
            Arc::new(launcher),
            Arc::new(MemoryStatusStore::default()),
        )
        .with_ledger(ledger.clone());

        let body = notification("alice%23%23%23trip.mp4");
        let failed = dispatcher.handle_message(&QueueMessage::new("1-0", body.clone(), 1)).await.unwrap();
        assert_eq!(failed, MessageOutcome::Retained);

        // Lease still held: neither a duplicate nor a second launch
        let held = dispatcher.handle_message(&QueueMessage::new("1-0", body.clone(), 2)).await.unwrap();
        assert_eq!(held, MessageOutcome::Retained);
        assert!(queue.acked().is_empty());

        ledger.expire_leases();
        let relaunched = dispatcher.handle_message(&QueueMessage::new("1-0", body.clone(), 3)).await.unwrap();
        assert!(matches!(
            relaunched,
            MessageOutcome::Handled(ref r) if matches!(r[0], RecordOutcome::Launched { .. })
        ));
        assert_eq!(queue.acked(), vec!["1-0"]);

        let duplicate = dispatcher.handle_message(&QueueMessage::new("1-0", body, 4)).await.unwrap();
        assert_eq!(duplicate, MessageOutcome::Handled(vec![RecordOutcome::Duplicate]));
    }

    #[tokio::test]
    async fn test_handling_error_backs_off_before_next_poll() {
        let queue = Arc::new(StuckQueue::default());
        let mut launcher = MockLauncher::new();
        launcher.expect_kind().return_const("mock");
        launcher.expect_launch().returning(|_| Ok("task".to_string()));

        let mut config = config(OverlayPolicy::Disabled);
        config.error_backoff = Duration::from_millis(200);
        let dispatcher = Dispatcher::new(
            config,
            queue.clone(),
            Arc::new(launcher),
            Arc::new(MemoryStatusStore::default()),
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { dispatcher.run(rx).await });

        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        let receives = queue.receives.load(Ordering::SeqCst);
        assert!((1..=2).contains(&receives), "polled {} times", receives);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let queue = Arc::new(MemoryQueue::with_bodies(&[&notification("alice%23%23%23trip.mp4")]));
        let dispatcher = dispatcher(
            OverlayPolicy::Disabled,
            queue.clone(),
            launcher_ok(1),
            Arc::new(MemoryStatusStore::default()),
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { dispatcher.run(rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(queue.acked(), vec!["1-0"]);
    }
}
