//! Ingestion queue using Redis Streams.

use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{QueueError, QueueResult};
use crate::message::{EventQueue, QueueMessage};

/// Stream entry field holding the notification JSON.
pub const BODY_FIELD: &str = "body";

/// Upper bound on idle entries inspected per receive.
const RECLAIM_SCAN_LIMIT: usize = 100;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream carrying ingestion notifications
    pub stream_name: String,
    /// Consumer group shared by all dispatchers
    pub consumer_group: String,
    /// Dead letter stream name
    pub dlq_stream_name: String,
    /// Deliveries before a message is dead-lettered
    pub max_receive_count: u64,
    /// How long a received message stays hidden before redelivery
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "vodpipe:ingest".to_string(),
            consumer_group: "vodpipe:dispatchers".to_string(),
            dlq_stream_name: "vodpipe:ingest:dlq".to_string(),
            max_receive_count: 5,
            visibility_timeout: Duration::from_secs(300),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        let defaults = Self::default();
        let config = Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_receive_count: std::env::var("QUEUE_MAX_RECEIVE_COUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_receive_count),
            visibility_timeout: Duration::from_secs(
                std::env::var("QUEUE_VISIBILITY_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.visibility_timeout.as_secs()),
            ),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> QueueResult<()> {
        if self.max_receive_count == 0 {
            return Err(QueueError::invalid_config("QUEUE_MAX_RECEIVE_COUNT must be at least 1"));
        }
        if self.visibility_timeout.is_zero() {
            return Err(QueueError::invalid_config("QUEUE_VISIBILITY_TIMEOUT_SECS must be positive"));
        }
        if self.stream_name == self.dlq_stream_name {
            return Err(QueueError::invalid_config("QUEUE_DLQ_STREAM must differ from QUEUE_STREAM"));
        }
        Ok(())
    }
}

/// A pending entry whose visibility timeout has expired.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ExpiredEntry {
    id: String,
    times_delivered: u64,
}

/// Split expired entries into those to redeliver and those to dead-letter.
fn partition_expired(entries: Vec<ExpiredEntry>, max_receive_count: u64) -> (Vec<ExpiredEntry>, Vec<ExpiredEntry>) {
    entries
        .into_iter()
        .partition(|e| e.times_delivered < max_receive_count)
}

fn entry_body(entry: &StreamId) -> String {
    entry.get::<String>(BODY_FIELD).unwrap_or_default()
}

/// The entry `id` if this consumer's XCLAIM won it.
fn claimed_entry<'a>(reply: &'a StreamClaimReply, id: &str) -> Option<&'a StreamId> {
    reply.ids.iter().find(|e| e.id == id)
}

/// Redis Streams backed `EventQueue`.
pub struct RedisEventQueue {
    client: redis::Client,
    config: QueueConfig,
    consumer_name: String,
}

impl RedisEventQueue {
    /// Create a new queue client with a unique consumer name.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let consumer_name = format!("dispatcher-{}", Uuid::new_v4());
        Ok(Self {
            client,
            config,
            consumer_name,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env()?)
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        // Start from the beginning so notifications published before the group existed are read
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Append a notification to the stream.
    pub async fn publish(&self, body: &str) -> QueueResult<String> {
        let mut conn = self.connection().await?;
        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg(BODY_FIELD)
            .arg(body)
            .query_async(&mut conn)
            .await?;
        debug!("Published message {}", message_id);
        Ok(message_id)
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Pending entries idle for longer than the visibility timeout.
    async fn expired_entries(&self, conn: &mut redis::aio::MultiplexedConnection) -> QueueResult<Vec<ExpiredEntry>> {
        let reply: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(self.config.visibility_timeout.as_millis() as u64)
            .arg("-")
            .arg("+")
            .arg(RECLAIM_SCAN_LIMIT)
            .query_async(conn)
            .await?;

        Ok(reply
            .ids
            .into_iter()
            .map(|p| ExpiredEntry {
                id: p.id,
                times_delivered: p.times_delivered as u64,
            })
            .collect())
    }

    /// Copy an exhausted entry to the dead letter stream and acknowledge it.
    async fn dead_letter(&self, conn: &mut redis::aio::MultiplexedConnection, entry: &ExpiredEntry) -> QueueResult<()> {
        // Claiming resets the idle time, so a concurrent dispatcher's claim fails
        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.consumer_name)
            .arg(self.config.visibility_timeout.as_millis() as u64)
            .arg(&entry.id)
            .query_async(conn)
            .await?;

        let Some(original) = claimed_entry(&claimed, &entry.id) else {
            debug!(message_id = %entry.id, "Exhausted message already claimed elsewhere");
            return Ok(());
        };

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg(BODY_FIELD)
            .arg(entry_body(original))
            .arg("original_id")
            .arg(&entry.id)
            .arg("receive_count")
            .arg(entry.times_delivered)
            .query_async::<()>(conn)
            .await?;

        self.ack(&entry.id).await?;
        warn!(
            message_id = %entry.id,
            receive_count = entry.times_delivered,
            "Moved message to dead letter stream"
        );
        Ok(())
    }

    /// Redeliver expired entries to this consumer, dead-lettering exhausted ones.
    async fn reclaim_expired(&self, max: usize) -> QueueResult<Vec<QueueMessage>> {
        let mut conn = self.connection().await?;

        let expired = self.expired_entries(&mut conn).await?;
        if expired.is_empty() {
            return Ok(Vec::new());
        }

        let (redeliver, exhausted) = partition_expired(expired, self.config.max_receive_count);
        for entry in &exhausted {
            self.dead_letter(&mut conn, entry).await?;
        }

        let redeliver: Vec<ExpiredEntry> = redeliver.into_iter().take(max).collect();
        if redeliver.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.consumer_name)
            .arg(self.config.visibility_timeout.as_millis() as u64);
        for entry in &redeliver {
            cmd.arg(&entry.id);
        }
        let claimed: StreamClaimReply = cmd.query_async(&mut conn).await?;

        let messages: Vec<QueueMessage> = claimed
            .ids
            .iter()
            .map(|entry| {
                let previous = redeliver
                    .iter()
                    .find(|e| e.id == entry.id)
                    .map(|e| e.times_delivered)
                    .unwrap_or(0);
                QueueMessage::new(entry.id.clone(), entry_body(entry), previous + 1)
            })
            .collect();

        if !messages.is_empty() {
            info!("Reclaimed {} messages past their visibility timeout", messages.len());
        }
        Ok(messages)
    }

    /// Block on the consumer group for new entries.
    async fn read_new(&self, max: usize, wait: Duration) -> QueueResult<Vec<QueueMessage>> {
        let mut conn = self.connection().await?;

        // Nil when BLOCK times out
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.consumer_name)
            .arg("COUNT")
            .arg(max)
            .arg("BLOCK")
            .arg(wait.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        Ok(reply
            .unwrap_or_default()
            .keys
            .into_iter()
            .flat_map(|key| key.ids)
            .map(|entry| {
                let body = entry_body(&entry);
                QueueMessage::new(entry.id, body, 1)
            })
            .collect())
    }
}

#[async_trait]
impl EventQueue for RedisEventQueue {
    async fn receive(&self, max: usize, wait: Duration) -> QueueResult<Vec<QueueMessage>> {
        let max = max.max(1);

        let reclaimed = self.reclaim_expired(max).await?;
        if !reclaimed.is_empty() {
            return Ok(reclaimed);
        }

        let messages = self.read_new(max, wait).await?;
        if !messages.is_empty() {
            debug!("Received {} messages from stream", messages.len());
        }
        Ok(messages)
    }

    /// Acknowledge and delete the entry.
    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged message: {}", message_id);
        Ok(())
    }
}
