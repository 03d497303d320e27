//! Opt-in dispatch dedup ledger.
//!
//! Redelivered notifications for an object that was already launched are
//! recognised by a short-lived Redis claim keyed on bucket, key and the
//! notification sequencer. A claim starts as a `launching` lease and only
//! becomes a `launched` marker once the launcher reports success, so a
//! dispatcher that dies mid-launch never turns its lease into a duplicate.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use vodpipe_models::ObjectCreatedRecord;

use crate::error::{DispatchError, DispatchResult};

const LEDGER_PREFIX: &str = "vodpipe:dispatched:";

const LAUNCHING: &str = "launching";
const LAUNCHED: &str = "launched";

/// Upper bound on how long a `launching` lease outlives its dispatcher.
pub const LAUNCH_LEASE: Duration = Duration::from_secs(60);

/// State of a ledger key when a dispatcher tries to claim it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    /// This dispatcher now holds the launching lease
    Acquired,
    /// Another delivery holds the lease and has not finished launching
    InFlight,
    /// A job was already launched for this key
    Launched,
}

/// Ledger key for a record.
pub fn ledger_key(record: &ObjectCreatedRecord, decoded_key: &str) -> String {
    match &record.sequencer {
        Some(seq) if !seq.is_empty() => format!("{}{}/{}:{}", LEDGER_PREFIX, record.bucket, decoded_key, seq),
        _ => format!("{}{}/{}", LEDGER_PREFIX, record.bucket, decoded_key),
    }
}

#[async_trait]
pub trait DispatchLedger: Send + Sync {
    /// Take the launching lease on `key` for `lease`.
    async fn claim(&self, key: &str, lease: Duration) -> DispatchResult<ClaimState>;

    /// Record a successful launch, replacing the lease for `ttl`.
    async fn mark_launched(&self, key: &str, ttl: Duration) -> DispatchResult<()>;

    /// Drop a lease after a failed launch.
    async fn release(&self, key: &str) -> DispatchResult<()>;
}

pub struct RedisLedger {
    client: redis::Client,
}

impl RedisLedger {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    async fn connection(&self) -> DispatchResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| DispatchError::ledger(e.to_string()))
    }
}

#[async_trait]
impl DispatchLedger for RedisLedger {
    async fn claim(&self, key: &str, lease: Duration) -> DispatchResult<ClaimState> {
        let mut conn = self.connection().await?;
        // SET NX EX replies OK or nil
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(LAUNCHING)
            .arg("NX")
            .arg("EX")
            .arg(lease.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| DispatchError::ledger(e.to_string()))?;
        if reply.is_some() {
            return Ok(ClaimState::Acquired);
        }

        let current: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| DispatchError::ledger(e.to_string()))?;
        Ok(existing_state(current.as_deref()))
    }

    async fn mark_launched(&self, key: &str, ttl: Duration) -> DispatchResult<()> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(key, LAUNCHED, ttl.as_secs().max(1))
            .await
            .map_err(|e| DispatchError::ledger(e.to_string()))
    }

    async fn release(&self, key: &str) -> DispatchResult<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| DispatchError::ledger(e.to_string()))
    }
}

/// State of a key whose NX claim was refused. A key that expired in between
/// counts as in flight; the next delivery claims it.
fn existing_state(value: Option<&str>) -> ClaimState {
    match value {
        Some(LAUNCHED) => ClaimState::Launched,
        _ => ClaimState::InFlight,
    }
}
