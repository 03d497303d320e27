//! Per-owner overlay lookup.

use std::str::FromStr;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use crate::error::{DispatchError, DispatchResult};

/// What the dispatcher does with an owner's overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlayPolicy {
    /// Never look up overlays
    #[default]
    Disabled,
    /// Apply the overlay when one exists
    Optional,
    /// Drop records whose owner has no overlay
    RequiredDropOnMiss,
}

impl FromStr for OverlayPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "disabled" | "none" => Ok(Self::Disabled),
            "optional" => Ok(Self::Optional),
            "required" | "required_drop_on_miss" => Ok(Self::RequiredDropOnMiss),
            other => Err(format!(
                "OVERLAY_POLICY must be disabled, optional or required, got {:?}",
                other
            )),
        }
    }
}

/// Resolves an owner to the object key of their overlay image.
#[async_trait]
pub trait OverlayResolver: Send + Sync {
    /// `Ok(None)` on a miss; `Err` only when the lookup itself failed.
    async fn resolve(&self, owner: &str) -> DispatchResult<Option<String>>;
}

/// Overlay keys stored as plain Redis strings under `{prefix}{owner}`.
pub struct RedisOverlayResolver {
    client: redis::Client,
    prefix: String,
}

impl RedisOverlayResolver {
    pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    fn key(&self, owner: &str) -> String {
        format!("{}{}", self.prefix, owner)
    }
}

#[async_trait]
impl OverlayResolver for RedisOverlayResolver {
    async fn resolve(&self, owner: &str) -> DispatchResult<Option<String>> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| DispatchError::overlay_lookup(e.to_string()))?;

        let value: Option<String> = conn
            .get(self.key(owner))
            .await
            .map_err(|e| DispatchError::overlay_lookup(e.to_string()))?;

        let value = value.filter(|v| !v.trim().is_empty());
        debug!(owner = %owner, found = value.is_some(), "Overlay lookup");
        Ok(value)
    }
}
