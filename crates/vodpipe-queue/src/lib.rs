//! Redis Streams ingestion queue.
//!
//! This crate provides:
//! - Long-poll consumption through a consumer group
//! - Visibility timeout via reclaiming idle pending entries
//! - Receive counting and a dead-letter stream

pub mod error;
pub mod message;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use message::{EventQueue, QueueMessage};
pub use queue::{QueueConfig, RedisEventQueue};
