//! Ingestion dispatcher.
//!
//! Consumes storage notifications from the queue, validates object keys,
//! resolves per-owner overlays and launches one transcoding job per
//! accepted object. Messages are acknowledged only after every record in
//! them has been launched or permanently rejected.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod launcher;
pub mod ledger;
pub mod metrics;
pub mod overlay;

pub use config::{DispatcherConfig, LauncherConfig};
pub use dispatcher::{Dispatcher, MessageOutcome, RecordOutcome};
pub use error::{DispatchError, DispatchResult};
pub use launcher::{job_environment, DockerLauncher, ProcessLauncher, TaskLauncher};
pub use ledger::{ledger_key, ClaimState, DispatchLedger, RedisLedger, LAUNCH_LEASE};
pub use overlay::{OverlayPolicy, OverlayResolver, RedisOverlayResolver};
