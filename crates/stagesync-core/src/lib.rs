//! stagesync-core - live performer status for events
//!
//! This crate contains the status cache, the conflict-resolution policy, the
//! retry queue that carries writes to the durable store, and the real-time
//! channel that fans changes out to every connected client. The
//! [`StatusSyncService`] orchestrator ties them together.

pub mod backoff;
pub mod cache;
pub mod channel;
pub mod config;
pub mod conflict;
pub mod error;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod state;
pub mod store;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{PerformanceStatus, StatusRecord, StatusUpdate};
pub use sync::StatusSyncService;
