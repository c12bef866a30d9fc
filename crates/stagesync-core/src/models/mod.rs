//! Data models for stagesync

mod conflict;
mod message;
mod queued_update;
mod status;

pub use conflict::{ConflictRecord, ConflictType, FieldConflict, ResolutionStrategy};
pub use message::{MessageKind, SyncMessage};
pub use queued_update::{EnqueueRequest, Priority, QueuedUpdate, DEFAULT_MAX_RETRIES};
pub use status::{PerformanceStatus, StatusRecord, StatusUpdate, TrackedField};
