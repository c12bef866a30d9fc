//! Shared lifecycle state types.

use std::fmt;

/// Lifecycle of a [`crate::sync::StatusSyncService`] session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    Initializing,
    Ready,
    Destroyed,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Destroyed => "destroyed",
        };
        f.write_str(label)
    }
}

/// Connection state of a [`crate::channel::RealtimeChannel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting to retry after an abnormal close; carries the attempt number.
    Reconnecting(u32),
    /// Reconnect attempts exhausted; only fallback poll ticks are emitted.
    FallbackPolling,
}

impl ChannelState {
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}
