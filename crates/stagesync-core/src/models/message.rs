//! Real-time channel wire messages
//!
//! Every frame is a JSON object:
//! `{ "type", "eventId", "artistId"?, "status"?, "statuses"?, "timestamp", "senderId", "messageId"? }`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::StatusRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    #[serde(rename = "artist_status_update", rename_all = "camelCase")]
    StatusUpdate {
        artist_id: String,
        status: StatusRecord,
    },
    #[serde(rename = "bulk_status_sync")]
    BulkSync { statuses: Vec<StatusRecord> },
    Ping,
    Pong,
}

impl MessageKind {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::StatusUpdate { .. } => "artist_status_update",
            Self::BulkSync { .. } => "bulk_status_sync",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

/// One frame on the real-time channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    #[serde(flatten)]
    pub kind: MessageKind,
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    /// Lets the sender drop its own echo
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl SyncMessage {
    #[must_use]
    pub fn new(kind: MessageKind, event_id: &str, sender_id: &str) -> Self {
        Self {
            kind,
            event_id: event_id.to_string(),
            timestamp: Utc::now(),
            sender_id: sender_id.to_string(),
            message_id: Some(Uuid::now_v7().to_string()),
        }
    }

    #[must_use]
    pub fn status_update(event_id: &str, sender_id: &str, record: StatusRecord) -> Self {
        Self::new(
            MessageKind::StatusUpdate {
                artist_id: record.artist_id.clone(),
                status: record,
            },
            event_id,
            sender_id,
        )
    }

    #[must_use]
    pub fn bulk_sync(event_id: &str, sender_id: &str, statuses: Vec<StatusRecord>) -> Self {
        Self::new(MessageKind::BulkSync { statuses }, event_id, sender_id)
    }

    #[must_use]
    pub fn ping(event_id: &str, sender_id: &str) -> Self {
        Self::new(MessageKind::Ping, event_id, sender_id)
    }

    /// Answer to `ping`, echoing its message id.
    #[must_use]
    pub fn pong(ping: &Self, sender_id: &str) -> Self {
        Self {
            message_id: ping.message_id.clone(),
            ..Self::new(MessageKind::Pong, &ping.event_id, sender_id)
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn parse(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    use super::*;
    use crate::models::{PerformanceStatus, StatusUpdate};

    #[test]
    fn status_update_uses_wire_field_names() {
        let record = StatusRecord::from_update(
            "artist-1",
            &StatusUpdate::status(PerformanceStatus::NextOnStage).with_event("event-1"),
        )
        .unwrap();
        let message = SyncMessage::status_update("event-1", "client-a", record);
        let value: Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], json!("artist_status_update"));
        assert_eq!(value["eventId"], json!("event-1"));
        assert_eq!(value["artistId"], json!("artist-1"));
        assert_eq!(value["senderId"], json!("client-a"));
        assert_eq!(value["status"]["performanceStatus"], json!("next_on_stage"));
        assert!(value["messageId"].is_string());
    }

    #[test]
    fn parses_ping_without_message_id() {
        let raw = r#"{"type":"ping","eventId":"e","timestamp":"2026-01-01T00:00:00Z","senderId":"peer"}"#;
        let message = SyncMessage::parse(raw).unwrap();
        assert_eq!(message.kind, MessageKind::Ping);
        assert_eq!(message.message_id, None);
    }

    #[test]
    fn pong_echoes_ping_message_id() {
        let ping = SyncMessage::ping("event-1", "peer");
        let pong = SyncMessage::pong(&ping, "client-a");
        assert_eq!(pong.kind, MessageKind::Pong);
        assert_eq!(pong.message_id, ping.message_id);
        assert_eq!(pong.sender_id, "client-a");
    }

    #[test]
    fn rejects_unknown_message_type() {
        let raw = r#"{"type":"reboot","eventId":"e","timestamp":"2026-01-01T00:00:00Z","senderId":"peer"}"#;
        assert!(SyncMessage::parse(raw).is_err());
    }
}
