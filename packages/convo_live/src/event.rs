//! Realtime events and the decoder that produces them from raw channel payloads.
//!
//! Everything past this module works with the closed [`RealtimeEvent`] union;
//! payloads that do not fit it are logged and dropped here.

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::types::{Message, MessageMetadata, MessageRole};

pub const MESSAGE_EVENT: &str = "message";
pub const STATUS_EVENT: &str = "status";
pub const COMPLETE_EVENT: &str = "complete";

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// A persisted message, published after the snapshot was taken
    Message(Message),
    /// Transient progress narration
    Status(StatusEvent),
    /// The server finished processing; the snapshot is stale
    Complete(CompleteEvent),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub text: String,
    pub status: Option<String>,
    /// Message-shaped entry rendered at the tail of the transcript
    pub entry: Message,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompleteEvent {
    pub goal_id: Option<String>,
    pub opportunities_count: Option<u64>,
}

/// Turns `(event name, payload)` pairs from one conversation channel into
/// [`RealtimeEvent`]s.
#[derive(Debug)]
pub struct EventDecoder {
    conversation_id: String,
    narration_role: MessageRole,
    session: String,
    next_status: u64,
}

impl EventDecoder {
    pub fn new(conversation_id: impl Into<String>, narration_role: MessageRole) -> Self {
        let session = uuid::Uuid::new_v4().simple().to_string();
        Self {
            conversation_id: conversation_id.into(),
            narration_role,
            session: session[..12].to_string(),
            next_status: 0,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Returns `None` for unknown event names and for payloads missing their
    /// required fields.
    pub fn decode(&mut self, name: &str, data: &Value) -> Option<RealtimeEvent> {
        match name {
            MESSAGE_EVENT => self.decode_message(data),
            STATUS_EVENT => self.decode_status(data),
            COMPLETE_EVENT => Some(RealtimeEvent::Complete(decode_complete(data))),
            other => {
                debug!(conversation = %self.conversation_id, event = other, "Ignoring unknown event");
                None
            }
        }
    }

    fn decode_message(&self, data: &Value) -> Option<RealtimeEvent> {
        let Some(raw) = data.get("message").filter(|m| !m.is_null()) else {
            warn!(
                conversation = %self.conversation_id,
                "Message event missing \"message\" field: {}", data
            );
            return None;
        };

        match serde_json::from_value::<Message>(raw.clone()) {
            Ok(message) if !message.id.is_empty() => Some(RealtimeEvent::Message(message)),
            Ok(_) => {
                warn!(conversation = %self.conversation_id, "Message event with empty id dropped");
                None
            }
            Err(e) => {
                warn!(conversation = %self.conversation_id, "Malformed message event: {}", e);
                None
            }
        }
    }

    fn decode_status(&mut self, data: &Value) -> Option<RealtimeEvent> {
        let text = string_field(data, "message");
        let status = string_field(data, "status");
        if text.is_none() && status.is_none() {
            warn!(conversation = %self.conversation_id, "Status event without text or status: {}", data);
            return None;
        }

        let content = text.clone().or_else(|| status.clone()).unwrap_or_default();
        let details = data
            .get("metadata")
            .filter(|m| m.as_object().is_some_and(|o| !o.is_empty()))
            .cloned();

        let entry = Message {
            id: self.status_id(),
            conversation_id: self.conversation_id.clone(),
            role: self.narration_role,
            content: content.clone(),
            metadata: Some(MessageMetadata::Status {
                status: status.clone(),
                details,
            }),
            created_at: Utc::now(),
        };

        Some(RealtimeEvent::Status(StatusEvent {
            text: content,
            status,
            entry,
        }))
    }

    /// Status ids never collide with each other (counter) and never look like
    /// a persisted id (prefix + per-decoder random tag).
    fn status_id(&mut self) -> String {
        self.next_status += 1;
        format!("status-{}-{}", self.session, self.next_status)
    }
}

fn decode_complete(data: &Value) -> CompleteEvent {
    CompleteEvent {
        goal_id: string_field(data, "goal_id"),
        opportunities_count: data.get("opportunities_count").and_then(Value::as_u64),
    }
}

fn string_field(data: &Value, key: &str) -> Option<String> {
    data.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
