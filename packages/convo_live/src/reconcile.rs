//! Merges the fetched snapshot and the buffered live events of one
//! conversation into a single transcript.
//!
//! The merge is a pure function of (snapshot, live buffer, status buffer), so
//! it gives the same answer whichever of the snapshot or a live copy of a
//! message arrived first.

use std::collections::HashSet;
use tracing::debug;

use crate::dedup::SeenIds;
use crate::event::{CompleteEvent, RealtimeEvent};
use crate::types::{ConversationSnapshot, Message};

/// What happened to an event handed to [`Reconciler::push`].
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// A new message entered the live buffer
    Appended,
    /// The message id was already known (snapshot or earlier live copy)
    Duplicate,
    /// The message belongs to another conversation and was dropped
    Foreign,
    /// A status entry was queued at the tail
    Status,
    /// The conversation completed; nothing is rendered for it
    Complete(CompleteEvent),
}

impl PushOutcome {
    pub fn changed_transcript(&self) -> bool {
        matches!(self, Self::Appended | Self::Status)
    }
}

#[derive(Debug)]
pub struct Reconciler {
    conversation_id: String,
    snapshot: Option<ConversationSnapshot>,
    live: Vec<Message>,
    status: Vec<Message>,
    seen: SeenIds,
}

impl Reconciler {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            snapshot: None,
            live: Vec::new(),
            status: Vec::new(),
            seen: SeenIds::new(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn snapshot(&self) -> Option<&ConversationSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn seen(&self) -> &SeenIds {
        &self.seen
    }

    pub fn live_len(&self) -> usize {
        self.live.len()
    }

    /// Drops all buffered state and rebinds to `conversation_id`.
    pub fn reset(&mut self, conversation_id: impl Into<String>) {
        self.conversation_id = conversation_id.into();
        self.snapshot = None;
        self.live.clear();
        self.status.clear();
        self.seen.reset();
    }

    /// Replaces the snapshot wholesale. Returns false (and keeps the previous
    /// snapshot) when it was fetched for a different conversation.
    pub fn apply_snapshot(&mut self, snapshot: ConversationSnapshot) -> bool {
        if snapshot.id != self.conversation_id {
            debug!(
                conversation = %self.conversation_id,
                snapshot = %snapshot.id,
                "Discarding snapshot for inactive conversation"
            );
            return false;
        }

        let ids: HashSet<&str> = snapshot.messages.iter().map(|m| m.id.as_str()).collect();
        self.seen.seed(ids.iter().copied());
        // Live copies now covered by the snapshot would lose the merge anyway.
        self.live.retain(|m| !ids.contains(m.id.as_str()));
        self.snapshot = Some(snapshot);
        true
    }

    pub fn push(&mut self, event: RealtimeEvent) -> PushOutcome {
        match event {
            RealtimeEvent::Message(message) => {
                if message.conversation_id != self.conversation_id {
                    debug!(
                        conversation = %self.conversation_id,
                        foreign = %message.conversation_id,
                        id = %message.id,
                        "Dropping message for another conversation"
                    );
                    return PushOutcome::Foreign;
                }
                if !self.seen.admit(&message.id) {
                    debug!(conversation = %self.conversation_id, id = %message.id, "Duplicate message suppressed");
                    return PushOutcome::Duplicate;
                }
                self.live.push(message);
                PushOutcome::Appended
            }
            RealtimeEvent::Status(status) => {
                self.status.push(status.entry);
                PushOutcome::Status
            }
            RealtimeEvent::Complete(complete) => PushOutcome::Complete(complete),
        }
    }

    /// Snapshot and live messages, first occurrence per id, stable-sorted by
    /// creation time, followed by status entries in arrival order.
    pub fn transcript(&self) -> Vec<Message> {
        let snapshot = self.snapshot.iter().flat_map(|s| s.messages.iter());

        let mut merged = SeenIds::new();
        let mut out: Vec<Message> = snapshot
            .chain(self.live.iter())
            .filter(|m| merged.admit(&m.id))
            .cloned()
            .collect();

        out.sort_by_key(|m| m.created_at);
        out.extend(self.status.iter().cloned());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StatusEvent;
    use crate::types::{ConversationStatus, MessageMetadata, MessageRole};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn msg(id: &str, secs: i64) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: "c1".to_string(),
            role: MessageRole::Assistant,
            content: format!("content of {id}"),
            metadata: None,
            created_at: at(secs),
        }
    }

    fn status(id: &str, text: &str, secs: i64) -> RealtimeEvent {
        RealtimeEvent::Status(StatusEvent {
            text: text.to_string(),
            status: None,
            entry: Message {
                id: id.to_string(),
                conversation_id: "c1".to_string(),
                role: MessageRole::Assistant,
                content: text.to_string(),
                metadata: Some(MessageMetadata::Status {
                    status: None,
                    details: None,
                }),
                created_at: at(secs),
            },
        })
    }

    fn snapshot(messages: Vec<Message>) -> ConversationSnapshot {
        let mut s = ConversationSnapshot::new("c1", ConversationStatus::Processing);
        s.messages = messages;
        s
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn live_message_after_snapshot() {
        let mut r = Reconciler::new("c1");
        r.apply_snapshot(snapshot(vec![msg("m1", 0)]));
        assert_eq!(r.push(RealtimeEvent::Message(msg("m2", 5))), PushOutcome::Appended);
        assert_eq!(ids(&r.transcript()), ["m1", "m2"]);
    }

    #[test]
    fn live_copy_of_snapshot_message_is_suppressed() {
        let mut r = Reconciler::new("c1");
        r.apply_snapshot(snapshot(vec![msg("m1", 0)]));
        assert_eq!(r.push(RealtimeEvent::Message(msg("m1", 0))), PushOutcome::Duplicate);
        assert_eq!(ids(&r.transcript()), ["m1"]);
    }

    #[test]
    fn snapshot_arriving_late_absorbs_live_copy() {
        let mut r = Reconciler::new("c1");
        r.push(RealtimeEvent::Message(msg("m2", 5)));
        r.push(RealtimeEvent::Message(msg("m3", 9)));
        r.apply_snapshot(snapshot(vec![msg("m1", 0), msg("m2", 5)]));
        assert_eq!(r.live_len(), 1);
        assert_eq!(ids(&r.transcript()), ["m1", "m2", "m3"]);
    }

    #[test]
    fn status_entries_stay_at_tail() {
        let mut r = Reconciler::new("c1");
        r.apply_snapshot(snapshot(vec![msg("m1", 0)]));
        r.push(RealtimeEvent::Message(msg("m2", 5)));
        // Older synthesized timestamp must not move it up.
        r.push(status("status-a-1", "searching", -100));
        let t = r.transcript();
        assert_eq!(ids(&t), ["m1", "m2", "status-a-1"]);

        r.push(RealtimeEvent::Message(msg("m3", 7)));
        assert_eq!(ids(&r.transcript()), ["m1", "m2", "m3", "status-a-1"]);
    }

    #[test]
    fn equal_timestamps_keep_arrival_order() {
        let mut r = Reconciler::new("c1");
        r.apply_snapshot(snapshot(vec![msg("b", 3), msg("a", 3)]));
        r.push(RealtimeEvent::Message(msg("c", 3)));
        r.push(RealtimeEvent::Message(msg("early", 1)));
        assert_eq!(ids(&r.transcript()), ["early", "b", "a", "c"]);
    }

    #[test]
    fn foreign_message_dropped() {
        let mut r = Reconciler::new("c1");
        let mut other = msg("x1", 0);
        other.conversation_id = "c2".to_string();
        assert_eq!(r.push(RealtimeEvent::Message(other)), PushOutcome::Foreign);
        assert!(r.transcript().is_empty());
    }

    #[test]
    fn snapshot_for_other_conversation_rejected() {
        let mut r = Reconciler::new("c1");
        let mut s = snapshot(vec![msg("m1", 0)]);
        s.id = "c2".to_string();
        assert!(!r.apply_snapshot(s));
        assert!(r.snapshot().is_none());
    }

    #[test]
    fn complete_is_not_rendered() {
        let mut r = Reconciler::new("c1");
        let outcome = r.push(RealtimeEvent::Complete(CompleteEvent::default()));
        assert!(matches!(outcome, PushOutcome::Complete(_)));
        assert!(!outcome.changed_transcript());
        assert!(r.transcript().is_empty());
    }

    #[test]
    fn reset_clears_buffers() {
        let mut r = Reconciler::new("c1");
        r.apply_snapshot(snapshot(vec![msg("m1", 0)]));
        r.push(RealtimeEvent::Message(msg("m2", 1)));
        r.push(status("status-a-1", "x", 2));
        r.reset("c2");
        assert_eq!(r.conversation_id(), "c2");
        assert!(r.transcript().is_empty());
        assert!(r.seen().is_empty());
    }

    #[test]
    fn refetched_snapshot_replaces_previous() {
        let mut r = Reconciler::new("c1");
        r.apply_snapshot(snapshot(vec![msg("m1", 0)]));
        r.push(RealtimeEvent::Message(msg("m2", 4)));
        r.apply_snapshot(snapshot(vec![msg("m1", 0), msg("m2", 4), msg("m3", 6)]));
        assert_eq!(ids(&r.transcript()), ["m1", "m2", "m3"]);
        assert_eq!(r.live_len(), 0);
    }
}
