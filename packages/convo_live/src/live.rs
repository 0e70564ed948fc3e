//! `LiveTranscript`: the surface a UI consumes.
//!
//! One value per mounted conversation view. It owns the channel manager and
//! the per-conversation reconciler, and is driven by awaiting
//! [`LiveTranscript::next_update`] from a single task.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::channel::{self, ChannelManager, Completion, ConnectTicket, ConnectionState};
use crate::error::{LiveError, Result};
use crate::event::{CompleteEvent, EventDecoder};
use crate::reconcile::{PushOutcome, Reconciler};
use crate::transport::{CredentialSupplier, InboundFrame, Subscription, Transport};
use crate::types::{ConversationSnapshot, Message, MessageRole};

type ConnectOutcome = (ConnectTicket, Result<Subscription>);
type CompletionCallback = Box<dyn FnMut(&str, &CompleteEvent) + Send>;

/// Something the caller may want to react to.
#[derive(Debug)]
pub enum Update {
    /// The channel for the active conversation is live
    Connected,
    /// Credential fetch or connect failed; call `reconnect()` to retry
    Failed(LiveError),
    /// The merged transcript changed
    Transcript,
    /// The server finished; the completion callback has already run
    Completed(CompleteEvent),
    /// The transport closed the channel
    Closed,
}

struct ActiveConversation {
    reconciler: Reconciler,
    decoder: EventDecoder,
}

pub struct LiveTranscript {
    credentials: Arc<dyn CredentialSupplier>,
    transport: Arc<dyn Transport>,
    narration_role: MessageRole,
    channel: ChannelManager,
    active: Option<ActiveConversation>,
    on_complete: Option<CompletionCallback>,
    outcomes_tx: mpsc::UnboundedSender<ConnectOutcome>,
    outcomes_rx: mpsc::UnboundedReceiver<ConnectOutcome>,
    in_flight: usize,
}

enum Step {
    Outcome(Option<ConnectOutcome>),
    Frame(Option<InboundFrame>),
}

impl LiveTranscript {
    pub fn new(credentials: Arc<dyn CredentialSupplier>, transport: Arc<dyn Transport>) -> Self {
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        Self {
            credentials,
            transport,
            narration_role: MessageRole::Assistant,
            channel: ChannelManager::new(),
            active: None,
            on_complete: None,
            outcomes_tx,
            outcomes_rx,
            in_flight: 0,
        }
    }

    /// Role given to synthesized status entries.
    pub fn with_narration_role(mut self, role: MessageRole) -> Self {
        self.narration_role = role;
        self
    }

    /// Registers the callback run once per completion event, with the id of
    /// the conversation that completed. Typically used to refetch the snapshot.
    pub fn on_complete<F>(&mut self, callback: F)
    where
        F: FnMut(&str, &CompleteEvent) + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.reconciler.conversation_id())
    }

    /// Makes `conversation_id` the active conversation.
    ///
    /// The same id again is a no-op. A different id drops all buffered events
    /// and seen ids, unsubscribes the old channel and starts connecting the
    /// new one. `None` tears everything down. Must be called from within a
    /// tokio runtime.
    pub fn set_conversation(&mut self, conversation_id: Option<&str>) {
        match conversation_id {
            Some(id) if self.conversation_id() == Some(id) => {}
            Some(id) => {
                info!(conversation = %id, "Switching conversation");
                match self.active.as_mut() {
                    Some(active) => {
                        active.reconciler.reset(id);
                        active.decoder = EventDecoder::new(id, self.narration_role);
                    }
                    None => {
                        self.active = Some(ActiveConversation {
                            reconciler: Reconciler::new(id),
                            decoder: EventDecoder::new(id, self.narration_role),
                        });
                    }
                }
                self.start_connect(id);
            }
            None => self.shutdown(),
        }
    }

    /// Re-runs the connect sequence for the active conversation. Returns
    /// false when there is nothing to do (no conversation, or already
    /// connected/connecting).
    pub fn reconnect(&mut self) -> bool {
        match self.conversation_id().map(str::to_string) {
            Some(id) => self.start_connect(&id),
            None => false,
        }
    }

    /// Tears down the channel and forgets the active conversation.
    pub fn shutdown(&mut self) {
        if let Some(id) = self.conversation_id() {
            info!(conversation = %id, "Shutting down live transcript");
        }
        self.channel.disconnect();
        self.active = None;
    }

    /// Replaces the snapshot. Snapshots fetched for a conversation that is no
    /// longer active are ignored and false is returned.
    pub fn apply_snapshot(&mut self, snapshot: ConversationSnapshot) -> bool {
        match self.active.as_mut() {
            Some(active) => active.reconciler.apply_snapshot(snapshot),
            None => false,
        }
    }

    pub fn snapshot(&self) -> Option<&ConversationSnapshot> {
        self.active.as_ref().and_then(|a| a.reconciler.snapshot())
    }

    /// The merged transcript of the active conversation.
    pub fn messages(&self) -> Vec<Message> {
        self.active
            .as_ref()
            .map(|a| a.reconciler.transcript())
            .unwrap_or_default()
    }

    pub fn is_live(&self) -> bool {
        self.channel.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.channel.state()
    }

    /// Waits for and applies the next connection outcome or channel event.
    ///
    /// Returns `None` when there is nothing left to wait for: no attempt in
    /// flight and no subscription.
    pub async fn next_update(&mut self) -> Option<Update> {
        loop {
            let can_frame = self.channel.has_subscription();
            let awaiting_outcome = self.in_flight > 0;
            if !awaiting_outcome && !can_frame {
                return None;
            }

            let step = tokio::select! {
                outcome = self.outcomes_rx.recv(), if awaiting_outcome => Step::Outcome(outcome),
                frame = self.channel.recv(), if can_frame => Step::Frame(frame),
                else => return None,
            };

            let update = match step {
                Step::Outcome(Some((ticket, outcome))) => {
                    self.in_flight -= 1;
                    self.handle_outcome(&ticket, outcome)
                }
                Step::Outcome(None) => return None,
                Step::Frame(Some(frame)) => self.handle_frame(frame),
                Step::Frame(None) => {
                    self.channel.mark_lost();
                    Some(Update::Closed)
                }
            };

            if update.is_some() {
                return update;
            }
        }
    }

    fn start_connect(&mut self, conversation_id: &str) -> bool {
        let Some(ticket) = self.channel.connect(conversation_id) else {
            return false;
        };

        let credentials = self.credentials.clone();
        let transport = self.transport.clone();
        let tx = self.outcomes_tx.clone();
        self.in_flight += 1;

        tokio::spawn(async move {
            let outcome = channel::establish(&ticket, credentials.as_ref(), transport.as_ref()).await;
            // The receiver only goes away with the LiveTranscript itself.
            let _ = tx.send((ticket, outcome));
        });
        true
    }

    fn handle_outcome(
        &mut self,
        ticket: &ConnectTicket,
        outcome: Result<Subscription>,
    ) -> Option<Update> {
        match self.channel.complete(ticket, outcome) {
            Completion::Connected => Some(Update::Connected),
            Completion::Failed(e) => Some(Update::Failed(e)),
            Completion::Stale => None,
        }
    }

    fn handle_frame(&mut self, frame: InboundFrame) -> Option<Update> {
        let active = self.active.as_mut()?;
        let expected = channel::channel_name(active.reconciler.conversation_id());
        if frame.channel != expected {
            debug!(channel = %frame.channel, expected = %expected, "Dropping frame for another channel");
            return None;
        }

        let event = active.decoder.decode(&frame.name, &frame.data)?;
        match active.reconciler.push(event) {
            PushOutcome::Appended | PushOutcome::Status => Some(Update::Transcript),
            PushOutcome::Duplicate | PushOutcome::Foreign => None,
            PushOutcome::Complete(complete) => {
                info!(
                    conversation = %active.reconciler.conversation_id(),
                    goal = ?complete.goal_id,
                    "Conversation completed"
                );
                if let Some(callback) = self.on_complete.as_mut() {
                    callback(active.reconciler.conversation_id(), &complete);
                }
                Some(Update::Completed(complete))
            }
        }
    }
}

impl Drop for LiveTranscript {
    fn drop(&mut self) {
        self.channel.disconnect();
    }
}
