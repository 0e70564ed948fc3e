//! Channel lifecycle: which conversation channel we are subscribed to and
//! how far the connection has got.
//!
//! The manager is synchronous. A connect request hands out a
//! [`ConnectTicket`]; the caller runs [`establish`] for it wherever it likes
//! and feeds the result back through [`ChannelManager::complete`]. Results for
//! tickets that are no longer current are discarded there, which is how a
//! credential fetch that outlives a conversation switch is neutralized.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{LiveError, Result};
use crate::transport::{CredentialSupplier, InboundFrame, Subscription, Transport};

/// Channel name both publisher and subscriber agree on.
pub fn channel_name(conversation_id: &str) -> String {
    format!("conversation:{conversation_id}")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelTransition {
    /// idle|failed → connecting; connected → connecting only after a teardown
    Connect,
    /// connecting → connected
    TransportConnected,
    /// connecting|connected → failed
    TransportFailed,
    /// any → idle
    Disconnect,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot apply {transition:?} while {from}")]
    InvalidTransition {
        from: ConnectionState,
        transition: ChannelTransition,
    },
}

impl ConnectionState {
    pub fn apply(self, transition: ChannelTransition) -> std::result::Result<Self, TransitionError> {
        use ChannelTransition::*;
        use ConnectionState::*;

        match (self, transition) {
            (_, Disconnect) => Ok(Idle),
            (Idle | Failed | Connected, Connect) => Ok(Connecting),
            (Connecting, TransportConnected) => Ok(Connected),
            (Connecting | Connected, TransportFailed) => Ok(Failed),
            (from, transition) => Err(TransitionError::InvalidTransition { from, transition }),
        }
    }
}

/// Identifies one connection attempt for one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTicket {
    pub conversation_id: String,
    pub attempt: u64,
}

impl ConnectTicket {
    pub fn channel(&self) -> String {
        channel_name(&self.conversation_id)
    }
}

/// What [`ChannelManager::complete`] did with an attempt's outcome.
#[derive(Debug)]
pub enum Completion {
    Connected,
    Failed(LiveError),
    /// The ticket was superseded; the outcome was thrown away
    Stale,
}

/// Owns the subscription for at most one conversation at a time.
#[derive(Debug, Default)]
pub struct ChannelManager {
    conversation_id: Option<String>,
    state: ConnectionState,
    attempt: u64,
    subscription: Option<Subscription>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Starts connecting to `conversation_id`.
    ///
    /// Returns `None` when already connected or connecting to that
    /// conversation. Switching conversations unsubscribes the old channel
    /// before the new attempt is issued.
    pub fn connect(&mut self, conversation_id: &str) -> Option<ConnectTicket> {
        if self.conversation_id.as_deref() == Some(conversation_id)
            && matches!(
                self.state,
                ConnectionState::Connected | ConnectionState::Connecting
            )
        {
            debug!(conversation = %conversation_id, state = %self.state, "Connect is a no-op");
            return None;
        }

        if self.conversation_id.is_some() {
            self.teardown();
        }

        self.state = match self.state.apply(ChannelTransition::Connect) {
            Ok(state) => state,
            Err(e) => {
                warn!(conversation = %conversation_id, "Refusing connect: {}", e);
                return None;
            }
        };
        self.attempt += 1;
        self.conversation_id = Some(conversation_id.to_string());

        info!(
            conversation = %conversation_id,
            attempt = self.attempt,
            channel = %channel_name(conversation_id),
            "Connecting"
        );
        Some(ConnectTicket {
            conversation_id: conversation_id.to_string(),
            attempt: self.attempt,
        })
    }

    pub fn is_current(&self, ticket: &ConnectTicket) -> bool {
        self.state == ConnectionState::Connecting
            && self.attempt == ticket.attempt
            && self.conversation_id.as_deref() == Some(ticket.conversation_id.as_str())
    }

    /// Applies the outcome of [`establish`] for `ticket`.
    pub fn complete(&mut self, ticket: &ConnectTicket, outcome: Result<Subscription>) -> Completion {
        if !self.is_current(ticket) {
            debug!(
                conversation = %ticket.conversation_id,
                attempt = ticket.attempt,
                "Discarding stale connection outcome"
            );
            // Dropping a stale subscription unsubscribes it.
            drop(outcome);
            return Completion::Stale;
        }

        let transition = match &outcome {
            Ok(_) => ChannelTransition::TransportConnected,
            Err(_) => ChannelTransition::TransportFailed,
        };
        self.state = match self.state.apply(transition) {
            Ok(state) => state,
            Err(e) => return Completion::Failed(LiveError::from(e)),
        };

        match outcome {
            Ok(subscription) => {
                info!(conversation = %ticket.conversation_id, channel = %subscription.channel(), "Connected");
                self.subscription = Some(subscription);
                Completion::Connected
            }
            Err(e) => {
                warn!(conversation = %ticket.conversation_id, "Connection failed: {}", e);
                Completion::Failed(e)
            }
        }
    }

    /// Waits for the next frame on the current subscription. Returns
    /// `None` immediately when there is no subscription.
    pub async fn recv(&mut self) -> Option<InboundFrame> {
        match self.subscription.as_mut() {
            Some(subscription) => subscription.recv().await,
            None => None,
        }
    }

    pub fn has_subscription(&self) -> bool {
        self.subscription.is_some()
    }

    /// The transport closed the channel underneath us.
    pub fn mark_lost(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            warn!(channel = %subscription.channel(), "Channel closed by transport");
            subscription.unsubscribe();
        }
        if let Ok(state) = self.state.apply(ChannelTransition::TransportFailed) {
            self.state = state;
        }
    }

    /// Releases the subscription and forgets the conversation.
    pub fn disconnect(&mut self) {
        self.teardown();
        self.conversation_id = None;
    }

    fn teardown(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            info!(channel = %subscription.channel(), "Unsubscribing");
            subscription.unsubscribe();
        }
        self.state = ConnectionState::Idle;
    }
}

/// The asynchronous half of a connection attempt: fetch a fresh credential,
/// then connect and subscribe to the ticket's channel.
pub async fn establish(
    ticket: &ConnectTicket,
    credentials: &dyn CredentialSupplier,
    transport: &dyn Transport,
) -> Result<Subscription> {
    let credential = credentials.fetch_credential().await?;
    transport.subscribe(credential, &ticket.channel()).await
}
