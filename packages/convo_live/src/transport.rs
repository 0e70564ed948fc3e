//! Seams to the outside world: where credentials, channel subscriptions and
//! snapshots come from.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::ConversationSnapshot;

/// Short-lived capability for the realtime transport. The core never looks
/// inside; only a [`Transport`] does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(pub Value);

/// One published event as delivered on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    pub channel: String,
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

/// A live subscription to one channel.
///
/// Dropping it (or calling [`Subscription::unsubscribe`]) cancels the
/// transport task and closes the event receiver, so nothing published on the
/// old channel can be read afterwards.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    events: mpsc::Receiver<InboundFrame>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(
        channel: impl Into<String>,
        events: mpsc::Receiver<InboundFrame>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            channel: channel.into(),
            events,
            cancel,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next frame, or `None` once the transport has closed the channel.
    pub async fn recv(&mut self) -> Option<InboundFrame> {
        self.events.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        self.events.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
pub trait CredentialSupplier: Send + Sync {
    /// Called once per connection attempt; results are never cached.
    async fn fetch_credential(&self) -> Result<Credential>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs the connect handshake with `credential` and subscribes to
    /// `channel`. Resolves once the transport reports it is connected.
    async fn subscribe(&self, credential: Credential, channel: &str) -> Result<Subscription>;
}

#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self, conversation_id: &str) -> Result<ConversationSnapshot>;
}
