//! # Convo Live
//!
//! Live conversation transcripts: a fetched snapshot of a conversation merged
//! with messages pushed over a realtime channel while the server works.
//!
//! ## Overview
//!
//! The server persists messages and exposes them through an HTTP snapshot
//! endpoint. While it is processing, it also publishes events on a
//! per-conversation channel (`conversation:{id}`). This library provides:
//! - A typed, validated view of those events (`message`, `status`, `complete`)
//! - Deduplication by message id across snapshot and live copies
//! - A merged transcript ordered by creation time, with narration at the tail
//! - A channel lifecycle that follows the conversation the caller is viewing
//!
//! ## Data Flow
//!
//! ```text
//!   GET /chat/{id} ──► ConversationSnapshot ──┐
//!                                             ├─► Reconciler ─► transcript()
//!   conversation:{id} ─► EventDecoder ────────┘
//!          ▲
//!          └── ChannelManager ◄── CredentialSupplier + Transport
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use convo_live::{ConvoLive, LiveConfig, Update};
//!
//! # async fn run() -> convo_live::Result<()> {
//! let convo = ConvoLive::new(LiveConfig::load(None)?)?;
//! let mut live = convo.live_transcript();
//!
//! live.set_conversation(Some("conversation-id"));
//! live.apply_snapshot(convo.fetch_snapshot("conversation-id").await?);
//!
//! while let Some(update) = live.next_update().await {
//!     if let Update::Transcript = update {
//!         for message in live.messages() {
//!             println!("{}: {}", message.role, message.content);
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

pub mod channel;
pub mod config;
pub mod dedup;
pub mod error;
pub mod event;
pub mod http;
pub mod live;
pub mod query;
pub mod reconcile;
pub mod transport;
pub mod types;
pub mod ws;

pub use channel::{ChannelManager, ConnectionState, channel_name};
pub use config::{ApiConfig, LiveConfig, RealtimeConfig};
pub use dedup::SeenIds;
pub use error::{LiveError, Result};
pub use event::{CompleteEvent, EventDecoder, RealtimeEvent, StatusEvent};
pub use http::ApiClient;
pub use live::{LiveTranscript, Update};
pub use query::TranscriptQuery;
pub use reconcile::{PushOutcome, Reconciler};
pub use transport::{
    Credential, CredentialSupplier, InboundFrame, SnapshotSource, Subscription, Transport,
};
pub use types::{
    ConversationSnapshot, ConversationStatus, ConversationSummary, Message, MessageMetadata,
    MessageRole, Question, QuestionAnswer, QuestionKind,
};
pub use ws::WsTransport;

/// Entry point wiring the HTTP API client and the WebSocket transport from
/// one [`LiveConfig`].
#[derive(Clone)]
pub struct ConvoLive {
    api: Arc<ApiClient>,
    transport: Arc<WsTransport>,
    narration_role: MessageRole,
}

impl ConvoLive {
    pub fn new(config: LiveConfig) -> Result<Self> {
        Ok(Self {
            api: Arc::new(ApiClient::new(config.api)?),
            transport: Arc::new(WsTransport::new(&config.realtime)),
            narration_role: config.realtime.narration_role,
        })
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// A fresh, idle live transcript sharing this instance's collaborators.
    pub fn live_transcript(&self) -> LiveTranscript {
        LiveTranscript::new(self.api.clone(), self.transport.clone())
            .with_narration_role(self.narration_role)
    }

    pub async fn fetch_snapshot(&self, conversation_id: &str) -> Result<ConversationSnapshot> {
        self.api.fetch_snapshot(conversation_id).await
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        self.api.list_conversations().await
    }
}
