//! WebSocket implementation of [`Transport`].
//!
//! Wire protocol, one JSON object per text frame:
//!
//! ```text
//! client → server   {"action":"auth","credential":<credential>}
//! server → client   {"action":"connected"} | {"action":"error","message":"..."}
//! client → server   {"action":"subscribe","channel":"conversation:<id>"}
//! server → client   {"action":"publish","channel":"...","name":"...","data":{...}}
//! client → server   {"action":"unsubscribe","channel":"..."}   (on teardown)
//! ```

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RealtimeConfig;
use crate::error::{LiveError, Result};
use crate::transport::{Credential, InboundFrame, Subscription, Transport};

#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientFrame<'a> {
    Auth { credential: &'a Value },
    Subscribe { channel: &'a str },
    Unsubscribe { channel: &'a str },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ServerFrame {
    Connected,
    Error {
        #[serde(default)]
        message: String,
    },
    Publish {
        channel: String,
        name: String,
        #[serde(default)]
        data: Value,
    },
    #[serde(other)]
    Other,
}

fn encode(frame: &ClientFrame<'_>) -> Result<tungstenite::Message> {
    let json = serde_json::to_string(frame)?;
    Ok(tungstenite::Message::Text(json.into()))
}

#[derive(Clone, Debug)]
pub struct WsTransport {
    url: String,
    event_buffer: usize,
}

impl WsTransport {
    pub fn new(config: &RealtimeConfig) -> Self {
        Self {
            url: config.url.clone(),
            event_buffer: config.event_buffer.max(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn subscribe(&self, credential: Credential, channel: &str) -> Result<Subscription> {
        debug!(url = %self.url, channel = %channel, "Opening realtime connection");
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(LiveError::from_tungstenite)?;
        let (mut ws_write, mut ws_read) = ws_stream.split();

        ws_write
            .send(encode(&ClientFrame::Auth {
                credential: &credential.0,
            })?)
            .await
            .map_err(LiveError::from_tungstenite)?;

        // Handshake: wait for the server to accept the credential.
        loop {
            match ws_read.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(ServerFrame::Connected) => break,
                        Ok(ServerFrame::Error { message }) => {
                            return Err(LiveError::Connect(message));
                        }
                        Ok(other) => debug!(frame = ?other, "Ignoring frame before connected"),
                        Err(e) => warn!(error = %e, "Malformed frame during handshake"),
                    }
                }
                Some(Ok(tungstenite::Message::Close(_))) | None => {
                    return Err(LiveError::Connect(
                        "connection closed during handshake".to_string(),
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(LiveError::from_tungstenite(e)),
            }
        }

        ws_write
            .send(encode(&ClientFrame::Subscribe { channel })?)
            .await
            .map_err(LiveError::from_tungstenite)?;
        info!(channel = %channel, "Subscribed to realtime channel");

        let (tx, rx) = mpsc::channel(self.event_buffer);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task_channel = channel.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        if let Ok(msg) = encode(&ClientFrame::Unsubscribe { channel: &task_channel }) {
                            let _ = ws_write.send(msg).await;
                        }
                        let _ = ws_write.send(tungstenite::Message::Close(None)).await;
                        debug!(channel = %task_channel, "Unsubscribed");
                        break;
                    }
                    msg = ws_read.next() => {
                        match msg {
                            Some(Ok(tungstenite::Message::Text(text))) => {
                                match serde_json::from_str::<ServerFrame>(&text) {
                                    Ok(ServerFrame::Publish { channel, name, data }) => {
                                        if channel != task_channel {
                                            debug!(channel = %channel, "Ignoring publish for another channel");
                                            continue;
                                        }
                                        if tx.send(InboundFrame { channel, name, data }).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(ServerFrame::Error { message }) => {
                                        warn!(channel = %task_channel, message = %message, "Realtime server error");
                                    }
                                    Ok(_) => {}
                                    Err(e) => warn!(channel = %task_channel, error = %e, "Malformed realtime frame"),
                                }
                            }
                            Some(Ok(tungstenite::Message::Close(_))) | None => {
                                info!(channel = %task_channel, "Realtime connection closed by server");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!(channel = %task_channel, error = %e, "Realtime connection error");
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(Subscription::new(channel, rx, cancel))
    }
}
