//! Error type shared by every layer of the crate.

use tokio_tungstenite::tungstenite;

use crate::channel::TransitionError;

pub type Result<T> = std::result::Result<T, LiveError>;

#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("credential request failed: {0}")]
    Credential(String),

    #[error("realtime connection failed: {0}")]
    Connect(String),

    #[error("realtime transport error: {0}")]
    Transport(String),

    #[error("snapshot request for conversation {conversation_id} failed: {source}")]
    Snapshot {
        conversation_id: String,
        #[source]
        source: Box<LiveError>,
    },

    #[error("server responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
}

impl LiveError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Credential(_) => "credential",
            Self::Connect(_) => "connect",
            Self::Transport(_) => "transport",
            Self::Snapshot { .. } => "snapshot",
            Self::Status { .. } => "status",
            Self::Decode(_) => "decode",
            Self::Config(_) => "config",
            Self::InvalidTransition(_) => "invalid_transition",
        }
    }

    /// Whether this failure leaves the channel in `Failed` (recoverable by
    /// an explicit reconnect) rather than being handed back to the caller.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Self::Credential(_) | Self::Connect(_) | Self::Transport(_)
        )
    }

    /// HTTP status of a rejected request, looking through snapshot wrapping.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Snapshot { source, .. } => source.http_status(),
            _ => None,
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Connect(err.to_string())
        } else if err.is_decode() {
            Self::Transport(format!("malformed response body: {err}"))
        } else {
            Self::Transport(err.to_string())
        }
    }

    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        let is_connect = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            tungstenite::Error::Http(_) | tungstenite::Error::Url(_) => true,
            _ => false,
        };
        if is_connect {
            Self::Connect(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<figment::Error> for LiveError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}
