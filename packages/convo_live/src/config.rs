use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LiveError, Result};
use crate::types::MessageRole;

// =============================================================================
// Layered config: defaults → {config_dir}/config.toml → CONVO_LIVE_* env vars
// =============================================================================
//
//   config.toml:     [api]
//                    base_url = "https://example.com/api"
//
//   env var:         CONVO_LIVE_API__BASE_URL=https://example.com/api
//
// Double underscore nests into a section; single underscores stay inside the
// field name (CONVO_LIVE_REALTIME__EVENT_BUFFER).

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub api: ApiFileConfig,
    #[serde(default)]
    pub realtime: RealtimeFileConfig,
}

/// HTTP collaborator settings (lives under `[api]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiFileConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_token_path")]
    pub token_path: String,
    /// Sent as `Authorization: Bearer ...` on every API request
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_path: default_token_path(),
            bearer_token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Push channel settings (lives under `[realtime]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RealtimeFileConfig {
    #[serde(default = "default_realtime_url")]
    pub url: String,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default = "default_narration_role")]
    pub narration_role: MessageRole,
}

impl Default for RealtimeFileConfig {
    fn default() -> Self {
        Self {
            url: default_realtime_url(),
            event_buffer: default_event_buffer(),
            narration_role: default_narration_role(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000/api".to_string()
}
fn default_token_path() -> String {
    "/chat/realtime/token".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_realtime_url() -> String {
    "ws://localhost:8000/realtime".to_string()
}
fn default_event_buffer() -> usize {
    256
}
fn default_narration_role() -> MessageRole {
    MessageRole::Assistant
}

/// Build the figment for `config_dir`.
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join("config.toml")))
        .merge(Env::prefixed("CONVO_LIVE_").split("__"))
}

// =============================================================================
// Runtime views
// =============================================================================

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub base_url: String,
    pub token_url: String,
    pub bearer_token: Option<String>,
    pub timeout: Duration,
}

impl ApiConfig {
    pub fn from_file(fc: &ApiFileConfig) -> Result<Self> {
        let base_url = fc.base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(LiveError::Config(format!(
                "api.base_url must be an http(s) URL, got {:?}",
                fc.base_url
            )));
        }
        let token_path = if fc.token_path.starts_with('/') {
            fc.token_path.clone()
        } else {
            format!("/{}", fc.token_path)
        };
        Ok(Self {
            token_url: format!("{base_url}{token_path}"),
            base_url,
            bearer_token: fc.bearer_token.clone().filter(|t| !t.trim().is_empty()),
            timeout: Duration::from_secs(fc.timeout_secs),
        })
    }

    pub fn conversation_url(&self, conversation_id: &str) -> String {
        format!("{}/chat/{}", self.base_url, conversation_id)
    }

    pub fn conversations_url(&self) -> String {
        format!("{}/chat/", self.base_url)
    }
}

#[derive(Clone, Debug)]
pub struct RealtimeConfig {
    pub url: String,
    pub event_buffer: usize,
    pub narration_role: MessageRole,
}

impl RealtimeConfig {
    pub fn from_file(fc: &RealtimeFileConfig) -> Result<Self> {
        if !(fc.url.starts_with("ws://") || fc.url.starts_with("wss://")) {
            return Err(LiveError::Config(format!(
                "realtime.url must be a ws(s) URL, got {:?}",
                fc.url
            )));
        }
        Ok(Self {
            url: fc.url.clone(),
            event_buffer: fc.event_buffer.max(1),
            narration_role: fc.narration_role,
        })
    }
}

#[derive(Clone, Debug)]
pub struct LiveConfig {
    pub config_dir: PathBuf,
    pub api: ApiConfig,
    pub realtime: RealtimeConfig,
}

impl LiveConfig {
    pub fn load(config_dir: Option<PathBuf>) -> Result<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir,
            None => default_config_dir()?,
        };
        let fc: FileConfig = load_config(&config_dir).extract()?;
        Ok(Self {
            api: ApiConfig::from_file(&fc.api)?,
            realtime: RealtimeConfig::from_file(&fc.realtime)?,
            config_dir,
        })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }
}

pub fn default_config_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".convo_live"))
        .ok_or_else(|| LiveError::Config("could not determine home directory".to_string()))
}
