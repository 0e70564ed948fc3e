//! HTTP side of the collaborator API: realtime credentials, snapshots and the
//! conversation list.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::error::{LiveError, Result};
use crate::transport::{Credential, CredentialSupplier, SnapshotSource};
use crate::types::{ConversationSnapshot, ConversationSummary};

#[derive(Clone, Debug)]
pub struct ApiClient {
    client: reqwest::Client,
    config: ApiConfig,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LiveError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Conversations visible to the caller, as returned by the server.
    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let url = self.config.conversations_url();
        let resp = self.get(&url).send().await.map_err(LiveError::from_reqwest)?;
        read_json(resp).await
    }

    fn get(&self, url: &str) -> RequestBuilder {
        let req = self.client.get(url);
        match &self.config.bearer_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T> {
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(LiveError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = resp.bytes().await.map_err(LiveError::from_reqwest)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl CredentialSupplier for ApiClient {
    async fn fetch_credential(&self) -> Result<Credential> {
        let url = &self.config.token_url;
        debug!(url = %url, "Requesting realtime credential");

        let outcome = match self.get(url).send().await {
            Ok(resp) => read_json::<serde_json::Value>(resp).await,
            Err(e) => Err(LiveError::from_reqwest(e)),
        };
        match outcome {
            Ok(value) if !value.is_null() => Ok(Credential(value)),
            Ok(_) => Err(LiveError::Credential("empty credential response".to_string())),
            Err(e) => {
                warn!(error = %e, "Credential request failed");
                Err(LiveError::Credential(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl SnapshotSource for ApiClient {
    async fn fetch_snapshot(&self, conversation_id: &str) -> Result<ConversationSnapshot> {
        let url = self.config.conversation_url(conversation_id);
        debug!(conversation = %conversation_id, url = %url, "Fetching snapshot");

        let outcome = match self.get(&url).send().await {
            Ok(resp) => read_json::<ConversationSnapshot>(resp).await,
            Err(e) => Err(LiveError::from_reqwest(e)),
        };
        outcome.map_err(|e| LiveError::Snapshot {
            conversation_id: conversation_id.to_string(),
            source: Box::new(e),
        })
    }
}
