//! HTTP transport against the provider REST API
//!
//! Implements the engine's [`MessageTransport`] over two endpoints:
//!
//! - `GET {base}/messages?account={id}` — the complete message collection
//! - `POST {base}/messages/send` — dispatch one outbound text
//!
//! Both carry a bearer token. Fetch bodies are decoded by the engine's
//! [`parse_collection`], which handles the response shapes seen across
//! provider API versions.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use waba_connect_engine::{parse_collection, EngineError, MessageTransport, RawMessage, Result};

use crate::config::ApiConfig;

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    account_id: String,
}

impl HttpTransport {
    pub fn new(api: &ApiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: api.base_url.trim_end_matches('/').to_string(),
            api_key: api.api_key.clone(),
            account_id: api.account_id.clone(),
        }
    }
}

/// Send response body.
#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default = "default_accepted")]
    accepted: bool,
    #[serde(default)]
    error: Option<String>,
}

fn default_accepted() -> bool {
    true
}

#[async_trait]
impl MessageTransport for HttpTransport {
    async fn fetch_messages(&self) -> Result<Vec<RawMessage>> {
        let url = format!("{}/messages", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("account", self.account_id.as_str())])
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let data = response
            .bytes()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        let messages = parse_collection(&data)?;
        debug!(count = messages.len(), "fetched message collection");
        Ok(messages)
    }

    async fn send_message(&self, phone: &str, body: &str) -> Result<()> {
        let url = format!("{}/messages/send", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "account": self.account_id,
                "phone": phone,
                "message": body,
            }))
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let reason = response
                .text()
                .await
                .ok()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| status.to_string());
            return Err(EngineError::Transport(reason));
        }

        // An empty or non-JSON success body counts as accepted.
        let outcome = response.json::<SendResponse>().await.unwrap_or(SendResponse {
            accepted: true,
            error: None,
        });
        if !outcome.accepted {
            return Err(EngineError::Transport(
                outcome
                    .error
                    .unwrap_or_else(|| "send not accepted".to_string()),
            ));
        }
        Ok(())
    }
}
