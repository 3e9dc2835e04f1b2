//! Remote chat completion client.
//!
//! Sends the whole conversation to Cohere's v2 `/chat` endpoint and reads
//! back the first text block of the reply. No streaming, no retries.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::ChatConfig;
use crate::message::Message;
use crate::{Error, Result};

/// Stand-in text when the API answers without any text block.
pub const EMPTY_REPLY: &str = "No response from assistant.";

/// Anything that can turn a conversation into the next assistant reply.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ReplyMessage>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

pub struct CohereChatClient {
    config: ChatConfig,
    api_key: Option<String>,
    client: Client,
}

impl CohereChatClient {
    pub fn new(config: ChatConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;
        let api_key = config.resolve_api_key();
        if api_key.is_none() {
            warn!(
                "No chat API key found (config or ${}); requests will fail",
                config.api_key_env
            );
        }

        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!("{}/v2/chat", self.config.host.trim_end_matches('/'))
    }
}

/// Request body: model plus the ordered `{role, content}` list.
pub fn request_body(model: &str, messages: &[Message]) -> serde_json::Value {
    json!({
        "model": model,
        "messages": messages,
    })
}

/// Pull the reply text out of a `/v2/chat` response body.
pub fn parse_reply(body: &str) -> Result<String> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|e| Error::MalformedResponse(e.to_string()))?;

    let text = response
        .message
        .and_then(|m| m.content.into_iter().next())
        .and_then(|block| block.text);

    Ok(text.unwrap_or_else(|| EMPTY_REPLY.to_string()))
}

#[async_trait]
impl ChatBackend for CohereChatClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::MissingApiKey(self.config.api_key_env.clone()))?;

        debug!(
            "Sending {} message(s) to model '{}'",
            messages.len(),
            self.config.model
        );

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&request_body(&self.config.model, messages))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    warn!("Cannot connect to chat API at {}", self.config.host);
                } else if e.is_timeout() {
                    warn!("Chat request timed out");
                }
                Error::Http(e)
            })?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }

        let reply = parse_reply(&body)?;
        debug!("Chat reply: {} chars", reply.chars().count());
        Ok(reply)
    }
}
