//! Remote text-embedding and chat providers.
//!
//! Both speak the OpenAI-compatible JSON API exposed by Upstage Solar:
//! - `POST {base_url}/embeddings` with `{"model", "input": [..]}`
//! - `POST {base_url}/chat/completions` with `{"model", "messages": [..]}`
//!
//! Calls are single-shot: no retry and no backoff. Callers own retry policy.

use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::config::ProviderConfig;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider request timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider request failed: {0}")]
    Transport(String),

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("provider misconfigured: {0}")]
    Config(String),
}

impl ProviderError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::Timeout(_))
    }
}

pub trait EmbeddingProvider: Send + Sync {
    /// Embed each input string. The result holds one vector per input, in
    /// input order, or fewer when the provider returns nothing for them.
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    fn name(&self) -> &str;
}

pub trait ChatProvider: Send + Sync {
    fn complete(&self, system_prompt: &str, user_content: &str) -> Result<String, ProviderError>;
}

/// Provider endpoint, credentials and models.
///
/// Built once per process from the loaded config and handed to each
/// provider; nothing here is read from the environment afterwards.
#[derive(Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub embedding_model: String,
    pub chat_model: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ClientConfig {{ base_url: {:?}, api_key: {}, embedding_model: {:?}, chat_model: {:?}, timeout: {:?} }}",
            self.base_url,
            if self.api_key.is_some() { "[REDACTED]" } else { "None" },
            self.embedding_model,
            self.chat_model,
            self.timeout
        )
    }
}

impl From<&ProviderConfig> for ClientConfig {
    fn from(cfg: &ProviderConfig) -> Self {
        Self {
            base_url: cfg.base_url.trim().trim_end_matches('/').to_string(),
            api_key: cfg
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string),
            embedding_model: cfg.embedding_model.clone(),
            chat_model: cfg.chat_model.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
        }
    }
}

/// Shared blocking HTTP plumbing for both remote providers.
struct RemoteClient {
    config: ClientConfig,
    http: reqwest::blocking::Client,
}

impl RemoteClient {
    fn new(config: ClientConfig) -> Result<Self, ProviderError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| ProviderError::Config(format!("couldnt build http client: {err}")))?;

        Ok(Self { config, http })
    }

    fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ProviderError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Config("api key is not set".to_string()))?;

        let url = format!("{}/{path}", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .map_err(|err| self.map_transport(err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            log::error!("{url} returned {status}: {body}");
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response.json::<R>().map_err(|err| {
            if err.is_timeout() {
                ProviderError::Timeout(self.config.timeout)
            } else {
                ProviderError::InvalidResponse(err.to_string())
            }
        })
    }

    fn map_transport(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.config.timeout)
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    /// Vectors ordered by their `index` field.
    fn into_vectors(mut self) -> Vec<Vec<f32>> {
        self.data.sort_by_key(|item| item.index);
        self.data.into_iter().map(|item| item.embedding).collect()
    }
}

pub struct RemoteEmbeddingProvider {
    client: RemoteClient,
}

impl RemoteEmbeddingProvider {
    pub fn new(config: ClientConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: RemoteClient::new(config)?,
        })
    }
}

impl EmbeddingProvider for RemoteEmbeddingProvider {
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let request = EmbeddingRequest {
            model: &self.client.config.embedding_model,
            input: texts,
        };
        let response: EmbeddingResponse = self.client.post_json("embeddings", &request)?;

        Ok(response.into_vectors())
    }

    fn name(&self) -> &str {
        &self.client.config.embedding_model
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatReply>,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl ChatResponse {
    fn first_content(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()?
            .message?
            .content
            .map(|content| content.trim().to_string())
    }
}

pub struct RemoteChatProvider {
    client: RemoteClient,
}

impl RemoteChatProvider {
    pub fn new(config: ClientConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: RemoteClient::new(config)?,
        })
    }
}

impl ChatProvider for RemoteChatProvider {
    fn complete(&self, system_prompt: &str, user_content: &str) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.client.config.chat_model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_content,
                },
            ],
        };
        let response: ChatResponse = self.client.post_json("chat/completions", &request)?;

        response.first_content().ok_or_else(|| {
            log::warn!("chat response has no message content");
            ProviderError::InvalidResponse("chat response has no message content".to_string())
        })
    }
}
