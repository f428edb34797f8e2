//! Minimal async LLM client.
//!
//! Exposes a small [`LlmClient`] trait with a single blocking-from-the-caller
//! `complete` call plus `available_models`, and one concrete implementation,
//! [`AnthropicClient`], backed by Anthropic's Messages API. Every client owns
//! its own per-provider call serialization: the HTTP request itself may be
//! cheap, but providers rate-limit per API key, so concurrent callers queue
//! behind a mutex owned by the client rather than a process-wide global.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

const API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Errors that can occur when talking to an LLM provider.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// The role of a message in a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One turn of conversation sent to the model.
#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// Static description of a model a client can target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub max_output_tokens: usize,
}

/// Provider-agnostic surface the rest of the engine programs against.
///
/// `complete` is `async` but is expected to behave, from the caller's
/// perspective, as a single blocking round trip: callers that need to react
/// to cancellation must race it against their own cancellation signal rather
/// than expect this trait to observe one itself.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        model_id: &str,
        messages: &[Message],
        system: Option<&str>,
        temperature: Option<f32>,
        max_tokens: usize,
    ) -> Result<String, Error>;

    fn available_models(&self) -> Vec<ModelDescriptor>;
}

/// Anthropic Messages API client.
///
/// Calls are serialized through an internal mutex owned by this client
/// instance: two engine tasks sharing one `Arc<AnthropicClient>` never issue
/// concurrent requests to the same API key.
#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    default_model: String,
    call_lock: Arc<Mutex<()>>,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .connect_timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("failed to build HTTP client"),
            api_key: api_key.into(),
            default_model: DEFAULT_MODEL.to_string(),
            call_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| Error::NoApiKey)?;
        Ok(Self::new(api_key))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| Error::Config(format!("invalid API key: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(
        &self,
        model_id: &str,
        messages: &[Message],
        system: Option<&str>,
        temperature: Option<f32>,
        max_tokens: usize,
    ) -> Result<String, Error> {
        let _permit = self.call_lock.lock().await;

        let model = if model_id.is_empty() {
            self.default_model.clone()
        } else {
            model_id.to_string()
        };

        let api_request = ApiRequest {
            model,
            max_tokens,
            system: system.map(str::to_string),
            messages: messages
                .iter()
                .map(|m| ApiMessage {
                    role: match m.role {
                        Role::User => "user".to_string(),
                        Role::Assistant => "assistant".to_string(),
                    },
                    content: m.content.clone(),
                })
                .collect(),
            temperature,
        };
        let headers = self.build_headers()?;

        let response = self
            .http
            .post(format!("{API_BASE}/messages"))
            .headers(headers)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        Ok(api_response
            .content
            .into_iter()
            .filter_map(|c| match c {
                ApiContent::Text { text } => Some(text),
                ApiContent::Other => None,
            })
            .collect::<Vec<_>>()
            .join(""))
    }

    fn available_models(&self) -> Vec<ModelDescriptor> {
        vec![
            ModelDescriptor {
                id: "claude-sonnet-4-20250514".to_string(),
                display_name: "Claude Sonnet 4".to_string(),
                max_output_tokens: 64_000,
            },
            ModelDescriptor {
                id: "claude-haiku-4-20250514".to_string(),
                display_name: "Claude Haiku 4".to_string(),
                max_output_tokens: 32_000,
            },
        ]
    }
}

// ============================================================================
// Internal wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContent {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}
