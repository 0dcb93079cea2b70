use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::error::AgentError;
use crate::retry::{retry_with_floor, RetryPolicy};

pub mod openai;

pub use openai::OpenAiClient;

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub system: String,
    pub user: String,
    /// screenshot sent along for vision requests
    pub image_png: Option<Vec<u8>>,
    pub json_mode: bool,
    pub model: String,
    pub max_tokens: u32,
}

impl ModelRequest {
    pub fn text(model: &str, system: &str, user: String) -> Self {
        Self {
            system: system.to_string(),
            user,
            image_png: None,
            json_mode: true,
            model: model.to_string(),
            max_tokens: 1500,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider rejected credentials")]
    Auth,

    #[error("network error: {0}")]
    Network(String),

    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    #[error("no model configured (set OPENAI_API_KEY)")]
    Unavailable,
}

impl ModelError {
    /// Rate limits, network blips and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::RateLimited { .. } | ModelError::Network(_) => true,
            ModelError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<ModelError> for AgentError {
    fn from(err: ModelError) -> Self {
        AgentError::ExternalService(err.to_string())
    }
}

/// External language/vision model. Implementations own their transport
/// timeout; callers own retries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> Result<String, ModelError>;

    fn is_available(&self) -> bool {
        true
    }
}

/// Stand-in used when no API key is configured.
pub struct UnavailableModel;

#[async_trait]
impl ModelClient for UnavailableModel {
    async fn complete(&self, _request: ModelRequest) -> Result<String, ModelError> {
        Err(ModelError::Unavailable)
    }

    fn is_available(&self) -> bool {
        false
    }
}

pub async fn complete_with_backoff(
    client: &dyn ModelClient,
    policy: &RetryPolicy,
    request: ModelRequest,
) -> Result<String, ModelError> {
    retry_with_floor(
        policy,
        "model request",
        |_| client.complete(request.clone()),
        ModelError::is_retryable,
        |e| match e {
            ModelError::RateLimited { retry_after } => *retry_after,
            _ => None,
        },
    )
    .await
}

/// Pull the first JSON value out of a model reply, tolerating markdown
/// fences and chatter around it.
pub fn parse_json_reply(reply: &str) -> Option<serde_json::Value> {
    let trimmed = reply.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    let unfenced = trimmed
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if let Ok(value) = serde_json::from_str(unfenced) {
        return Some(value);
    }
    let start = trimmed.find(|c| c == '{' || c == '[')?;
    let end = trimmed.rfind(|c| c == '}' || c == ']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}
