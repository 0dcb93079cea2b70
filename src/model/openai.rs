use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ModelConfig;
use crate::error::{AgentError, Result};
use crate::model::{ModelClient, ModelError, ModelRequest};

/// Chat-completions client for OpenAI-compatible providers.
pub struct OpenAiClient {
    client: Client,
    api_url: String,
    api_key: String,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(config: &ModelConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AgentError::ExternalService(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key,
            temperature: config.temperature,
        })
    }

    fn build_body(&self, request: &ModelRequest) -> Value {
        let user_content = match &request.image_png {
            Some(png) => json!([
                { "type": "text", "text": request.user },
                {
                    "type": "image_url",
                    "image_url": { "url": format!("data:image/png;base64,{}", STANDARD.encode(png)) }
                }
            ]),
            None => json!(request.user),
        };

        let mut body = json!({
            "model": request.model,
            "temperature": self.temperature,
            "max_tokens": request.max_tokens,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": user_content }
            ],
        });
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn complete(&self, request: ModelRequest) -> std::result::Result<String, ModelError> {
        let body = self.build_body(&request);
        debug!(
            "Sending model request to {} (model {}, image: {})",
            self.api_url,
            request.model,
            request.image_png.is_some()
        );

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            warn!("Model provider rate limited the request (retry-after {:?})", retry_after);
            return Err(ModelError::RateLimited { retry_after });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ModelError::Auth);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        parsed["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ModelError::InvalidResponse(format!("no message content in {}", parsed)))
    }
}
