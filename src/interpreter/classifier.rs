use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::prompts::render;
use crate::config::Config;
use crate::interpreter::decode::intent_from_value;
use crate::model::{complete_with_backoff, parse_json_reply, ModelClient, ModelRequest};
use crate::retry::RetryPolicy;
use crate::types::{Intent, PageState, CAPABILITIES};

const SYSTEM_PROMPT: &str = "You map browser automation commands to intents. Answer with JSON only.";

/// Free-text fallback stage backed by the external model.
pub struct Classifier {
    model: Arc<dyn ModelClient>,
    policy: RetryPolicy,
    model_name: String,
    prompt: String,
}

impl Classifier {
    pub fn new(model: Arc<dyn ModelClient>, config: &Config) -> Self {
        Self {
            model,
            policy: RetryPolicy::from_config(&config.retry),
            model_name: config.model.chat_model.clone(),
            prompt: config.prompts.classifier.clone(),
        }
    }

    /// Never fails: anything the model cannot place becomes `Unknown`.
    pub async fn classify(&self, text: &str, page: &PageState) -> Intent {
        let capabilities = CAPABILITIES.join(", ");
        let prompt = render(
            &self.prompt,
            &[
                ("capabilities", &capabilities),
                ("url", &page.url),
                ("title", &page.title),
                ("command", text),
            ],
        );
        let mut request = ModelRequest::text(&self.model_name, SYSTEM_PROMPT, prompt);
        request.max_tokens = 200;

        let unknown = || Intent::Unknown {
            text: text.to_string(),
        };
        let reply = match complete_with_backoff(self.model.as_ref(), &self.policy, request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Command classifier unavailable: {}", e);
                return unknown();
            }
        };

        match parse_json_reply(&reply).as_ref().and_then(intent_from_value) {
            Some(intent) => {
                debug!("Classifier mapped '{}' to {}", text, intent.tag());
                intent
            }
            None => {
                debug!("Classifier could not place '{}': {}", text, reply);
                unknown()
            }
        }
    }
}
