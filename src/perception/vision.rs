use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::prompts::render;
use crate::config::Config;
use crate::error::{AgentError, Result};
use crate::model::{complete_with_backoff, parse_json_reply, ModelClient, ModelRequest};
use crate::retry::RetryPolicy;
use crate::types::PageState;

const SYSTEM_PROMPT: &str =
    "You are a web page analyst for a browser automation agent. Answer with JSON only.";
const CONTENT_SNIPPET_CHARS: usize = 3000;
const PROMPT_ELEMENTS: usize = 40;

/// Advisory reading of a page. DOM-derived facts always win over it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Analysis {
    pub summary: String,
    #[serde(default)]
    pub elements: Vec<IdentifiedElement>,
    #[serde(default)]
    pub suggested_intents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IdentifiedElement {
    pub description: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub confidence: f32,
}

impl Analysis {
    /// Identified elements, most confident first.
    pub fn ranked(&self) -> Vec<&IdentifiedElement> {
        let mut ranked: Vec<_> = self.elements.iter().collect();
        ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        ranked
    }
}

/// Extra prompt context; both parts are optional.
#[derive(Debug, Clone, Default)]
pub struct VisionContext {
    pub main_content: String,
    pub recent_commands: Vec<String>,
}

pub struct VisionAnalyzer {
    model: Arc<dyn ModelClient>,
    policy: RetryPolicy,
    model_name: String,
    max_tokens: u32,
    prompt: String,
    last_good: RwLock<Option<Analysis>>,
}

impl VisionAnalyzer {
    pub fn new(model: Arc<dyn ModelClient>, config: &Config) -> Self {
        Self {
            model,
            policy: RetryPolicy::from_config(&config.retry),
            model_name: config.model.vision_model.clone(),
            max_tokens: config.model.max_tokens,
            prompt: config.prompts.vision.clone(),
            last_good: RwLock::new(None),
        }
    }

    pub async fn analyze(&self, page: &PageState, question: &str) -> Result<Analysis> {
        self.analyze_with(page, question, &VisionContext::default()).await
    }

    /// Rate limits and network errors are retried with backoff. When retries
    /// run out the last good analysis is returned instead, if there is one.
    pub async fn analyze_with(
        &self,
        page: &PageState,
        question: &str,
        context: &VisionContext,
    ) -> Result<Analysis> {
        let mut request = ModelRequest::text(&self.model_name, SYSTEM_PROMPT, self.build_prompt(page, question, context));
        request.max_tokens = self.max_tokens;
        if !page.screenshot.is_empty() {
            request.image_png = Some(page.screenshot.clone());
        }

        info!("Requesting vision analysis of {}", page.url);
        match complete_with_backoff(self.model.as_ref(), &self.policy, request).await {
            Ok(reply) => {
                let analysis = parse_analysis(&reply);
                debug!("Vision identified {} elements", analysis.elements.len());
                *self.last_good.write().await = Some(analysis.clone());
                Ok(analysis)
            }
            Err(e) => {
                if let Some(cached) = self.last_good.read().await.clone() {
                    warn!("Vision request failed ({}), using last successful analysis", e);
                    return Ok(cached);
                }
                Err(AgentError::ExternalService(format!("vision analysis failed: {}", e)))
            }
        }
    }

    pub async fn last_analysis(&self) -> Option<Analysis> {
        self.last_good.read().await.clone()
    }

    fn build_prompt(&self, page: &PageState, question: &str, context: &VisionContext) -> String {
        let elements = page
            .elements
            .iter()
            .take(PROMPT_ELEMENTS)
            .map(|el| format!("- {:?} \"{}\" selector: {}", el.role, el.display_text(), el.selector))
            .collect::<Vec<_>>()
            .join("\n");
        let content: String = context.main_content.chars().take(CONTENT_SNIPPET_CHARS).collect();
        let history = if context.recent_commands.is_empty() {
            String::new()
        } else {
            format!("Recent commands:\n{}", context.recent_commands.join("\n"))
        };
        render(
            &self.prompt,
            &[
                ("url", &page.url),
                ("title", &page.title),
                ("elements", &elements),
                ("content", &content),
                ("history", &history),
                ("question", question),
            ],
        )
    }
}

/// Structured reply if the model produced one, otherwise the raw text as a
/// summary.
fn parse_analysis(reply: &str) -> Analysis {
    if let Some(value) = parse_json_reply(reply) {
        if let Ok(analysis) = serde_json::from_value::<Analysis>(value.clone()) {
            return analysis;
        }
        if let Some(summary) = value.get("summary").and_then(|s| s.as_str()) {
            return Analysis {
                summary: summary.to_string(),
                ..Default::default()
            };
        }
    }
    Analysis {
        summary: reply.trim().to_string(),
        ..Default::default()
    }
}
