pub mod classifier;
pub mod decode;
pub mod grammar;
pub mod normalize;


use std::sync::Arc;
use tracing::debug;

use crate::agents::Session;
use crate::config::Config;
use crate::error::Result;
use crate::model::ModelClient;
use crate::types::{Intent, Target};

pub use classifier::Classifier;
pub use decode::{intent_from_value, intents_from_plan};
pub use grammar::{Grammar, ReferenceContext};
pub use normalize::normalize_url;

/// Two-stage command interpretation: the fixed grammar first, the model
/// classifier for everything it does not cover.
pub struct CommandInterpreter {
    grammar: Grammar,
    classifier: Classifier,
}

impl CommandInterpreter {
    pub fn new(model: Arc<dyn ModelClient>, config: &Config) -> Result<Self> {
        Ok(Self {
            grammar: Grammar::new()?,
            classifier: Classifier::new(model, config),
        })
    }

    /// Reads the session, never changes it, never fails.
    pub async fn interpret(&self, text: &str, session: &Session) -> Intent {
        let text = text.trim();
        if text.is_empty() {
            return Intent::Unknown {
                text: String::new(),
            };
        }

        let ctx = ReferenceContext {
            last_target: session.last_target().cloned(),
            has_active_plan: session.has_resumable_plan(),
        };
        if let Some(intent) = self.grammar.parse(text, &ctx) {
            debug!("Grammar matched '{}' as {}", text, intent.tag());
            return intent;
        }

        let intent = self.classifier.classify(text, session.page()).await;
        resolve_references(intent, &ctx, text)
    }
}

/// The classifier may hand back "it" as a target too.
fn resolve_references(intent: Intent, ctx: &ReferenceContext, text: &str) -> Intent {
    let is_it = |target: &Target| matches!(target, Target::Text(t) if t.eq_ignore_ascii_case("it"));
    let unresolved = || Intent::Unknown {
        text: text.to_string(),
    };
    match intent {
        Intent::Click { target } if is_it(&target) => match &ctx.last_target {
            Some(last) => Intent::Click { target: last.clone() },
            None => unresolved(),
        },
        Intent::Type { value, field } if is_it(&field) => match &ctx.last_target {
            Some(last) => Intent::Type {
                value,
                field: last.clone(),
            },
            None => unresolved(),
        },
        other => other,
    }
}
