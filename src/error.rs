use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Could not interpret command: {0}")]
    Interpretation(String),

    #[error("Page extraction failed: {0}")]
    Extraction(String),

    #[error("Page did not settle within {0:?}")]
    ExtractionTimeout(Duration),

    #[error("No element matching '{target}' on {url} (tried: {})", .attempted.join(", "))]
    ElementResolution {
        target: String,
        attempted: Vec<String>,
        url: String,
    },

    #[error("Navigation error: {0}")]
    Navigation(String),

    #[error("Action failed: {0}")]
    Action(String),

    #[error("Planning error: {0}")]
    Planning(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Cancelled by user")]
    Cancelled,
}

/// Copyable tag of an [`AgentError`], recorded on every failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    Interpretation,
    Extraction,
    ExtractionTimeout,
    ElementResolution,
    Navigation,
    Action,
    Planning,
    ExternalService,
    Config,
    Browser,
    Cancelled,
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Interpretation(_) => ErrorKind::Interpretation,
            AgentError::Extraction(_) => ErrorKind::Extraction,
            AgentError::ExtractionTimeout(_) => ErrorKind::ExtractionTimeout,
            AgentError::ElementResolution { .. } => ErrorKind::ElementResolution,
            AgentError::Navigation(_) => ErrorKind::Navigation,
            AgentError::Action(_) => ErrorKind::Action,
            AgentError::Planning(_) => ErrorKind::Planning,
            AgentError::ExternalService(_) => ErrorKind::ExternalService,
            AgentError::Config(_) => ErrorKind::Config,
            AgentError::Browser(_) => ErrorKind::Browser,
            AgentError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Infrastructure failures worth retrying locally before surfacing.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AgentError::Extraction(_)
                | AgentError::ExtractionTimeout(_)
                | AgentError::Navigation(_)
                | AgentError::ExternalService(_)
        )
    }

    /// Short follow-up suggestion shown next to the diagnostic.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            AgentError::Interpretation(_) => Some("type 'help' to list supported commands"),
            AgentError::ElementResolution { .. } => {
                Some("try the exact visible text, or `click selector \"<css>\"`")
            }
            AgentError::Planning(msg) if msg == "no active plan" => {
                Some("create one first with `plan <goal>`")
            }
            AgentError::ExternalService(_) => Some("check OPENAI_API_KEY and network access"),
            AgentError::ExtractionTimeout(_) => Some("the page keeps changing; try `wait 2` then retry"),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::ExternalService(format!("malformed JSON: {}", err))
    }
}

impl From<toml::de::Error> for AgentError {
    fn from(err: toml::de::Error) -> Self {
        AgentError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::ExternalService(err.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for AgentError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AgentError::Browser(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_error_lists_attempts() {
        let err = AgentError::ElementResolution {
            target: "Sign In".to_string(),
            attempted: vec!["exact".to_string(), "fuzzy".to_string()],
            url: "https://example.com/".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Sign In"));
        assert!(msg.contains("exact, fuzzy"));
        assert!(msg.contains("https://example.com/"));
        assert_eq!(err.kind(), ErrorKind::ElementResolution);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        assert!(AgentError::Navigation("reset".into()).is_transient());
        assert!(AgentError::ExternalService("429".into()).is_transient());
        assert!(!AgentError::Planning("no active plan".into()).is_transient());
        assert!(!AgentError::Cancelled.is_transient());
    }

    #[test]
    fn test_planning_hint() {
        let err = AgentError::Planning("no active plan".to_string());
        assert_eq!(err.to_string(), "Planning error: no active plan");
        assert!(err.hint().is_some());
    }
}
