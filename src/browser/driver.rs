use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type DriverResult<T> = std::result::Result<T, DriverError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("element detached: {0}")]
    Detached(String),

    #[error("navigation in flight: {0}")]
    NavigationInFlight(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("page context lost: {0}")]
    ContextLost(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("script failed: {0}")]
    Script(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl DriverError {
    /// Failures that usually clear up if the same command is reissued.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DriverError::Detached(_) | DriverError::NavigationInFlight(_) | DriverError::Timeout(_)
        )
    }

    /// Sort a raw protocol message into a variant.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("detached") || lower.contains("no node with given id") {
            DriverError::Detached(message)
        } else if lower.contains("navigat") || lower.contains("execution context was destroyed") {
            DriverError::NavigationInFlight(message)
        } else if lower.contains("timeout") || lower.contains("timed out") {
            DriverError::Timeout(message)
        } else if lower.contains("target closed")
            || lower.contains("session closed")
            || lower.contains("websocket")
            || lower.contains("channel closed")
        {
            DriverError::ContextLost(message)
        } else if lower.contains("could not find") || lower.contains("not found") {
            DriverError::NotFound(message)
        } else {
            DriverError::Protocol(message)
        }
    }
}

/// Readiness sample used to decide whether the DOM has settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityProbe {
    pub ready_state: String,
    pub mutation_count: u64,
    /// time since the last observed DOM mutation
    pub quiet_ms: u64,
}

/// Element as reported by the enumeration script, before filtering and
/// selector assignment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawElement {
    pub tag: String,
    pub role_attr: Option<String>,
    pub input_type: Option<String>,
    pub text: String,
    pub id: Option<String>,
    pub test_id: Option<String>,
    pub name: Option<String>,
    pub aria_label: Option<String>,
    pub placeholder: Option<String>,
    pub value: Option<String>,
    pub href: Option<String>,
    pub css_path: String,
    pub visible: bool,
    pub in_viewport: bool,
    /// below or above the fold but reachable by vertical scrolling
    pub scroll_reachable: bool,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSnapshot {
    pub url: String,
    pub title: String,
    pub mutation_count: u64,
    pub elements: Vec<RawElement>,
}

/// Narrow interface over the live browser page. Every call is one awaited
/// round trip bounded by the driver's own action timeout.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn probe(&self) -> DriverResult<StabilityProbe>;
    async fn snapshot(&self) -> DriverResult<RawSnapshot>;
    async fn screenshot(&self) -> DriverResult<Vec<u8>>;
    async fn content(&self) -> DriverResult<String>;
    /// structured outline: buttons, links, form fields, sections, navigation
    async fn outline(&self) -> DriverResult<serde_json::Value>;

    async fn navigate(&self, url: &str) -> DriverResult<()>;
    async fn back(&self) -> DriverResult<()>;
    async fn forward(&self) -> DriverResult<()>;
    async fn reload(&self) -> DriverResult<()>;

    async fn click(&self, selector: &str) -> DriverResult<()>;
    async fn type_into(&self, selector: &str, text: &str) -> DriverResult<()>;
    async fn press_enter(&self, selector: &str) -> DriverResult<()>;
    async fn scroll_by(&self, dy: i64) -> DriverResult<()>;
    async fn exists(&self, selector: &str) -> DriverResult<bool>;
    /// scroll to and select the first occurrence of `text`
    async fn find_text(&self, text: &str) -> DriverResult<bool>;

    async fn close(&self) -> DriverResult<()>;
}
