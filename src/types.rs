use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{AgentError, ErrorKind};
use crate::perception::Analysis;

/// Immutable snapshot of the live page. A new one replaces the old one
/// wholesale on every successful extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct PageState {
    pub url: String,
    pub title: String,
    pub elements: Vec<InteractiveElement>,
    pub screenshot: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl PageState {
    /// State of a session before the first observation.
    pub fn blank() -> Self {
        Self {
            url: "about:blank".to_string(),
            title: String::new(),
            elements: vec![],
            screenshot: vec![],
            captured_at: Utc::now(),
        }
    }

    pub fn element_by_selector(&self, selector: &str) -> Option<&InteractiveElement> {
        self.elements.iter().find(|el| el.selector == selector)
    }

    /// Compact one-line-per-element listing used in model prompts.
    pub fn outline(&self, limit: usize) -> String {
        let mut lines = vec![format!("URL: {}", self.url), format!("Title: {}", self.title)];
        for el in self.elements.iter().take(limit) {
            lines.push(format!("- {:?} \"{}\" ({})", el.role, el.display_text(), el.selector));
        }
        if self.elements.len() > limit {
            lines.push(format!("... {} more", self.elements.len() - limit));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementRole {
    Link,
    Button,
    TextInput,
    TextArea,
    Select,
    Checkbox,
    Other,
}

impl ElementRole {
    pub fn is_clickable(self) -> bool {
        !matches!(self, ElementRole::TextInput | ElementRole::TextArea)
    }

    pub fn is_editable(self) -> bool {
        matches!(self, ElementRole::TextInput | ElementRole::TextArea)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractiveElement {
    pub role: ElementRole,
    pub tag: String,
    /// visible text, trimmed
    pub text: String,
    /// aria-label, placeholder, name or value, whichever the element carries first
    pub label: Option<String>,
    pub selector: String,
    pub bbox: BoundingBox,
}

impl InteractiveElement {
    pub fn display_text(&self) -> &str {
        if self.text.is_empty() {
            self.label.as_deref().unwrap_or("")
        } else {
            &self.text
        }
    }

    /// Every string a user might refer to this element by.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.text.as_str())
            .chain(self.label.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// What the user wants done with an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Text(String),
    Selector(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Text(text) => write!(f, "\"{}\"", text),
            Target::Selector(sel) => write!(f, "selector \"{}\"", sel),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitFor {
    Seconds(u64),
    Selector(String),
}

pub const DEFAULT_SCROLL_AMOUNT: u32 = 300;

/// Typed classification of one user command.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Navigate { url: String },
    Back,
    Forward,
    Refresh,
    Click { target: Target },
    Type { value: String, field: Target },
    Scroll { direction: ScrollDirection, amount: u32 },
    Submit { target: Option<Target> },
    /// `site` navigates there first
    Search { query: String, site: Option<String> },
    SelectFirst { filter: Option<String> },
    FindText { text: String },
    Wait(WaitFor),
    Extract,
    Screenshot,
    Analyze { question: Option<String> },
    PlanGoal { goal: String },
    ExecutePlan,
    Help,
    Exit,
    Unknown { text: String },
}

/// Intent tags the executor can run, advertised to the planner and classifier.
pub const CAPABILITIES: &[&str] = &[
    "navigate",
    "back",
    "forward",
    "refresh",
    "click",
    "type",
    "scroll",
    "submit",
    "search",
    "select_first_item",
    "find_text",
    "wait",
    "extract",
    "screenshot",
    "analyze",
];

impl Intent {
    pub fn tag(&self) -> &'static str {
        match self {
            Intent::Navigate { .. } => "navigate",
            Intent::Back => "back",
            Intent::Forward => "forward",
            Intent::Refresh => "refresh",
            Intent::Click { .. } => "click",
            Intent::Type { .. } => "type",
            Intent::Scroll { .. } => "scroll",
            Intent::Submit { .. } => "submit",
            Intent::Search { .. } => "search",
            Intent::SelectFirst { .. } => "select_first_item",
            Intent::FindText { .. } => "find_text",
            Intent::Wait(_) => "wait",
            Intent::Extract => "extract",
            Intent::Screenshot => "screenshot",
            Intent::Analyze { .. } => "analyze",
            Intent::PlanGoal { .. } => "plan",
            Intent::ExecutePlan => "execute_plan",
            Intent::Help => "help",
            Intent::Exit => "exit",
            Intent::Unknown { .. } => "unknown",
        }
    }

    /// True for intents that can run as a plan step.
    pub fn is_executable(&self) -> bool {
        CAPABILITIES.contains(&self.tag())
    }

    /// Element the intent refers to, remembered so "it" can resolve to it.
    pub fn target(&self) -> Option<&Target> {
        match self {
            Intent::Click { target } => Some(target),
            Intent::Type { field, .. } => Some(field),
            Intent::Submit { target } => target.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Navigate { url } => write!(f, "go to {}", url),
            Intent::Back => write!(f, "back"),
            Intent::Forward => write!(f, "forward"),
            Intent::Refresh => write!(f, "refresh"),
            Intent::Click { target } => write!(f, "click {}", target),
            Intent::Type { value, field } => write!(f, "type \"{}\" in {}", value, field),
            Intent::Scroll { direction, amount } => {
                let dir = match direction {
                    ScrollDirection::Up => "up",
                    ScrollDirection::Down => "down",
                };
                write!(f, "scroll {} {}", dir, amount)
            }
            Intent::Submit { target: Some(target) } => write!(f, "submit {}", target),
            Intent::Submit { target: None } => write!(f, "submit"),
            Intent::Search { query, site: Some(site) } => write!(f, "on {} search for {}", site, query),
            Intent::Search { query, site: None } => write!(f, "search for {}", query),
            Intent::SelectFirst { filter: Some(filter) } => write!(f, "select first item with {}", filter),
            Intent::SelectFirst { filter: None } => write!(f, "select first item"),
            Intent::FindText { text } => write!(f, "find \"{}\"", text),
            Intent::Wait(WaitFor::Seconds(secs)) => write!(f, "wait {}", secs),
            Intent::Wait(WaitFor::Selector(sel)) => write!(f, "wait for {}", sel),
            Intent::Extract => write!(f, "extract data"),
            Intent::Screenshot => write!(f, "screenshot"),
            Intent::Analyze { question: Some(q) } => write!(f, "analyze: {}", q),
            Intent::Analyze { question: None } => write!(f, "analyze"),
            Intent::PlanGoal { goal } => write!(f, "plan {}", goal),
            Intent::ExecutePlan => write!(f, "execute plan"),
            Intent::Help => write!(f, "help"),
            Intent::Exit => write!(f, "exit"),
            Intent::Unknown { text } => write!(f, "unknown: {}", text),
        }
    }
}

/// Data produced by a successful step.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Data(serde_json::Value),
    Analysis(Analysis),
    Screenshot(Vec<u8>),
    Text(String),
}

impl Payload {
    /// Short textual form fed back to the model.
    pub fn summary(&self, max_chars: usize) -> String {
        let full = match self {
            Payload::Data(value) => value.to_string(),
            Payload::Analysis(analysis) => analysis.summary.clone(),
            Payload::Screenshot(bytes) => format!("<screenshot {} bytes>", bytes.len()),
            Payload::Text(text) => text.clone(),
        };
        full.chars().take(max_chars).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    pub payload: Option<Payload>,
    pub error: Option<AgentError>,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn succeeded(payload: Option<Payload>, duration: Duration) -> Self {
        Self {
            success: true,
            payload,
            error: None,
            duration,
        }
    }

    pub fn failed(error: AgentError, duration: Duration) -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(error),
            duration,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(AgentError::kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Done,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub intent: Intent,
    pub status: StepStatus,
    pub result: Option<ExecutionResult>,
}

impl Step {
    pub fn new(intent: Intent) -> Self {
        Self {
            intent,
            status: StepStatus::Pending,
            result: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanStatus {
    InProgress,
    Completed,
    Failed,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub id: Uuid,
    pub goal: String,
    pub steps: Vec<Step>,
    pub replans: u32,
    /// why the plan stopped, set whenever it ends Failed
    pub diagnostic: Option<String>,
    pub created_at: DateTime<Utc>,
    abandoned: bool,
}

impl Plan {
    pub fn new(goal: impl Into<String>, intents: Vec<Intent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal: goal.into(),
            steps: intents.into_iter().map(Step::new).collect(),
            replans: 0,
            diagnostic: None,
            created_at: Utc::now(),
            abandoned: false,
        }
    }

    /// Derived from the step statuses. A failed step counts as recovered
    /// once a later step (from a re-plan) is pending or done.
    pub fn status(&self) -> PlanStatus {
        if self.abandoned {
            return PlanStatus::Abandoned;
        }
        let unrecovered = self.steps.iter().enumerate().any(|(i, step)| {
            step.status == StepStatus::Failed
                && !self.steps[i + 1..]
                    .iter()
                    .any(|later| matches!(later.status, StepStatus::Done | StepStatus::Pending))
        });
        if unrecovered {
            PlanStatus::Failed
        } else if self.steps.iter().any(|s| s.status == StepStatus::Pending) {
            PlanStatus::InProgress
        } else {
            PlanStatus::Completed
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status() != PlanStatus::InProgress
    }

    pub fn next_pending(&self) -> Option<usize> {
        self.steps.iter().position(|s| s.status == StepStatus::Pending)
    }

    pub fn abandon(&mut self) {
        self.abandoned = true;
    }

    pub fn skip_pending(&mut self) {
        for step in self.steps.iter_mut().filter(|s| s.status == StepStatus::Pending) {
            step.status = StepStatus::Skipped;
        }
    }

    pub fn append(&mut self, intents: Vec<Intent>) {
        self.steps.extend(intents.into_iter().map(Step::new));
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}

/// Compare urls after normalisation, ignoring a trailing slash on the path.
pub fn urls_equivalent(a: &str, b: &str) -> bool {
    fn canonical(raw: &str) -> String {
        match url::Url::parse(raw) {
            Ok(parsed) => parsed.as_str().trim_end_matches('/').to_string(),
            Err(_) => raw.trim_end_matches('/').to_lowercase(),
        }
    }
    canonical(a) == canonical(b)
}
