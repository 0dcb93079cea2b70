use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::browser::BrowserDriver;
use crate::types::{Intent, PageState, Plan, PlanStatus, Target};

#[derive(Debug, Clone, PartialEq)]
pub struct CommandRecord {
    pub text: String,
    pub intent: Intent,
    pub succeeded: bool,
    pub at: DateTime<Utc>,
}

/// All state of one automation session. Components read it through
/// shared references; only the controller mutates it.
pub struct Session {
    id: Uuid,
    browser: Arc<dyn BrowserDriver>,
    page: PageState,
    history: Vec<CommandRecord>,
    active_plan: Option<Plan>,
    last_target: Option<Target>,
}

impl Session {
    pub fn new(browser: Arc<dyn BrowserDriver>) -> Self {
        Self {
            id: Uuid::new_v4(),
            browser,
            page: PageState::blank(),
            history: Vec::new(),
            active_plan: None,
            last_target: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn browser(&self) -> &dyn BrowserDriver {
        self.browser.as_ref()
    }

    /// Last successfully observed page.
    pub fn page(&self) -> &PageState {
        &self.page
    }

    pub fn history(&self) -> &[CommandRecord] {
        &self.history
    }

    pub fn active_plan(&self) -> Option<&Plan> {
        self.active_plan.as_ref()
    }

    pub fn has_resumable_plan(&self) -> bool {
        self.active_plan
            .as_ref()
            .map(|plan| plan.status() == PlanStatus::InProgress)
            .unwrap_or(false)
    }

    pub fn last_target(&self) -> Option<&Target> {
        self.last_target.as_ref()
    }

    /// Most recent command texts, oldest first.
    pub fn recent_commands(&self, n: usize) -> Vec<String> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip).map(|r| r.text.clone()).collect()
    }

    pub(crate) fn replace_page(&mut self, page: PageState) {
        self.page = page;
    }

    pub(crate) fn record(&mut self, text: &str, intent: Intent, succeeded: bool) {
        self.history.push(CommandRecord {
            text: text.to_string(),
            intent,
            succeeded,
            at: Utc::now(),
        });
    }

    pub(crate) fn remember_target(&mut self, target: Target) {
        self.last_target = Some(target);
    }

    /// Install a new plan; an unfinished predecessor is abandoned and
    /// returned.
    pub(crate) fn install_plan(&mut self, plan: Plan) -> Option<Plan> {
        let mut previous = self.active_plan.replace(plan)?;
        if !previous.is_finished() {
            previous.abandon();
        }
        Some(previous)
    }

    pub(crate) fn take_plan(&mut self) -> Option<Plan> {
        self.active_plan.take()
    }

    pub(crate) fn restore_plan(&mut self, plan: Plan) {
        self.active_plan = Some(plan);
    }
}
