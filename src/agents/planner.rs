use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::prompts::render;
use crate::config::Config;
use crate::error::{AgentError, ErrorKind, Result};
use crate::interpreter::intents_from_plan;
use crate::model::{complete_with_backoff, parse_json_reply, ModelClient, ModelRequest};
use crate::retry::RetryPolicy;
use crate::types::{ExecutionResult, Intent, PageState, Plan, PlanStatus, StepStatus, CAPABILITIES};

const SYSTEM_PROMPT: &str = "You plan browser automation tasks. Answer with JSON only.";
const PROMPT_ELEMENTS: usize = 40;
const PAYLOAD_CHARS: usize = 2000;

/// Executes plan steps on behalf of the planner and exposes the page they
/// leave behind.
#[async_trait]
pub trait StepRunner: Send {
    async fn run_step(&mut self, intent: &Intent, cancel: &CancellationToken) -> ExecutionResult;

    fn page(&self) -> &PageState;
}

/// Goal decomposition and the bounded execute/observe/re-plan loop.
pub struct TaskPlanner {
    model: Arc<dyn ModelClient>,
    policy: RetryPolicy,
    config: Arc<Config>,
}

impl TaskPlanner {
    pub fn new(model: Arc<dyn ModelClient>, config: Arc<Config>) -> Self {
        Self {
            model,
            policy: RetryPolicy::from_config(&config.retry),
            config,
        }
    }

    /// Fresh plan with every step pending.
    pub async fn plan(&self, goal: &str, page: &PageState) -> Result<Plan> {
        let intents = self.decompose(goal, page).await?;
        info!("Planned {} steps for '{}'", intents.len(), goal);
        Ok(Plan::new(goal, intents))
    }

    pub async fn decompose(&self, goal: &str, page: &PageState) -> Result<Vec<Intent>> {
        let capabilities = CAPABILITIES.join(", ");
        let outline = page.outline(PROMPT_ELEMENTS);
        let prompt = render(
            &self.config.prompts.planner,
            &[("goal", goal), ("page", &outline), ("capabilities", &capabilities)],
        );
        self.ask_for_steps(prompt, "goal decomposition").await
    }

    /// Run pending steps in order until the plan finishes, the goal is
    /// reported satisfied, a bound is hit, or `cancel` fires. Cancellation
    /// leaves the plan in progress so it can be resumed.
    pub async fn run<R>(&self, plan: &mut Plan, runner: &mut R, cancel: &CancellationToken)
    where
        R: StepRunner + ?Sized,
    {
        let limits = &self.config.planner;
        let started = Instant::now();
        let mut iterations = 0u32;
        info!("Running plan '{}' ({} pending steps)", plan.goal, plan.count(StepStatus::Pending));

        while let Some(index) = plan.next_pending() {
            if cancel.is_cancelled() {
                info!("Plan interrupted with {} steps left", plan.count(StepStatus::Pending));
                return;
            }
            if iterations >= limits.max_iterations {
                give_up(plan, format!("iteration limit of {} reached", limits.max_iterations));
                break;
            }
            let Some(remaining) = limits.time_budget.checked_sub(started.elapsed()).filter(|r| !r.is_zero()) else {
                give_up(plan, format!("time budget of {:?} exhausted", limits.time_budget));
                break;
            };
            iterations += 1;

            let intent = plan.steps[index].intent.clone();
            debug!("Step {}: {}", index + 1, intent);
            let result = match tokio::time::timeout(remaining, runner.run_step(&intent, cancel)).await {
                Ok(result) => result,
                Err(_) => {
                    let reason = format!("time budget of {:?} exhausted during step {}", limits.time_budget, index + 1);
                    give_up(plan, reason);
                    break;
                }
            };
            if result.error_kind() == Some(ErrorKind::Cancelled) {
                info!("Step {} cancelled, plan left in progress", index + 1);
                return;
            }

            let succeeded = result.success;
            let error = result.error.clone();
            plan.steps[index].status = if succeeded { StepStatus::Done } else { StepStatus::Failed };
            plan.steps[index].result = Some(result.clone());

            if succeeded {
                if self.should_check_goal(&intent, plan) && self.goal_satisfied(plan, runner.page(), &result).await {
                    info!("Goal '{}' satisfied after step {}", plan.goal, index + 1);
                    plan.skip_pending();
                    break;
                }
                continue;
            }

            let error = error.map(|e| e.to_string()).unwrap_or_else(|| "unknown error".to_string());
            if plan.replans >= limits.max_replans {
                give_up(plan, format!("step {} ({}) failed: {}", index + 1, intent, error));
                break;
            }
            if cancel.is_cancelled() {
                info!("Step {} failed and the plan was interrupted before re-planning", index + 1);
                return;
            }
            plan.replans += 1;
            plan.skip_pending();
            match self.replan(plan, index, &error, runner.page()).await {
                Ok(intents) => {
                    info!("Re-planned after step {} failed: {} new steps", index + 1, intents.len());
                    plan.append(intents);
                }
                Err(e) => {
                    give_up(
                        plan,
                        format!("step {} ({}) failed: {}; re-planning failed: {}", index + 1, intent, error, e),
                    );
                    break;
                }
            }
        }

        info!("Plan '{}' finished as {:?}", plan.goal, plan.status());
    }

    fn should_check_goal(&self, intent: &Intent, plan: &Plan) -> bool {
        self.config.planner.check_goal_after_extraction
            && matches!(intent, Intent::Extract | Intent::Analyze { .. })
            && plan.next_pending().is_some()
    }

    /// Any model failure counts as "not yet".
    async fn goal_satisfied(&self, plan: &Plan, page: &PageState, result: &ExecutionResult) -> bool {
        let payload = result
            .payload
            .as_ref()
            .map(|p| p.summary(PAYLOAD_CHARS))
            .unwrap_or_default();
        let prompt = render(
            &self.config.prompts.goal_check,
            &[
                ("goal", &plan.goal),
                ("url", &page.url),
                ("title", &page.title),
                ("payload", &payload),
            ],
        );
        let mut request = ModelRequest::text(&self.config.model.chat_model, SYSTEM_PROMPT, prompt);
        request.max_tokens = 50;
        match complete_with_backoff(self.model.as_ref(), &self.policy, request).await {
            Ok(reply) => parse_json_reply(&reply)
                .and_then(|v| v.get("satisfied").and_then(|s| s.as_bool()))
                .unwrap_or(false),
            Err(e) => {
                debug!("Goal check skipped: {}", e);
                false
            }
        }
    }

    async fn replan(&self, plan: &Plan, failed: usize, error: &str, page: &PageState) -> Result<Vec<Intent>> {
        let completed = plan
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Done)
            .map(|s| format!("- {}", s.intent))
            .collect::<Vec<_>>()
            .join("\n");
        let failed_step = plan.steps[failed].intent.to_string();
        let capabilities = CAPABILITIES.join(", ");
        let outline = page.outline(PROMPT_ELEMENTS);
        let prompt = render(
            &self.config.prompts.replanner,
            &[
                ("goal", &plan.goal),
                ("completed", if completed.is_empty() { "(none)" } else { completed.as_str() }),
                ("failed", &failed_step),
                ("error", error),
                ("page", &outline),
                ("capabilities", &capabilities),
            ],
        );
        self.ask_for_steps(prompt, "re-planning").await
    }

    async fn ask_for_steps(&self, prompt: String, what: &str) -> Result<Vec<Intent>> {
        let request = ModelRequest::text(&self.config.model.chat_model, SYSTEM_PROMPT, prompt);
        let reply = complete_with_backoff(self.model.as_ref(), &self.policy, request)
            .await
            .map_err(|e| AgentError::Planning(format!("{} failed: {}", what, e)))?;
        let value = parse_json_reply(&reply)
            .ok_or_else(|| AgentError::Planning(format!("{} reply was not JSON", what)))?;
        let intents: Vec<Intent> = intents_from_plan(&value)
            .into_iter()
            .filter(Intent::is_executable)
            .collect();
        if intents.is_empty() {
            return Err(AgentError::Planning(format!("{} produced no executable steps", what)));
        }
        Ok(intents)
    }
}

/// Fail the step that could not run (if any), skip the rest and record why.
fn give_up(plan: &mut Plan, reason: String) {
    warn!("Giving up on '{}': {}", plan.goal, reason);
    let next = plan.next_pending();
    plan.skip_pending();
    if plan.status() != PlanStatus::Failed {
        if let Some(next) = next {
            plan.steps[next].status = StepStatus::Failed;
            plan.steps[next].result = Some(ExecutionResult::failed(
                AgentError::Planning(reason.clone()),
                std::time::Duration::ZERO,
            ));
        }
    }
    plan.diagnostic = Some(reason);
}
