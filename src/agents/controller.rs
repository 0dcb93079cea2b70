use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agents::executor::{ActionExecutor, ExecutionReport};
use crate::agents::planner::{StepRunner, TaskPlanner};
use crate::agents::Session;
use crate::browser::BrowserDriver;
use crate::config::Config;
use crate::error::{AgentError, Result};
use crate::interpreter::CommandInterpreter;
use crate::model::ModelClient;
use crate::perception::VisionAnalyzer;
use crate::types::{ExecutionResult, Intent, PageState, Plan, PlanStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Interpreting,
    Executing,
    Planning,
    Observing,
}

/// What a handled command produced. Failures come back as `Err`.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Executed { intent: Intent, result: ExecutionResult },
    /// decomposed but not run (`auto_execute = false`)
    Planned(Plan),
    /// the plan ran until it completed, failed, or was interrupted
    PlanFinished(Plan),
    Help,
    Exit,
}

/// Owns the session and drives interpret -> execute or plan -> observe.
pub struct SessionController {
    config: Arc<Config>,
    session: Session,
    interpreter: CommandInterpreter,
    executor: ActionExecutor,
    planner: TaskPlanner,
    state: ControllerState,
    cancel: CancellationToken,
}

impl SessionController {
    pub fn new(config: Arc<Config>, browser: Arc<dyn BrowserDriver>, model: Arc<dyn ModelClient>) -> Result<Self> {
        let vision = Arc::new(VisionAnalyzer::new(model.clone(), &config));
        Ok(Self {
            session: Session::new(browser),
            interpreter: CommandInterpreter::new(model.clone(), &config)?,
            executor: ActionExecutor::new(config.clone(), vision)?,
            planner: TaskPlanner::new(model, config.clone()),
            state: ControllerState::Idle,
            cancel: CancellationToken::new(),
            config,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Token for the command about to run. Cancelling it stops the loop
    /// before the next browser call; a fresh one is installed afterwards.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Take a first observation of whatever the browser shows.
    pub async fn observe(&mut self) -> Result<&PageState> {
        self.state = ControllerState::Observing;
        let extractor = self.executor.extractor();
        let extracted = extractor.extract(self.session.browser(), extractor.default_timeout()).await;
        self.state = ControllerState::Idle;
        self.session.replace_page(extracted?);
        Ok(self.session.page())
    }

    pub async fn handle(&mut self, text: &str) -> Result<CommandOutcome> {
        info!("Command: {}", text);
        self.state = ControllerState::Interpreting;
        let intent = self.interpreter.interpret(text, &self.session).await;
        info!("Interpreted as {}", intent);

        let outcome = self.dispatch(text, intent).await;

        self.state = ControllerState::Idle;
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        outcome
    }

    /// Decompose and run `goal` regardless of `auto_execute`.
    pub async fn run_task(&mut self, goal: &str) -> Result<Plan> {
        let text = format!("plan {}", goal);
        let outcome = self.start_plan(&text, goal, true).await;
        self.state = ControllerState::Idle;
        match outcome? {
            CommandOutcome::PlanFinished(plan) | CommandOutcome::Planned(plan) => Ok(plan),
            _ => Err(AgentError::Planning("task produced no plan".to_string())),
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.session
            .browser()
            .close()
            .await
            .map_err(|e| AgentError::Browser(e.to_string()))
    }

    async fn dispatch(&mut self, text: &str, intent: Intent) -> Result<CommandOutcome> {
        match intent {
            Intent::Unknown { text: original } => {
                self.session.record(text, Intent::Unknown { text: original.clone() }, false);
                Err(AgentError::Interpretation(format!("'{}' is not a command I understand", original)))
            }
            Intent::Help => {
                self.session.record(text, Intent::Help, true);
                Ok(CommandOutcome::Help)
            }
            Intent::Exit => Ok(CommandOutcome::Exit),
            Intent::PlanGoal { goal } => {
                let execute = self.config.planner.auto_execute;
                self.start_plan(text, &goal, execute).await
            }
            Intent::ExecutePlan => self.resume_plan(text).await,
            intent => self.execute_single(text, intent).await,
        }
    }

    async fn execute_single(&mut self, text: &str, intent: Intent) -> Result<CommandOutcome> {
        self.state = ControllerState::Executing;
        let report = self.executor.execute(&intent, &self.session, &self.cancel).await;
        self.state = ControllerState::Observing;
        let result = apply_report(&mut self.session, report);
        self.session.record(text, intent.clone(), result.success);

        match &result.error {
            Some(e) => Err(e.clone()),
            None => Ok(CommandOutcome::Executed { intent, result }),
        }
    }

    async fn start_plan(&mut self, text: &str, goal: &str, execute: bool) -> Result<CommandOutcome> {
        self.state = ControllerState::Planning;
        let intent = Intent::PlanGoal { goal: goal.to_string() };
        let plan = match self.planner.plan(goal, self.session.page()).await {
            Ok(plan) => plan,
            Err(e) => {
                self.session.record(text, intent, false);
                return Err(e);
            }
        };

        if let Some(previous) = self.session.install_plan(plan) {
            if previous.status() == PlanStatus::Abandoned {
                info!("Abandoned unfinished plan '{}'", previous.goal);
            }
        }

        if !execute {
            self.session.record(text, intent, true);
            let planned = self.session.active_plan().cloned();
            return planned
                .map(CommandOutcome::Planned)
                .ok_or_else(|| AgentError::Planning("no active plan".to_string()));
        }

        let plan = self.run_active_plan().await?;
        self.session.record(text, intent, plan.status() == PlanStatus::Completed);
        Ok(CommandOutcome::PlanFinished(plan))
    }

    async fn resume_plan(&mut self, text: &str) -> Result<CommandOutcome> {
        match self.session.active_plan().map(Plan::status) {
            Some(PlanStatus::InProgress) => {
                let plan = self.run_active_plan().await?;
                self.session
                    .record(text, Intent::ExecutePlan, plan.status() == PlanStatus::Completed);
                Ok(CommandOutcome::PlanFinished(plan))
            }
            Some(status) => {
                self.session.record(text, Intent::ExecutePlan, false);
                Err(AgentError::Planning(format!(
                    "the active plan is already {:?}; start another with `plan <goal>`",
                    status
                )))
            }
            None => {
                self.session.record(text, Intent::ExecutePlan, false);
                Err(AgentError::Planning("no active plan".to_string()))
            }
        }
    }

    /// The plan leaves the session while it runs and is put back after,
    /// whatever state it ended in.
    async fn run_active_plan(&mut self) -> Result<Plan> {
        let mut plan = self
            .session
            .take_plan()
            .ok_or_else(|| AgentError::Planning("no active plan".to_string()))?;

        let mut runner = SessionRunner {
            executor: &self.executor,
            session: &mut self.session,
            state: &mut self.state,
        };
        self.planner.run(&mut plan, &mut runner, &self.cancel).await;

        if let Some(reason) = &plan.diagnostic {
            warn!("Plan '{}' stopped: {}", plan.goal, reason);
        }
        let finished = plan.clone();
        self.session.restore_plan(plan);
        Ok(finished)
    }
}

fn apply_report(session: &mut Session, report: ExecutionReport) -> ExecutionResult {
    // a failed observation keeps the last good page
    if let Some(page) = report.page {
        session.replace_page(page);
    }
    if let Some(target) = report.target {
        session.remember_target(target);
    }
    report.result
}

struct SessionRunner<'a> {
    executor: &'a ActionExecutor,
    session: &'a mut Session,
    state: &'a mut ControllerState,
}

#[async_trait]
impl<'a> StepRunner for SessionRunner<'a> {
    async fn run_step(&mut self, intent: &Intent, cancel: &CancellationToken) -> ExecutionResult {
        *self.state = ControllerState::Executing;
        let report = self.executor.execute(intent, self.session, cancel).await;
        *self.state = ControllerState::Observing;
        apply_report(self.session, report)
    }

    fn page(&self) -> &PageState {
        self.session.page()
    }
}
