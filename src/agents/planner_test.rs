#[cfg(test)]
mod tests {
    use crate::agents::{CommandOutcome, SessionController, StepRunner, TaskPlanner};
    use crate::browser::fake::{button, FakeBrowser, FakePage};
    use crate::config::Config;
    use crate::error::{AgentError, ErrorKind};
    use crate::model::{MockModelClient, ModelError, ModelRequest};
    use crate::types::{ExecutionResult, Intent, PageState, Payload, Plan, PlanStatus, StepStatus, Target};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};
    use tokio_util::sync::CancellationToken;

    /// Runner with scripted results; anything unscripted uses `fallback`.
    struct ScriptedRunner {
        page: PageState,
        outcomes: VecDeque<ExecutionResult>,
        fallback: ExecutionResult,
        ran: Vec<Intent>,
        step_delay: Duration,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl ScriptedRunner {
        fn new(fallback: ExecutionResult) -> Self {
            Self {
                page: PageState::blank(),
                outcomes: VecDeque::new(),
                fallback,
                ran: Vec::new(),
                step_delay: Duration::ZERO,
                cancel_after: None,
            }
        }
    }

    #[async_trait]
    impl StepRunner for ScriptedRunner {
        async fn run_step(&mut self, intent: &Intent, _cancel: &CancellationToken) -> ExecutionResult {
            if !self.step_delay.is_zero() {
                tokio::time::sleep(self.step_delay).await;
            }
            self.ran.push(intent.clone());
            if let Some((after, token)) = &self.cancel_after {
                if self.ran.len() == *after {
                    token.cancel();
                }
            }
            self.outcomes.pop_front().unwrap_or_else(|| self.fallback.clone())
        }

        fn page(&self) -> &PageState {
            &self.page
        }
    }

    fn ok() -> ExecutionResult {
        ExecutionResult::succeeded(None, Duration::from_millis(5))
    }

    fn failed() -> ExecutionResult {
        ExecutionResult::failed(AgentError::Action("click failed".into()), Duration::from_millis(5))
    }

    fn click(text: &str) -> Intent {
        Intent::Click {
            target: Target::Text(text.to_string()),
        }
    }

    fn planner_with(config: Config, mock: MockModelClient) -> TaskPlanner {
        TaskPlanner::new(Arc::new(mock), Arc::new(config))
    }

    fn is_replan(request: &ModelRequest) -> bool {
        request.user.contains("needs a new route")
    }

    fn is_vision(request: &ModelRequest) -> bool {
        request.system.contains("web page analyst")
    }

    #[tokio::test]
    async fn test_decompose_keeps_executable_steps_in_order() {
        let mut mock = MockModelClient::new();
        mock.expect_complete().times(1).returning(|request| {
            assert!(request.user.contains("cheapest laptop"));
            assert!(request.user.contains("select_first_item"));
            Ok(r#"```json
{"steps":[
  {"action":"navigate_and_search","url":"amazon.com","query":"laptop under $1000"},
  {"action":"plan","goal":"nested"},
  {"action":"teleport"},
  {"action":"extract_data"}
]}
```"#
                .to_string())
        });
        let planner = planner_with(Config::default(), mock);

        let plan = assert_ok!(
            planner
                .plan("find the cheapest laptop under $1000", &PageState::blank())
                .await
        );
        assert_eq!(plan.steps.len(), 2);
        assert!(matches!(plan.steps[0].intent, Intent::Search { .. }));
        assert_eq!(plan.steps[1].intent, Intent::Extract);
        assert_eq!(plan.status(), PlanStatus::InProgress);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decomposition_failures_are_planning_errors() {
        let mut mock = MockModelClient::new();
        mock.expect_complete()
            .times(1)
            .returning(|_| Ok(r#"{"steps":[]}"#.to_string()));
        let err = assert_err!(
            planner_with(Config::default(), mock)
                .plan("anything", &PageState::blank())
                .await
        );
        assert_eq!(err.kind(), ErrorKind::Planning);

        let mut mock = MockModelClient::new();
        mock.expect_complete().returning(|_| Err(ModelError::Auth));
        let err = assert_err!(
            planner_with(Config::default(), mock)
                .plan("anything", &PageState::blank())
                .await
        );
        assert_eq!(err.kind(), ErrorKind::Planning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_steps_done_completes_plan() {
        let mock = MockModelClient::new();
        let planner = planner_with(Config::default(), mock);
        let mut plan = Plan::new("scroll around", vec![Intent::Back, Intent::Refresh]);
        let mut runner = ScriptedRunner::new(ok());

        planner.run(&mut plan, &mut runner, &CancellationToken::new()).await;
        assert_eq!(plan.status(), PlanStatus::Completed);
        assert_eq!(runner.ran, vec![Intent::Back, Intent::Refresh]);
        assert!(plan.steps.iter().all(|s| s.result.is_some()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_step_triggers_exactly_one_replan() {
        let replans = Arc::new(AtomicU32::new(0));
        let counter = replans.clone();
        let mut mock = MockModelClient::new();
        mock.expect_complete().returning(move |request| {
            assert!(is_replan(&request));
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(r#"{"steps":[{"action":"click","text":"Other way"}]}"#.to_string())
        });
        let planner = planner_with(Config::default(), mock);
        let mut plan = Plan::new("log in", vec![click("Sign In"), Intent::Extract]);
        let mut runner = ScriptedRunner::new(failed());

        planner.run(&mut plan, &mut runner, &CancellationToken::new()).await;

        assert_eq!(replans.load(Ordering::SeqCst), 1);
        assert_eq!(plan.replans, 1);
        assert_eq!(plan.status(), PlanStatus::Failed);
        assert_eq!(runner.ran, vec![click("Sign In"), click("Other way")]);
        let statuses: Vec<StepStatus> = plan.steps.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![StepStatus::Failed, StepStatus::Skipped, StepStatus::Failed]
        );
        assert!(plan.diagnostic.as_deref().unwrap_or("").contains("Other way"));
        assert_eq!(plan.steps[0].result.as_ref().and_then(|r| r.error_kind()), Some(ErrorKind::Action));
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_replan_recovers_plan() {
        let mut mock = MockModelClient::new();
        mock.expect_complete()
            .times(1)
            .returning(|_| Ok(r#"{"steps":[{"action":"click","text":"Log in"}]}"#.to_string()));
        let planner = planner_with(Config::default(), mock);
        let mut plan = Plan::new("log in", vec![click("Sign In")]);
        let mut runner = ScriptedRunner::new(ok());
        runner.outcomes.push_back(failed());

        planner.run(&mut plan, &mut runner, &CancellationToken::new()).await;
        assert_eq!(plan.status(), PlanStatus::Completed);
        assert!(plan.diagnostic.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unusable_replan_fails_with_diagnostic() {
        let mut mock = MockModelClient::new();
        mock.expect_complete()
            .times(1)
            .returning(|_| Ok("I cannot help with that".to_string()));
        let planner = planner_with(Config::default(), mock);
        let mut plan = Plan::new("log in", vec![click("Sign In"), Intent::Extract]);
        let mut runner = ScriptedRunner::new(failed());

        planner.run(&mut plan, &mut runner, &CancellationToken::new()).await;
        assert_eq!(plan.status(), PlanStatus::Failed);
        assert!(plan.diagnostic.as_deref().unwrap_or("").contains("re-planning failed"));
        assert_eq!(runner.ran.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_iteration_limit_bounds_the_loop() {
        let mut config = Config::default();
        config.planner.max_iterations = 3;
        let planner = planner_with(config, MockModelClient::new());
        let mut plan = Plan::new("scroll forever", vec![Intent::Refresh; 10]);
        let mut runner = ScriptedRunner::new(ok());

        planner.run(&mut plan, &mut runner, &CancellationToken::new()).await;
        assert_eq!(runner.ran.len(), 3);
        assert_eq!(plan.status(), PlanStatus::Failed);
        assert_eq!(plan.steps[3].status, StepStatus::Failed);
        assert_eq!(plan.count(StepStatus::Skipped), 6);
        assert!(plan.diagnostic.as_deref().unwrap_or("").contains("iteration limit"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_budget_bounds_the_loop() {
        let mut config = Config::default();
        config.planner.time_budget = Duration::from_secs(5);
        let planner = planner_with(config, MockModelClient::new());
        let mut plan = Plan::new("slow goal", vec![Intent::Refresh; 10]);
        let mut runner = ScriptedRunner::new(ok());
        runner.step_delay = Duration::from_secs(2);

        let started = tokio::time::Instant::now();
        planner.run(&mut plan, &mut runner, &CancellationToken::new()).await;

        assert!(started.elapsed() <= Duration::from_secs(5));
        assert_eq!(plan.status(), PlanStatus::Failed);
        assert_eq!(plan.count(StepStatus::Done), 2);
        assert!(plan.diagnostic.as_deref().unwrap_or("").contains("time budget"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_goal_check_skips_remaining_steps() {
        let mut mock = MockModelClient::new();
        mock.expect_complete().times(1).returning(|request| {
            assert!(request.user.contains("laptop prices"));
            assert!(request.user.contains("$899"));
            Ok(r#"{"satisfied":true}"#.to_string())
        });
        let planner = planner_with(Config::default(), mock);
        let mut plan = Plan::new("laptop prices", vec![Intent::Extract, click("Next page"), Intent::Extract]);
        let mut runner = ScriptedRunner::new(ok());
        runner.outcomes.push_back(ExecutionResult::succeeded(
            Some(Payload::Text("Laptop A $899".into())),
            Duration::ZERO,
        ));

        planner.run(&mut plan, &mut runner, &CancellationToken::new()).await;
        assert_eq!(runner.ran.len(), 1);
        assert_eq!(plan.status(), PlanStatus::Completed);
        assert_eq!(plan.count(StepStatus::Skipped), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_goal_check_failure_keeps_going() {
        let mut mock = MockModelClient::new();
        mock.expect_complete().returning(|_| Err(ModelError::Auth));
        let planner = planner_with(Config::default(), mock);
        let mut plan = Plan::new("laptop prices", vec![Intent::Extract, Intent::Refresh]);
        let mut runner = ScriptedRunner::new(ok());

        planner.run(&mut plan, &mut runner, &CancellationToken::new()).await;
        assert_eq!(runner.ran.len(), 2);
        assert_eq!(plan.status(), PlanStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_leaves_plan_resumable() {
        let planner = planner_with(Config::default(), MockModelClient::new());
        let mut plan = Plan::new("three steps", vec![Intent::Back, Intent::Forward, Intent::Refresh]);
        let token = CancellationToken::new();
        let mut runner = ScriptedRunner::new(ok());
        runner.cancel_after = Some((1, token.clone()));

        planner.run(&mut plan, &mut runner, &token).await;
        assert_eq!(plan.status(), PlanStatus::InProgress);
        assert_eq!(plan.next_pending(), Some(1));

        runner.cancel_after = None;
        planner.run(&mut plan, &mut runner, &CancellationToken::new()).await;
        assert_eq!(plan.status(), PlanStatus::Completed);
        assert_eq!(runner.ran, vec![Intent::Back, Intent::Forward, Intent::Refresh]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_step_stays_pending() {
        let planner = planner_with(Config::default(), MockModelClient::new());
        let mut plan = Plan::new("one step", vec![Intent::Refresh]);
        let mut runner = ScriptedRunner::new(ExecutionResult::failed(AgentError::Cancelled, Duration::ZERO));

        planner.run(&mut plan, &mut runner, &CancellationToken::new()).await;
        assert_eq!(plan.steps[0].status, StepStatus::Pending);
        assert_eq!(plan.status(), PlanStatus::InProgress);
    }

    // controller-level plan flows against the fake browser

    fn controller(config: Config, browser: &Arc<FakeBrowser>, mock: MockModelClient) -> SessionController {
        SessionController::new(Arc::new(config), browser.clone(), Arc::new(mock)).unwrap()
    }

    fn two_phase() -> Config {
        let mut config = Config::default();
        config.planner.auto_execute = false;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_command_searches_then_extracts() {
        let mut mock = MockModelClient::new();
        mock.expect_complete().times(1).returning(|_| {
            Ok(r#"{"steps":[{"action":"search","query":"cheapest laptop under $1000"},{"action":"extract"}]}"#.to_string())
        });
        let browser = Arc::new(FakeBrowser::new());
        let mut controller = controller(Config::default(), &browser, mock);

        let outcome = controller
            .handle("plan find the cheapest laptop under $1000")
            .await
            .unwrap();
        let CommandOutcome::PlanFinished(plan) = outcome else {
            panic!("plan should have run");
        };

        let search = plan.steps.iter().position(|s| matches!(s.intent, Intent::Search { .. }));
        let extract = plan.steps.iter().position(|s| s.intent == Intent::Extract);
        assert!(matches!((search, extract), (Some(s), Some(e)) if s < e));
        assert_eq!(plan.status(), PlanStatus::Completed);
        assert!(browser.current_url().starts_with("https://www.google.com/search?q=cheapest+laptop"));
        assert_eq!(controller.session().active_plan().map(|p| p.status()), Some(PlanStatus::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolvable_step_replans_once_then_fails() {
        let replans = Arc::new(AtomicU32::new(0));
        let counter = replans.clone();
        let mut mock = MockModelClient::new();
        mock.expect_complete().returning(move |request| {
            if is_vision(&request) {
                Ok(r#"{"summary":"nothing relevant","elements":[]}"#.to_string())
            } else if is_replan(&request) {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(r#"{"steps":[{"action":"click","text":"Still missing"}]}"#.to_string())
            } else {
                Ok(r#"{"steps":[{"action":"click","text":"Missing button"},{"action":"extract"}]}"#.to_string())
            }
        });
        let browser = Arc::new(FakeBrowser::new().at(FakePage::new("https://a.test/", "A", vec![button("Home")])));
        let mut controller = controller(Config::default(), &browser, mock);
        controller.observe().await.unwrap();

        let CommandOutcome::PlanFinished(plan) = controller.handle("plan press the missing button").await.unwrap() else {
            panic!("plan should have run");
        };
        assert_eq!(replans.load(Ordering::SeqCst), 1);
        assert_eq!(plan.status(), PlanStatus::Failed);
        assert!(!plan.diagnostic.as_deref().unwrap_or("").is_empty());
        assert_eq!(
            plan.steps[0].result.as_ref().and_then(|r| r.error_kind()),
            Some(ErrorKind::ElementResolution)
        );
        assert_eq!(browser.count("click"), 0);
        assert!(!controller.session().history()[0].succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_plan_replaces_unfinished_plan() {
        let mut mock = MockModelClient::new();
        mock.expect_complete()
            .returning(|_| Ok(r#"{"steps":[{"action":"refresh"}]}"#.to_string()));
        let browser = Arc::new(FakeBrowser::new());
        let mut controller = controller(two_phase(), &browser, mock);

        assert!(matches!(
            controller.handle("plan first goal").await.unwrap(),
            CommandOutcome::Planned(_)
        ));
        controller.handle("plan second goal").await.unwrap();
        assert_eq!(controller.session().active_plan().map(|p| p.goal.as_str()), Some("second goal"));
        assert_eq!(browser.count("reload"), 0);
    }

    #[test]
    fn test_installing_a_plan_abandons_the_previous_one() {
        let mut session = crate::agents::Session::new(Arc::new(FakeBrowser::new()));
        assert!(session.install_plan(Plan::new("first", vec![Intent::Refresh])).is_none());
        let previous = session.install_plan(Plan::new("second", vec![Intent::Back])).unwrap();
        assert_eq!(previous.goal, "first");
        assert_eq!(previous.status(), PlanStatus::Abandoned);
        assert!(session.has_resumable_plan());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_plan_resumes_with_execute_plan() {
        let mut mock = MockModelClient::new();
        mock.expect_complete().times(1).returning(|_| {
            Ok(r#"{"steps":[{"action":"scroll","direction":"down","amount":100},{"action":"scroll","direction":"down","amount":100}]}"#.to_string())
        });
        let browser = Arc::new(FakeBrowser::new().at(FakePage::new("https://a.test/", "A", vec![])));
        let mut controller = controller(two_phase(), &browser, mock);
        let before = controller.observe().await.unwrap().clone();

        controller.handle("plan scroll twice").await.unwrap();
        controller.cancel_token().cancel();
        let CommandOutcome::PlanFinished(interrupted) = controller.handle("execute plan").await.unwrap() else {
            panic!("plan should have been entered");
        };
        assert_eq!(interrupted.status(), PlanStatus::InProgress);
        assert_eq!(browser.scrolled(), 0);
        assert_eq!(controller.session().page(), &before);

        // bare "plan" means "execute plan" while one is in progress
        let CommandOutcome::PlanFinished(resumed) = controller.handle("plan").await.unwrap() else {
            panic!("plan should have resumed");
        };
        assert_eq!(resumed.status(), PlanStatus::Completed);
        assert_eq!(browser.scrolled(), 200);

        let err = controller.handle("execute plan").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Planning);
    }
}
