use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agents::matcher::{ElementMatcher, Purpose};
use crate::agents::Session;
use crate::browser::{DriverError, DriverResult};
use crate::config::{Config, SiteTable};
use crate::error::{AgentError, Result};
use crate::perception::{extract_main_content, PageStateExtractor, VisionAnalyzer, VisionContext};
use crate::retry::{RetryError, RetryPolicy, RetryScope};
use crate::types::{
    ElementRole, ExecutionResult, Intent, PageState, Payload, ScrollDirection, Target, WaitFor,
};

const SUBMIT_SELECTORS: &[&str] = &[
    "input[type='submit']",
    "button[type='submit']",
    "form button:not([type='button'])",
];
const FORM_FIELD_SELECTOR: &str = "form input:not([type='hidden'])";
const RECENT_COMMANDS: usize = 5;

/// Outcome of one executed intent plus what the session should take from it.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub result: ExecutionResult,
    /// observation taken after the action; `None` when extraction failed
    pub page: Option<PageState>,
    /// resolved element, remembered so "it" can refer to it
    pub target: Option<Target>,
}

#[derive(Debug, Clone, Copy)]
enum OpKind {
    Navigation,
    Action,
}

impl OpKind {
    fn error(self, label: &str, err: DriverError) -> AgentError {
        match self {
            OpKind::Navigation => AgentError::Navigation(format!("{}: {}", label, err)),
            OpKind::Action => AgentError::Action(format!("{}: {}", label, err)),
        }
    }
}

struct Outcome {
    payload: Option<Payload>,
    target: Option<Target>,
}

impl Outcome {
    fn empty() -> Self {
        Self {
            payload: None,
            target: None,
        }
    }

    fn payload(payload: Payload) -> Self {
        Self {
            payload: Some(payload),
            target: None,
        }
    }

    fn target(selector: String) -> Self {
        Self {
            payload: None,
            target: Some(Target::Selector(selector)),
        }
    }
}

/// Everything one intent runs with. All driver calls made for the intent
/// draw on the same retry allowance.
struct Step<'a> {
    session: &'a Session,
    cancel: &'a CancellationToken,
    retries: RetryScope<'a>,
}

impl Step<'_> {
    fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(AgentError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Runs one intent against the browser. Never mutates the session; the
/// caller applies the returned report.
pub struct ActionExecutor {
    config: Arc<Config>,
    extractor: PageStateExtractor,
    vision: Arc<VisionAnalyzer>,
    matcher: ElementMatcher,
    policy: RetryPolicy,
    sites: SiteTable,
}

impl ActionExecutor {
    pub fn new(config: Arc<Config>, vision: Arc<VisionAnalyzer>) -> Result<Self> {
        Ok(Self {
            extractor: PageStateExtractor::new(config.timing.clone()),
            matcher: ElementMatcher::new(&config.matching),
            policy: RetryPolicy::from_config(&config.retry),
            sites: SiteTable::new(&config.sites)?,
            vision,
            config,
        })
    }

    pub fn extractor(&self) -> &PageStateExtractor {
        &self.extractor
    }

    pub async fn execute(&self, intent: &Intent, session: &Session, cancel: &CancellationToken) -> ExecutionReport {
        let started = Instant::now();
        info!("Executing {}", intent);

        // a fresh page taken while resolving is still a valid observation
        let mut observed = None;
        let step = Step {
            session,
            cancel,
            retries: RetryScope::new(&self.policy, cancel),
        };
        let outcome = self.dispatch(intent, &step, &mut observed).await;
        if step.retries.retries_used() > 0 {
            debug!("{} used {} retries", intent.tag(), step.retries.retries_used());
        }

        let page = if cancel.is_cancelled() {
            observed
        } else {
            match self
                .extractor
                .extract(session.browser(), self.extractor.default_timeout())
                .await
            {
                Ok(page) => Some(page),
                Err(e) => {
                    warn!("Could not observe the page after {}: {}", intent.tag(), e);
                    observed
                }
            }
        };

        let duration = started.elapsed();
        match outcome {
            Ok(outcome) => {
                debug!("{} succeeded in {:?}", intent.tag(), duration);
                ExecutionReport {
                    result: ExecutionResult::succeeded(outcome.payload, duration),
                    page,
                    target: outcome.target,
                }
            }
            Err(e) => {
                warn!("{} failed after {:?}: {}", intent.tag(), duration, e);
                ExecutionReport {
                    result: ExecutionResult::failed(e, duration),
                    page,
                    target: None,
                }
            }
        }
    }

    async fn dispatch(
        &self,
        intent: &Intent,
        step: &Step<'_>,
        observed: &mut Option<PageState>,
    ) -> Result<Outcome> {
        let session = step.session;
        let browser = session.browser();
        match intent {
            Intent::Navigate { url } => {
                self.drive(&format!("navigate to {}", url), OpKind::Navigation, step, || browser.navigate(url))
                    .await?;
                Ok(Outcome::empty())
            }
            Intent::Back => {
                self.drive("back", OpKind::Navigation, step, || browser.back()).await?;
                Ok(Outcome::empty())
            }
            Intent::Forward => {
                self.drive("forward", OpKind::Navigation, step, || browser.forward()).await?;
                Ok(Outcome::empty())
            }
            Intent::Refresh => {
                self.drive("reload", OpKind::Navigation, step, || browser.reload()).await?;
                Ok(Outcome::empty())
            }
            Intent::Click { target } => {
                let selector = self.resolve(target, Purpose::Click, step, observed).await?;
                self.drive(&format!("click {}", selector), OpKind::Action, step, || browser.click(&selector))
                    .await?;
                Ok(Outcome::target(selector))
            }
            Intent::Type { value, field } => {
                let selector = self.resolve(field, Purpose::Type, step, observed).await?;
                self.drive(&format!("type into {}", selector), OpKind::Action, step, || {
                    browser.type_into(&selector, value)
                })
                .await?;
                Ok(Outcome::target(selector))
            }
            Intent::Submit { target: Some(target) } => {
                let selector = self.resolve(target, Purpose::Submit, step, observed).await?;
                self.drive(&format!("click {}", selector), OpKind::Action, step, || browser.click(&selector))
                    .await?;
                Ok(Outcome::target(selector))
            }
            Intent::Submit { target: None } => self.submit_form(step).await,
            Intent::Scroll { direction, amount } => {
                let dy = match direction {
                    ScrollDirection::Down => i64::from(*amount),
                    ScrollDirection::Up => -i64::from(*amount),
                };
                self.drive("scroll", OpKind::Action, step, || browser.scroll_by(dy)).await?;
                Ok(Outcome::empty())
            }
            Intent::Search { query, site } => self.search(query, site.as_deref(), step, observed).await,
            Intent::SelectFirst { filter } => self.select_first(filter.as_deref(), step).await,
            Intent::FindText { text } => {
                let found = self
                    .drive(&format!("find '{}'", text), OpKind::Action, step, || browser.find_text(text))
                    .await?;
                let message = if found {
                    format!("Found '{}' on the page", text)
                } else {
                    format!("'{}' does not appear on the page", text)
                };
                Ok(Outcome::payload(Payload::Text(message)))
            }
            Intent::Wait(wait) => self.wait(wait, step).await,
            Intent::Extract => {
                let outline = self.drive("outline", OpKind::Action, step, || browser.outline()).await?;
                let html = self.drive("read content", OpKind::Action, step, || browser.content()).await?;
                let page = session.page();
                Ok(Outcome::payload(Payload::Data(json!({
                    "url": page.url,
                    "title": page.title,
                    "outline": outline,
                    "main_content": extract_main_content(&html),
                }))))
            }
            Intent::Screenshot => {
                let png = self.drive("screenshot", OpKind::Action, step, || browser.screenshot()).await?;
                Ok(Outcome::payload(Payload::Screenshot(png)))
            }
            Intent::Analyze { question } => {
                let html = self.drive("read content", OpKind::Action, step, || browser.content()).await?;
                let context = VisionContext {
                    main_content: extract_main_content(&html),
                    recent_commands: session.recent_commands(RECENT_COMMANDS),
                };
                let question = question
                    .as_deref()
                    .unwrap_or("What is this page for and what can be done on it?");
                step.check()?;
                let analysis = self.vision.analyze_with(session.page(), question, &context).await?;
                Ok(Outcome::payload(Payload::Analysis(analysis)))
            }
            Intent::PlanGoal { .. }
            | Intent::ExecutePlan
            | Intent::Help
            | Intent::Exit
            | Intent::Unknown { .. } => Err(AgentError::Interpretation(format!(
                "'{}' is not a browser action",
                intent
            ))),
        }
    }

    /// One browser call, retried on transient driver failures while the
    /// step's allowance lasts.
    async fn drive<T, F, Fut>(&self, label: &str, kind: OpKind, step: &Step<'_>, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        match step.retries.run(label, op, DriverError::is_transient).await {
            Ok(value) => Ok(value),
            Err(RetryError::Cancelled) => Err(AgentError::Cancelled),
            Err(RetryError::Failed(e)) => Err(kind.error(label, e)),
        }
    }

    /// Whether `selector` matches now. A selector the page rejects counts as
    /// absent; a browser that keeps failing does not.
    async fn exists(&self, selector: &str, step: &Step<'_>) -> Result<bool> {
        let label = format!("look up {}", selector);
        let browser = step.session.browser();
        match step.retries.run(&label, || browser.exists(selector), DriverError::is_transient).await {
            Ok(found) => Ok(found),
            Err(RetryError::Cancelled) => Err(AgentError::Cancelled),
            Err(RetryError::Failed(e @ (DriverError::NotFound(_) | DriverError::Script(_)))) => {
                debug!("Treating {} as absent: {}", selector, e);
                Ok(false)
            }
            Err(RetryError::Failed(e)) => Err(OpKind::Action.error(&label, e)),
        }
    }

    /// Exact and fuzzy match on the known page, the same on a fresh page,
    /// then the vision model's suggestions.
    async fn resolve(
        &self,
        target: &Target,
        purpose: Purpose,
        step: &Step<'_>,
        observed: &mut Option<PageState>,
    ) -> Result<String> {
        let session = step.session;
        let mut attempted = Vec::new();

        if let Some(hit) = self.matcher.resolve(session.page(), target, purpose) {
            debug!("Resolved {} to {} ({:?} match)", target, hit.element.selector, hit.stage);
            return Ok(hit.element.selector.clone());
        }
        attempted.push(format!("exact and fuzzy match over {} elements", session.page().elements.len()));

        if let Target::Selector(selector) = target {
            if self.exists(selector, step).await? {
                debug!("Selector {} exists outside the enumerated elements", selector);
                return Ok(selector.clone());
            }
            attempted.push(format!("selector {} in the live DOM", selector));
        }

        step.check()?;
        match self
            .extractor
            .extract(session.browser(), self.extractor.default_timeout())
            .await
        {
            Ok(fresh) => {
                let hit = self
                    .matcher
                    .resolve(&fresh, target, purpose)
                    .map(|hit| hit.element.selector.clone());
                *observed = Some(fresh);
                if let Some(selector) = hit {
                    debug!("Resolved {} to {} after re-extraction", target, selector);
                    return Ok(selector);
                }
                attempted.push("exact and fuzzy match on a fresh page".to_string());
            }
            Err(e) => {
                warn!("Re-extraction during resolution failed: {}", e);
                attempted.push(format!("fresh page ({})", e));
            }
        }

        step.check()?;
        let page = observed.as_ref().unwrap_or_else(|| session.page());
        let question = format!(
            "Which element should be used to {} {}?",
            match purpose {
                Purpose::Click => "click",
                Purpose::Type => "type into",
                Purpose::Submit => "submit with",
            },
            target
        );
        match self.vision.analyze(page, &question).await {
            Ok(analysis) => {
                for suggestion in analysis.ranked() {
                    if let Some(selector) = &suggestion.selector {
                        if page.element_by_selector(selector).is_some()
                            || self.exists(selector, step).await?
                        {
                            info!("Vision suggested {} for {}", selector, target);
                            return Ok(selector.clone());
                        }
                        attempted.push(format!("vision selector {}", selector));
                    }
                    if let Some(text) = &suggestion.text {
                        let suggested = Target::Text(text.clone());
                        if let Some(hit) = self.matcher.resolve(page, &suggested, purpose) {
                            info!("Vision suggested \"{}\" for {}", text, target);
                            return Ok(hit.element.selector.clone());
                        }
                        attempted.push(format!("vision text \"{}\"", text));
                    }
                }
                if analysis.elements.is_empty() {
                    attempted.push("vision analysis (no suggestions)".to_string());
                }
            }
            Err(e) => attempted.push(format!("vision analysis ({})", e)),
        }

        Err(AgentError::ElementResolution {
            target: target.to_string(),
            attempted,
            url: page.url.clone(),
        })
    }

    async fn submit_form(&self, step: &Step<'_>) -> Result<Outcome> {
        let session = step.session;
        let browser = session.browser();
        for selector in SUBMIT_SELECTORS {
            if self.exists(selector, step).await? {
                self.drive(&format!("click {}", selector), OpKind::Action, step, || browser.click(selector))
                    .await?;
                return Ok(Outcome::target(selector.to_string()));
            }
        }
        if self.exists(FORM_FIELD_SELECTOR, step).await? {
            self.drive("submit with enter", OpKind::Action, step, || {
                browser.press_enter(FORM_FIELD_SELECTOR)
            })
            .await?;
            return Ok(Outcome::empty());
        }
        Err(AgentError::ElementResolution {
            target: "submit button".to_string(),
            attempted: SUBMIT_SELECTORS
                .iter()
                .chain(std::iter::once(&FORM_FIELD_SELECTOR))
                .map(|s| s.to_string())
                .collect(),
            url: session.page().url.clone(),
        })
    }

    /// Type into the site's own search box when it has one, otherwise go to
    /// the default search engine.
    async fn search(
        &self,
        query: &str,
        site: Option<&str>,
        step: &Step<'_>,
        observed: &mut Option<PageState>,
    ) -> Result<Outcome> {
        let session = step.session;
        let browser = session.browser();
        if let Some(site) = site {
            self.drive(&format!("navigate to {}", site), OpKind::Navigation, step, || browser.navigate(site))
                .await?;
            step.check()?;
            match self
                .extractor
                .extract(browser, self.extractor.default_timeout())
                .await
            {
                Ok(page) => *observed = Some(page),
                Err(e) => warn!("Could not observe {} before searching: {}", site, e),
            }
        }

        let url = site.unwrap_or(&session.page().url);
        let search = &self.config.search;
        let site_override = self.sites.site_for(url);

        let mut boxes: Vec<&str> = Vec::new();
        if let Some(selector) = site_override.and_then(|s| s.search_selector.as_deref()) {
            boxes.push(selector);
        }
        if site.is_some() || site_override.is_some() || search.is_searchable(url) {
            boxes.extend(search.generic_search_selectors.iter().map(String::as_str));
        }

        for selector in boxes {
            if !self.exists(selector, step).await? {
                continue;
            }
            info!("Searching '{}' with {}", query, selector);
            self.drive(&format!("type into {}", selector), OpKind::Action, step, || {
                browser.type_into(selector, query)
            })
            .await?;

            let button = site_override.and_then(|s| s.search_button.as_deref());
            match button {
                Some(button) if self.exists(button, step).await? => {
                    self.drive(&format!("click {}", button), OpKind::Action, step, || browser.click(button))
                        .await?;
                }
                _ => {
                    self.drive("submit search", OpKind::Action, step, || browser.press_enter(selector))
                        .await?;
                }
            }
            return Ok(Outcome::target(selector.to_string()));
        }

        let fallback = search.search_url(query);
        info!("No search box found, searching via {}", fallback);
        self.drive("navigate to search engine", OpKind::Navigation, step, || {
            browser.navigate(&fallback)
        })
        .await?;
        Ok(Outcome::empty())
    }

    /// First result link: the filter picks by text, otherwise the site's
    /// result selectors then generic ones.
    async fn select_first(&self, filter: Option<&str>, step: &Step<'_>) -> Result<Outcome> {
        let session = step.session;
        let browser = session.browser();
        let page = session.page();

        if let Some(filter) = filter {
            let terms: Vec<String> = filter.split_whitespace().map(str::to_lowercase).collect();
            let hit = page.elements.iter().find(|el| {
                let text = el.display_text().to_lowercase();
                el.role == ElementRole::Link && terms.iter().all(|t| text.contains(t.as_str()))
            });
            let Some(element) = hit else {
                return Err(AgentError::ElementResolution {
                    target: format!("first item with {}", filter),
                    attempted: vec![format!("links containing all of: {}", terms.join(", "))],
                    url: page.url.clone(),
                });
            };
            let selector = element.selector.clone();
            self.drive(&format!("click {}", selector), OpKind::Action, step, || browser.click(&selector))
                .await?;
            return Ok(Outcome::target(selector));
        }

        let mut selectors: Vec<&str> = self
            .sites
            .site_for(&page.url)
            .map(|site| site.first_item_selectors.iter().map(String::as_str).collect())
            .unwrap_or_default();
        selectors.extend(self.config.search.generic_first_item_selectors.iter().map(String::as_str));

        for selector in &selectors {
            if self.exists(selector, step).await? {
                self.drive(&format!("click {}", selector), OpKind::Action, step, || browser.click(selector))
                    .await?;
                return Ok(Outcome::target(selector.to_string()));
            }
        }
        Err(AgentError::ElementResolution {
            target: "first item".to_string(),
            attempted: selectors.iter().map(|s| s.to_string()).collect(),
            url: page.url.clone(),
        })
    }

    async fn wait(&self, wait: &WaitFor, step: &Step<'_>) -> Result<Outcome> {
        match wait {
            WaitFor::Seconds(secs) => {
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(*secs)) => Ok(Outcome::empty()),
                    _ = step.cancel.cancelled() => Err(AgentError::Cancelled),
                }
            }
            WaitFor::Selector(selector) => {
                let deadline = Instant::now() + self.config.timing.action_timeout;
                loop {
                    if self.exists(selector, step).await? {
                        return Ok(Outcome::target(selector.clone()));
                    }
                    if Instant::now() >= deadline {
                        return Err(AgentError::Action(format!(
                            "{} did not appear within {:?}",
                            selector, self.config.timing.action_timeout
                        )));
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.timing.stability_poll_interval) => {}
                        _ = step.cancel.cancelled() => return Err(AgentError::Cancelled),
                    }
                }
            }
        }
    }
}
