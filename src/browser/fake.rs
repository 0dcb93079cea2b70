//! Scripted in-memory browser for unit tests. Pages are keyed by url, every
//! call is recorded, and failures can be queued per operation.

use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::browser::driver::{BrowserDriver, DriverError, DriverResult, RawElement, RawSnapshot, StabilityProbe};
use crate::perception::selector::candidates;

#[derive(Debug, Clone, Default)]
pub struct FakePage {
    pub url: String,
    pub title: String,
    pub elements: Vec<RawElement>,
    pub html: String,
    /// selectors that exist on the page without being enumerated
    pub extra_selectors: Vec<String>,
    /// url loaded when Enter is pressed in any field
    pub enter_leads_to: Option<String>,
}

impl FakePage {
    pub fn new(url: &str, title: &str, elements: Vec<RawElement>) -> Self {
        let elements = elements
            .into_iter()
            .enumerate()
            .map(|(i, mut el)| {
                if el.css_path.is_empty() {
                    el.css_path = format!("html > body > {}:nth-child({})", el.tag, i + 1);
                }
                el
            })
            .collect();
        Self {
            url: normalize(url),
            title: title.to_string(),
            elements,
            html: format!("<html><head><title>{}</title></head><body></body></html>", title),
            ..Default::default()
        }
    }

    pub fn with_html(mut self, html: &str) -> Self {
        self.html = html.to_string();
        self
    }

    pub fn with_selector(mut self, selector: &str) -> Self {
        self.extra_selectors.push(selector.to_string());
        self
    }

    pub fn with_enter_leading_to(mut self, url: &str) -> Self {
        self.enter_leads_to = Some(normalize(url));
        self
    }

    fn element(&self, selector: &str) -> Option<&RawElement> {
        self.elements
            .iter()
            .find(|el| candidates(el).iter().any(|c| c == selector))
    }

    fn has(&self, selector: &str) -> bool {
        self.element(selector).is_some() || self.extra_selectors.iter().any(|s| s == selector)
    }
}

fn visible(tag: &str, text: &str) -> RawElement {
    RawElement {
        tag: tag.to_string(),
        text: text.to_string(),
        visible: true,
        in_viewport: true,
        scroll_reachable: true,
        width: 80.0,
        height: 20.0,
        ..Default::default()
    }
}

pub fn link(text: &str, href: &str) -> RawElement {
    RawElement {
        href: Some(href.to_string()),
        ..visible("a", text)
    }
}

pub fn button(text: &str) -> RawElement {
    visible("button", text)
}

pub fn text_input(name: &str, placeholder: &str) -> RawElement {
    RawElement {
        name: Some(name.to_string()),
        placeholder: Some(placeholder.to_string()),
        input_type: Some("text".to_string()),
        ..visible("input", "")
    }
}

fn normalize(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string())
}

#[derive(Default)]
struct FakeState {
    pages: HashMap<String, FakePage>,
    current: String,
    back_stack: Vec<String>,
    forward_stack: Vec<String>,
    mutations: u64,
    unstable: bool,
    race_snapshots: u32,
    reveal: Option<(u32, RawElement)>,
    queued: HashMap<&'static str, VecDeque<DriverError>>,
    sticky: HashMap<&'static str, DriverError>,
    calls: Vec<String>,
    typed: Vec<(String, String)>,
    scrolled: i64,
    probe_delay: Duration,
}

impl FakeState {
    fn page(&self) -> FakePage {
        self.pages
            .get(&self.current)
            .cloned()
            .unwrap_or_else(|| FakePage::new(&self.current, "", vec![]))
    }

    fn enter(&mut self, op: &'static str, detail: &str) -> DriverResult<()> {
        self.calls.push(if detail.is_empty() {
            op.to_string()
        } else {
            format!("{} {}", op, detail)
        });
        if let Some(err) = self.queued.get_mut(op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        if let Some(err) = self.sticky.get(op) {
            return Err(err.clone());
        }
        Ok(())
    }

    fn go(&mut self, url: &str) {
        let url = normalize(url);
        let previous = std::mem::replace(&mut self.current, url);
        self.back_stack.push(previous);
        self.forward_stack.clear();
        self.mutations += 1;
    }
}

pub struct FakeBrowser {
    state: Mutex<FakeState>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        let state = FakeState {
            current: "about:blank".to_string(),
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Register a page and make it current.
    pub fn at(self, page: FakePage) -> Self {
        {
            let mut state = self.lock();
            state.current = page.url.clone();
            state.pages.insert(page.url.clone(), page);
        }
        self
    }

    pub fn with_page(self, page: FakePage) -> Self {
        self.lock().pages.insert(page.url.clone(), page);
        self
    }

    /// Fail the next call of `op` with `err`, once per queued error.
    pub fn fail_next(&self, op: &'static str, err: DriverError) {
        self.lock().queued.entry(op).or_default().push_back(err);
    }

    pub fn fail_always(&self, op: &'static str, err: DriverError) {
        self.lock().sticky.insert(op, err);
    }

    /// Every probe hangs for `delay` before answering.
    pub fn slow_probes(&self, delay: Duration) {
        self.lock().probe_delay = delay;
    }

    /// The DOM never stops mutating.
    pub fn set_unstable(&self, unstable: bool) {
        self.lock().unstable = unstable;
    }

    /// The next `n` snapshots are followed by a mutation, as if the page
    /// changed during capture.
    pub fn race_next_snapshots(&self, n: u32) {
        self.lock().race_snapshots = n;
    }

    /// Element added to the current page once `after` snapshots were taken.
    pub fn reveal_after_snapshots(&self, after: u32, element: RawElement) {
        self.lock().reveal = Some((after, element));
    }

    pub fn count(&self, op: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.as_str() == op || c.starts_with(&format!("{} ", op)))
            .count()
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn typed(&self) -> Vec<(String, String)> {
        self.lock().typed.clone()
    }

    pub fn current_url(&self) -> String {
        self.lock().current.clone()
    }

    pub fn scrolled(&self) -> i64 {
        self.lock().scrolled
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for FakeBrowser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    async fn probe(&self) -> DriverResult<StabilityProbe> {
        let delay = self.lock().probe_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock();
        state.enter("probe", "")?;
        if state.unstable {
            state.mutations += 1;
        }
        Ok(StabilityProbe {
            ready_state: "complete".to_string(),
            mutation_count: state.mutations,
            quiet_ms: if state.unstable { 0 } else { 10_000 },
        })
    }

    async fn snapshot(&self) -> DriverResult<RawSnapshot> {
        let mut state = self.lock();
        state.enter("snapshot", "")?;

        if let Some((after, element)) = state.reveal.take() {
            if after == 0 {
                let current = state.current.clone();
                let mut page = state.page();
                page.elements.push(element);
                state.pages.insert(current, page);
            } else {
                state.reveal = Some((after - 1, element));
            }
        }

        let page = state.page();
        let snapshot = RawSnapshot {
            url: page.url.clone(),
            title: page.title.clone(),
            mutation_count: state.mutations,
            elements: page.elements.clone(),
        };
        if state.race_snapshots > 0 {
            state.race_snapshots -= 1;
            state.mutations += 1;
        }
        Ok(snapshot)
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        let mut state = self.lock();
        state.enter("screenshot", "")?;
        Ok(format!("png:{}", state.current).into_bytes())
    }

    async fn content(&self) -> DriverResult<String> {
        let mut state = self.lock();
        state.enter("content", "")?;
        Ok(state.page().html)
    }

    async fn outline(&self) -> DriverResult<serde_json::Value> {
        let mut state = self.lock();
        state.enter("outline", "")?;
        let page = state.page();
        let buttons: Vec<_> = page
            .elements
            .iter()
            .filter(|el| el.tag == "button")
            .map(|el| json!({ "text": el.text, "visible": el.visible, "disabled": false }))
            .collect();
        let links: Vec<_> = page
            .elements
            .iter()
            .filter_map(|el| el.href.as_ref().map(|href| json!({ "text": el.text, "href": href, "visible": el.visible })))
            .collect();
        let fields: Vec<_> = page
            .elements
            .iter()
            .filter(|el| el.tag == "input" || el.tag == "textarea")
            .map(|el| json!({ "name": el.name, "placeholder": el.placeholder }))
            .collect();
        Ok(json!({
            "metadata": { "url": page.url, "title": page.title },
            "buttons": buttons,
            "links": links,
            "form_fields": fields,
            "content_sections": [],
            "navigation": []
        }))
    }

    async fn navigate(&self, url: &str) -> DriverResult<()> {
        let mut state = self.lock();
        state.enter("navigate", url)?;
        state.go(url);
        Ok(())
    }

    async fn back(&self) -> DriverResult<()> {
        let mut state = self.lock();
        state.enter("back", "")?;
        if let Some(previous) = state.back_stack.pop() {
            let current = std::mem::replace(&mut state.current, previous);
            state.forward_stack.push(current);
        }
        Ok(())
    }

    async fn forward(&self) -> DriverResult<()> {
        let mut state = self.lock();
        state.enter("forward", "")?;
        if let Some(next) = state.forward_stack.pop() {
            let current = std::mem::replace(&mut state.current, next);
            state.back_stack.push(current);
        }
        Ok(())
    }

    async fn reload(&self) -> DriverResult<()> {
        let mut state = self.lock();
        state.enter("reload", "")?;
        state.mutations += 1;
        Ok(())
    }

    async fn click(&self, selector: &str) -> DriverResult<()> {
        let mut state = self.lock();
        state.enter("click", selector)?;
        let page = state.page();
        let Some(element) = page.element(selector) else {
            // bare selectors have nothing behind them
            return if page.extra_selectors.iter().any(|s| s == selector) {
                Ok(())
            } else {
                Err(DriverError::NotFound(selector.to_string()))
            };
        };
        if let Some(href) = &element.href {
            let target = url::Url::parse(&page.url)
                .and_then(|base| base.join(href))
                .map(|u| u.to_string())
                .unwrap_or_else(|_| href.clone());
            state.go(&target);
        }
        Ok(())
    }

    async fn type_into(&self, selector: &str, text: &str) -> DriverResult<()> {
        let mut state = self.lock();
        state.enter("type_into", selector)?;
        if !state.page().has(selector) {
            return Err(DriverError::NotFound(selector.to_string()));
        }
        state.typed.push((selector.to_string(), text.to_string()));
        Ok(())
    }

    async fn press_enter(&self, selector: &str) -> DriverResult<()> {
        let mut state = self.lock();
        state.enter("press_enter", selector)?;
        let page = state.page();
        if !page.has(selector) {
            return Err(DriverError::NotFound(selector.to_string()));
        }
        if let Some(url) = page.enter_leads_to {
            state.go(&url);
        }
        Ok(())
    }

    async fn scroll_by(&self, dy: i64) -> DriverResult<()> {
        let mut state = self.lock();
        state.enter("scroll_by", "")?;
        state.scrolled += dy;
        Ok(())
    }

    async fn exists(&self, selector: &str) -> DriverResult<bool> {
        let mut state = self.lock();
        state.enter("exists", selector)?;
        Ok(state.page().has(selector))
    }

    async fn find_text(&self, text: &str) -> DriverResult<bool> {
        let mut state = self.lock();
        state.enter("find_text", text)?;
        let page = state.page();
        let needle = text.to_lowercase();
        Ok(page.html.to_lowercase().contains(&needle)
            || page.elements.iter().any(|el| el.text.to_lowercase().contains(&needle)))
    }

    async fn close(&self) -> DriverResult<()> {
        self.lock().enter("close", "")
    }
}
