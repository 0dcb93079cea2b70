use chrono::Utc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::browser::{BrowserDriver, DriverError, RawSnapshot};
use crate::config::TimingConfig;
use crate::error::{AgentError, Result};
use crate::perception::selector::{assign_selectors, label_of, role_of};
use crate::types::{BoundingBox, InteractiveElement, PageState};

/// Captures [`PageState`] snapshots once the page has settled.
#[derive(Debug, Clone)]
pub struct PageStateExtractor {
    timing: TimingConfig,
}

impl PageStateExtractor {
    pub fn new(timing: TimingConfig) -> Self {
        Self { timing }
    }

    pub fn default_timeout(&self) -> Duration {
        self.timing.stability_timeout
    }

    /// Wait for a quiet DOM, then enumerate elements and screenshot together.
    /// Capture failures are retried once. `timeout` bounds the whole call,
    /// retry and hung browser calls included.
    pub async fn extract(&self, browser: &dyn BrowserDriver, timeout: Duration) -> Result<PageState> {
        let started = Instant::now();
        let deadline = started + timeout;
        let state = match self.extract_before(browser, deadline, timeout).await {
            Err(AgentError::Extraction(reason)) if Instant::now() < deadline => {
                warn!("Extraction failed ({}), retrying once", reason);
                self.extract_before(browser, deadline, timeout).await?
            }
            other => other?,
        };
        info!(
            "Extracted {} elements from {} in {:?}",
            state.elements.len(),
            state.url,
            started.elapsed()
        );
        Ok(state)
    }

    async fn extract_before(&self, browser: &dyn BrowserDriver, deadline: Instant, timeout: Duration) -> Result<PageState> {
        let attempt = async {
            self.wait_for_stability(browser, deadline, timeout).await?;
            let (snapshot, screenshot) = self.capture(browser).await?;
            Ok::<_, AgentError>(build_page_state(snapshot, screenshot))
        };
        match tokio::time::timeout_at(deadline, attempt).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Extraction did not finish within {:?}", timeout);
                Err(AgentError::ExtractionTimeout(timeout))
            }
        }
    }

    async fn wait_for_stability(&self, browser: &dyn BrowserDriver, deadline: Instant, timeout: Duration) -> Result<()> {
        let quiet_ms = self.timing.dom_quiet_window.as_millis() as u64;
        loop {
            let probe = browser.probe().await.map_err(extraction_error)?;
            if probe.ready_state != "loading" && probe.quiet_ms >= quiet_ms {
                debug!("Page stable (quiet for {}ms)", probe.quiet_ms);
                return Ok(());
            }
            if Instant::now() + self.timing.stability_poll_interval > deadline {
                warn!("Page did not settle within {:?}", timeout);
                return Err(AgentError::ExtractionTimeout(timeout));
            }
            tokio::time::sleep(self.timing.stability_poll_interval).await;
        }
    }

    /// Snapshot and screenshot count as one capture only if no mutation
    /// landed between them.
    async fn capture(&self, browser: &dyn BrowserDriver) -> Result<(RawSnapshot, Vec<u8>)> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let snapshot = browser.snapshot().await.map_err(extraction_error)?;
            let screenshot = browser.screenshot().await.map_err(extraction_error)?;
            let after = browser.probe().await.map_err(extraction_error)?;
            if after.mutation_count == snapshot.mutation_count {
                return Ok((snapshot, screenshot));
            }
            if attempt >= 2 {
                warn!("DOM kept changing during capture, keeping the latest snapshot");
                return Ok((snapshot, screenshot));
            }
            debug!(
                "DOM mutated during capture ({} -> {}), capturing again",
                snapshot.mutation_count, after.mutation_count
            );
        }
    }
}

fn extraction_error(err: DriverError) -> AgentError {
    match err {
        DriverError::ContextLost(msg) => AgentError::Navigation(format!("page context is gone: {}", msg)),
        other => AgentError::Extraction(other.to_string()),
    }
}

fn build_page_state(snapshot: RawSnapshot, screenshot: Vec<u8>) -> PageState {
    // uniqueness is judged against everything enumerated, hidden or not
    let selectors = assign_selectors(&snapshot.elements);
    let elements = snapshot
        .elements
        .iter()
        .zip(selectors)
        .filter(|(raw, _)| raw.visible && (raw.in_viewport || raw.scroll_reachable))
        .map(|(raw, selector)| InteractiveElement {
            role: role_of(raw),
            tag: raw.tag.clone(),
            text: raw.text.trim().to_string(),
            label: label_of(raw),
            selector,
            bbox: BoundingBox {
                x: raw.x,
                y: raw.y,
                width: raw.width,
                height: raw.height,
            },
        })
        .collect();

    PageState {
        url: snapshot.url,
        title: snapshot.title,
        elements,
        screenshot,
        captured_at: Utc::now(),
    }
}
