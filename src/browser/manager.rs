use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::browser::driver::{BrowserDriver, DriverError, DriverResult, RawSnapshot, StabilityProbe};
use crate::browser::scripts::{
    generate_clear_field_script, generate_enumeration_script, generate_exists_script,
    generate_find_text_script, generate_outline_script, generate_scroll_script,
    generate_stability_probe_script,
};
use crate::config::BrowserSettings;
use crate::error::{AgentError, Result};

/// One Chrome process with a single page, driven over CDP.
pub struct ChromeBrowser {
    browser: Mutex<Browser>,
    page: Page,
    handler: JoinHandle<()>,
    action_timeout: Duration,
}

impl ChromeBrowser {
    pub async fn launch(settings: &BrowserSettings, action_timeout: Duration) -> Result<Self> {
        info!(
            "Launching browser (headless: {}, {}x{})",
            settings.headless, settings.window_width, settings.window_height
        );

        // unique profile dir avoids the singleton lock of a leftover chrome
        let user_data_dir = std::env::temp_dir().join(format!(
            "webpilot-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));

        let mut builder = BrowserConfig::builder()
            .window_size(settings.window_width, settings.window_height)
            .user_data_dir(&user_data_dir)
            .args(vec![
                "--disable-dev-shm-usage",
                "--disable-extensions",
                "--no-first-run",
                "--disable-default-apps",
                "--disable-sync",
                "--disable-background-timer-throttling",
                "--disable-renderer-backgrounding",
                "--disable-blink-features=AutomationControlled",
                "--mute-audio",
            ])
            .args(settings.extra_args.iter().map(String::as_str));
        if !settings.headless {
            builder = builder.with_head();
        }

        let browser_config = builder
            .build()
            .map_err(|e| AgentError::Browser(format!("Failed to create browser config: {}", e)))?;

        let mut last_error = String::from("no launch attempted");
        for attempt in 1..=settings.launch_attempts {
            match Browser::launch(browser_config.clone()).await {
                Ok((browser, mut handler)) => {
                    info!("Browser launched successfully on attempt {}", attempt);

                    let handler = tokio::spawn(async move {
                        while let Some(event) = handler.next().await {
                            if let Err(e) = event {
                                // chrome emits events chromiumoxide has no type for
                                let error_msg = e.to_string();
                                if error_msg.contains("data did not match any variant")
                                    || error_msg.contains("untagged enum Message")
                                {
                                    debug!("Ignoring WebSocket deserialization error: {}", e);
                                } else {
                                    warn!("Browser handler error: {}", e);
                                }
                            }
                        }
                        debug!("Browser handler task ended");
                    });

                    let page = match tokio::time::timeout(Duration::from_secs(10), browser.new_page("about:blank")).await {
                        Ok(Ok(page)) => page,
                        Ok(Err(e)) => {
                            handler.abort();
                            return Err(AgentError::Browser(format!("Failed to create new page: {}", e)));
                        }
                        Err(_) => {
                            handler.abort();
                            return Err(AgentError::Browser("Timeout creating new page".to_string()));
                        }
                    };

                    return Ok(Self {
                        browser: Mutex::new(browser),
                        page,
                        handler,
                        action_timeout,
                    });
                }
                Err(e) => {
                    error!("Browser launch attempt {} failed: {}", attempt, e);
                    last_error = e.to_string();
                    if attempt < settings.launch_attempts {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        }

        Err(AgentError::Browser(format!(
            "Failed to launch browser after {} attempts: {}",
            settings.launch_attempts, last_error
        )))
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> DriverResult<T>
    where
        F: Future<Output = std::result::Result<T, CdpError>>,
    {
        match tokio::time::timeout(self.action_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify_cdp(what, e)),
            Err(_) => Err(DriverError::Timeout(format!(
                "{} did not finish within {:?}",
                what, self.action_timeout
            ))),
        }
    }

    async fn eval<T: DeserializeOwned>(&self, what: &str, script: String) -> DriverResult<T> {
        let result = self.bounded(what, self.page.evaluate(script)).await?;
        result
            .into_value::<T>()
            .map_err(|e| DriverError::Script(format!("{} returned an unexpected value: {}", what, e)))
    }
}

fn classify_cdp(what: &str, err: CdpError) -> DriverError {
    let message = format!("{}: {}", what, err);
    match err {
        CdpError::Timeout => DriverError::Timeout(message),
        CdpError::NotFound => DriverError::NotFound(message),
        CdpError::FrameNotFound(_) => DriverError::NavigationInFlight(message),
        CdpError::JavascriptException(_) => DriverError::Script(message),
        CdpError::NoResponse => DriverError::ContextLost(message),
        _ => DriverError::classify(message),
    }
}

#[async_trait]
impl BrowserDriver for ChromeBrowser {
    async fn probe(&self) -> DriverResult<StabilityProbe> {
        self.eval("stability probe", generate_stability_probe_script().to_string())
            .await
    }

    async fn snapshot(&self) -> DriverResult<RawSnapshot> {
        self.eval("element enumeration", generate_enumeration_script().to_string())
            .await
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        self.bounded("screenshot", self.page.screenshot(params)).await
    }

    async fn content(&self) -> DriverResult<String> {
        self.bounded("page content", self.page.content()).await
    }

    async fn outline(&self) -> DriverResult<serde_json::Value> {
        self.eval("page outline", generate_outline_script().to_string()).await
    }

    async fn navigate(&self, url: &str) -> DriverResult<()> {
        info!("Navigating to {}", url);
        self.bounded("navigation", async { self.page.goto(url).await.map(|_| ()) })
            .await
    }

    async fn back(&self) -> DriverResult<()> {
        // settling is left to the extractor's stability wait
        self.eval::<bool>("history back", "history.back(); true".to_string())
            .await?;
        Ok(())
    }

    async fn forward(&self) -> DriverResult<()> {
        self.eval::<bool>("history forward", "history.forward(); true".to_string())
            .await?;
        Ok(())
    }

    async fn reload(&self) -> DriverResult<()> {
        self.bounded("reload", async { self.page.reload().await.map(|_| ()) })
            .await
    }

    async fn click(&self, selector: &str) -> DriverResult<()> {
        debug!("Clicking {}", selector);
        let element = self.bounded("find element", self.page.find_element(selector)).await?;
        self.bounded("click", async { element.click().await.map(|_| ()) })
            .await
    }

    async fn type_into(&self, selector: &str, text: &str) -> DriverResult<()> {
        debug!("Typing into {}", selector);
        let element = self.bounded("find element", self.page.find_element(selector)).await?;
        self.bounded("focus", async { element.click().await.map(|_| ()) })
            .await?;
        self.eval::<bool>("clear field", generate_clear_field_script(selector))
            .await?;
        self.bounded("type", async { element.type_str(text).await.map(|_| ()) })
            .await
    }

    async fn press_enter(&self, selector: &str) -> DriverResult<()> {
        let element = self.bounded("find element", self.page.find_element(selector)).await?;
        self.bounded("press enter", async { element.press_key("Enter").await.map(|_| ()) })
            .await
    }

    async fn scroll_by(&self, dy: i64) -> DriverResult<()> {
        self.eval::<bool>("scroll", generate_scroll_script(dy)).await?;
        Ok(())
    }

    async fn exists(&self, selector: &str) -> DriverResult<bool> {
        self.eval("selector lookup", generate_exists_script(selector)).await
    }

    async fn find_text(&self, text: &str) -> DriverResult<bool> {
        self.eval("find text", generate_find_text_script(text)).await
    }

    async fn close(&self) -> DriverResult<()> {
        let mut browser = self.browser.lock().await;
        let closed = browser
            .close()
            .await
            .map(|_| ())
            .map_err(|e| classify_cdp("close", e));
        self.handler.abort();
        info!("Closed browser");
        closed
    }
}
