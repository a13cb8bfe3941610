use std::ops::RangeInclusive;
use std::time::Duration;

use async_trait::async_trait;
use fantoccini::{ClientBuilder, Locator};
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, USER_AGENT};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{FETCH_TIMEOUT_SECS, JITTER_MAX_MS, JITTER_MIN_MS, SCROLL_SETTLE_MS};
use crate::error::{AppError, Result};

const SCROLL_TO_BOTTOM_JS: &str = "window.scrollTo(0, document.body.scrollHeight);";

/// How a page must be retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Render<'a> {
    /// Plain HTTP GET; the response body is the page.
    Static,
    /// Rendered in the headless browser. `wait_for` is a CSS selector that marks the
    /// listings as loaded; a wait timeout is logged and the page is returned anyway.
    Dynamic { wait_for: Option<&'a str> },
}

/// Page retrieval as seen by the source parsers.
#[async_trait]
pub trait Fetch: Send {
    async fn fetch(&mut self, url: &str, render: Render<'_>) -> Result<String>;

    /// Dynamic fetch that scrolls to the bottom `max_scrolls` extra times so
    /// infinite-scroll listings load before the markup is captured.
    async fn fetch_with_scroll(
        &mut self,
        url: &str,
        wait_for: Option<&str>,
        max_scrolls: u32,
    ) -> Result<String>;

    /// Static GET decoded as JSON.
    async fn fetch_json(&mut self, url: &str, query: &[(&str, &str)]) -> Result<serde_json::Value>;

    /// Fixed pause between consecutive pages of one source.
    async fn page_pause(&mut self, millis: u64) {
        sleep(Duration::from_millis(millis)).await;
    }

    /// Releases whatever the fetcher holds open. Called once a source is done.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Builds a fresh fetcher for each source run.
pub type FetcherFactory = Box<dyn Fn() -> Result<Box<dyn Fetch>> + Send + Sync>;

/// Factory for [`PageFetcher`]s driving the WebDriver server at `webdriver_url`.
pub fn page_fetchers(webdriver_url: &str) -> FetcherFactory {
    let webdriver_url = webdriver_url.to_string();
    Box::new(move || -> Result<Box<dyn Fetch>> {
        Ok(Box::new(PageFetcher::new(&webdriver_url)?) as Box<dyn Fetch>)
    })
}

/// Fetches pages over HTTP or through a WebDriver-controlled browser.
///
/// The browser session is only started on the first dynamic fetch. Call
/// [`Fetch::close`] when the source is done; a session that is dropped
/// without closing is torn down in the background.
pub struct PageFetcher {
    http: reqwest::Client,
    webdriver_url: String,
    browser: Option<BrowserSession>,
    jitter_ms: RangeInclusive<u64>,
    settle: Duration,
}

impl PageFetcher {
    pub fn new(webdriver_url: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(crate::config::USER_AGENT));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            webdriver_url: webdriver_url.to_string(),
            browser: None,
            jitter_ms: JITTER_MIN_MS..=JITTER_MAX_MS,
            settle: Duration::from_millis(SCROLL_SETTLE_MS),
        })
    }

    /// Overrides the pre-request jitter and post-scroll settle delay.
    #[cfg(test)]
    pub fn with_delays(mut self, jitter_ms: RangeInclusive<u64>, settle: Duration) -> Self {
        self.jitter_ms = jitter_ms;
        self.settle = settle;
        self
    }

    #[cfg(test)]
    pub fn has_browser_session(&self) -> bool {
        self.browser.is_some()
    }

    async fn jitter(&self) {
        let ms = if self.jitter_ms.is_empty() {
            0
        } else {
            rand::thread_rng().gen_range(self.jitter_ms.clone())
        };
        if ms > 0 {
            sleep(Duration::from_millis(ms)).await;
        }
    }

    async fn browser(&mut self) -> Result<fantoccini::Client> {
        if let Some(session) = &self.browser {
            return Ok(session.client.clone());
        }

        info!("[FETCH] starting browser session via {}", self.webdriver_url);
        let client = ClientBuilder::native()
            .capabilities(chrome_capabilities())
            .connect(&self.webdriver_url)
            .await?;
        self.browser = Some(BrowserSession { client: client.clone(), closed: false });
        Ok(client)
    }

    async fn get_static(&self, url: &str) -> Result<String> {
        let resp = self.http.get(url).send().await?.error_for_status()?;
        Ok(resp.text().await?)
    }

    async fn render(&mut self, url: &str, wait_for: Option<&str>, scrolls: u32) -> Result<String> {
        let client = self.browser().await?;
        client.goto(url).await?;

        if let Some(selector) = wait_for {
            let waited = client
                .wait()
                .at_most(Duration::from_secs(FETCH_TIMEOUT_SECS))
                .for_element(Locator::Css(selector))
                .await;
            if let Err(e) = waited {
                warn!("[FETCH] waiting for `{selector}` on {url} failed: {e}");
            }
        }

        for i in 0..scrolls {
            client.execute(SCROLL_TO_BOTTOM_JS, Vec::new()).await?;
            sleep(self.settle).await;
            debug!("[FETCH] scrolled {}/{} on {url}", i + 1, scrolls);
        }

        Ok(client.source().await?)
    }
}

#[async_trait]
impl Fetch for PageFetcher {
    async fn fetch(&mut self, url: &str, render: Render<'_>) -> Result<String> {
        self.jitter().await;
        debug!("[FETCH] {url} ({render:?})");
        match render {
            Render::Static => self.get_static(url).await,
            Render::Dynamic { wait_for } => self.render(url, wait_for, 1).await,
        }
    }

    async fn fetch_with_scroll(
        &mut self,
        url: &str,
        wait_for: Option<&str>,
        max_scrolls: u32,
    ) -> Result<String> {
        self.jitter().await;
        debug!("[FETCH] {url} (dynamic, {max_scrolls} extra scrolls)");
        self.render(url, wait_for, 1 + max_scrolls).await
    }

    async fn fetch_json(&mut self, url: &str, query: &[(&str, &str)]) -> Result<serde_json::Value> {
        self.jitter().await;
        debug!("[FETCH] {url} (json)");
        let resp = self.http.get(url).query(query).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }

    /// Ends the browser session if one was started. Safe to call repeatedly.
    async fn close(&mut self) -> Result<()> {
        match self.browser.take() {
            Some(session) => {
                info!("[FETCH] closing browser session");
                session.close().await
            }
            None => Ok(()),
        }
    }
}

struct BrowserSession {
    client: fantoccini::Client,
    closed: bool,
}

impl BrowserSession {
    async fn close(mut self) -> Result<()> {
        self.closed = true;
        self.client.clone().close().await.map_err(AppError::from)
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("[FETCH] browser session dropped outside a runtime; it will leak");
            return;
        };
        let client = self.client.clone();
        handle.spawn(async move {
            if let Err(e) = client.close().await {
                warn!("[FETCH] background browser close failed: {e}");
            }
        });
    }
}

fn chrome_capabilities() -> serde_json::Map<String, serde_json::Value> {
    let mut caps = serde_json::Map::new();
    caps.insert(
        "goog:chromeOptions".to_string(),
        serde_json::json!({
            "args": [
                "--headless=new",
                "--disable-gpu",
                "--window-size=1920,1080",
                "--disable-dev-shm-usage",
                "--no-sandbox",
                "--disable-blink-features=AutomationControlled",
            ]
        }),
    );
    caps
}
