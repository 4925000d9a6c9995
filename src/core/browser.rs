//! Headless Chromium implementation of [`PageFetcher`]
//!
//! Every fetch launches its own browser, renders one page and shuts the
//! browser down again. Sessions are never shared, so concurrent download
//! tasks cannot interfere with each other's pages.

use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{EnableParams, EventRequestWillBeSent};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, instrument, warn};

use crate::core::config::ScraperConfig;
use crate::core::models::{AppError, AppResult};
use crate::core::page_fetcher::{FetchOptions, PageFetcher, RenderedPage, WaitCondition};

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

fn fetch_error(context: &str, err: impl Display) -> AppError {
    AppError::Fetch(format!("{}: {}", context, err))
}

/// A launched browser plus the task driving its CDP connection
struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    async fn launch(config: &ScraperConfig, user_agent: &str) -> AppResult<Self> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .request_timeout(config.navigation_timeout())
            .arg(format!("--user-agent={}", user_agent))
            .arg("--mute-audio");
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &config.chrome_executable {
            builder = builder.chrome_executable(path);
        }

        let browser_config = builder
            .build()
            .map_err(|e| fetch_error("Invalid browser configuration", e))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| fetch_error("Failed to launch browser", e))?;

        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });

        Ok(Self { browser, handler })
    }

    /// Shut the browser down. Dropping `Browser` also kills the child
    /// process, which covers panics and cancelled futures.
    async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser cleanly: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            warn!("Failed to reap browser process: {}", e);
        }
        self.handler.abort();
    }
}

/// [`PageFetcher`] backed by chromiumoxide
#[derive(Debug, Clone)]
pub struct ChromiumFetcher {
    config: ScraperConfig,
}

impl ChromiumFetcher {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }

    async fn render(
        &self,
        browser: &Browser,
        url: &str,
        options: &FetchOptions,
    ) -> AppResult<RenderedPage> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| fetch_error("Failed to open page", e))?;

        let result = self.render_on(&page, url, options).await;

        if let Err(e) = page.close().await {
            debug!("Failed to close page for {}: {}", url, e);
        }
        result
    }

    async fn render_on(
        &self,
        page: &Page,
        url: &str,
        options: &FetchOptions,
    ) -> AppResult<RenderedPage> {
        let (media_tx, mut media_rx) = mpsc::unbounded_channel::<String>();
        let collector = if options.capture_media.is_empty() {
            None
        } else {
            page.execute(EnableParams::default())
                .await
                .map_err(|e| fetch_error("Failed to enable network events", e))?;
            let mut requests = page
                .event_listener::<EventRequestWillBeSent>()
                .await
                .map_err(|e| fetch_error("Failed to listen for requests", e))?;
            let patterns = options.clone();
            Some(tokio::spawn(async move {
                while let Some(event) = requests.next().await {
                    let request_url = &event.request.url;
                    if patterns.is_capture_match(request_url) {
                        debug!("Video candidate found: {}", request_url);
                        if media_tx.send(request_url.clone()).is_err() {
                            break;
                        }
                    }
                }
            }))
        };

        let outcome = self.drive(page, url, options, &mut media_rx).await;

        if let Some(collector) = collector {
            collector.abort();
        }
        outcome
    }

    async fn drive(
        &self,
        page: &Page,
        url: &str,
        options: &FetchOptions,
        media_rx: &mut mpsc::UnboundedReceiver<String>,
    ) -> AppResult<RenderedPage> {
        page.goto(url)
            .await
            .map_err(|e| fetch_error(&format!("Navigation to {} failed", url), e))?;

        if let WaitCondition::Selector(selector) = &options.wait_for {
            wait_for_selector(page, selector, options.timeout).await?;
        }

        if options.scroll_to_bottom {
            if let Err(e) = page
                .evaluate("window.scrollTo(0, document.body.scrollHeight)")
                .await
            {
                debug!("Scroll failed on {}: {}", url, e);
            }
        }

        if !options.settle.is_zero() {
            sleep(options.settle).await;
        }

        click_first_present(page, &options.click).await;

        let mut media_requests = Vec::new();
        if !options.capture_media.is_empty() {
            if let Ok(Some(first)) = timeout(options.capture_window, media_rx.recv()).await {
                media_requests.push(first);
            }
            while let Ok(more) = media_rx.try_recv() {
                media_requests.push(more);
            }
        }

        let html = page
            .content()
            .await
            .map_err(|e| fetch_error("Failed to read page content", e))?;
        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());

        Ok(RenderedPage {
            url: final_url,
            html,
            media_requests,
        })
    }
}

async fn wait_for_selector(page: &Page, selector: &str, limit: Duration) -> AppResult<()> {
    let deadline = Instant::now() + limit;
    loop {
        if page.find_element(selector).await.is_ok() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(AppError::Fetch(format!(
                "Page did not reach expected state: `{}` never appeared",
                selector
            )));
        }
        sleep(SELECTOR_POLL_INTERVAL).await;
    }
}

/// Click the first selector that matches. Overlays sometimes intercept real
/// mouse events, so a script click is used as fallback.
async fn click_first_present(page: &Page, selectors: &[String]) {
    for selector in selectors {
        let Ok(element) = page.find_element(selector.as_str()).await else {
            continue;
        };
        debug!("Clicking {}", selector);
        if let Err(e) = element.click().await {
            debug!("Mouse click on {} failed ({}), using script click", selector, e);
            let script = format!("document.querySelector({:?})?.click()", selector);
            if let Err(e) = page.evaluate(script).await {
                warn!("Error clicking {}: {}", selector, e);
            }
        }
        return;
    }
    if !selectors.is_empty() {
        debug!("None of the click targets were present: {:?}", selectors);
    }
}

#[async_trait]
impl PageFetcher for ChromiumFetcher {
    #[instrument(skip(self, options), fields(capture = !options.capture_media.is_empty()))]
    async fn fetch(&self, url: &str, options: &FetchOptions) -> AppResult<RenderedPage> {
        let user_agent = options
            .user_agent
            .as_deref()
            .unwrap_or(&self.config.user_agent);
        let session = BrowserSession::launch(&self.config, user_agent).await?;

        let budget = options.timeout + options.settle + options.capture_window;
        let result = timeout(budget, self.render(&session.browser, url, options)).await;

        session.close().await;

        match result {
            Ok(rendered) => rendered,
            Err(_) => Err(AppError::Fetch(format!(
                "Timed out after {:?} rendering {}",
                budget, url
            ))),
        }
    }
}
