//! Page fetching contract
//!
//! Everything that needs a rendered page goes through [`PageFetcher`]. The
//! extractors only see [`RenderedPage`]; which engine produced it (headless
//! Chromium in production, canned HTML in tests) is invisible to them.

use std::time::Duration;

use async_trait::async_trait;

use crate::core::models::AppResult;

/// State the page must reach before its content is returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitCondition {
    /// Document finished loading
    Load,
    /// A CSS selector must match at least one element before the timeout
    Selector(String),
}

/// Per-fetch knobs
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub wait_for: WaitCondition,
    /// Overall deadline for navigation and waits
    pub timeout: Duration,
    /// Extra time for client-side scripts after the wait condition holds
    pub settle: Duration,
    pub scroll_to_bottom: bool,
    /// Candidate selectors; the first one present on the page is clicked
    pub click: Vec<String>,
    /// Request URLs containing any of these substrings are recorded
    pub capture_media: Vec<String>,
    /// How long to watch the network for a matching request
    pub capture_window: Duration,
    pub user_agent: Option<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            wait_for: WaitCondition::Load,
            timeout: Duration::from_secs(30),
            settle: Duration::ZERO,
            scroll_to_bottom: false,
            click: Vec::new(),
            capture_media: Vec::new(),
            capture_window: Duration::ZERO,
            user_agent: None,
        }
    }
}

impl FetchOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn wait_for_selector(mut self, selector: impl Into<String>) -> Self {
        self.wait_for = WaitCondition::Selector(selector.into());
        self
    }

    pub fn scroll_to_bottom(mut self) -> Self {
        self.scroll_to_bottom = true;
        self
    }

    pub fn click_first_of<I, S>(mut self, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.click = selectors.into_iter().map(Into::into).collect();
        self
    }

    pub fn capture_requests<I, S>(mut self, patterns: I, window: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capture_media = patterns.into_iter().map(Into::into).collect();
        self.capture_window = window;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// True when `url` contains one of the capture patterns
    pub fn is_capture_match(&self, url: &str) -> bool {
        self.capture_media.iter().any(|pattern| url.contains(pattern))
    }
}

/// Result of rendering a page
#[derive(Debug, Clone, Default)]
pub struct RenderedPage {
    /// Final URL after redirects
    pub url: String,
    /// Serialized DOM after scripts ran
    pub html: String,
    /// Matching network requests in the order they were issued
    pub media_requests: Vec<String>,
}

/// Renders pages. Implementations own their browser sessions and must
/// release them on every exit path.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> AppResult<RenderedPage>;
}
