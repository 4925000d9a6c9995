//! Episode page to direct video URL
//!
//! The player only requests its media after a user gesture, so the page is
//! rendered, the play button is clicked and the network is watched for the
//! first `.mp4`/`.m3u8` request. If nothing is observed the rendered DOM is
//! searched instead.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument, warn};

use crate::core::models::{AppError, AppResult};
use crate::core::page_fetcher::{FetchOptions, PageFetcher, RenderedPage};

/// Play controls, tried in this order
pub const PLAY_SELECTORS: [&str; 3] = [".play-button-animation", ".vjs-big-play-button", "video"];

/// Substrings identifying media requests
pub const MEDIA_PATTERNS: [&str; 2] = [".mp4", ".m3u8"];

fn media_url_pattern() -> &'static Regex {
    static MEDIA_URL: OnceLock<Regex> = OnceLock::new();
    MEDIA_URL.get_or_init(|| {
        Regex::new(r#"https?://[^\s"'<>\\]+?\.(?:mp4|m3u8)(?:\?[^\s"'<>\\]*)?"#)
            .expect("valid media url regex")
    })
}

pub struct VideoResolver {
    fetcher: Arc<dyn PageFetcher>,
    timeout: Duration,
    settle: Duration,
    capture_window: Duration,
    user_agent: String,
}

impl VideoResolver {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        timeout: Duration,
        settle: Duration,
        capture_window: Duration,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            timeout,
            settle,
            capture_window,
            user_agent: user_agent.into(),
        }
    }

    /// Resolve the playable video URL of an episode page. Does not retry.
    #[instrument(skip(self))]
    pub async fn resolve(&self, episode_url: &str) -> AppResult<String> {
        let options = FetchOptions::default()
            .with_timeout(self.timeout)
            .with_settle(self.settle)
            .with_user_agent(self.user_agent.clone())
            .click_first_of(PLAY_SELECTORS)
            .capture_requests(MEDIA_PATTERNS, self.capture_window);

        let page = self.fetcher.fetch(episode_url, &options).await?;

        match extract_video_url(&page) {
            Some(video_url) => {
                info!("Video source: {}", video_url);
                Ok(video_url)
            }
            None => {
                warn!("No video source on {}", episode_url);
                Err(AppError::Resolution(format!(
                    "No video source found on {}",
                    episode_url
                )))
            }
        }
    }
}

/// First captured media request, then the player element, then any media
/// URL in the markup
pub fn extract_video_url(page: &RenderedPage) -> Option<String> {
    if let Some(captured) = page.media_requests.first() {
        debug!("Using captured request");
        return Some(captured.clone());
    }

    let document = Html::parse_document(&page.html);
    let selector = Selector::parse("video[src], video source[src]").expect("valid video selector");
    let from_player = document
        .select(&selector)
        .filter_map(|element| element.value().attr("src"))
        .map(str::trim)
        .filter(|src| !src.is_empty() && !src.starts_with("blob:"))
        .find_map(|src| absolutize_against(&page.url, src));
    if from_player.is_some() {
        debug!("Using video element src");
        return from_player;
    }

    media_url_pattern()
        .find(&page.html)
        .map(|m| m.as_str().replace("&amp;", "&"))
}

fn absolutize_against(page_url: &str, src: &str) -> Option<String> {
    match url::Url::parse(src) {
        Ok(url) => Some(url.to_string()),
        Err(_) => url::Url::parse(page_url)
            .and_then(|base| base.join(src))
            .map(|url| url.to_string())
            .ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::StaticPageFetcher;

    const EPISODE_URL: &str = "https://animecix.tv/titles/25/season/1/episode/1";

    fn page(html: &str, captured: &[&str]) -> RenderedPage {
        RenderedPage {
            url: EPISODE_URL.to_string(),
            html: html.to_string(),
            media_requests: captured.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_captured_request_wins() {
        let page = page(
            r#"<video src="https://cdn.example/dom.mp4"></video>"#,
            &["https://cdn.example/hls/master.m3u8", "https://cdn.example/other.mp4"],
        );
        assert_eq!(
            extract_video_url(&page).as_deref(),
            Some("https://cdn.example/hls/master.m3u8")
        );
    }

    #[test]
    fn test_video_element_fallback_skips_blob() {
        let page = page(
            r#"<video src="blob:https://animecix.tv/1234"></video>
               <video><source src="/media/ep1.mp4" type="video/mp4"></video>"#,
            &[],
        );
        assert_eq!(
            extract_video_url(&page).as_deref(),
            Some("https://animecix.tv/media/ep1.mp4")
        );
    }

    #[test]
    fn test_markup_fallback() {
        let page = page(
            r#"<script>var player = {file: "https://cdn.example/v/ep1.m3u8?token=a&amp;e=1"};</script>"#,
            &[],
        );
        assert_eq!(
            extract_video_url(&page).as_deref(),
            Some("https://cdn.example/v/ep1.m3u8?token=a&e=1")
        );
    }

    #[test]
    fn test_nothing_found() {
        assert!(extract_video_url(&page("<div>Video yok</div>", &[])).is_none());
    }

    #[tokio::test]
    async fn test_resolve_reports_resolution_error() {
        let fetcher = Arc::new(StaticPageFetcher::new());
        fetcher.add_page(EPISODE_URL, "<div class='player'></div>");
        let resolver = VideoResolver::new(
            fetcher,
            Duration::from_secs(1),
            Duration::ZERO,
            Duration::ZERO,
            "test-agent",
        );

        let result = resolver.resolve(EPISODE_URL).await;
        assert!(matches!(result, Err(AppError::Resolution(_))));
    }

    #[tokio::test]
    async fn test_resolve_uses_captured_media() {
        let fetcher = Arc::new(StaticPageFetcher::new());
        fetcher.add_capture(EPISODE_URL, "<div></div>", &["https://cdn.example/ep1.mp4"]);
        let resolver = VideoResolver::new(
            fetcher.clone(),
            Duration::from_secs(1),
            Duration::ZERO,
            Duration::ZERO,
            "test-agent",
        );

        assert_eq!(
            resolver.resolve(EPISODE_URL).await.unwrap(),
            "https://cdn.example/ep1.mp4"
        );
        let options = fetcher.last_options().unwrap();
        assert_eq!(options.click, PLAY_SELECTORS.to_vec());
        assert_eq!(options.user_agent.as_deref(), Some("test-agent"));
    }
}
