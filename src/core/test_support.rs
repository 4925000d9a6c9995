//! In-memory collaborators shared by the unit and orchestrator tests

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::downloader::MediaDownloader;
use crate::core::models::{AppError, AppResult};
use crate::core::page_fetcher::{FetchOptions, PageFetcher, RenderedPage};

/// Serves canned pages by URL. Unknown URLs fail with [`AppError::Fetch`].
#[derive(Default)]
pub struct StaticPageFetcher {
    pages: Mutex<HashMap<String, RenderedPage>>,
    failures: Mutex<HashMap<String, String>>,
    panics: Mutex<HashSet<String>>,
    delay: Mutex<Duration>,
    fetched: Mutex<Vec<String>>,
    last_options: Mutex<Option<FetchOptions>>,
    count: AtomicUsize,
}

impl StaticPageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_page(&self, url: &str, html: &str) {
        self.add_capture(url, html, &[]);
    }

    /// Page whose rendering also observes the given media requests
    pub fn add_capture(&self, url: &str, html: &str, media_requests: &[&str]) {
        self.pages.lock().unwrap().insert(
            url.to_string(),
            RenderedPage {
                url: url.to_string(),
                html: html.to_string(),
                media_requests: media_requests.iter().map(|s| s.to_string()).collect(),
            },
        );
    }

    pub fn fail_url(&self, url: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(url.to_string(), message.to_string());
    }

    pub fn panic_on(&self, url: &str) {
        self.panics.lock().unwrap().insert(url.to_string());
    }

    /// Delay applied to every fetch
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn fetch_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn fetched_urls(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn last_options(&self) -> Option<FetchOptions> {
        self.last_options.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for StaticPageFetcher {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> AppResult<RenderedPage> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.fetched.lock().unwrap().push(url.to_string());
        *self.last_options.lock().unwrap() = Some(options.clone());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.panics.lock().unwrap().contains(url) {
            panic!("renderer crashed on {}", url);
        }
        if let Some(message) = self.failures.lock().unwrap().get(url) {
            return Err(AppError::Fetch(message.clone()));
        }
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::Fetch(format!("no page for {}", url)))
    }
}

/// Writes a few bytes per video URL instead of downloading
#[derive(Default)]
pub struct RecordingDownloader {
    failures: Mutex<HashSet<String>>,
    downloaded: Mutex<Vec<String>>,
}

impl RecordingDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, video_url: &str) {
        self.failures.lock().unwrap().insert(video_url.to_string());
    }

    pub fn downloaded(&self) -> Vec<String> {
        self.downloaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaDownloader for RecordingDownloader {
    async fn download(&self, video_url: &str, destination: &Path) -> AppResult<u64> {
        if self.failures.lock().unwrap().contains(video_url) {
            return Err(AppError::Download(format!("HTTP错误: 404 ({})", video_url)));
        }
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = video_url.as_bytes();
        tokio::fs::write(destination, body).await?;
        self.downloaded.lock().unwrap().push(video_url.to_string());
        Ok(body.len() as u64)
    }
}

pub const TITLE_URL: &str = "https://animecix.tv/titles/25/re-zero";

/// Episode page URL of the seeded title
pub fn episode_url(season: u32, number: u32) -> String {
    format!(
        "https://animecix.tv/titles/25/season/{}/episode/{}",
        season, number
    )
}

/// Video URL the seeded episode pages expose
pub fn video_url(season: u32, number: u32) -> String {
    format!("https://cdn.example/rz/s{}e{}.mp4", season, number)
}

/// Fetcher holding a two-season title with two episodes each, plus a
/// search page for "re zero"
pub fn seeded_fetcher() -> std::sync::Arc<StaticPageFetcher> {
    let fetcher = std::sync::Arc::new(StaticPageFetcher::new());
    fetcher.add_page(
        "https://animecix.tv/search?q=re+zero",
        r#"<a href="/titles/25/re-zero"><img alt="Re:Zero kara Hajimeru Isekai Seikatsu"></a>"#,
    );
    fetcher.add_page(
        TITLE_URL,
        r#"<h1>Re:Zero kara Hajimeru Isekai Seikatsu</h1>
           <a href="/titles/25/re-zero/season/2">Sezon 2</a>
           <a href="/titles/25/re-zero/season/1">Sezon 1</a>"#,
    );
    for season in 1..=2 {
        let links: String = (1..=2)
            .rev()
            .map(|n| format!(r#"<a href="/titles/25/season/{}/episode/{}">{}</a>"#, season, n, n))
            .collect();
        fetcher.add_page(&format!("{}/season/{}", TITLE_URL, season), &links);
        for number in 1..=2 {
            fetcher.add_capture(
                &episode_url(season, number),
                "<div class='player'></div>",
                &[video_url(season, number).as_str()],
            );
        }
    }
    fetcher
}
