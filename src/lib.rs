//! animecix downloader - core library
//!
//! Scrapes titles, seasons and episodes from animecix.tv, resolves each
//! episode's video source and downloads whole titles in the background.
//! [`AnimeService`] is the boundary the binary (or any server) talks to.

pub mod core;
pub mod utils;

// Re-export commonly used types
pub use crate::core::{
    browser::ChromiumFetcher,
    config::AppConfig,
    detail_extractor::DetailExtractor,
    downloader::{HttpDownloader, MediaDownloader},
    manager::DownloadManager,
    models::{
        AppError, AppResult, DownloadTask, Episode, EpisodeResult, EpisodeStatus, SearchResult,
        Season, SubmitResponse, TaskStatus, TaskStatusReport, TaskSummary, TitleDetail,
    },
    page_fetcher::PageFetcher,
    registry::{InMemoryTaskRegistry, TaskRegistry},
    title_resolver::TitleResolver,
    video_resolver::VideoResolver,
};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::core::downloader::DownloaderConfig;
use crate::core::error_handling::RetryPolicy;
use crate::core::manager::ManagerSettings;
use crate::core::site::Site;
use crate::core::task_store::TaskStore;

/// Search, details and background downloads behind one handle
#[derive(Clone)]
pub struct AnimeService {
    config: Arc<AppConfig>,
    titles: Arc<TitleResolver>,
    details: Arc<DetailExtractor>,
    manager: DownloadManager,
}

impl AnimeService {
    /// Production wiring: headless Chromium, HTTP downloads, in-memory
    /// registry
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let fetcher = Arc::new(ChromiumFetcher::new(config.scraper.clone()));
        let downloader = HttpDownloader::new(DownloaderConfig::from(&config.download))
            .context("Failed to create HTTP downloader")?;
        Self::with_components(
            config,
            fetcher,
            Arc::new(downloader),
            Arc::new(InMemoryTaskRegistry::new()),
        )
    }

    /// Wire the service around caller-supplied collaborators
    pub fn with_components(
        config: AppConfig,
        fetcher: Arc<dyn PageFetcher>,
        downloader: Arc<dyn MediaDownloader>,
        registry: Arc<dyn TaskRegistry>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let site = Site::new(&config.scraper.base_url)?;
        let scraper = &config.scraper;
        let timeout = scraper.navigation_timeout();

        let titles = Arc::new(TitleResolver::new(
            fetcher.clone(),
            site.clone(),
            timeout,
            Duration::from_millis(scraper.season_settle_ms),
        ));
        let details = Arc::new(DetailExtractor::new(
            fetcher.clone(),
            site,
            timeout,
            Duration::from_millis(scraper.detail_settle_ms),
            Duration::from_millis(scraper.season_settle_ms),
        ));
        let resolver = Arc::new(VideoResolver::new(
            fetcher,
            timeout,
            Duration::from_millis(scraper.player_settle_ms),
            scraper.video_capture_timeout(),
            scraper.user_agent.clone(),
        ));

        let settings = ManagerSettings {
            output_dir: PathBuf::from(&config.download.output_directory),
            retry_policy: RetryPolicy {
                base_delay: Duration::from_millis(config.download.retry_base_delay_ms),
                ..RetryPolicy::with_attempts(config.download.episode_attempts)
            },
        };
        let manager = DownloadManager::new(
            details.clone(),
            resolver,
            downloader,
            registry,
            TaskStore::new(&config.download.records_directory),
            settings,
        );

        Ok(Self {
            config: Arc::new(config),
            titles,
            details,
            manager,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn search(&self, query: &str) -> AppResult<Vec<SearchResult>> {
        self.titles.search(query).await
    }

    /// Seasons and episodes of a title, without resolving videos
    pub async fn details(&self, url: &str) -> AppResult<TitleDetail> {
        self.details.details(url).await
    }

    /// Start downloading every episode of a title. Must be called inside a
    /// tokio runtime.
    pub fn submit_download(&self, anime_url: &str) -> AppResult<SubmitResponse> {
        let task_id = self.manager.submit(anime_url)?;
        Ok(SubmitResponse {
            task_id,
            message: "Download started in background".to_string(),
        })
    }

    pub async fn get_status(&self, task_id: &str) -> AppResult<TaskStatusReport> {
        self.manager.get_status(task_id).await.map(Into::into)
    }

    pub fn cancel_download(&self, task_id: &str) -> AppResult<()> {
        self.manager.cancel(task_id)
    }

    pub fn list_downloads(&self) -> Vec<TaskStatusReport> {
        self.manager
            .list_tasks()
            .into_iter()
            .map(Into::into)
            .collect()
    }

    /// Stop all background work and forget every task
    pub fn shutdown(&self) {
        self.manager.shutdown();
    }
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize logging with default settings
pub fn init() -> anyhow::Result<()> {
    utils::logging::init_tracing();
    tracing::info!("📚 {} v{} initialized", NAME, VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        assert!(init().is_ok());
    }

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert_eq!(NAME, "animecix-downloader");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = AppConfig::default();
        config.scraper.base_url = "nope".to_string();
        assert!(AnimeService::new(config).is_err());
    }
}
