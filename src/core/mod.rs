//! Core business logic module
//!
//! Domain models, the scrape pipeline (fetch, search, details, video
//! resolution) and the background download orchestration.

pub mod browser;
pub mod config;
pub mod detail_extractor;
pub mod downloader;
pub mod error_handling;
pub mod m3u8_downloader;
pub mod manager;
pub mod models;
pub mod page_fetcher;
pub mod registry;
pub mod site;
pub mod task_store;
pub mod title_resolver;
pub mod video_resolver;

#[cfg(test)]
pub(crate) mod test_support;



// Re-export commonly used types
pub use config::AppConfig;
pub use manager::DownloadManager;
