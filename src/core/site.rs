//! URL layout of the target site

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

use crate::core::models::{AppError, AppResult};

/// `/season/<n>` at the end of a path
fn season_path() -> &'static Regex {
    static SEASON_PATH: OnceLock<Regex> = OnceLock::new();
    SEASON_PATH.get_or_init(|| Regex::new(r"/season/(\d+)/?$").expect("valid season regex"))
}

/// `/season/<s>/episode/<n>` anywhere in a path
fn episode_path() -> &'static Regex {
    static EPISODE_PATH: OnceLock<Regex> = OnceLock::new();
    EPISODE_PATH
        .get_or_init(|| Regex::new(r"/season/(\d+)/episode/(\d+)").expect("valid episode regex"))
}

/// Base URL plus the helpers every extractor needs to build and recognize
/// site URLs
#[derive(Debug, Clone)]
pub struct Site {
    base: Url,
}

impl Site {
    pub fn new(base_url: &str) -> AppResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| AppError::Config(format!("Invalid base URL {}: {}", base_url, e)))?;
        Ok(Self { base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `https://animecix.tv/search?q=<query>`
    pub fn search_url(&self, query: &str) -> String {
        let mut url = self.base.clone();
        url.set_path("/search");
        url.query_pairs_mut().clear().append_pair("q", query);
        url.to_string()
    }

    /// Resolve a possibly relative href against the site root. Fragments
    /// are dropped so the same page always maps to one URL.
    pub fn absolutize(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() || href.starts_with("javascript:") || href.starts_with('#') {
            return None;
        }
        let mut url = self.base.join(href).ok()?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return None;
        }
        url.set_fragment(None);
        Some(url.to_string())
    }

    /// Same host as the configured base
    pub fn is_on_site(&self, url: &Url) -> bool {
        url.host_str() == self.base.host_str()
    }

    /// A canonical title page: `/titles/<id>/...` that is not itself an
    /// episode page
    pub fn is_title_url(&self, url: &Url) -> bool {
        self.is_on_site(url)
            && url.path().starts_with("/titles/")
            && !url.path().contains("/episode/")
    }
}

/// Season number of a season overview URL
pub fn season_number_of(url: &str) -> Option<u32> {
    let path = Url::parse(url).map(|u| u.path().to_string()).unwrap_or_else(|_| url.to_string());
    season_path()
        .captures(&path)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Numeric id of any `/titles/<id>/...` URL
pub fn title_id_of(url: &str) -> Option<u64> {
    let url = Url::parse(url).ok()?;
    let mut segments = url.path_segments()?;
    if segments.next()? != "titles" {
        return None;
    }
    segments.next()?.parse().ok()
}

/// `(season, episode)` of an episode URL
pub fn episode_numbers_of(href: &str) -> Option<(u32, u32)> {
    let caps = episode_path().captures(href)?;
    let season = caps.get(1)?.as_str().parse().ok()?;
    let number = caps.get(2)?.as_str().parse().ok()?;
    Some((season, number))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> Site {
        Site::new("https://animecix.tv").unwrap()
    }

    #[test]
    fn test_search_url_encodes_query() {
        assert_eq!(
            site().search_url("shingeki no"),
            "https://animecix.tv/search?q=shingeki+no"
        );
    }

    #[test]
    fn test_absolutize() {
        let site = site();
        assert_eq!(
            site.absolutize("/titles/25/shingeki-no-kyojin").as_deref(),
            Some("https://animecix.tv/titles/25/shingeki-no-kyojin")
        );
        assert_eq!(
            site.absolutize("titles/25/x#top").as_deref(),
            Some("https://animecix.tv/titles/25/x")
        );
        assert_eq!(
            site.absolutize("https://other.example/a").as_deref(),
            Some("https://other.example/a")
        );
        assert!(site.absolutize("javascript:void(0)").is_none());
        assert!(site.absolutize("").is_none());
    }

    #[test]
    fn test_title_url_recognition() {
        let site = site();
        let ok = Url::parse("https://animecix.tv/titles/25/shingeki-no-kyojin").unwrap();
        let episode = Url::parse("https://animecix.tv/titles/25/season/1/episode/3").unwrap();
        let foreign = Url::parse("https://example.com/titles/25/x").unwrap();
        assert!(site.is_title_url(&ok));
        assert!(!site.is_title_url(&episode));
        assert!(!site.is_title_url(&foreign));
    }

    #[test]
    fn test_number_extraction() {
        assert_eq!(
            season_number_of("https://animecix.tv/titles/25/shingeki-no-kyojin/season/4"),
            Some(4)
        );
        assert_eq!(season_number_of("/titles/25/x/season/12"), Some(12));
        assert_eq!(season_number_of("/titles/25/x/season/1/episode/2"), None);
        assert_eq!(
            episode_numbers_of("/titles/25/season/4/episode/17"),
            Some((4, 17))
        );
        assert_eq!(episode_numbers_of("/titles/25/season/4"), None);
    }

    #[test]
    fn test_title_id_extraction() {
        assert_eq!(
            title_id_of("https://animecix.tv/titles/25/shingeki-no-kyojin/season/2"),
            Some(25)
        );
        assert_eq!(title_id_of("https://animecix.tv/titles/30/season/1/episode/1"), Some(30));
        assert_eq!(title_id_of("https://animecix.tv/search?q=x"), None);
        assert_eq!(title_id_of("/titles/25/x"), None);
    }
}
