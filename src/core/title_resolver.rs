//! Title search
//!
//! Renders the site's search page and turns every title card link into a
//! [`SearchResult`], in page order.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

use crate::core::models::{AppError, AppResult, SearchResult};
use crate::core::page_fetcher::{FetchOptions, PageFetcher};
use crate::core::site::{episode_numbers_of, season_number_of, Site};

/// Resolves free-text queries to canonical title URLs
pub struct TitleResolver {
    fetcher: Arc<dyn PageFetcher>,
    site: Site,
    timeout: Duration,
    settle: Duration,
}

impl TitleResolver {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        site: Site,
        timeout: Duration,
        settle: Duration,
    ) -> Self {
        Self {
            fetcher,
            site,
            timeout,
            settle,
        }
    }

    pub async fn search(&self, query: &str) -> AppResult<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::InvalidInput("Search query cannot be empty".into()));
        }

        let search_url = self.site.search_url(query);
        info!("Searching for: {}", search_url);

        let options = FetchOptions::default()
            .with_timeout(self.timeout)
            .with_settle(self.settle);
        let page = self.fetcher.fetch(&search_url, &options).await?;

        let results = parse_search_results(&page.html, &self.site);
        debug!("{} results for '{}'", results.len(), query);
        Ok(results)
    }
}

/// Extract title links from a rendered search page
pub fn parse_search_results(html: &str, site: &Site) -> Vec<SearchResult> {
    let document = Html::parse_document(html);
    let link_selector = Selector::parse("a[href*='/titles/']").expect("valid link selector");

    let mut seen = HashSet::new();
    let mut results = Vec::new();

    for link in document.select(&link_selector) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        // Season and episode links point inside a title, not at one
        if episode_numbers_of(href).is_some() || season_number_of(href).is_some() {
            continue;
        }
        let Some(url) = site.absolutize(href) else {
            continue;
        };
        if seen.contains(&url) {
            continue;
        }
        let Some(title) = link_title(&link) else {
            debug!("Skipping title link without a name: {}", url);
            continue;
        };

        seen.insert(url.clone());
        results.push(SearchResult { title, url });
    }

    results
}

/// Link text, falling back to the poster image's alt or title attribute
fn link_title(link: &ElementRef<'_>) -> Option<String> {
    let text = collapse_whitespace(&link.text().collect::<String>());
    if !text.is_empty() {
        return Some(text);
    }

    let img_selector = Selector::parse("img").expect("valid img selector");
    let img = link.select(&img_selector).next()?;
    ["alt", "title"]
        .iter()
        .filter_map(|attr| img.value().attr(attr))
        .map(collapse_whitespace)
        .find(|value| !value.is_empty())
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
