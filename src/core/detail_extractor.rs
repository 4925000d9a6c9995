//! Season and episode enumeration for a title page

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use scraper::{Html, Selector};
use tracing::{debug, info, instrument};
use url::Url;

use crate::core::models::{AppError, AppResult, Episode, Season, TitleDetail};
use crate::core::page_fetcher::{FetchOptions, PageFetcher};
use crate::core::site::{episode_numbers_of, season_number_of, title_id_of, Site};
use crate::core::title_resolver::collapse_whitespace;

/// What a single rendered title or season page contains
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TitlePage {
    pub heading: Option<String>,
    /// `(season number, absolute URL)`, ascending and unique by number
    pub season_links: Vec<(u32, String)>,
    pub episodes: Vec<Episode>,
    /// Further listing pages of the same season
    pub next_pages: Vec<String>,
}

pub struct DetailExtractor {
    fetcher: Arc<dyn PageFetcher>,
    site: Site,
    timeout: Duration,
    detail_settle: Duration,
    season_settle: Duration,
}

impl DetailExtractor {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        site: Site,
        timeout: Duration,
        detail_settle: Duration,
        season_settle: Duration,
    ) -> Self {
        Self {
            fetcher,
            site,
            timeout,
            detail_settle,
            season_settle,
        }
    }

    /// Enumerate every season and episode of a title. Nothing is cached,
    /// each call renders the pages again.
    #[instrument(skip(self))]
    pub async fn details(&self, title_url: &str) -> AppResult<TitleDetail> {
        let url = Url::parse(title_url.trim()).map_err(|e| {
            AppError::InvalidInput(format!("Invalid title URL {}: {}", title_url, e))
        })?;
        if !self.site.is_title_url(&url) {
            return Err(AppError::NotFound(format!(
                "{} is not a title page on {}",
                url,
                self.site.base_url()
            )));
        }
        let title_url = url.to_string();

        let options = FetchOptions::default()
            .with_timeout(self.timeout)
            .with_settle(self.detail_settle)
            .scroll_to_bottom();
        let rendered = self.fetcher.fetch(&title_url, &options).await?;
        let page = parse_title_page(&rendered.html, &self.site, &title_url);

        if page.heading.is_none() && page.season_links.is_empty() && page.episodes.is_empty() {
            return Err(AppError::NotFound(format!("No title found at {}", title_url)));
        }

        let title = page
            .heading
            .clone()
            .or_else(|| title_from_document(&rendered.html))
            .unwrap_or_else(|| fallback_title(&url));
        info!("Scraping details for: {}", title);

        let seasons = if page.season_links.is_empty() {
            debug!("No season links, treating {} as the only season", title_url);
            let episodes = self.collect_listing(&title_url, page, None).await?;
            group_by_season(episodes)
        } else {
            let mut seasons = Vec::new();
            for (number, season_url) in &page.season_links {
                debug!("Scraping season {}: {}", number, season_url);
                let options = FetchOptions::default()
                    .with_timeout(self.timeout)
                    .with_settle(self.season_settle);
                let rendered = self.fetcher.fetch(season_url, &options).await?;
                let season_page = parse_title_page(&rendered.html, &self.site, season_url);
                let episodes = self
                    .collect_listing(season_url, season_page, Some(*number))
                    .await?;
                if !episodes.is_empty() {
                    seasons.push(Season {
                        season_number: *number,
                        episodes,
                    });
                }
            }
            seasons
        };

        let detail = TitleDetail {
            title,
            url: title_url,
            seasons,
        };
        info!(
            "Found {} seasons with {} episodes",
            detail.seasons.len(),
            detail.episode_count()
        );
        Ok(detail)
    }

    /// Episodes of one listing plus every pagination page reachable from it.
    /// With `season` set, episodes of other seasons are dropped. Each page
    /// URL is fetched at most once, so cyclic pagination terminates.
    async fn collect_listing(
        &self,
        listing_url: &str,
        first: TitlePage,
        season: Option<u32>,
    ) -> AppResult<Vec<Episode>> {
        let mut visited = HashSet::from([listing_url.to_string()]);
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut episodes = Vec::new();

        let mut absorb =
            |page: TitlePage, queue: &mut VecDeque<String>, visited: &mut HashSet<String>| {
                episodes.extend(
                    page.episodes
                        .into_iter()
                        .filter(|e| season.map_or(true, |s| e.season == s)),
                );
                for next in page.next_pages {
                    if visited.insert(next.clone()) {
                        queue.push_back(next);
                    }
                }
            };

        absorb(first, &mut queue, &mut visited);

        while let Some(next_url) = queue.pop_front() {
            debug!("Following listing page {}", next_url);
            let options = FetchOptions::default()
                .with_timeout(self.timeout)
                .with_settle(self.season_settle);
            let rendered = self.fetcher.fetch(&next_url, &options).await?;
            let page = parse_title_page(&rendered.html, &self.site, &next_url);
            absorb(page, &mut queue, &mut visited);
        }

        Ok(sort_unique(episodes))
    }
}

/// Parse one rendered title or season page. `page_url` is the URL the page
/// was fetched from and decides which links count as pagination. Season and
/// episode links of other titles (related or recommended shows) are ignored.
pub fn parse_title_page(html: &str, site: &Site, page_url: &str) -> TitlePage {
    let document = Html::parse_document(html);
    let heading_selector = Selector::parse("h1").expect("valid h1 selector");
    let link_selector = Selector::parse("a[href]").expect("valid link selector");
    let next_selector = Selector::parse("a[rel~='next'][href], link[rel~='next'][href]")
        .expect("valid rel=next selector");

    let heading = document
        .select(&heading_selector)
        .map(|h| collapse_whitespace(&h.text().collect::<String>()))
        .find(|text| !text.is_empty());

    let current = Url::parse(page_url).ok();
    let own_title = title_id_of(page_url);
    let same_title = |absolute: &str| own_title.is_none() || title_id_of(absolute) == own_title;
    let mut seasons = BTreeMap::new();
    let mut episodes = Vec::new();
    let mut next_pages = Vec::new();

    for link in document.select(&link_selector) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };

        let Some(absolute) = site.absolutize(href) else {
            continue;
        };

        if href.contains("/episode/") {
            if let Some((season, number)) = episode_numbers_of(href) {
                if season >= 1 && number >= 1 && same_title(&absolute) {
                    episodes.push(Episode {
                        season,
                        number,
                        url: absolute,
                    });
                }
            }
            continue;
        }

        if href.contains("season") && !absolute.contains('?') && same_title(&absolute) {
            if let Some(number) = season_number_of(&absolute).filter(|n| *n >= 1) {
                seasons.entry(number).or_insert(absolute.clone());
            }
        }

        if let Some(current) = &current {
            if is_pagination_link(current, &absolute) {
                next_pages.push(absolute);
            }
        }
    }

    for link in document.select(&next_selector) {
        if let Some(absolute) = link.value().attr("href").and_then(|h| site.absolutize(h)) {
            if !next_pages.contains(&absolute) && absolute != page_url {
                next_pages.push(absolute);
            }
        }
    }

    TitlePage {
        heading,
        season_links: seasons.into_iter().collect(),
        episodes,
        next_pages,
    }
}

/// Same path as the current listing, different `page` query value
fn is_pagination_link(current: &Url, candidate: &str) -> bool {
    let Ok(candidate) = Url::parse(candidate) else {
        return false;
    };
    if candidate.host_str() != current.host_str() || candidate.path() != current.path() {
        return false;
    }
    let page_of = |url: &Url| {
        url.query_pairs()
            .find(|(key, _)| key == "page")
            .map(|(_, value)| value.into_owned())
    };
    match page_of(&candidate) {
        Some(page) => page_of(current).as_deref() != Some(page.as_str()),
        None => false,
    }
}

fn title_from_document(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").expect("valid title selector");
    document
        .select(&selector)
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .find(|text| !text.is_empty())
}

fn fallback_title(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|slug| slug.replace('-', " "))
        .unwrap_or_else(|| url.to_string())
}

/// Ascending by (season, number), first occurrence kept
fn sort_unique(episodes: Vec<Episode>) -> Vec<Episode> {
    let mut seen = BTreeSet::new();
    let mut unique: Vec<Episode> = episodes
        .into_iter()
        .filter(|e| seen.insert((e.season, e.number)))
        .collect();
    unique.sort_by_key(|e| (e.season, e.number));
    unique
}

/// Single-season titles still group episodes under their own season number
fn group_by_season(episodes: Vec<Episode>) -> Vec<Season> {
    let mut grouped: BTreeMap<u32, Vec<Episode>> = BTreeMap::new();
    for episode in episodes {
        grouped.entry(episode.season).or_default().push(episode);
    }
    grouped
        .into_iter()
        .map(|(season_number, episodes)| Season {
            season_number,
            episodes,
        })
        .collect()
}
