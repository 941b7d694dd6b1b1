//! Race catalog fetcher: crawls the paginated race listing.

use std::collections::HashSet;
use std::fmt::Display;

use crate::config::{Config, FetchConfig};
use crate::parser::{parse_race_catalog, race_listing_url};
use crate::scraper::{PageSource, ScraperError, WebScraper, fetch_with_retry};
use crate::store::{self, StoreError};
use crate::types::Race;
use crate::utils::CatalogStats;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    Scraper(#[from] ScraperError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Default)]
pub struct CatalogReport {
    pub pages_fetched: u32,
    pub pages_failed: u32,
    pub cards_skipped: usize,
    pub duplicates: usize,
    pub stats: CatalogStats,
}

impl Display for CatalogReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Fetched {} listing page(s), {} failed; {} card(s) skipped, {} duplicate(s) dropped",
            self.pages_fetched, self.pages_failed, self.cards_skipped, self.duplicates
        )?;
        write!(f, "{}", self.stats)
    }
}

/// Walks listing pages until one has no next link, `max_pages` is reached
/// or too many pages in a row fail. Races are deduplicated by URL, first
/// occurrence winning.
pub async fn fetch_catalog(
    source: &dyn PageSource,
    config: &FetchConfig,
) -> (Vec<Race>, CatalogReport) {
    let policy = config.retry_policy();
    let mut report = CatalogReport::default();
    let mut races = Vec::new();
    let mut seen = HashSet::new();
    let mut consecutive_failures = 0;

    for page in 1..=config.max_pages {
        let url = race_listing_url(&config.base_url, page);
        log::info!("Fetching race listing page {}...", page);

        let html = match fetch_with_retry(source, &policy, &url).await {
            Ok(html) => html,
            Err(e) => {
                report.pages_failed += 1;
                consecutive_failures += 1;
                log::warn!("Skipping listing page {}: {}", page, e);
                if consecutive_failures >= config.max_consecutive_failures {
                    log::error!(
                        "Stopping crawl after {} consecutive failed pages",
                        consecutive_failures
                    );
                    break;
                }
                continue;
            }
        };
        consecutive_failures = 0;
        report.pages_fetched += 1;

        let listing = parse_race_catalog(&html, &config.base_url);
        report.cards_skipped += listing.skipped;
        for race in listing.races {
            if seen.insert(race.url.clone()) {
                races.push(race);
            } else {
                report.duplicates += 1;
            }
        }

        if !listing.has_next {
            break;
        }
    }

    report.stats = CatalogStats::from_races(&races);
    log::info!("Found {} race(s)", races.len());
    (races, report)
}

/// Crawls the live listing and writes the catalog file.
pub async fn run(config: &Config) -> Result<CatalogReport, CatalogError> {
    let scraper = WebScraper::new(&config.fetch)?;
    let (races, report) = fetch_catalog(&scraper, &config.fetch).await;

    let path = config.paths.catalog_path();
    store::write_records(&path, &races)
        .inspect_err(|e| log::error!("Failed to write catalog: {e}"))?;
    log::info!("Wrote {} race(s) to {}", races.len(), path.display());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::memory::MemorySource;
    use crate::types::RaceType;

    const BASE: &str = "https://www.ironman.com";

    fn config() -> FetchConfig {
        FetchConfig {
            base_url: BASE.to_string(),
            max_retries: 0,
            initial_backoff_ms: 1,
            ..Default::default()
        }
    }

    fn listing(cards: &[(&str, &str)], has_next: bool) -> String {
        let mut html = String::new();
        for (title, href) in cards {
            html.push_str(&format!(
                r#"<div class="highlighted-card-wrapper"><h2>{title}</h2><a class="button--secondary" href="{href}">Details</a></div>"#
            ));
        }
        if has_next {
            html.push_str(r#"<a class="text-link--chevron-down" rel="next" href="?page=1">More</a>"#);
        }
        html
    }

    #[tokio::test]
    async fn test_fetch_catalog_follows_next_and_dedups() {
        let source = MemorySource::new()
            .page(
                &race_listing_url(BASE, 1),
                &listing(
                    &[
                        ("IRONMAN Florida", "/im-florida"),
                        ("IRONMAN 70.3 Dubai", "/im703-dubai"),
                    ],
                    true,
                ),
            )
            .page(
                &race_listing_url(BASE, 2),
                &listing(
                    &[
                        ("IRONMAN 70.3 Dubai", "/im703-dubai"),
                        ("5150 Warsaw", "/5150-warsaw"),
                    ],
                    false,
                ),
            );

        let (races, report) = fetch_catalog(&source, &config()).await;

        let ids: Vec<_> = races.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["im-florida", "im703-dubai", "5150-warsaw"]);
        assert_eq!(races[2].race_type, RaceType::Series5150);
        assert_eq!(report.pages_fetched, 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(source.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_page_is_skipped() {
        let source = MemorySource::new()
            .page(
                &race_listing_url(BASE, 1),
                &listing(&[("IRONMAN Florida", "/im-florida")], true),
            )
            .failing(&race_listing_url(BASE, 2), 503)
            .page(
                &race_listing_url(BASE, 3),
                &listing(&[("IRONMAN Texas", "/im-texas")], false),
            );

        let (races, report) = fetch_catalog(&source, &config()).await;

        assert_eq!(races.len(), 2);
        assert_eq!(report.pages_failed, 1);
        assert_eq!(report.pages_fetched, 2);
    }

    #[tokio::test]
    async fn test_crawl_stops_after_consecutive_failures() {
        let source = MemorySource::new().page(
            &race_listing_url(BASE, 1),
            &listing(&[("IRONMAN Florida", "/im-florida")], true),
        );
        let config = FetchConfig {
            max_consecutive_failures: 2,
            ..config()
        };

        let (races, report) = fetch_catalog(&source, &config).await;

        assert_eq!(races.len(), 1);
        assert_eq!(report.pages_failed, 2);
        assert_eq!(source.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_crawl_respects_max_pages() {
        let source = MemorySource::new()
            .page(
                &race_listing_url(BASE, 1),
                &listing(&[("IRONMAN Florida", "/im-florida")], true),
            )
            .page(
                &race_listing_url(BASE, 2),
                &listing(&[("IRONMAN Texas", "/im-texas")], true),
            );
        let config = FetchConfig {
            max_pages: 1,
            ..config()
        };

        let (races, _) = fetch_catalog(&source, &config).await;

        assert_eq!(races.len(), 1);
        assert_eq!(source.requests().len(), 1);
    }
}
