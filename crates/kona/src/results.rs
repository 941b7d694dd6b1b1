//! Result scraper: every edition of every catalog race, one raw table per
//! race.

use std::collections::HashSet;
use std::fmt::Display;

use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};

use crate::config::{Config, FetchConfig};
use crate::parser::{
    edition_results_url, parse_race_editions, parse_result_page, parse_results_frame,
};
use crate::scraper::{PageSource, ScraperError, WebScraper, fetch_with_retry};
use crate::store::{self, StoreError, Tabular};
use crate::types::{Race, RaceTier, ResultRow, Stage};
use crate::utils::RaceFilter;

#[derive(Debug, thiserror::Error)]
pub enum ResultsError {
    #[error(transparent)]
    Scraper(#[from] ScraperError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Invalid race filter: {0}")]
    InvalidFilter(String),
}

/// A race that could not be scraped, kept so a rerun has a target list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRace {
    #[serde(rename = "Race Id")]
    pub race_id: String,
    #[serde(rename = "Race Name")]
    pub race_name: String,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "Reason")]
    pub reason: String,
}

impl Tabular for FailedRace {
    const HEADERS: &'static [&'static str] = &["Race Id", "Race Name", "URL", "Reason"];
}

#[derive(Debug, Default)]
pub struct RaceResults {
    pub rows: Vec<ResultRow>,
    pub editions: usize,
    /// Editions that stopped early because a later page failed.
    pub truncated_editions: usize,
}

#[derive(Debug, Default)]
pub struct ScrapeReport {
    pub races_attempted: usize,
    pub races_scraped: usize,
    pub editions: usize,
    pub truncated_editions: usize,
    pub rows: usize,
    pub failed: Vec<FailedRace>,
}

impl Display for ScrapeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nScrape summary:")?;
        writeln!(f, "  Races attempted:    {}", self.races_attempted)?;
        writeln!(f, "  Races scraped:      {}", self.races_scraped)?;
        writeln!(f, "  Editions:           {}", self.editions)?;
        writeln!(f, "  Truncated editions: {}", self.truncated_editions)?;
        writeln!(f, "  Result rows:        {}", self.rows)?;
        write!(f, "  Failed races:       {}", self.failed.len())?;
        for failed in &self.failed {
            write!(f, "\n    {} ({}): {}", failed.race_name, failed.race_id, failed.reason)?;
        }
        Ok(())
    }
}

/// Scrapes all editions of one race. A failure before any row of an
/// edition is read fails the race; a failure on a later page keeps the rows
/// already read.
pub async fn scrape_race(
    source: &dyn PageSource,
    config: &FetchConfig,
    race: &Race,
) -> Result<RaceResults, ScraperError> {
    let policy = config.retry_policy();

    let results_url = race.results_url();
    log::info!("Processing {} | {}", race.name, results_url);
    let html = fetch_with_retry(source, &policy, &results_url).await?;
    let frame_url = parse_results_frame(&html, &config.base_url)?;

    let frame_html = fetch_with_retry(source, &policy, &frame_url).await?;
    let editions = parse_race_editions(&frame_html);
    if editions.is_empty() {
        return Err(ScraperError::NoEditions(frame_url));
    }
    log::info!("Found {} race date(s) for {}", editions.len(), race.name);

    let mut results = RaceResults {
        editions: editions.len(),
        ..Default::default()
    };

    for edition in &editions {
        let mut page = 0;
        loop {
            let url = edition_results_url(&frame_url, &edition.id, page, config.rows_per_page);
            let html = match fetch_with_retry(source, &policy, &url).await {
                Ok(html) => html,
                Err(e) if page == 0 => return Err(e),
                Err(e) => {
                    log::warn!(
                        "Stopping {} {} after page {}: {}",
                        race.name,
                        edition.label,
                        page,
                        e
                    );
                    results.truncated_editions += 1;
                    break;
                }
            };

            let parsed = parse_result_page(&html, &race.name, &edition.label);
            log::debug!(
                "{} {} page {}: {} row(s)",
                race.name,
                edition.label,
                page,
                parsed.rows.len()
            );
            let empty = parsed.rows.is_empty();
            results.rows.extend(parsed.rows);

            page += 1;
            if !config.paginate || !parsed.has_next || empty || page >= config.max_pages {
                break;
            }
        }
    }

    Ok(results)
}

/// Scrapes `races` with up to `concurrency` races in flight. Each race writes
/// only its own file; failures are collected, never fatal.
pub async fn scrape_races(
    source: &dyn PageSource,
    config: &Config,
    races: Vec<Race>,
) -> ScrapeReport {
    let mut report = ScrapeReport::default();
    let mut claimed = HashSet::new();
    let races: Vec<Race> = races
        .into_iter()
        .filter(|race| {
            let fresh = claimed.insert((race.tier, race.id.clone()));
            if !fresh {
                log::warn!("Skipping {}: race id '{}' already taken", race.name, race.id);
            }
            fresh
        })
        .collect();
    report.races_attempted = races.len();

    let race_timeout = config.fetch.race_timeout();
    let outcomes: Vec<(Race, Result<RaceResults, String>)> = stream::iter(races)
        .map(|race| async move {
            let outcome =
                match tokio::time::timeout(race_timeout, scrape_race(source, &config.fetch, &race))
                    .await
                {
                    Ok(Ok(results)) => {
                        let path = config
                            .paths
                            .raw_dir(race.tier)
                            .join(format!("{}.csv", race.id));
                        store::write_records(&path, &results.rows)
                            .map(|_| {
                                log::info!("Saved {} row(s) to {}", results.rows.len(), path.display());
                                results
                            })
                            .map_err(|e| e.to_string())
                    }
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(ScraperError::Timeout {
                        secs: race_timeout.as_secs(),
                    }
                    .to_string()),
                };
            (race, outcome)
        })
        .buffer_unordered(config.fetch.concurrency.max(1))
        .collect()
        .await;

    for (race, outcome) in outcomes {
        match outcome {
            Ok(results) => {
                report.races_scraped += 1;
                report.editions += results.editions;
                report.truncated_editions += results.truncated_editions;
                report.rows += results.rows.len();
            }
            Err(reason) => {
                log::error!("Failed to scrape {}: {}", race.name, reason);
                report.failed.push(FailedRace {
                    race_id: race.id,
                    race_name: race.name,
                    url: race.url,
                    reason,
                });
            }
        }
    }
    report.failed.sort_by(|a, b| a.race_id.cmp(&b.race_id));

    report
}

/// Creates the raw directory of every tier, so a run that scrapes no race of
/// a tier still hands the combiner an (empty) input.
pub fn prepare_raw_dirs(config: &Config) -> Result<(), StoreError> {
    for tier in [RaceTier::Regular, RaceTier::WorldChampionship] {
        store::ensure_dir(&config.paths.raw_dir(tier))?;
    }
    Ok(())
}

/// Scrapes every catalog race that passes the configured filter and records
/// the failures next to the raw tables.
pub async fn run(config: &Config) -> Result<ScrapeReport, ResultsError> {
    let catalog = config.paths.catalog_path();
    store::require_input(&catalog, Stage::Races)?;
    let races: Vec<Race> = store::read_records(&catalog)?;

    let filter = RaceFilter {
        race_types: config.fetch.race_types.clone(),
        limit: config.fetch.limit,
    }
    .validate()
    .map_err(ResultsError::InvalidFilter)?;
    let races = filter.apply(races);
    log::info!("Scraping results for {} race(s)", races.len());

    prepare_raw_dirs(config)?;
    let scraper = WebScraper::new(&config.fetch)?;
    let report = scrape_races(&scraper, config, races).await;

    store::write_records(&config.paths.failed_races_path(), &report.failed)
        .inspect_err(|e| log::error!("Failed to write failed race list: {e}"))?;
    Ok(report)
}
