//! Run configuration shared by every pipeline stage.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::types::{RaceTier, RaceType, Stage};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Where each stage reads and writes. Relative entries resolve against
/// `data_dir`; absolute entries are used as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_catalog")]
    pub catalog: PathBuf,
    #[serde(default = "default_raw_dir")]
    pub raw_dir: PathBuf,
    #[serde(default = "default_combined_dir")]
    pub combined_dir: PathBuf,
    #[serde(default = "default_cleaned_dir")]
    pub cleaned_dir: PathBuf,
    #[serde(default = "default_qualifiers")]
    pub qualifiers: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_catalog() -> PathBuf {
    PathBuf::from("urls/all_ironman_races.csv")
}

fn default_raw_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_combined_dir() -> PathBuf {
    PathBuf::from("results/combined")
}

fn default_cleaned_dir() -> PathBuf {
    PathBuf::from("results/cleaned")
}

fn default_qualifiers() -> PathBuf {
    PathBuf::from("qualified_athletes/qualified_athletes.csv")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            catalog: default_catalog(),
            raw_dir: default_raw_dir(),
            combined_dir: default_combined_dir(),
            cleaned_dir: default_cleaned_dir(),
            qualifiers: default_qualifiers(),
        }
    }
}

impl PathsConfig {
    fn resolve(&self, path: &Path) -> PathBuf {
        self.data_dir.join(path)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.resolve(&self.catalog)
    }

    pub fn raw_root(&self) -> PathBuf {
        self.resolve(&self.raw_dir)
    }

    pub fn raw_dir(&self, tier: RaceTier) -> PathBuf {
        self.raw_root().join(tier.dir_name())
    }

    pub fn failed_races_path(&self) -> PathBuf {
        self.raw_root().join("failed_races.csv")
    }

    pub fn combined_path(&self, file_name: &str) -> PathBuf {
        self.resolve(&self.combined_dir).join(file_name)
    }

    pub fn cleaned_path(&self, file_name: &str) -> PathBuf {
        self.resolve(&self.cleaned_dir).join(file_name)
    }

    pub fn qualifiers_path(&self) -> PathBuf {
        self.resolve(&self.qualifiers)
    }
}

/// Network behaviour of the catalog fetcher and the result scraper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_rows_per_page")]
    pub rows_per_page: u32,
    #[serde(default = "default_paginate")]
    pub paginate: bool,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_race_timeout_secs")]
    pub race_timeout_secs: u64,
    /// Restricts the result scraper to these race types; empty means all.
    #[serde(default)]
    pub race_types: Vec<RaceType>,
    #[serde(default)]
    pub limit: Option<usize>,
}

fn default_base_url() -> String {
    crate::BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_concurrency() -> usize {
    1
}

fn default_rows_per_page() -> u32 {
    100
}

fn default_paginate() -> bool {
    true
}

fn default_max_pages() -> u32 {
    200
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_race_timeout_secs() -> u64 {
    900
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            concurrency: default_concurrency(),
            rows_per_page: default_rows_per_page(),
            paginate: default_paginate(),
            max_pages: default_max_pages(),
            max_consecutive_failures: default_max_consecutive_failures(),
            race_timeout_secs: default_race_timeout_secs(),
            race_types: Vec::new(),
            limit: None,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn race_timeout(&self) -> Duration {
        Duration::from_secs(self.race_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
            multiplier: 2.0,
        }
    }
}

/// Start of the current qualifying season per race type. Results on or after
/// these dates qualify for a championship not yet in the data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualifyingConfig {
    #[serde(default = "default_ironman_season_start")]
    pub ironman_season_start: NaiveDate,
    #[serde(default = "default_ironman_703_season_start")]
    pub ironman_703_season_start: NaiveDate,
}

fn default_ironman_season_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 8, 18).unwrap_or_default()
}

fn default_ironman_703_season_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 7, 7).unwrap_or_default()
}

impl Default for QualifyingConfig {
    fn default() -> Self {
        Self {
            ironman_season_start: default_ironman_season_start(),
            ironman_703_season_start: default_ironman_703_season_start(),
        }
    }
}

impl QualifyingConfig {
    pub fn season_start(&self, race_type: RaceType) -> Option<NaiveDate> {
        match race_type {
            RaceType::Ironman => Some(self.ironman_season_start),
            RaceType::Ironman703 => Some(self.ironman_703_season_start),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_bind_address() -> String {
    "127.0.0.1:8055".to_string()
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub qualifying: QualifyingConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

impl Config {
    /// Layers built-in defaults, then `kona.toml` (or the given file), then
    /// `KONA_`-prefixed environment variables such as
    /// `KONA_FETCH__CONCURRENCY=4`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("kona").required(false),
        };

        let config = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("KONA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Points the output of `stage` at `path`: a file for `races` and
    /// `qualifiers`, a directory for the others.
    pub fn override_output(&mut self, stage: Stage, path: PathBuf) {
        match stage {
            Stage::Races => self.paths.catalog = path,
            Stage::Results => self.paths.raw_dir = path,
            Stage::Combine => self.paths.combined_dir = path,
            Stage::Clean => self.paths.cleaned_dir = path,
            Stage::Qualifiers => self.paths.qualifiers = path,
        }
    }
}
