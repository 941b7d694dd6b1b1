use std::path::PathBuf;
use std::process;
use std::str::FromStr;

use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use kona::Config;
use kona::types::{RaceType, Stage};
use kona::{catalog, clean, combine, qualify, results};

#[derive(Parser)]
#[command(name = "kona")]
#[command(about = "An IRONMAN race results scraper and WC qualifier calculator", long_about = None)]
struct Cli {
    #[arg(
        short = 'l',
        long = "log-level",
        value_enum,
        default_value = "info",
        global = true,
        help = "Set the logging level"
    )]
    log_level: LogLevel,

    #[arg(
        short = 'c',
        long = "config",
        global = true,
        help = "Configuration file (defaults to ./kona.toml when present)"
    )]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the race listing and write the race catalog
    Races {
        #[arg(short = 'o', long, help = "Catalog file to write")]
        output: Option<PathBuf>,
    },
    /// Scrape per-race results for every catalog race
    Results {
        #[arg(short = 'o', long, help = "Directory for the raw result tables")]
        output: Option<PathBuf>,

        #[arg(
            long,
            help = "Number of races fetched at once",
            value_parser = clap::value_parser!(u16).range(1..)
        )]
        concurrency: Option<u16>,

        #[arg(
            long,
            help = "Maximum number of races to scrape",
            value_parser = clap::value_parser!(u16).range(1..)
        )]
        limit: Option<u16>,

        #[arg(
            long = "race-type",
            value_parser = parse_race_type,
            help = "Only scrape races of this type (repeatable)"
        )]
        race_types: Vec<RaceType>,

        #[arg(long, help = "Only fetch the first page of each edition")]
        no_paginate: bool,
    },
    /// Concatenate the raw result tables per category
    Combine {
        #[arg(short = 'o', long, help = "Directory for the combined tables")]
        output: Option<PathBuf>,
    },
    /// Normalize and deduplicate the combined tables
    Clean {
        #[arg(short = 'o', long, help = "Directory for the cleaned tables")]
        output: Option<PathBuf>,
    },
    /// Compute World Championship qualifiers from the cleaned tables
    Qualifiers {
        #[arg(short = 'o', long, help = "Qualifier file to write")]
        output: Option<PathBuf>,
    },
    /// Run every stage in order
    All,
}

fn parse_race_type(s: &str) -> Result<RaceType, String> {
    RaceType::from_str(s).map_err(|e| e.to_string())
}

fn fail<T, E: std::fmt::Display>(stage: Stage) -> impl FnOnce(E) -> T {
    move |e| {
        log::error!("Stage `{}` failed: {}", stage, e);
        process::exit(1);
    }
}

async fn run_stage(stage: Stage, config: &Config) {
    match stage {
        Stage::Races => {
            let report = catalog::run(config).await.unwrap_or_else(fail(stage));
            println!("{}", report);
        }
        Stage::Results => {
            let report = results::run(config).await.unwrap_or_else(fail(stage));
            println!("{}", report);
        }
        Stage::Combine => {
            let summary = combine::run(config).unwrap_or_else(fail(stage));
            println!("{}", summary);
        }
        Stage::Clean => {
            let reports = clean::run(config).unwrap_or_else(fail(stage));
            println!("\nClean summary:");
            for (label, report) in reports {
                println!("  {:<12}{}", label, report);
            }
        }
        Stage::Qualifiers => {
            let report = qualify::run(config).unwrap_or_else(fail(stage));
            println!("{}", report);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level.clone().into())
        .init();

    let mut config = Config::load(cli.config.as_deref()).unwrap_or_else(|e| {
        log::error!("Error loading configuration: {}", e);
        process::exit(1);
    });

    let (stages, output) = match cli.command {
        Commands::Races { output } => (vec![Stage::Races], output),
        Commands::Results {
            output,
            concurrency,
            limit,
            race_types,
            no_paginate,
        } => {
            if let Some(concurrency) = concurrency {
                config.fetch.concurrency = concurrency.into();
            }
            if let Some(limit) = limit {
                config.fetch.limit = Some(limit.into());
            }
            if !race_types.is_empty() {
                config.fetch.race_types = race_types;
            }
            if no_paginate {
                config.fetch.paginate = false;
            }
            (vec![Stage::Results], output)
        }
        Commands::Combine { output } => (vec![Stage::Combine], output),
        Commands::Clean { output } => (vec![Stage::Clean], output),
        Commands::Qualifiers { output } => (vec![Stage::Qualifiers], output),
        Commands::All => (Stage::ALL.to_vec(), None),
    };

    if let (Some(path), [stage]) = (output, stages.as_slice()) {
        config.override_output(*stage, path);
    }

    for stage in stages {
        log::info!("Running stage `{}`", stage);
        run_stage(stage, &config).await;
    }
}
