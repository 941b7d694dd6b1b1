//! Cleaner: turns combined raw tables into typed, validated, deduplicated
//! result rows.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};

use crate::combine::{ALL_COMBINED, RACE_ID_COLUMN, RACES_COMBINED, WC_COMBINED};
use crate::config::Config;
use crate::store::{self, StoreError};
use crate::table::{Record, Table};
use crate::types::{
    CleanedResultRow, Designation, Gender, Race, RaceType, Stage, race_time,
    sanitize_id,
};

pub const CLEANED_RACES: &str = "cleaned_races_data.csv";
pub const CLEANED_WC: &str = "cleaned_races_wc.csv";
pub const CLEANED_ALL: &str = "cleaned_races_data_and_wc.csv";

/// Combined input and cleaned output file names, per dataset.
pub const DATASETS: [(&str, &str, &str); 3] = [
    ("data", RACES_COMBINED, CLEANED_RACES),
    ("data_and_wc", ALL_COMBINED, CLEANED_ALL),
    ("wc", WC_COMBINED, CLEANED_WC),
];

const ABSENT: [&str; 3] = ["N/A", "--", "-"];

const DATE_FORMATS: [&str; 2] = ["%Y - %B %d", "%Y-%m-%d"];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanReport {
    pub rows_in: usize,
    pub missing_athlete: usize,
    pub bad_date: usize,
    pub bad_division: usize,
    pub bad_times: usize,
    pub exact_duplicates: usize,
    pub athlete_duplicates: usize,
    pub rows_out: usize,
}

impl Display for CleanReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} in, {} out (dropped: {} no athlete, {} bad date, {} non M/F division, \
             {} missing or zero times, {} exact duplicates, {} repeated athletes)",
            self.rows_in,
            self.rows_out,
            self.missing_athlete,
            self.bad_date,
            self.bad_division,
            self.bad_times,
            self.exact_duplicates,
            self.athlete_duplicates
        )
    }
}

/// Race type per race name, first catalog entry winning.
pub fn race_types(catalog: &[Race]) -> HashMap<String, RaceType> {
    let mut types = HashMap::new();
    for race in catalog {
        types.entry(race.name.clone()).or_insert(race.race_type);
    }
    types
}

/// Trimmed, whitespace-collapsed field; `None` when missing or a
/// placeholder.
fn text(record: &Record, column: &str) -> Option<String> {
    let value = record
        .raw(column)?
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if value.is_empty() || ABSENT.contains(&value.as_str()) {
        None
    } else {
        Some(value)
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

/// Accepts `12` and `12.0`.
fn parse_rank(text: &str) -> Option<u32> {
    if let Ok(rank) = text.parse::<u32>() {
        return Some(rank);
    }
    let value: f64 = text.parse().ok()?;
    (value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f64)
        .then_some(value as u32)
}

fn positive(time: Option<Duration>) -> Option<Duration> {
    time.filter(|t| !t.is_zero())
}

enum Rejection {
    MissingAthlete,
    BadDate,
    BadDivision,
    BadTimes,
}

fn clean_record(
    record: &Record,
    types: &HashMap<String, RaceType>,
) -> Result<CleanedResultRow, Rejection> {
    let athlete = text(record, "Athlete").ok_or(Rejection::MissingAthlete)?;
    let race_date = text(record, "Race Date")
        .and_then(|d| parse_date(&d))
        .ok_or(Rejection::BadDate)?;

    let division: String = text(record, "Division")
        .unwrap_or_default()
        .split_whitespace()
        .collect::<String>()
        .to_uppercase();
    let gender = Gender::from_division(&division).ok_or(Rejection::BadDivision)?;

    let time = |column: &str| text(record, column).and_then(|t| race_time::parse(&t));
    let bike_time = positive(time("Bike Time")).ok_or(Rejection::BadTimes)?;
    let run_time = positive(time("Run Time")).ok_or(Rejection::BadTimes)?;
    let finish_time = positive(time("Finish Time")).ok_or(Rejection::BadTimes)?;

    let rank = |column: &str| text(record, column).and_then(|r| parse_rank(&r));
    let mut div_rank = rank("Div Rank");
    let gender_rank = rank("Gender Rank");
    let mut overall_rank = rank("Overall Rank");
    if gender_rank.is_none() && overall_rank.is_none() {
        overall_rank = div_rank.take();
    }

    let race_name = text(record, "Race Name").unwrap_or_default();
    let race_type = types
        .get(&race_name)
        .copied()
        .or_else(|| text(record, "Race Type").and_then(|t| t.parse().ok()));
    let race_id = text(record, RACE_ID_COLUMN).unwrap_or_else(|| sanitize_id(&race_name));

    Ok(CleanedResultRow {
        race_id,
        race_name,
        race_type,
        year: race_date.year(),
        race_date,
        athlete,
        country: text(record, "Country").map(|c| c.to_uppercase()),
        division,
        gender,
        designation: text(record, "Designation")
            .and_then(|d| Designation::parse(&d))
            .unwrap_or(Designation::Finisher),
        div_rank,
        gender_rank,
        overall_rank,
        swim_time: time("Swim Time"),
        transition1: time("Transition 1"),
        bike_time: Some(bike_time),
        transition2: time("Transition 2"),
        run_time: Some(run_time),
        finish_time,
    })
}

/// Cleans one combined table. Output keeps input order; the result is
/// unchanged by cleaning it again.
pub fn clean_table(
    table: &Table,
    types: &HashMap<String, RaceType>,
) -> (Vec<CleanedResultRow>, CleanReport) {
    let mut table = table.clone();
    table.trim_headers();
    table.drop_empty_columns();
    table.retain_columns(|h| !h.starts_with("Unnamed"));

    let mut report = CleanReport {
        rows_in: table.len(),
        ..Default::default()
    };

    let mut rows = Vec::new();
    let mut seen = HashSet::new();
    for record in table.records() {
        match clean_record(&record, types) {
            Ok(row) => {
                if seen.insert(row.clone()) {
                    rows.push(row);
                } else {
                    report.exact_duplicates += 1;
                }
            }
            Err(Rejection::MissingAthlete) => report.missing_athlete += 1,
            Err(Rejection::BadDate) => report.bad_date += 1,
            Err(Rejection::BadDivision) => report.bad_division += 1,
            Err(Rejection::BadTimes) => report.bad_times += 1,
        }
    }

    let rows = dedup_athletes(rows, &mut report);
    report.rows_out = rows.len();
    (rows, report)
}

/// Keeps one row per athlete per race edition: the lowest overall rank,
/// earlier rows winning ties and unranked rows losing to ranked ones.
///
/// Athletes are told apart the way
/// [`AthleteKey::matches`](crate::types::AthleteKey::matches) does: same
/// name with different countries are different athletes, a row without a country
/// belongs to the first country seen under that name. A kept row without a
/// country takes its athlete's country.
fn dedup_athletes(
    rows: Vec<CleanedResultRow>,
    report: &mut CleanReport,
) -> Vec<CleanedResultRow> {
    let mut editions: HashMap<(String, String, NaiveDate), Vec<usize>> = HashMap::new();
    for (i, row) in rows.iter().enumerate() {
        let key = row.athlete_key();
        editions
            .entry((key.name, row.race_id.clone(), row.race_date))
            .or_default()
            .push(i);
    }

    let rank = |i: usize| rows[i].overall_rank.unwrap_or(u32::MAX);
    let mut keep: HashMap<usize, Option<String>> = HashMap::new();
    for indices in editions.into_values() {
        let mut athletes: Vec<(Option<String>, Vec<usize>)> = Vec::new();
        let mut unknown = Vec::new();
        for i in indices {
            match rows[i].athlete_key().country {
                Some(country) => {
                    match athletes.iter().position(|(c, _)| c.as_ref() == Some(&country)) {
                        Some(at) => athletes[at].1.push(i),
                        None => athletes.push((Some(country), vec![i])),
                    }
                }
                None => unknown.push(i),
            }
        }
        if athletes.is_empty() {
            athletes.push((None, unknown));
        } else {
            athletes[0].1.extend(unknown);
        }

        for (country, members) in athletes {
            if let Some(best) = members.into_iter().min_by_key(|&i| (rank(i), i)) {
                keep.insert(best, country);
            }
        }
    }

    report.athlete_duplicates = rows.len() - keep.len();
    rows.into_iter()
        .enumerate()
        .filter_map(|(i, mut row)| {
            let country = keep.remove(&i)?;
            if row.country.is_none() {
                row.country = country;
            }
            Some(row)
        })
        .collect()
}

pub fn run(config: &Config) -> Result<Vec<(&'static str, CleanReport)>, StoreError> {
    let catalog_path = config.paths.catalog_path();
    store::require_input(&catalog_path, Stage::Races)?;
    let catalog: Vec<Race> = store::read_records(&catalog_path)?;
    let types = race_types(&catalog);

    let mut reports = Vec::new();
    for (label, input, output) in DATASETS {
        let input = config.paths.combined_path(input);
        store::require_input(&input, Stage::Combine)?;

        log::info!("Cleaning {}", label);
        let read = store::read_table(&input)?;
        if read.dropped > 0 {
            log::warn!(
                "Dropped {} malformed row(s) from {}",
                read.dropped,
                input.display()
            );
        }

        let (rows, report) = clean_table(&read.table, &types);
        log::info!("{}: {}", label, report);

        let output = config.paths.cleaned_path(output);
        store::write_records(&output, &rows)?;
        log::info!("Cleaned and saved to {}", output.display());
        reports.push((label, report));
    }
    Ok(reports)
}
