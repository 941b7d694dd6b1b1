//! Qualifier calculator: pairs regular-race finishes with a later World
//! Championship start by the same athlete.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Display;

use chrono::NaiveDate;

use crate::clean::{CLEANED_RACES, CLEANED_WC};
use crate::config::{Config, QualifyingConfig};
use crate::store::{self, StoreError};
use crate::types::{
    AthleteKey, CleanedResultRow, Designation, Gender, QualifiedAthlete, RaceType, Stage,
    normalize_name,
};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QualifyReport {
    pub race_rows: usize,
    pub wc_rows: usize,
    pub pairs: usize,
    pub nearest: usize,
    pub modal: usize,
    pub qualifiers: usize,
}

impl Display for QualifyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nQualifier summary:")?;
        writeln!(f, "  Eligible race rows:   {}", self.race_rows)?;
        writeln!(f, "  Eligible WC rows:     {}", self.wc_rows)?;
        writeln!(f, "  Matched pairs:        {}", self.pairs)?;
        writeln!(f, "  Nearest WC per result: {}", self.nearest)?;
        writeln!(f, "  At modal time gap:    {}", self.modal)?;
        write!(f, "  Qualified athletes:   {}", self.qualifiers)
    }
}

struct Pair<'a> {
    /// Position of the qualifying row in the filtered input.
    order: usize,
    race: &'a CleanedResultRow,
    race_type: RaceType,
    wc: &'a CleanedResultRow,
    gap: i64,
}

fn slot_awarding(rows: &[CleanedResultRow]) -> Vec<(&CleanedResultRow, RaceType)> {
    rows.iter()
        .filter_map(|row| match row.race_type {
            Some(race_type) if race_type.awards_wc_slots() => Some((row, race_type)),
            _ => None,
        })
        .collect()
}

/// Most frequent value, the smallest one on ties.
fn mode(values: impl IntoIterator<Item = i64>) -> Option<i64> {
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    let mut best: Option<(i64, usize)> = None;
    for (value, count) in counts {
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}

pub fn qualify(
    races: &[CleanedResultRow],
    wc: &[CleanedResultRow],
    config: &QualifyingConfig,
) -> (Vec<QualifiedAthlete>, QualifyReport) {
    let races = slot_awarding(races);
    let wc = slot_awarding(wc);
    let mut report = QualifyReport {
        race_rows: races.len(),
        wc_rows: wc.len(),
        ..Default::default()
    };

    let mut wc_index: HashMap<(String, &str, RaceType), Vec<(&CleanedResultRow, AthleteKey)>> =
        HashMap::new();
    for (row, race_type) in &wc {
        wc_index
            .entry((normalize_name(&row.athlete), row.division.as_str(), *race_type))
            .or_default()
            .push((row, row.athlete_key()));
    }

    // Nearest later championship per qualifying result.
    let mut pairs: Vec<Pair> = Vec::new();
    for (order, (race, race_type)) in races.iter().enumerate() {
        if race.designation != Designation::Finisher {
            continue;
        }
        let Some(season_start) = config.season_start(*race_type) else {
            continue;
        };
        if race.race_date >= season_start {
            continue;
        }
        let key = race.athlete_key();
        let Some(candidates) =
            wc_index.get(&(key.name.clone(), race.division.as_str(), *race_type))
        else {
            continue;
        };

        let mut nearest: Option<Pair> = None;
        for (wc_row, wc_key) in candidates {
            if !key.matches(wc_key) || race.race_date >= wc_row.race_date {
                continue;
            }
            report.pairs += 1;
            let gap = (wc_row.race_date - race.race_date).num_days();
            if nearest.as_ref().is_none_or(|n| gap < n.gap) {
                nearest = Some(Pair {
                    order,
                    race,
                    race_type: *race_type,
                    wc: wc_row,
                    gap,
                });
            }
        }
        pairs.extend(nearest);
    }
    report.nearest = pairs.len();

    // Drop pairs whose gap is not the usual one for their race and gender.
    let mut gaps: HashMap<(NaiveDate, &str, RaceType, Gender), Vec<i64>> = HashMap::new();
    for pair in &pairs {
        gaps.entry(group_key(pair)).or_default().push(pair.gap);
    }
    let modal_gaps: HashMap<_, i64> = gaps
        .into_iter()
        .filter_map(|(group, values)| mode(values).map(|m| (group, m)))
        .collect();
    pairs.retain(|pair| modal_gaps.get(&group_key(pair)) == Some(&pair.gap));
    report.modal = pairs.len();

    // Best ranked qualifying result per athlete and championship.
    pairs.sort_by_key(|pair| {
        (
            pair.race.div_rank.unwrap_or(u32::MAX),
            pair.race.overall_rank.unwrap_or(u32::MAX),
            pair.order,
        )
    });
    let mut taken = HashSet::new();
    let mut kept = Vec::new();
    for pair in pairs {
        if taken.insert((pair.race.athlete_key(), pair.wc.race_date)) {
            kept.push(pair);
        }
    }
    kept.sort_by_key(|pair| pair.order);

    let qualifiers: Vec<QualifiedAthlete> = kept.into_iter().map(to_qualified).collect();
    report.qualifiers = qualifiers.len();
    (qualifiers, report)
}

fn group_key<'a>(pair: &Pair<'a>) -> (NaiveDate, &'a str, RaceType, Gender) {
    (
        pair.race.race_date,
        pair.race.race_name.as_str(),
        pair.race_type,
        pair.race.gender,
    )
}

fn to_qualified(pair: Pair) -> QualifiedAthlete {
    let race = pair.race;
    QualifiedAthlete {
        athlete: race.athlete.clone(),
        country: race.country.clone(),
        division: race.division.clone(),
        gender: race.gender,
        race_type: pair.race_type,
        race_id: race.race_id.clone(),
        race_name: race.race_name.clone(),
        qualifying_race_date: race.race_date,
        div_rank: race.div_rank,
        overall_rank: race.overall_rank,
        finish_time: race.finish_time,
        wc_race_id: pair.wc.race_id.clone(),
        wc_race_name: pair.wc.race_name.clone(),
        wc_race_date: pair.wc.race_date,
        time_gap_days: pair.gap,
    }
}

pub fn run(config: &Config) -> Result<QualifyReport, StoreError> {
    let races_path = config.paths.cleaned_path(CLEANED_RACES);
    let wc_path = config.paths.cleaned_path(CLEANED_WC);
    store::require_input(&races_path, Stage::Clean)?;
    store::require_input(&wc_path, Stage::Clean)?;

    let races: Vec<CleanedResultRow> = store::read_records(&races_path)?;
    let wc: Vec<CleanedResultRow> = store::read_records(&wc_path)?;
    let (qualifiers, report) = qualify(&races, &wc, &config.qualifying);

    let output = config.paths.qualifiers_path();
    store::write_records(&output, &qualifiers)?;
    log::info!(
        "Saved {} qualifier(s) to {}",
        qualifiers.len(),
        output.display()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_dir;
    use std::time::Duration;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(
        race_id: &str,
        race_type: RaceType,
        race_date: NaiveDate,
        athlete: &str,
        division: &str,
    ) -> CleanedResultRow {
        CleanedResultRow {
            race_id: race_id.to_string(),
            race_name: format!("Race {race_id}"),
            race_type: Some(race_type),
            race_date,
            year: chrono::Datelike::year(&race_date),
            athlete: athlete.to_string(),
            country: None,
            division: division.to_string(),
            gender: Gender::from_division(division).unwrap(),
            designation: Designation::Finisher,
            div_rank: Some(1),
            gender_rank: Some(1),
            overall_rank: Some(10),
            swim_time: None,
            transition1: None,
            bike_time: Some(Duration::from_secs(5 * 3600)),
            transition2: None,
            run_time: Some(Duration::from_secs(4 * 3600)),
            finish_time: Duration::from_secs(10 * 3600),
        }
    }

    fn names(qualifiers: &[QualifiedAthlete]) -> Vec<(&str, &str)> {
        qualifiers
            .iter()
            .map(|q| (q.athlete.as_str(), q.race_id.as_str()))
            .collect()
    }

    #[test]
    fn test_qualifying_filters() {
        let kona = date(2024, 10, 26);
        let wc = vec![
            CleanedResultRow {
                country: Some("USA".to_string()),
                ..row("im-wc", RaceType::Ironman, kona, "Ann", "F30-34")
            },
            CleanedResultRow {
                country: Some("DEU".to_string()),
                ..row("im-wc", RaceType::Ironman, kona, "Carl", "M40-44")
            },
            row("im-wc", RaceType::Ironman, kona, "Dan", "M40-44"),
            row("im-wc", RaceType::Ironman, kona, "Eve", "F40-44"),
        ];
        let races = vec![
            CleanedResultRow {
                country: Some("USA".to_string()),
                ..row("im-florida", RaceType::Ironman, date(2023, 11, 4), "Ann", "F30-34")
            },
            CleanedResultRow {
                designation: Designation::Dnf,
                ..row("im-texas", RaceType::Ironman, date(2024, 4, 20), "Ann", "F30-34")
            },
            row("im-wales", RaceType::Ironman, date(2024, 9, 1), "Ann", "F30-34"),
            CleanedResultRow {
                country: Some("AUT".to_string()),
                ..row("im-florida", RaceType::Ironman, date(2023, 11, 4), "Carl", "M40-44")
            },
            row("im-florida", RaceType::Ironman, date(2023, 11, 4), "dan ", "M40-44"),
            row("5150-warsaw", RaceType::Series5150, date(2023, 6, 1), "Eve", "F40-44"),
            row("im-florida", RaceType::Ironman, date(2023, 11, 4), "Eve", "F35-39"),
        ];

        let (qualifiers, report) = qualify(&races, &wc, &QualifyingConfig::default());

        assert_eq!(
            names(&qualifiers),
            vec![("Ann", "im-florida"), ("dan ", "im-florida")]
        );
        assert_eq!(report.race_rows, 6);
        assert_eq!(qualifiers[0].time_gap_days, 357);
        assert_eq!(qualifiers[0].wc_race_id, "im-wc");
        assert_eq!(qualifiers[0].wc_race_date, kona);
    }

    #[test]
    fn test_each_result_pairs_with_nearest_championship() {
        let wc = vec![
            row("im703-wc-2023", RaceType::Ironman703, date(2023, 8, 26), "Fay", "F25-29"),
            row("im703-wc-2024", RaceType::Ironman703, date(2024, 12, 15), "Fay", "F25-29"),
        ];
        let races = vec![
            row("im703-dubai", RaceType::Ironman703, date(2023, 2, 11), "Fay", "F25-29"),
            row("im703-oman", RaceType::Ironman703, date(2024, 2, 10), "Fay", "F25-29"),
        ];

        let (qualifiers, report) = qualify(&races, &wc, &QualifyingConfig::default());

        assert_eq!(report.pairs, 3);
        let pairs: Vec<_> = qualifiers
            .iter()
            .map(|q| (q.race_id.as_str(), q.wc_race_id.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![("im703-dubai", "im703-wc-2023"), ("im703-oman", "im703-wc-2024")]
        );
    }

    #[test]
    fn test_outlier_gaps_dropped_smallest_mode_on_ties() {
        let near = date(2023, 8, 26);
        let far = date(2024, 12, 15);
        let wc = vec![
            row("wc-a", RaceType::Ironman703, near, "Gia", "F25-29"),
            row("wc-a", RaceType::Ironman703, near, "Hal", "F30-34"),
            row("wc-b", RaceType::Ironman703, far, "Ivy", "F25-29"),
            row("wc-b", RaceType::Ironman703, far, "Jo", "F35-39"),
            row("wc-b", RaceType::Ironman703, far, "Ken", "M35-39"),
        ];
        let dubai = date(2023, 2, 11);
        let races = vec![
            row("im703-dubai", RaceType::Ironman703, dubai, "Gia", "F25-29"),
            row("im703-dubai", RaceType::Ironman703, dubai, "Hal", "F30-34"),
            row("im703-dubai", RaceType::Ironman703, dubai, "Ivy", "F25-29"),
            row("im703-dubai", RaceType::Ironman703, dubai, "Jo", "F35-39"),
            row("im703-dubai", RaceType::Ironman703, dubai, "Ken", "M35-39"),
        ];

        let (qualifiers, report) = qualify(&races, &wc, &QualifyingConfig::default());

        assert_eq!(report.nearest, 5);
        let athletes: Vec<_> = qualifiers.iter().map(|q| q.athlete.as_str()).collect();
        assert_eq!(athletes, vec!["Gia", "Hal", "Ken"]);
    }

    #[test]
    fn test_best_ranked_result_per_championship() {
        let kona = date(2024, 10, 26);
        let wc = vec![row("im-wc", RaceType::Ironman, kona, "Kim", "F50-54")];
        let races = vec![
            CleanedResultRow {
                div_rank: Some(5),
                ..row("im-florida", RaceType::Ironman, date(2023, 11, 4), "Kim", "F50-54")
            },
            CleanedResultRow {
                div_rank: Some(2),
                ..row("im-texas", RaceType::Ironman, date(2024, 4, 20), "Kim", "F50-54")
            },
            CleanedResultRow {
                div_rank: None,
                ..row("im-cairns", RaceType::Ironman, date(2024, 6, 9), "Kim", "F50-54")
            },
        ];

        let (qualifiers, _) = qualify(&races, &wc, &QualifyingConfig::default());

        assert_eq!(names(&qualifiers), vec![("Kim", "im-texas")]);
    }

    #[test]
    fn test_qualifier_races_exist_in_inputs() {
        let kona = date(2024, 10, 26);
        let st_george = date(2024, 10, 19);
        let wc = vec![
            row("im-wc", RaceType::Ironman, kona, "Ann", "F30-34"),
            row("im-wc", RaceType::Ironman, kona, "Bea", "F30-34"),
            row("im703-wc", RaceType::Ironman703, st_george, "Cal", "M30-34"),
        ];
        let races = vec![
            row("im-florida", RaceType::Ironman, date(2023, 11, 4), "Ann", "F30-34"),
            row("im-florida", RaceType::Ironman, date(2023, 11, 4), "Bea", "F30-34"),
            row("im703-dubai", RaceType::Ironman703, date(2024, 2, 10), "Cal", "M30-34"),
            row("im703-oman", RaceType::Ironman703, date(2024, 2, 17), "Zed", "M30-34"),
        ];

        let (qualifiers, _) = qualify(&races, &wc, &QualifyingConfig::default());

        assert_eq!(qualifiers.len(), 3);
        let race_keys: HashSet<_> = races.iter().map(|r| (&r.race_id, r.race_date)).collect();
        let wc_keys: HashSet<_> = wc.iter().map(|r| (&r.race_id, r.race_date)).collect();
        for q in &qualifiers {
            assert!(race_keys.contains(&(&q.race_id, q.qualifying_race_date)));
            assert!(wc_keys.contains(&(&q.wc_race_id, q.wc_race_date)));
        }
    }

    #[test]
    fn test_mode() {
        assert_eq!(mode([3, 1, 3, 1]), Some(1));
        assert_eq!(mode([7, 2, 7]), Some(7));
        assert_eq!(mode(Vec::new()), None);
    }

    #[test]
    fn test_run_requires_cleaned_tables() {
        let dir = test_dir::fresh("qualify-missing");
        let mut config = Config::default();
        config.paths.data_dir = dir;

        let err = run(&config).unwrap_err();
        assert!(err.to_string().contains("run `kona clean` first"));
    }

    #[test]
    fn test_run_writes_qualifiers() {
        let dir = test_dir::fresh("qualify-run");
        let mut config = Config::default();
        config.paths.data_dir = dir;
        let kona = date(2024, 10, 26);
        store::write_records(
            &config.paths.cleaned_path(CLEANED_WC),
            &[row("im-wc", RaceType::Ironman, kona, "Ann", "F30-34")],
        )
        .unwrap();
        store::write_records(
            &config.paths.cleaned_path(CLEANED_RACES),
            &[row("im-florida", RaceType::Ironman, date(2023, 11, 4), "Ann", "F30-34")],
        )
        .unwrap();

        let report = run(&config).unwrap();

        assert_eq!(report.qualifiers, 1);
        let written: Vec<QualifiedAthlete> =
            store::read_records(&config.paths.qualifiers_path()).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].finish_time, Duration::from_secs(36_000));
    }
}
