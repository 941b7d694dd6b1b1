//! Read-only aggregates behind the dashboard pages.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::{CleanedResultRow, Designation, Gender, QualifiedAthlete, Race, RaceType};

pub const HISTOGRAM_BINS: usize = 30;
pub const TOP_N: usize = 10;

/// Editions run over a shortened course, by race name and year.
pub const SHORTENED_RACES: &[(&str, &[i32])] = &[
    ("IRONMAN 70.3 Aix-en-Provence", &[2011, 2016]),
    ("IRONMAN 70.3 Alcúdia-Mallorca", &[2021]),
    ("IRONMAN 70.3 Cartagena", &[2016]),
    ("IRONMAN 70.3 Chattanooga", &[2017, 2018, 2019]),
    ("IRONMAN 70.3 Coeur d'Alene", &[2024]),
    ("IRONMAN 70.3 Costa Navarino, Peloponnese, Greece", &[2024]),
    ("IRONMAN 70.3 Cozumel", &[2016]),
    ("IRONMAN 70.3 Des Moines", &[2021]),
    ("IRONMAN 70.3 Dubai", &[2016]),
    ("IRONMAN 70.3 Durban", &[2016]),
    ("IRONMAN 70.3 Eagleman", &[2019]),
    ("IRONMAN 70.3 Erkner", &[2024]),
    ("IRONMAN 70.3 Florianopolis", &[2024]),
    ("IRONMAN 70.3 Gulf Coast", &[2017, 2022]),
    ("IRONMAN 70.3 Hawaii", &[2024]),
    ("IRONMAN 70.3 Jonkoping European Championship", &[2021, 2024]),
    ("IRONMAN 70.3 Kenting", &[2024]),
    ("IRONMAN 70.3 Knokke-Heist", &[2023]),
    ("IRONMAN 70.3 Luxembourg", &[2016, 2017, 2021]),
    ("IRONMAN 70.3 Maine", &[2023]),
    ("IRONMAN 70.3 Melbourne", &[2023]),
    ("IRONMAN 70.3 Middle East Championship Bahrain", &[2015, 2018, 2019]),
    ("IRONMAN 70.3 Mont-Tremblant", &[2024]),
    ("IRONMAN 70.3 Muskoka", &[2018]),
    ("IRONMAN 70.3 Musselman", &[2022]),
    ("IRONMAN 70.3 New York", &[2023]),
    ("IRONMAN 70.3 Punta del Este", &[2015, 2016, 2019]),
    ("IRONMAN 70.3 Santa Cruz", &[2017, 2023]),
    ("IRONMAN 70.3 Switzerland", &[2024]),
    ("IRONMAN 70.3 Vichy", &[2022]),
    ("IRONMAN 70.3 Victoria", &[2016]),
    ("IRONMAN 70.3 Vietnam", &[2024]),
    ("IRONMAN 70.3 Waco", &[2018]),
    ("IRONMAN 70.3 Weymouth", &[2018, 2019, 2023]),
    ("IRONMAN 70.3 Western Australia", &[2017]),
    ("IRONMAN Calella-Barcelona", &[2021]),
    ("IRONMAN Cozumel Latin American Championship", &[2023]),
    ("IRONMAN Chattanooga", &[2018, 2024]),
    ("IRONMAN Florida", &[2014]),
    ("IRONMAN Hamburg", &[2018]),
    ("IRONMAN Lake Placid", &[2014]),
    ("IRONMAN Maryland", &[2016, 2023]),
    ("IRONMAN New Zealand", &[2012]),
    ("IRONMAN France", &[2019]),
    ("IRONMAN South Africa African Championship", &[2019, 2021, 2022, 2023]),
    ("IRONMAN Switzerland Thun", &[2021]),
    ("IRONMAN Taiwan", &[2018]),
    ("IRONMAN Texas North American Championship", &[2016]),
    ("IRONMAN Vitoria-Gasteiz", &[2021]),
    ("IRONMAN Western Australia Asia Pacific Championship", &[2017]),
];

/// Editions where the swim was current assisted.
pub const ASSISTED_SWIMS: &[(&str, &[i32])] = &[
    (
        "IRONMAN 70.3 Augusta",
        &[2009, 2010, 2011, 2012, 2013, 2014, 2015, 2016, 2018, 2019, 2021, 2022, 2023],
    ),
    ("IRONMAN 70.3 Cozumel", &[2013, 2018, 2020, 2022]),
    ("IRONMAN 70.3 Maine", &[2022, 2024]),
    ("IRONMAN 70.3 North Carolina", &[2017, 2019, 2021, 2022, 2024]),
    ("IRONMAN 70.3 Oregon", &[2021, 2022, 2023, 2024]),
    ("IRONMAN 70.3 Panama", &[2012, 2013, 2014, 2016, 2023, 2024]),
    ("IRONMAN 70.3 Cascais Portugal", &[2022, 2023]),
    ("IRONMAN 70.3 Washington Tri-Cities", &[2024]),
    ("IRONMAN Brazil", &[2010, 2012, 2018]),
    ("IRONMAN California", &[2022, 2023, 2024]),
    (
        "IRONMAN Chattanooga",
        &[2014, 2015, 2016, 2017, 2019, 2021, 2022, 2023],
    ),
    (
        "IRONMAN Cozumel Latin American Championship",
        &[2009, 2013, 2015, 2016, 2017, 2018, 2019, 2020, 2021, 2022, 2023, 2024],
    ),
    ("IRONMAN Maryland", &[2015, 2016]),
    ("IRONMAN Portugal-Cascais", &[2023]),
];

fn listed(list: &[(&str, &[i32])], race_name: &str, year: i32) -> bool {
    list.iter()
        .any(|(name, years)| *name == race_name && years.contains(&year))
}

pub fn is_shortened(race_name: &str, year: i32) -> bool {
    listed(SHORTENED_RACES, race_name, year)
}

pub fn is_assisted_swim(race_name: &str, year: i32) -> bool {
    listed(ASSISTED_SWIMS, race_name, year)
}

/// `hh:mm:ss`, or `mm:ss` under an hour.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, rest) = (total / 3600, total % 3600);
    let (minutes, seconds) = (rest / 60, rest % 60);
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

fn average(times: impl IntoIterator<Item = Duration>) -> Option<Duration> {
    let (total, count) = times
        .into_iter()
        .fold((Duration::ZERO, 0u32), |(total, count), t| (total + t, count + 1));
    (count > 0).then(|| total / count)
}

fn default_true() -> bool {
    true
}

/// Row selection shared by the result pages. Unset fields match everything.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResultFilter {
    pub race_type: Option<RaceType>,
    pub race: Option<String>,
    pub year: Option<i32>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub gender: Option<Gender>,
    pub division: Option<String>,
    #[serde(default = "default_true")]
    pub exclude_shortened: bool,
    #[serde(default)]
    pub exclude_assisted: bool,
}

impl Default for ResultFilter {
    fn default() -> Self {
        ResultFilter {
            race_type: None,
            race: None,
            year: None,
            year_from: None,
            year_to: None,
            gender: None,
            division: None,
            exclude_shortened: true,
            exclude_assisted: false,
        }
    }
}

impl ResultFilter {
    pub fn matches(&self, row: &CleanedResultRow) -> bool {
        if self.exclude_shortened && is_shortened(&row.race_name, row.year) {
            return false;
        }
        if self.exclude_assisted && is_assisted_swim(&row.race_name, row.year) {
            return false;
        }
        self.race_type.is_none_or(|t| row.race_type == Some(t))
            && self.race.as_ref().is_none_or(|r| *r == row.race_name)
            && self.year.is_none_or(|y| row.year == y)
            && self.year_from.is_none_or(|y| row.year >= y)
            && self.year_to.is_none_or(|y| row.year <= y)
            && self.gender.is_none_or(|g| row.gender == g)
            && self.division.as_ref().is_none_or(|d| *d == row.division)
    }

    pub fn apply<'a>(&self, rows: &'a [CleanedResultRow]) -> Vec<&'a CleanedResultRow> {
        rows.iter().filter(|row| self.matches(row)).collect()
    }

    pub fn validate(self) -> Result<Self, String> {
        if let Some((from, to)) = self
            .year_from
            .zip(self.year_to)
            .filter(|(from, to)| from > to)
        {
            return Err(format!("Year range {from}..{to} is empty"));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    Finish,
    Swim,
    Bike,
    Run,
}

impl Discipline {
    pub const ALL: [Discipline; 4] = [
        Discipline::Finish,
        Discipline::Swim,
        Discipline::Bike,
        Discipline::Run,
    ];

    pub fn time(&self, row: &CleanedResultRow) -> Option<Duration> {
        match self {
            Discipline::Finish => Some(row.finish_time),
            Discipline::Swim => row.swim_time,
            Discipline::Bike => row.bike_time,
            Discipline::Run => row.run_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub start_hours: f64,
    pub end_hours: f64,
    pub count: usize,
}

/// Equal-width bins over the observed range, last bin closed.
fn histogram(hours: &[f64], bins: usize) -> Vec<HistogramBin> {
    let Some(min) = hours.iter().copied().reduce(f64::min) else {
        return Vec::new();
    };
    let max = hours.iter().copied().fold(min, f64::max);
    let (lo, hi) = if max > min {
        (min, max)
    } else {
        (min - 0.5, max + 0.5)
    };
    let width = (hi - lo) / bins as f64;

    let mut counts = vec![0; bins];
    for h in hours {
        let idx = ((h - lo) / width).floor() as usize;
        counts[idx.min(bins - 1)] += 1;
    }
    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBin {
            start_hours: lo + width * i as f64,
            end_hours: lo + width * (i + 1) as f64,
            count,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearCount {
    pub year: i32,
    pub athletes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearAverage {
    pub year: i32,
    pub average_finish: String,
    pub average_finish_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WcStatistics {
    pub total_athletes: usize,
    pub finishers: usize,
    pub avg_finish_time: Option<String>,
    pub avg_swim_time: Option<String>,
    pub avg_bike_time: Option<String>,
    pub avg_run_time: Option<String>,
    pub finish_histogram: Vec<HistogramBin>,
    pub participation_by_year: Vec<YearCount>,
    pub avg_finish_by_year: Vec<YearAverage>,
}

/// Counts every selected row; time averages and the histogram use finishers only.
pub fn wc_statistics(rows: &[CleanedResultRow], filter: &ResultFilter) -> WcStatistics {
    let selected = filter.apply(rows);
    let finishers: Vec<_> = selected
        .iter()
        .copied()
        .filter(|r| r.designation == Designation::Finisher)
        .collect();

    let avg = |discipline: Discipline| {
        average(finishers.iter().filter_map(|r| discipline.time(r))).map(format_duration)
    };

    let finish_hours: Vec<f64> = finishers
        .iter()
        .map(|r| r.finish_time.as_secs_f64() / 3600.0)
        .collect();

    let mut participation: BTreeMap<i32, usize> = BTreeMap::new();
    for row in &selected {
        *participation.entry(row.year).or_insert(0) += 1;
    }
    let mut by_year: BTreeMap<i32, Vec<Duration>> = BTreeMap::new();
    for row in &finishers {
        by_year.entry(row.year).or_default().push(row.finish_time);
    }

    WcStatistics {
        total_athletes: selected.len(),
        finishers: finishers.len(),
        avg_finish_time: avg(Discipline::Finish),
        avg_swim_time: avg(Discipline::Swim),
        avg_bike_time: avg(Discipline::Bike),
        avg_run_time: avg(Discipline::Run),
        finish_histogram: histogram(&finish_hours, HISTOGRAM_BINS),
        participation_by_year: participation
            .into_iter()
            .map(|(year, athletes)| YearCount { year, athletes })
            .collect(),
        avg_finish_by_year: by_year
            .into_iter()
            .filter_map(|(year, times)| {
                average(times).map(|avg| YearAverage {
                    year,
                    average_finish: format_duration(avg),
                    average_finish_hours: avg.as_secs_f64() / 3600.0,
                })
            })
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Performance {
    pub rank: usize,
    pub athlete: String,
    pub year: i32,
    pub race_name: String,
    pub division: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestPerformances {
    pub finish: Vec<Performance>,
    pub swim: Vec<Performance>,
    pub bike: Vec<Performance>,
    pub run: Vec<Performance>,
}

fn top_performances(finishers: &[&CleanedResultRow], discipline: Discipline) -> Vec<Performance> {
    let mut timed: Vec<_> = finishers
        .iter()
        .filter_map(|r| discipline.time(r).map(|t| (t, *r)))
        .collect();
    timed.sort_by_key(|(t, _)| *t);
    timed
        .into_iter()
        .take(TOP_N)
        .enumerate()
        .map(|(i, (time, row))| Performance {
            rank: i + 1,
            athlete: row.athlete.clone(),
            year: row.year,
            race_name: row.race_name.clone(),
            division: row.division.clone(),
            time: format_duration(time),
        })
        .collect()
}

pub fn best_performances(rows: &[CleanedResultRow], filter: &ResultFilter) -> BestPerformances {
    let finishers: Vec<_> = filter
        .apply(rows)
        .into_iter()
        .filter(|r| r.designation == Designation::Finisher)
        .collect();
    BestPerformances {
        finish: top_performances(&finishers, Discipline::Finish),
        swim: top_performances(&finishers, Discipline::Swim),
        bike: top_performances(&finishers, Discipline::Bike),
        run: top_performances(&finishers, Discipline::Run),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RaceRank {
    pub rank: usize,
    pub race_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swim: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bike: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    pub average_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RaceRankings {
    pub finish: Vec<RaceRank>,
    pub swim: Vec<RaceRank>,
    pub bike: Vec<RaceRank>,
    pub run: Vec<RaceRank>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FastAndBrutal {
    pub fastest: RaceRankings,
    pub hardest: RaceRankings,
}

struct RaceAverages<'a> {
    race_name: &'a str,
    course: Option<&'a Race>,
    times: [Option<Duration>; 4],
}

impl RaceAverages<'_> {
    fn time(&self, discipline: Discipline) -> Option<Duration> {
        self.times[discipline as usize]
    }

    fn rank(&self, rank: usize, discipline: Discipline, time: Duration) -> RaceRank {
        let course = self.course;
        let terrain = |value: Option<&String>, shown: bool| value.filter(|_| shown).cloned();
        RaceRank {
            rank,
            race_name: self.race_name.to_string(),
            swim: terrain(
                course.and_then(|r| r.swim.as_ref()),
                matches!(discipline, Discipline::Finish | Discipline::Swim),
            ),
            bike: terrain(
                course.and_then(|r| r.bike.as_ref()),
                matches!(discipline, Discipline::Finish | Discipline::Bike),
            ),
            run: terrain(
                course.and_then(|r| r.run.as_ref()),
                matches!(discipline, Discipline::Finish | Discipline::Run),
            ),
            average_time: format_duration(time),
        }
    }
}

fn rank_races(averages: &[RaceAverages], discipline: Discipline, hardest: bool) -> Vec<RaceRank> {
    let mut timed: Vec<_> = averages
        .iter()
        .filter_map(|a| a.time(discipline).map(|t| (t, a)))
        .collect();
    timed.sort_by(|(ta, a), (tb, b)| {
        let by_time = if hardest { tb.cmp(ta) } else { ta.cmp(tb) };
        by_time.then_with(|| a.race_name.cmp(b.race_name))
    });
    timed
        .into_iter()
        .take(TOP_N)
        .enumerate()
        .map(|(i, (time, a))| a.rank(i + 1, discipline, time))
        .collect()
}

fn rankings(averages: &[RaceAverages], hardest: bool) -> RaceRankings {
    RaceRankings {
        finish: rank_races(averages, Discipline::Finish, hardest),
        swim: rank_races(averages, Discipline::Swim, hardest),
        bike: rank_races(averages, Discipline::Bike, hardest),
        run: rank_races(averages, Discipline::Run, hardest),
    }
}

/// Per-race average times of finishers, labelled with the catalog's course
/// terrain where the race name is known.
pub fn fast_and_brutal(
    rows: &[CleanedResultRow],
    catalog: &[Race],
    filter: &ResultFilter,
) -> FastAndBrutal {
    let mut courses: HashMap<&str, &Race> = HashMap::new();
    for race in catalog {
        courses.entry(race.name.as_str()).or_insert(race);
    }

    let mut by_race: BTreeMap<&str, Vec<&CleanedResultRow>> = BTreeMap::new();
    for row in filter.apply(rows) {
        if row.designation == Designation::Finisher {
            by_race.entry(row.race_name.as_str()).or_default().push(row);
        }
    }

    let averages: Vec<RaceAverages> = by_race
        .into_iter()
        .map(|(race_name, rows)| RaceAverages {
            race_name,
            course: courses.get(race_name).copied(),
            times: Discipline::ALL.map(|d| average(rows.iter().filter_map(|r| d.time(r)))),
        })
        .collect();

    FastAndBrutal {
        fastest: rankings(&averages, false),
        hardest: rankings(&averages, true),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SlotFilter {
    pub race_type: Option<RaceType>,
    pub division: Option<String>,
    pub wc_date: Option<NaiveDate>,
}

impl SlotFilter {
    pub fn matches(&self, athlete: &QualifiedAthlete) -> bool {
        self.race_type.is_none_or(|t| athlete.race_type == t)
            && self.division.as_ref().is_none_or(|d| *d == athlete.division)
            && self.wc_date.is_none_or(|d| athlete.wc_race_date == d)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotRow {
    pub race_name: String,
    pub division: String,
    pub slots_awarded: usize,
    pub cutoff_time: String,
}

/// Slots per qualifying race and division; the cutoff is the slowest
/// qualifying finish. Slowest cutoffs first.
pub fn wc_slots(qualifiers: &[QualifiedAthlete], filter: &SlotFilter) -> Vec<SlotRow> {
    let mut groups: BTreeMap<(&str, &str), (usize, Duration)> = BTreeMap::new();
    for athlete in qualifiers.iter().filter(|q| filter.matches(q)) {
        let entry = groups
            .entry((athlete.race_name.as_str(), athlete.division.as_str()))
            .or_insert((0, Duration::ZERO));
        entry.0 += 1;
        entry.1 = entry.1.max(athlete.finish_time);
    }

    let mut slots: Vec<_> = groups.into_iter().collect();
    slots.sort_by(|(ka, (_, ca)), (kb, (_, cb))| cb.cmp(ca).then_with(|| ka.cmp(kb)));
    slots
        .into_iter()
        .map(|((race_name, division), (count, cutoff))| SlotRow {
            race_name: race_name.to_string(),
            division: division.to_string(),
            slots_awarded: count,
            cutoff_time: format_duration(cutoff),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub race_types: Vec<RaceType>,
    pub races: Vec<String>,
    pub wc_races: Vec<String>,
    pub years: Vec<i32>,
    pub genders: Vec<Gender>,
    pub divisions: Vec<String>,
    /// Newest first.
    pub wc_dates: Vec<NaiveDate>,
}

pub fn filter_options(
    results: &[CleanedResultRow],
    wc: &[CleanedResultRow],
    qualifiers: &[QualifiedAthlete],
) -> FilterOptions {
    fn sorted<T: Ord>(values: impl Iterator<Item = T>) -> Vec<T> {
        values.collect::<BTreeSet<_>>().into_iter().collect()
    }

    let mut wc_dates = sorted(qualifiers.iter().map(|q| q.wc_race_date));
    wc_dates.reverse();

    FilterOptions {
        race_types: sorted(results.iter().filter_map(|r| r.race_type)),
        races: sorted(results.iter().map(|r| r.race_name.clone())),
        wc_races: sorted(wc.iter().map(|r| r.race_name.clone())),
        years: sorted(results.iter().map(|r| r.year)),
        genders: sorted(results.iter().map(|r| r.gender)),
        divisions: sorted(results.iter().map(|r| r.division.clone())),
        wc_dates,
    }
}
