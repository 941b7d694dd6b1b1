use std::{fmt::Display, str::FromStr, time::Duration};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::store::Tabular;

/// Pipeline stages in run order. Displays as the CLI subcommand name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Races,
    Results,
    Combine,
    Clean,
    Qualifiers,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Races,
        Stage::Results,
        Stage::Combine,
        Stage::Clean,
        Stage::Qualifiers,
    ];

    pub fn command(&self) -> &'static str {
        match self {
            Stage::Races => "races",
            Stage::Results => "results",
            Stage::Combine => "combine",
            Stage::Clean => "clean",
            Stage::Qualifiers => "qualifiers",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.command())
    }
}

#[derive(Debug, thiserror::Error)]
#[error(
    "Invalid race type '{0}'. Accepted values: 'ironman', '70.3', '5150', '4:18:4' or the full label"
)]
pub struct RaceTypeParseError(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RaceType {
    #[serde(rename = "IRONMAN")]
    Ironman,
    #[serde(rename = "IRONMAN 70.3")]
    Ironman703,
    #[serde(rename = "5150 Triathlon Series")]
    Series5150,
    #[serde(rename = "4:18:4")]
    FourEighteenFour,
}

impl RaceType {
    /// Classifies a race from its listing title.
    pub fn classify(title: &str) -> Self {
        if title.contains("5150") {
            RaceType::Series5150
        } else if title.contains("70.3") {
            RaceType::Ironman703
        } else if title.contains("4:18:4") {
            RaceType::FourEighteenFour
        } else {
            RaceType::Ironman
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RaceType::Ironman => "IRONMAN",
            RaceType::Ironman703 => "IRONMAN 70.3",
            RaceType::Series5150 => "5150 Triathlon Series",
            RaceType::FourEighteenFour => "4:18:4",
        }
    }

    /// Only full and half distance races award World Championship slots.
    pub fn awards_wc_slots(&self) -> bool {
        matches!(self, RaceType::Ironman | RaceType::Ironman703)
    }
}

impl FromStr for RaceType {
    type Err = RaceTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ironman" | "im" | "full" => Ok(RaceType::Ironman),
            "ironman 70.3" | "70.3" | "im703" | "half" => Ok(RaceType::Ironman703),
            "5150 triathlon series" | "5150" => Ok(RaceType::Series5150),
            "4:18:4" => Ok(RaceType::FourEighteenFour),
            _ => Err(RaceTypeParseError(s.to_string())),
        }
    }
}

impl Display for RaceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RaceTier {
    Regular,
    WorldChampionship,
}

impl RaceTier {
    pub fn classify(title: &str) -> Self {
        if title.to_lowercase().contains("world championship") {
            RaceTier::WorldChampionship
        } else {
            RaceTier::Regular
        }
    }

    /// Directory holding the raw per-race tables of this tier.
    pub fn dir_name(&self) -> &'static str {
        match self {
            RaceTier::Regular => "races",
            RaceTier::WorldChampionship => "wc",
        }
    }
}

impl Display for RaceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaceTier::Regular => write!(f, "Regular"),
            RaceTier::WorldChampionship => write!(f, "World Championship"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Race {
    #[serde(rename = "Race Id")]
    pub id: String,
    #[serde(rename = "Race Name")]
    pub name: String,
    #[serde(rename = "Race Type")]
    pub race_type: RaceType,
    #[serde(rename = "Tier")]
    pub tier: RaceTier,
    #[serde(rename = "Date")]
    pub date: Option<NaiveDate>,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "Swim")]
    pub swim: Option<String>,
    #[serde(rename = "Bike")]
    pub bike: Option<String>,
    #[serde(rename = "Run")]
    pub run: Option<String>,
}

impl Race {
    /// Results live on a sibling page of the race page, suffixed `-results`.
    pub fn results_url(&self) -> String {
        let url = self.url.trim().trim_end_matches('/');
        if url.ends_with("-results") {
            url.to_string()
        } else {
            format!("{url}-results")
        }
    }
}

impl Tabular for Race {
    const HEADERS: &'static [&'static str] = &[
        "Race Id",
        "Race Name",
        "Race Type",
        "Tier",
        "Date",
        "Location",
        "URL",
        "Swim",
        "Bike",
        "Run",
    ];
}

impl Display for Race {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}, {}", self.race_type, self.name, self.location)?;
        if let Some(date) = self.date {
            write!(f, " ({date})")?;
        }
        if self.tier == RaceTier::WorldChampionship {
            write!(f, " [WC]")?;
        }
        Ok(())
    }
}

/// Replaces every run of non-word characters with `_`.
pub fn sanitize_id(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_gap = false;
    for c in text.chars() {
        if c.is_alphanumeric() || c == '_' {
            out.push(c);
            in_gap = false;
        } else if !in_gap {
            out.push('_');
            in_gap = true;
        }
    }
    out
}

/// Race ids are the last path segment of the race URL, or the sanitized
/// name when the URL has no usable path.
pub fn race_id(url: &str, name: &str) -> String {
    let segment = url
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .map(|s| s.trim_end_matches("-results"))
        .filter(|s| !s.is_empty() && !s.contains(':') && !s.contains('.'));

    match segment {
        Some(segment) => segment.to_string(),
        None => sanitize_id(name),
    }
}

/// One dated edition of a race as offered by the results frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceEdition {
    pub id: String,
    pub label: String,
}

/// An athlete result as scraped, before any validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    #[serde(rename = "Race Name")]
    pub race_name: String,
    #[serde(rename = "Race Date")]
    pub race_date: String,
    #[serde(rename = "Athlete")]
    pub athlete: String,
    #[serde(rename = "Country")]
    pub country: Option<String>,
    #[serde(rename = "Designation")]
    pub designation: Option<String>,
    #[serde(rename = "Division")]
    pub division: Option<String>,
    #[serde(rename = "Div Rank")]
    pub div_rank: Option<String>,
    #[serde(rename = "Gender Rank")]
    pub gender_rank: Option<String>,
    #[serde(rename = "Overall Rank")]
    pub overall_rank: Option<String>,
    #[serde(rename = "Swim Time")]
    pub swim_time: Option<String>,
    #[serde(rename = "Transition 1")]
    pub transition1: Option<String>,
    #[serde(rename = "Bike Time")]
    pub bike_time: Option<String>,
    #[serde(rename = "Transition 2")]
    pub transition2: Option<String>,
    #[serde(rename = "Run Time")]
    pub run_time: Option<String>,
    #[serde(rename = "Finish Time")]
    pub finish_time: Option<String>,
}

impl Tabular for ResultRow {
    const HEADERS: &'static [&'static str] = &[
        "Race Name",
        "Race Date",
        "Athlete",
        "Country",
        "Designation",
        "Division",
        "Div Rank",
        "Gender Rank",
        "Overall Rank",
        "Swim Time",
        "Transition 1",
        "Bike Time",
        "Transition 2",
        "Run Time",
        "Finish Time",
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Designation {
    Finisher,
    #[serde(rename = "DNF")]
    Dnf,
    #[serde(rename = "DNS")]
    Dns,
    #[serde(rename = "DQ")]
    Dq,
}

impl Designation {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_uppercase().as_str() {
            "FINISHER" | "FIN" => Some(Designation::Finisher),
            "DNF" => Some(Designation::Dnf),
            "DNS" => Some(Designation::Dns),
            "DQ" | "DSQ" => Some(Designation::Dq),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn from_division(division: &str) -> Option<Self> {
        match division.chars().next() {
            Some('M') => Some(Gender::Male),
            Some('F') => Some(Gender::Female),
            _ => None,
        }
    }
}

impl Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gender::Male => write!(f, "Male"),
            Gender::Female => write!(f, "Female"),
        }
    }
}

/// Name-based athlete identity. Country narrows the match when both sides
/// know it; two different people sharing a name and country still collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AthleteKey {
    pub name: String,
    pub country: Option<String>,
}

impl AthleteKey {
    pub fn new(name: &str, country: Option<&str>) -> Self {
        Self {
            name: normalize_name(name),
            country: country.map(|c| c.trim().to_ascii_uppercase()),
        }
    }

    pub fn matches(&self, other: &AthleteKey) -> bool {
        self.name == other.name
            && match (&self.country, &other.country) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }
}

pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CleanedResultRow {
    #[serde(rename = "Race Id")]
    pub race_id: String,
    #[serde(rename = "Race Name")]
    pub race_name: String,
    #[serde(rename = "Race Type")]
    pub race_type: Option<RaceType>,
    #[serde(rename = "Race Date")]
    pub race_date: NaiveDate,
    #[serde(rename = "Year")]
    pub year: i32,
    #[serde(rename = "Athlete")]
    pub athlete: String,
    #[serde(rename = "Country")]
    pub country: Option<String>,
    #[serde(rename = "Division")]
    pub division: String,
    #[serde(rename = "Gender")]
    pub gender: Gender,
    #[serde(rename = "Designation")]
    pub designation: Designation,
    #[serde(rename = "Div Rank")]
    pub div_rank: Option<u32>,
    #[serde(rename = "Gender Rank")]
    pub gender_rank: Option<u32>,
    #[serde(rename = "Overall Rank")]
    pub overall_rank: Option<u32>,
    #[serde(rename = "Swim Time", with = "race_time::option")]
    pub swim_time: Option<Duration>,
    #[serde(rename = "Transition 1", with = "race_time::option")]
    pub transition1: Option<Duration>,
    #[serde(rename = "Bike Time", with = "race_time::option")]
    pub bike_time: Option<Duration>,
    #[serde(rename = "Transition 2", with = "race_time::option")]
    pub transition2: Option<Duration>,
    #[serde(rename = "Run Time", with = "race_time::option")]
    pub run_time: Option<Duration>,
    #[serde(rename = "Finish Time", with = "race_time")]
    pub finish_time: Duration,
}

impl CleanedResultRow {
    pub fn athlete_key(&self) -> AthleteKey {
        AthleteKey::new(&self.athlete, self.country.as_deref())
    }
}

impl Tabular for CleanedResultRow {
    const HEADERS: &'static [&'static str] = &[
        "Race Id",
        "Race Name",
        "Race Type",
        "Race Date",
        "Year",
        "Athlete",
        "Country",
        "Division",
        "Gender",
        "Designation",
        "Div Rank",
        "Gender Rank",
        "Overall Rank",
        "Swim Time",
        "Transition 1",
        "Bike Time",
        "Transition 2",
        "Run Time",
        "Finish Time",
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualifiedAthlete {
    #[serde(rename = "Athlete")]
    pub athlete: String,
    #[serde(rename = "Country")]
    pub country: Option<String>,
    #[serde(rename = "Division")]
    pub division: String,
    #[serde(rename = "Gender")]
    pub gender: Gender,
    #[serde(rename = "Race Type")]
    pub race_type: RaceType,
    #[serde(rename = "Race Id")]
    pub race_id: String,
    #[serde(rename = "Race Name")]
    pub race_name: String,
    #[serde(rename = "Qualifying Race Date")]
    pub qualifying_race_date: NaiveDate,
    #[serde(rename = "Div Rank")]
    pub div_rank: Option<u32>,
    #[serde(rename = "Overall Rank")]
    pub overall_rank: Option<u32>,
    #[serde(rename = "Finish Time", with = "race_time")]
    pub finish_time: Duration,
    #[serde(rename = "WC Race Id")]
    pub wc_race_id: String,
    #[serde(rename = "WC Race Name")]
    pub wc_race_name: String,
    #[serde(rename = "WC Race Date")]
    pub wc_race_date: NaiveDate,
    #[serde(rename = "Time Gap")]
    pub time_gap_days: i64,
}

impl Tabular for QualifiedAthlete {
    const HEADERS: &'static [&'static str] = &[
        "Athlete",
        "Country",
        "Division",
        "Gender",
        "Race Type",
        "Race Id",
        "Race Name",
        "Qualifying Race Date",
        "Div Rank",
        "Overall Rank",
        "Finish Time",
        "WC Race Id",
        "WC Race Name",
        "WC Race Date",
        "Time Gap",
    ];
}

/// Segment and finish times as `h:mm:ss` / `mm:ss` text.
pub mod race_time {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    /// Parses `h:mm:ss`, `hh:mm:ss` or `mm:ss`. Fractional seconds are
    /// truncated.
    pub fn parse(text: &str) -> Option<Duration> {
        let text = text.trim();
        let parts: Vec<&str> = text.split(':').collect();
        let (hours, minutes, seconds) = match parts.as_slice() {
            [h, m, s] => (*h, *m, *s),
            [m, s] => ("0", *m, *s),
            _ => return None,
        };
        let seconds = seconds.split('.').next()?;

        let hours: u64 = hours.trim().parse().ok()?;
        let minutes: u64 = minutes.trim().parse().ok()?;
        let seconds: u64 = seconds.trim().parse().ok()?;
        if minutes >= 60 || seconds >= 60 {
            return None;
        }
        let total = hours
            .checked_mul(3600)?
            .checked_add(minutes * 60 + seconds)?;
        Some(Duration::from_secs(total))
    }

    pub fn format(duration: Duration) -> String {
        let total = duration.as_secs();
        format!(
            "{:02}:{:02}:{:02}",
            total / 3600,
            (total % 3600) / 60,
            total % 60
        )
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse(&text).ok_or_else(|| D::Error::custom(format!("invalid race time '{text}'")))
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer, de::Error};

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(duration) => serializer.serialize_some(&super::format(*duration)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            let text: Option<String> = Option::deserialize(deserializer)?;
            match text.as_deref().map(str::trim) {
                None | Some("") => Ok(None),
                Some(text) => super::parse(text)
                    .map(Some)
                    .ok_or_else(|| D::Error::custom(format!("invalid race time '{text}'"))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_race_type_classification() {
        assert_eq!(RaceType::classify("IRONMAN Florida"), RaceType::Ironman);
        assert_eq!(
            RaceType::classify("IRONMAN 70.3 Dubai"),
            RaceType::Ironman703
        );
        assert_eq!(
            RaceType::classify("5150 Warsaw Triathlon"),
            RaceType::Series5150
        );
        assert_eq!(
            RaceType::classify("IRONMAN 4:18:4 Trilogy"),
            RaceType::FourEighteenFour
        );
    }

    #[test]
    fn test_race_type_from_str() {
        assert_eq!("70.3".parse::<RaceType>().unwrap(), RaceType::Ironman703);
        assert_eq!(
            "IRONMAN 70.3".parse::<RaceType>().unwrap(),
            RaceType::Ironman703
        );
        assert_eq!("ironman".parse::<RaceType>().unwrap(), RaceType::Ironman);
        assert!("sprint".parse::<RaceType>().is_err());
    }

    #[test]
    fn test_race_tier_classification() {
        assert_eq!(
            RaceTier::classify("IRONMAN 70.3 World Championship"),
            RaceTier::WorldChampionship
        );
        assert_eq!(RaceTier::classify("IRONMAN Hamburg"), RaceTier::Regular);
    }

    #[test]
    fn test_results_url_suffix() {
        let mut race = Race {
            id: "im-florida".to_string(),
            name: "IRONMAN Florida".to_string(),
            race_type: RaceType::Ironman,
            tier: RaceTier::Regular,
            date: None,
            location: "Panama City Beach, FL".to_string(),
            url: "https://www.ironman.com/im-florida".to_string(),
            swim: None,
            bike: None,
            run: None,
        };
        assert_eq!(
            race.results_url(),
            "https://www.ironman.com/im-florida-results"
        );

        race.url = "https://www.ironman.com/im-florida-results/".to_string();
        assert_eq!(
            race.results_url(),
            "https://www.ironman.com/im-florida-results"
        );
    }

    #[test]
    fn test_race_id_from_url_or_name() {
        assert_eq!(
            race_id("https://www.ironman.com/im703-dubai", "IRONMAN 70.3 Dubai"),
            "im703-dubai"
        );
        assert_eq!(
            race_id("https://www.ironman.com/im703-dubai-results/", "x"),
            "im703-dubai"
        );
        assert_eq!(
            race_id("https://www.ironman.com/", "IRONMAN 70.3 Coeur d'Alene"),
            "IRONMAN_70_3_Coeur_d_Alene"
        );
    }

    #[test]
    fn test_parse_race_time() {
        assert_eq!(
            race_time::parse("8:45:12"),
            Some(Duration::from_secs(8 * 3600 + 45 * 60 + 12))
        );
        assert_eq!(
            race_time::parse("08:45:12"),
            Some(Duration::from_secs(31512))
        );
        assert_eq!(race_time::parse("45:12"), Some(Duration::from_secs(2712)));
        assert_eq!(race_time::parse("00:00:00"), Some(Duration::ZERO));
        assert_eq!(race_time::parse("N/A"), None);
        assert_eq!(race_time::parse("--"), None);
        assert_eq!(race_time::parse("1:75:00"), None);
        assert_eq!(race_time::parse("6000000000000000:00:00"), None);
    }

    #[test]
    fn test_format_race_time() {
        assert_eq!(race_time::format(Duration::from_secs(31512)), "08:45:12");
        assert_eq!(race_time::format(Duration::from_secs(59)), "00:00:59");
        assert_eq!(
            race_time::parse(&race_time::format(Duration::from_secs(40_000))),
            Some(Duration::from_secs(40_000))
        );
    }

    #[test]
    fn test_athlete_key_matching() {
        let with_country = AthleteKey::new("Jan  Frodeno", Some("deu"));
        let without_country = AthleteKey::new("jan frodeno", None);
        let other_country = AthleteKey::new("Jan Frodeno", Some("AUT"));

        assert!(with_country.matches(&without_country));
        assert!(!with_country.matches(&other_country));
        assert_eq!(with_country.country.as_deref(), Some("DEU"));
    }

    #[test]
    fn test_gender_from_division() {
        assert_eq!(Gender::from_division("M40-44"), Some(Gender::Male));
        assert_eq!(Gender::from_division("FPRO"), Some(Gender::Female));
        assert_eq!(Gender::from_division("PC"), None);
    }
}
