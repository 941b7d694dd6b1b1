//! Markup knowledge for the race listing and the embedded results grid.
//! Everything above this module works on typed rows.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::types::{Race, RaceEdition, RaceTier, RaceType, ResultRow, race_id};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Missing element: {0}")]
    MissingElement(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Failed to parse date: {0}")]
    DateParse(String),
}

macro_rules! selector {
    ($name:ident, $css:literal) => {
        static $name: LazyLock<Selector> = LazyLock::new(|| {
            Selector::parse($css).expect(concat!("invalid selector: ", $css))
        });
    };
}

selector!(SEL_RACE_CARD, ".highlighted-card-wrapper");
selector!(SEL_CARD_TITLE, "h2");
selector!(SEL_CARD_LOCATION, ".country-flag-formatter .label");
selector!(SEL_CARD_LINK, "a.button--secondary");
selector!(SEL_CARD_DATE, "time");
selector!(SEL_ICON_FIELD, ".icon-field-item");
selector!(SEL_ICON_LABEL, ".icon-field-label");
selector!(SEL_ICON_VALUE, ".icon-field-value");
selector!(SEL_LISTING_NEXT, "a.text-link--chevron-down[rel='next']");
selector!(SEL_RESULTS_FRAME, "iframe.coh-iframe");
selector!(SEL_EDITION_OPTION, "ul[role='listbox'] li[role='option']");
selector!(SEL_RESULT_ROW, "div[role='row'][data-rowindex]");
selector!(SEL_GRID_NEXT, "button[aria-label='Go to next page']");

static RE_EDITION_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})\s*-\s*([A-Za-z]+)\s+(\d{1,2})").expect("invalid regex: edition label")
});

static RE_CARD_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z]{3,})\.?\s+(\d{1,2}),?\s+(\d{4})").expect("invalid regex: card date")
});

// Result grid cells, keyed by the grid's `data-field` attribute.
selector!(CELL_ATHLETE, "div[data-field='athlete']");
selector!(CELL_COUNTRY, "div[data-field='countryiso2']");
selector!(CELL_DESIGNATION, "div[data-field='wtc_designation']");
selector!(CELL_DIVISION, "div[data-field='wtc_agegroupname']");
selector!(CELL_DIV_RANK, "div[data-field='wtc_finishrankgroup']");
selector!(CELL_GENDER_RANK, "div[data-field='wtc_finishrankgender']");
selector!(CELL_OVERALL_RANK, "div[data-field='wtc_finishrankoverall']");
selector!(CELL_SWIM, "div[data-field='wtc_swimtimeformatted']");
selector!(CELL_T1, "div[data-field='wtc_transition1timeformatted']");
selector!(CELL_BIKE, "div[data-field='wtc_biketimeformatted']");
selector!(CELL_T2, "div[data-field='wtc_transitiontime2formatted']");
selector!(CELL_RUN, "div[data-field='wtc_runtimeformatted']");
selector!(CELL_FINISH, "div[data-field='wtc_finishtimeformatted']");

fn elem_text(element: ElementRef) -> String {
    element.text().collect::<String>()
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_month(month: &str) -> Result<u32, ParseError> {
    let month = month.to_lowercase();
    let prefix = month.get(..3).unwrap_or(&month);
    match prefix {
        "jan" => Ok(1),
        "feb" => Ok(2),
        "mar" => Ok(3),
        "apr" => Ok(4),
        "may" => Ok(5),
        "jun" => Ok(6),
        "jul" => Ok(7),
        "aug" => Ok(8),
        "sep" => Ok(9),
        "oct" => Ok(10),
        "nov" => Ok(11),
        "dec" => Ok(12),
        _ => Err(ParseError::DateParse(format!("Unknown month: {}", month))),
    }
}

fn ymd(year: &str, month: &str, day: &str) -> Result<NaiveDate, ParseError> {
    let year: i32 = year
        .parse()
        .map_err(|_| ParseError::DateParse(format!("Invalid year: {}", year)))?;
    let month = parse_month(month)?;
    let day: u32 = day
        .parse()
        .map_err(|_| ParseError::DateParse(format!("Invalid day: {}", day)))?;
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| ParseError::DateParse(format!("Invalid date: {}-{}-{}", year, month, day)))
}

fn parse_card_date(card: ElementRef) -> Option<NaiveDate> {
    let time = card.select(&SEL_CARD_DATE).next()?;
    if let Some(date) = time
        .value()
        .attr("datetime")
        .and_then(|dt| NaiveDate::parse_from_str(dt.get(..10)?, "%Y-%m-%d").ok())
    {
        return Some(date);
    }
    let text = elem_text(time);
    let caps = RE_CARD_DATE.captures(&text)?;
    ymd(&caps[3], &caps[1], &caps[2]).ok()
}

pub fn absolute_url(base: &str, href: &str) -> String {
    let href = href.trim();
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if let Some(rest) = href.strip_prefix("//") {
        format!("https://{}", rest)
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            href.trim_start_matches('/')
        )
    }
}

/// Listing pages are numbered from 1; the site's pager counts from 0.
pub fn race_listing_url(base: &str, page: u32) -> String {
    let base = base.trim_end_matches('/');
    if page <= 1 {
        format!("{}/races", base)
    } else {
        format!("{}/races?page={}", base, page - 1)
    }
}

/// Grid page `page` (from 0) of one edition inside the results frame.
pub fn edition_results_url(frame_url: &str, edition_id: &str, page: u32, rows: u32) -> String {
    let separator = if frame_url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}race={}&page={}&pageSize={}",
        frame_url, separator, edition_id, page, rows
    )
}

#[derive(Debug, Default)]
pub struct CatalogPage {
    pub races: Vec<Race>,
    pub has_next: bool,
    /// Cards that could not be turned into a race.
    pub skipped: usize,
}

pub fn parse_race_catalog(html: &str, base_url: &str) -> CatalogPage {
    let document = Html::parse_document(html);
    let mut page = CatalogPage {
        has_next: document.select(&SEL_LISTING_NEXT).next().is_some(),
        ..Default::default()
    };

    for card in document.select(&SEL_RACE_CARD) {
        match parse_race_card(card, base_url) {
            Ok(race) => page.races.push(race),
            Err(e) => {
                page.skipped += 1;
                log::warn!("Skipping race card: {}", e);
            }
        }
    }

    page
}

fn parse_race_card(card: ElementRef, base_url: &str) -> Result<Race, ParseError> {
    let name = card
        .select(&SEL_CARD_TITLE)
        .next()
        .map(|e| normalize_whitespace(&elem_text(e)))
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ParseError::MissingField("race title".to_string()))?;

    let url = card
        .select(&SEL_CARD_LINK)
        .next()
        .and_then(|a| a.value().attr("href"))
        .filter(|href| !href.trim().is_empty())
        .map(|href| absolute_url(base_url, href))
        .ok_or_else(|| ParseError::MissingField(format!("race link for '{}'", name)))?;

    let location = card
        .select(&SEL_CARD_LOCATION)
        .next()
        .map(|e| normalize_whitespace(&elem_text(e)))
        .unwrap_or_default();

    let (mut swim, mut bike, mut run) = (None, None, None);
    for item in card.select(&SEL_ICON_FIELD) {
        let label = item
            .select(&SEL_ICON_LABEL)
            .next()
            .map(|e| elem_text(e).to_lowercase());
        let value = item
            .select(&SEL_ICON_VALUE)
            .next()
            .map(|e| normalize_whitespace(&elem_text(e)))
            .filter(|s| !s.is_empty());
        let (Some(label), Some(value)) = (label, value) else {
            continue;
        };

        if label.contains("swim") {
            swim = Some(value);
        } else if label.contains("bike") {
            bike = Some(value);
        } else if label.contains("run") {
            run = Some(value);
        }
    }

    Ok(Race {
        id: race_id(&url, &name),
        race_type: RaceType::classify(&name),
        tier: RaceTier::classify(&name),
        date: parse_card_date(card),
        name,
        location,
        url,
        swim,
        bike,
        run,
    })
}

/// Source of the iframe that hosts the results grid on a race results page.
pub fn parse_results_frame(html: &str, base_url: &str) -> Result<String, ParseError> {
    let document = Html::parse_document(html);
    document
        .select(&SEL_RESULTS_FRAME)
        .next()
        .and_then(|frame| frame.value().attr("src"))
        .filter(|src| !src.trim().is_empty())
        .map(|src| absolute_url(base_url, src))
        .ok_or_else(|| ParseError::MissingElement("results frame".to_string()))
}

/// Dated editions offered by the results frame's race selector, in page
/// order and without duplicates.
pub fn parse_race_editions(html: &str) -> Vec<RaceEdition> {
    let document = Html::parse_document(html);
    let mut editions: Vec<RaceEdition> = Vec::new();

    for option in document.select(&SEL_EDITION_OPTION) {
        let text = normalize_whitespace(&elem_text(option));
        let label = RE_EDITION_LABEL
            .find(&text)
            .map(|m| m.as_str().to_string())
            .unwrap_or(text);
        if label.is_empty() {
            continue;
        }
        let id = option
            .value()
            .attr("data-value")
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| label.clone());

        if !editions.iter().any(|e| e.id == id) {
            editions.push(RaceEdition { id, label });
        }
    }

    editions
}

#[derive(Debug, Default)]
pub struct ResultPage {
    pub rows: Vec<ResultRow>,
    pub has_next: bool,
}

/// Reads one page of the results grid. Rows without an athlete name are
/// skipped.
pub fn parse_result_page(html: &str, race_name: &str, race_date: &str) -> ResultPage {
    let document = Html::parse_document(html);
    let mut rows = Vec::new();

    for row in document.select(&SEL_RESULT_ROW) {
        let cell = |sel: &Selector| -> Option<String> {
            row.select(sel)
                .next()
                .map(|e| normalize_whitespace(&elem_text(e)))
                .filter(|s| !s.is_empty())
        };

        let Some(athlete) = cell(&CELL_ATHLETE) else {
            log::warn!(
                "Skipping result row {} of {}: no athlete",
                row.value().attr("data-rowindex").unwrap_or("?"),
                race_name
            );
            continue;
        };

        rows.push(ResultRow {
            race_name: race_name.to_string(),
            race_date: race_date.to_string(),
            athlete,
            country: cell(&CELL_COUNTRY),
            designation: cell(&CELL_DESIGNATION),
            division: cell(&CELL_DIVISION),
            div_rank: cell(&CELL_DIV_RANK),
            gender_rank: cell(&CELL_GENDER_RANK),
            overall_rank: cell(&CELL_OVERALL_RANK),
            swim_time: cell(&CELL_SWIM),
            transition1: cell(&CELL_T1),
            bike_time: cell(&CELL_BIKE),
            transition2: cell(&CELL_T2),
            run_time: cell(&CELL_RUN),
            finish_time: cell(&CELL_FINISH),
        });
    }

    let has_next = document.select(&SEL_GRID_NEXT).next().is_some_and(|button| {
        let class = button.value().attr("class").unwrap_or("");
        !class.contains("Mui-disabled") && button.value().attr("disabled").is_none()
    });

    ResultPage { rows, has_next }
}
