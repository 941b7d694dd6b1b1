//! Combiner: concatenates the per-race raw tables of each category.

use std::fmt::Display;
use std::path::Path;

use crate::config::Config;
use crate::store::{self, StoreError};
use crate::table::Table;
use crate::types::{RaceTier, Stage};

pub const RACES_COMBINED: &str = "all_races_combined.csv";
pub const WC_COMBINED: &str = "all_races_wc_combined.csv";
pub const ALL_COMBINED: &str = "all_races_and_wc_combined.csv";

/// Provenance column holding the source file stem.
pub const RACE_ID_COLUMN: &str = "Race Id";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CombineReport {
    pub files: usize,
    pub files_skipped: usize,
    pub rows_in: usize,
    pub rows_dropped: usize,
    pub rows_out: usize,
}

impl Display for CombineReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} file(s) ({} skipped), {} row(s) in, {} dropped, {} out",
            self.files, self.files_skipped, self.rows_in, self.rows_dropped, self.rows_out
        )
    }
}

#[derive(Debug, Default)]
pub struct CombineSummary {
    pub races: CombineReport,
    pub wc: CombineReport,
    pub all_rows: usize,
}

impl Display for CombineSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nCombine summary:")?;
        writeln!(f, "  Races: {}", self.races)?;
        writeln!(f, "  WC:    {}", self.wc)?;
        write!(f, "  Races and WC: {} row(s)", self.all_rows)
    }
}

/// Concatenates every CSV in `dir` in file-name order, tagging each row with
/// its file stem. Unreadable files are skipped; rows wider than their header
/// are dropped.
pub fn combine_dir(dir: &Path) -> Result<(Table, CombineReport), StoreError> {
    let mut report = CombineReport::default();
    let mut tables = Vec::new();

    for path in store::list_csv_files(dir)? {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        match store::read_table(&path) {
            Ok(read) => {
                let mut table = read.table;
                report.files += 1;
                report.rows_in += table.len() + read.dropped;
                report.rows_dropped += read.dropped;
                if read.dropped > 0 {
                    log::warn!(
                        "Dropped {} malformed row(s) from {}",
                        read.dropped,
                        path.display()
                    );
                }
                table.set_column(RACE_ID_COLUMN, &stem);
                tables.push(table);
            }
            Err(e) => {
                report.files_skipped += 1;
                log::warn!("Skipping {}: {}", path.display(), e);
            }
        }
    }

    let combined = Table::concat(tables);
    report.rows_out = combined.len();
    Ok((combined, report))
}

/// Combines the raw tables of one tier. A tier without a directory
/// contributes nothing.
fn combine_tier(config: &Config, tier: RaceTier) -> Result<(Table, CombineReport), StoreError> {
    let dir = config.paths.raw_dir(tier);
    if !dir.is_dir() {
        log::warn!("No {} results at {}", tier, dir.display());
        return Ok((Table::default(), CombineReport::default()));
    }
    let (table, report) = combine_dir(&dir)?;
    if table.is_empty() {
        log::warn!("No {} result rows in {}", tier, dir.display());
    }
    Ok((table, report))
}

pub fn run(config: &Config) -> Result<CombineSummary, StoreError> {
    store::require_input(&config.paths.raw_root(), Stage::Results)?;

    let (races, races_report) = combine_tier(config, RaceTier::Regular)?;
    log::info!("Races: {}", races_report);
    store::write_table(&config.paths.combined_path(RACES_COMBINED), &races)?;

    let (wc, wc_report) = combine_tier(config, RaceTier::WorldChampionship)?;
    log::info!("WC: {}", wc_report);
    store::write_table(&config.paths.combined_path(WC_COMBINED), &wc)?;

    let all = Table::concat([races, wc]);
    store::write_table(&config.paths.combined_path(ALL_COMBINED), &all)?;
    log::info!(
        "Combined tables written to {}",
        config.paths.combined_path("").display()
    );

    Ok(CombineSummary {
        races: races_report,
        wc: wc_report,
        all_rows: all.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_dir;
    use std::fs;

    fn raw_table(rows: usize, race: &str) -> String {
        let mut csv = String::from("Race Name,Race Date,Athlete,Finish Time\n");
        for i in 0..rows {
            csv.push_str(&format!("{race},2024 - October 26,Athlete {i},10:00:00\n"));
        }
        csv
    }

    #[test]
    fn test_combine_counts_and_tags_rows() {
        let dir = test_dir::fresh("combine-counts");
        fs::write(dir.join("im-texas.csv"), raw_table(50, "IRONMAN Texas")).unwrap();
        fs::write(dir.join("im-florida.csv"), raw_table(100, "IRONMAN Florida")).unwrap();

        let (table, report) = combine_dir(&dir).unwrap();

        assert_eq!(table.len(), 150);
        assert_eq!(report.files, 2);
        assert_eq!(report.rows_out, report.rows_in - report.rows_dropped);
        let ids: Vec<_> = table.records().map(|r| r.raw(RACE_ID_COLUMN).unwrap()).collect();
        assert!(ids[..100].iter().all(|id| *id == "im-florida"));
        assert!(ids[100..].iter().all(|id| *id == "im-texas"));
    }

    #[test]
    fn test_combine_tolerates_schema_drift_and_bad_rows() {
        let dir = test_dir::fresh("combine-drift");
        fs::write(
            dir.join("a.csv"),
            "Race Name,Athlete,Finish Time\nA,Ann,9:00:00\nA,Bob,9:30:00,extra\n",
        )
        .unwrap();
        fs::write(
            dir.join("b.csv"),
            "Race Name,Athlete,Division\nB,Cid,M40-44\n",
        )
        .unwrap();

        let (table, report) = combine_dir(&dir).unwrap();

        assert_eq!(report.rows_in, 3);
        assert_eq!(report.rows_dropped, 1);
        assert_eq!(report.rows_out, 2);
        assert_eq!(
            table.headers(),
            ["Race Name", "Athlete", "Finish Time", "Race Id", "Division"]
        );
        let rows: Vec<_> = table.records().collect();
        assert_eq!(rows[0].raw("Division"), Some(""));
        assert_eq!(rows[1].raw("Finish Time"), Some(""));
        assert_eq!(rows[1].raw(RACE_ID_COLUMN), Some("b"));
    }

    #[test]
    fn test_undecodable_rows_are_counted_as_dropped() {
        let dir = test_dir::fresh("combine-bad-bytes");
        let mut a = b"Race Name,Athlete\nA,Ann\n".to_vec();
        a.extend_from_slice(b"A,\xff\xfe\n");
        a.extend_from_slice(b"A,Bob\n");
        fs::write(dir.join("a.csv"), a).unwrap();
        fs::write(dir.join("b.csv"), "Race Name,Athlete\nB,Cid\n").unwrap();

        let (table, report) = combine_dir(&dir).unwrap();

        assert_eq!(report.files_skipped, 0);
        assert_eq!(report.rows_in, 4);
        assert_eq!(report.rows_dropped, 1);
        assert_eq!(report.rows_out, 3);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_run_treats_missing_wc_dir_as_empty() {
        let dir = test_dir::fresh("combine-no-wc");
        let mut config = Config::default();
        config.paths.data_dir = dir.clone();
        fs::create_dir_all(dir.join("results/races")).unwrap();
        fs::write(dir.join("results/races/im-florida.csv"), raw_table(3, "IRONMAN Florida")).unwrap();

        let summary = run(&config).unwrap();

        assert_eq!(summary.races.rows_out, 3);
        assert_eq!(summary.wc, CombineReport::default());
        assert_eq!(summary.all_rows, 3);
    }

    #[test]
    fn test_run_writes_three_outputs() {
        let dir = test_dir::fresh("combine-run");
        let mut config = Config::default();
        config.paths.data_dir = dir.clone();
        fs::create_dir_all(dir.join("results/races")).unwrap();
        fs::create_dir_all(dir.join("results/wc")).unwrap();
        fs::write(dir.join("results/races/im-florida.csv"), raw_table(3, "IRONMAN Florida")).unwrap();
        fs::write(
            dir.join("results/wc/im-world-championship.csv"),
            raw_table(2, "IRONMAN World Championship"),
        )
        .unwrap();

        let summary = run(&config).unwrap();

        assert_eq!(summary.races.rows_out, 3);
        assert_eq!(summary.wc.rows_out, 2);
        assert_eq!(summary.all_rows, 5);
        let all = store::read_table(&dir.join("results/combined").join(ALL_COMBINED)).unwrap();
        assert_eq!(all.table.len(), 5);
        assert!(dir.join("results/combined").join(WC_COMBINED).exists());
    }

    #[test]
    fn test_run_requires_scraped_results() {
        let dir = test_dir::fresh("combine-missing");
        let mut config = Config::default();
        config.paths.data_dir = dir;

        let err = run(&config).unwrap_err();
        assert!(err.to_string().contains("run `kona results` first"));
    }
}
