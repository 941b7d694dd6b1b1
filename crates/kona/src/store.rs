//! File handoff between pipeline stages.
//!
//! Every stage reads its predecessor's CSV files and writes its own. Writes go
//! to a temporary sibling first and are renamed into place, so a rerun
//! overwrites a previous output wholesale.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::table::{ReadTable, Table};
use crate::types::Stage;

/// Column layout of a typed record file. Kept in sync with the serde field
/// names so that an empty file still carries its header.
pub trait Tabular {
    const HEADERS: &'static [&'static str];
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error in {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Missing input {}: run `kona {stage}` first", .path.display())]
    MissingInput { path: PathBuf, stage: Stage },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn csv(path: &Path, source: csv::Error) -> Self {
        StoreError::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Fails with a "run the prior stage first" error when `path` is absent.
pub fn require_input(path: &Path, stage: Stage) -> Result<(), StoreError> {
    if path.exists() {
        Ok(())
    } else {
        Err(StoreError::MissingInput {
            path: path.to_path_buf(),
            stage,
        })
    }
}

pub fn ensure_dir(dir: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))
}

/// All `.csv` files directly inside `dir`, sorted by file name.
pub fn list_csv_files(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))? {
        let path = entry.map_err(|e| StoreError::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "csv") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn read_table(path: &Path) -> Result<ReadTable, StoreError> {
    let file = fs::File::open(path).map_err(|e| StoreError::io(path, e))?;
    Table::from_reader(file).map_err(|e| StoreError::csv(path, e))
}

pub fn write_table(path: &Path, table: &Table) -> Result<(), StoreError> {
    write_atomically(path, |file| {
        table
            .write_to(file)
            .map_err(|e| StoreError::csv(path, e))
    })
}

/// Reads typed records, skipping (and logging) rows that fail to
/// deserialize.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| StoreError::csv(path, e))?;
    let mut records = Vec::new();
    let mut skipped = 0usize;

    for (line, result) in reader.deserialize::<T>().enumerate() {
        match result {
            Ok(record) => records.push(record),
            Err(e) => {
                skipped += 1;
                log::warn!("Skipping row {} of {}: {}", line + 2, path.display(), e);
            }
        }
    }

    if skipped > 0 {
        log::warn!("Skipped {} unreadable row(s) in {}", skipped, path.display());
    }
    Ok(records)
}

pub fn write_records<T: Serialize + Tabular>(path: &Path, records: &[T]) -> Result<(), StoreError> {
    write_atomically(path, |file| {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer
            .write_record(T::HEADERS)
            .map_err(|e| StoreError::csv(path, e))?;
        for record in records {
            writer
                .serialize(record)
                .map_err(|e| StoreError::csv(path, e))?;
        }
        writer
            .flush()
            .map_err(|e| StoreError::io(path, e))
    })
}

fn write_atomically<F>(path: &Path, write: F) -> Result<(), StoreError>
where
    F: FnOnce(&mut fs::File) -> Result<(), StoreError>,
{
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
    let result = write(&mut file).and_then(|_| file.sync_all().map_err(|e| StoreError::io(&tmp, e)));
    drop(file);

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

#[cfg(test)]
pub(crate) mod test_dir {
    use std::path::PathBuf;

    /// A fresh directory under the system temp dir, unique per test name.
    pub fn fresh(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kona-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("Failed to create test dir");
        dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CleanedResultRow, QualifiedAthlete, Race, ResultRow};

    fn header_of<T: Serialize + Default>() -> Vec<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.serialize(T::default()).unwrap();
        let data = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        data.lines()
            .next()
            .unwrap()
            .split(',')
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_result_row_headers_match_serde_names() {
        assert_eq!(header_of::<ResultRow>(), ResultRow::HEADERS);
    }

    #[test]
    fn test_header_lists_are_complete() {
        assert_eq!(Race::HEADERS.len(), 10);
        assert_eq!(CleanedResultRow::HEADERS.len(), 19);
        assert_eq!(QualifiedAthlete::HEADERS.len(), 15);
    }

    #[test]
    fn test_empty_record_file_keeps_header() {
        let dir = test_dir::fresh("store-empty");
        let path = dir.join("nested").join("empty.csv");

        write_records::<ResultRow>(&path, &[]).expect("Failed to write");

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim_end(), ResultRow::HEADERS.join(","));
        assert!(!dir.join("nested").join("empty.csv.tmp").exists());
    }

    #[test]
    fn test_records_overwrite_not_append() {
        let dir = test_dir::fresh("store-overwrite");
        let path = dir.join("race.csv");
        let row = ResultRow {
            race_name: "IRONMAN Florida".to_string(),
            race_date: "2023 - November 04".to_string(),
            athlete: "Ann Smith".to_string(),
            ..Default::default()
        };

        write_records(&path, &[row.clone(), row.clone()]).unwrap();
        write_records(&path, std::slice::from_ref(&row)).unwrap();

        let back: Vec<ResultRow> = read_records(&path).unwrap();
        assert_eq!(back, vec![row]);
    }

    #[test]
    fn test_require_input_names_prior_stage() {
        let dir = test_dir::fresh("store-missing");
        let err = require_input(&dir.join("nope.csv"), Stage::Races).unwrap_err();
        assert!(err.to_string().contains("run `kona races` first"));
    }

    #[test]
    fn test_list_csv_files_sorted() {
        let dir = test_dir::fresh("store-list");
        fs::write(dir.join("b.csv"), "A\n").unwrap();
        fs::write(dir.join("a.csv"), "A\n").unwrap();
        fs::write(dir.join("notes.txt"), "x").unwrap();

        let files = list_csv_files(&dir).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
    }
}
