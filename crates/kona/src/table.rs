//! Header-keyed string tables for stages that must tolerate schema drift.

use std::collections::HashMap;
use std::io;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    index: HashMap<String, usize>,
}

/// A table read from disk plus the number of rows that could not be mapped
/// onto its header.
#[derive(Debug)]
pub struct ReadTable {
    pub table: Table,
    pub dropped: usize,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        let mut table = Self {
            headers,
            rows: Vec::new(),
            index: HashMap::new(),
        };
        table.reindex();
        table
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, header) in self.headers.iter().enumerate() {
            self.index.entry(header.clone()).or_insert(i);
        }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Appends a row, padding short rows with empty fields. Rows wider than
    /// the header are rejected.
    pub fn push_row(&mut self, mut row: Vec<String>) -> bool {
        if row.len() > self.headers.len() {
            return false;
        }
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
        true
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.rows.iter().map(move |row| Record { table: self, row })
    }

    /// Adds `name` as the last column if missing and sets it to `value` on
    /// every row.
    pub fn set_column(&mut self, name: &str, value: &str) {
        let idx = match self.column(name) {
            Some(idx) => idx,
            None => {
                self.headers.push(name.to_string());
                self.reindex();
                for row in &mut self.rows {
                    row.push(String::new());
                }
                self.headers.len() - 1
            }
        };
        for row in &mut self.rows {
            row[idx] = value.to_string();
        }
    }

    pub fn retain_columns<F: Fn(&str) -> bool>(&mut self, keep: F) {
        let keep: Vec<bool> = self.headers.iter().map(|h| keep(h)).collect();
        let filter = |values: &mut Vec<String>| {
            let mut i = 0;
            values.retain(|_| {
                let kept = keep[i];
                i += 1;
                kept
            });
        };
        filter(&mut self.headers);
        for row in &mut self.rows {
            filter(row);
        }
        self.reindex();
    }

    pub fn drop_empty_columns(&mut self) {
        let non_empty: Vec<String> = self
            .headers
            .iter()
            .enumerate()
            .filter(|(i, _)| self.rows.iter().any(|row| !row[*i].trim().is_empty()))
            .map(|(_, h)| h.clone())
            .collect();
        self.retain_columns(|h| non_empty.iter().any(|n| n == h));
    }

    pub fn trim_headers(&mut self) {
        for header in &mut self.headers {
            *header = header.trim().to_string();
        }
        self.reindex();
    }

    /// Concatenates tables row-wise. The resulting header is the union of all
    /// headers in first-seen order; columns a table lacks are left empty.
    pub fn concat<I: IntoIterator<Item = Table>>(tables: I) -> Table {
        let tables: Vec<Table> = tables.into_iter().collect();
        let mut headers: Vec<String> = Vec::new();
        for table in &tables {
            for header in &table.headers {
                if !headers.contains(header) {
                    headers.push(header.clone());
                }
            }
        }

        let mut combined = Table::new(headers);
        for table in tables {
            let positions: Vec<usize> = table
                .headers
                .iter()
                .map(|h| combined.index[h])
                .collect();
            for row in table.rows {
                let mut out = vec![String::new(); combined.headers.len()];
                for (value, &pos) in row.into_iter().zip(&positions) {
                    out[pos] = value;
                }
                combined.rows.push(out);
            }
        }
        combined
    }

    pub fn from_reader<R: io::Read>(reader: R) -> Result<ReadTable, csv::Error> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(reader);

        let headers = reader
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();
        let mut table = Table::new(headers);
        let mut dropped = 0;

        for record in reader.records() {
            let record = match record {
                Ok(record) => record,
                Err(e) if e.is_io_error() => return Err(e),
                Err(e) => {
                    log::debug!("Dropping undecodable row: {e}");
                    dropped += 1;
                    continue;
                }
            };
            if !table.push_row(record.iter().map(str::to_string).collect()) {
                dropped += 1;
            }
        }

        Ok(ReadTable { table, dropped })
    }

    pub fn write_to<W: io::Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    table: &'a Table,
    row: &'a [String],
}

impl<'a> Record<'a> {
    /// The raw field, `None` when the column is missing.
    pub fn raw(&self, column: &str) -> Option<&'a str> {
        self.table.column(column).map(|i| self.row[i].as_str())
    }
}
