//! CSV record source for the loader
//!
//! Expected header: `hostname, last_modified, last_execution, path,
//! file_size, file_executed, key_path`. Timestamps are `%m/%d/%y %H:%M:%S`
//! in UTC. Unparsable fields become missing; unreadable rows are skipped.
//! Input may be gzip or bzip2 compressed.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use bzip2::read::BzDecoder;
use clap::ValueEnum;
use flate2::read::GzDecoder;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use appcompat_core::RawRecord;

pub const TIMESTAMP_FORMAT: &str = "%m/%d/%y %H:%M:%S";

const REQUIRED_COLUMNS: &[&str] = &["hostname", "path"];

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Missing required column '{0}'")]
    MissingColumn(&'static str),
}

/// Input compression; `infer` picks by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Compression {
    #[default]
    Infer,
    Gzip,
    Bz2,
    None,
}

impl Compression {
    /// Resolve `Infer` against the path: `.gz`, `.bz2`, anything else plain
    pub fn resolve(self, path: &Path) -> Compression {
        match self {
            Compression::Infer => match path.extension().and_then(|e| e.to_str()) {
                Some(ext) if ext.eq_ignore_ascii_case("gz") => Compression::Gzip,
                Some(ext) if ext.eq_ignore_ascii_case("bz2") => Compression::Bz2,
                _ => Compression::None,
            },
            other => other,
        }
    }
}

/// Open the export, wrapping it in the matching decoder
pub fn open_input(path: &Path, compression: Compression) -> io::Result<Box<dyn Read + Send>> {
    let file = BufReader::new(File::open(path)?);
    Ok(match compression.resolve(path) {
        Compression::Gzip => Box::new(GzDecoder::new(file)),
        Compression::Bz2 => Box::new(BzDecoder::new(file)),
        _ => Box::new(file),
    })
}

#[derive(Debug, Default, Deserialize)]
struct CsvRow {
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    last_modified: Option<String>,
    #[serde(default)]
    last_execution: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    file_size: Option<String>,
    #[serde(default)]
    file_executed: Option<String>,
}

impl From<CsvRow> for RawRecord {
    fn from(row: CsvRow) -> Self {
        RawRecord {
            hostname: row.hostname,
            path: row.path,
            last_modified: row.last_modified.as_deref().and_then(parse_timestamp),
            last_executed: row.last_execution.as_deref().and_then(parse_timestamp),
            file_size: row.file_size.as_deref().and_then(|s| s.trim().parse().ok()),
            file_executed: row.file_executed,
        }
    }
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .ok()
        .map(|dt| dt.and_utc())
}

/// Iterator of raw records over a CSV reader
pub struct CsvRecordSource<R: Read> {
    rows: csv::DeserializeRecordsIntoIter<R, CsvRow>,
    skipped: u64,
}

impl<R: Read> CsvRecordSource<R> {
    pub fn new(reader: R) -> Result<Self, SourceError> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).trim(csv::Trim::Headers).from_reader(reader);

        let headers = rdr.headers()?.clone();
        for column in REQUIRED_COLUMNS {
            if !headers.iter().any(|h| h == *column) {
                return Err(SourceError::MissingColumn(column));
            }
        }

        Ok(Self {
            rows: rdr.into_deserialize(),
            skipped: 0,
        })
    }

    /// Rows the CSV reader could not decode
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl<R: Read> Iterator for CsvRecordSource<R> {
    type Item = RawRecord;

    fn next(&mut self) -> Option<RawRecord> {
        loop {
            match self.rows.next()? {
                Ok(row) => return Some(RawRecord::from(row)),
                Err(e) => {
                    self.skipped += 1;
                    tracing::warn!("Skipping unreadable row: {}", e);
                }
            }
        }
    }
}
