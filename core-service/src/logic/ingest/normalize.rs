//! Raw row validation and normalization

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};

use crate::logic::dataset::{RawRecord, Record};

/// `unc\server\share\...` as exported by some collectors
static UNC_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^unc\\").unwrap());

/// NT object-manager prefix `\??\c:\...`
static NT_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\\\?\?\\").unwrap());

/// Lower-case and canonicalize the path prefix
pub fn normalize_path(path: &str) -> String {
    let lower = path.trim().to_lowercase();
    let unc = UNC_PREFIX.replacen(&lower, 1, NoExpand(r"\\"));
    NT_PREFIX.replacen(&unc, 1, NoExpand("")).into_owned()
}

/// `Yes`/`True` → true, `No`/`False` → false, anything else unknown
pub fn parse_file_executed(value: Option<&str>) -> Option<bool> {
    let value = value?.trim();
    if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") || value.eq_ignore_ascii_case("no") {
        Some(false)
    } else {
        None
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Validate a raw row; `None` for rows missing hostname or path
///
/// Run order is left at 0 and assigned when the chunk is finalized.
pub fn normalize_record(raw: RawRecord) -> Option<Record> {
    let hostname = present(&raw.hostname)?.to_string();
    let path = normalize_path(present(&raw.path)?);

    Some(Record {
        hostname,
        path,
        last_modified: raw.last_modified,
        last_executed: raw.last_executed,
        file_size: raw.file_size.filter(|s| *s >= 0),
        file_executed: parse_file_executed(raw.file_executed.as_deref()),
        run_order: 0,
        class_label: Default::default(),
        predict: 0.0,
    })
}
