//! Log file naming and run numbering.
//!
//! Every file a run writes ends in `.<run>.<ext>`. Job-level files are
//! `<jobId>.<run>.<ext>`; review slot files are
//! `<jobId>_<adapter>@<slot>.<run>.<ext>`. Job ids never contain `_` (see
//! [`crate::util::sanitize_segment`]) and adapter names never contain `@`, so
//! both splits are unambiguous.

use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Separator between a job id and the adapter name in review file names.
pub const JOB_ADAPTER_SEPARATOR: char = '_';

/// Separator between the adapter name and the 1-based review slot index.
pub const ADAPTER_DELIMITER: char = '@';

static NUMBERED_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<stem>.+)\.(?P<run>\d+)\.(?P<ext>[A-Za-z0-9]+)$")
        .expect("numbered file pattern is valid")
});

/// A parsed store file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogName {
    pub job_id: String,
    /// Adapter and 1-based slot index, for review slot files.
    pub slot: Option<(String, usize)>,
    pub run_number: u32,
    pub extension: String,
}

impl LogName {
    pub fn review_index(&self) -> Option<usize> {
        self.slot.as_ref().map(|(_, index)| *index)
    }

    pub fn adapter(&self) -> Option<&str> {
        self.slot.as_ref().map(|(adapter, _)| adapter.as_str())
    }
}

/// Run number suffix of a file name, if it has one.
pub fn parse_run_number(file_name: &str) -> Option<u32> {
    NUMBERED_FILE
        .captures(file_name)
        .and_then(|caps| caps["run"].parse().ok())
}

/// Parse a store file name into its components.
pub fn parse_log_name(file_name: &str) -> Option<LogName> {
    let caps = NUMBERED_FILE.captures(file_name)?;
    let run_number = caps["run"].parse().ok()?;
    let stem = &caps["stem"];
    let extension = caps["ext"].to_string();

    let (job_id, slot) = match stem.split_once(JOB_ADAPTER_SEPARATOR) {
        Some((job_id, rest)) => {
            let (adapter, index) = rest.rsplit_once(ADAPTER_DELIMITER)?;
            let index: usize = index.parse().ok()?;
            if adapter.is_empty() || index == 0 {
                return None;
            }
            (job_id.to_string(), Some((adapter.to_string(), index)))
        }
        None => (stem.to_string(), None),
    };

    Some(LogName {
        job_id,
        slot,
        run_number,
        extension,
    })
}

/// Build a store file name.
///
/// `slot` is `(adapter, review_index)` for review slot files.
pub fn build_file_name(
    job_id: &str,
    run_number: u32,
    slot: Option<(&str, usize)>,
    extension: &str,
) -> String {
    match slot {
        Some((adapter, index)) => format!(
            "{}{}{}{}{}.{}.{}",
            job_id, JOB_ADAPTER_SEPARATOR, adapter, ADAPTER_DELIMITER, index, run_number, extension
        ),
        None => format!("{}.{}.{}", job_id, run_number, extension),
    }
}

/// Build a store file path under `store_dir`.
pub fn build_path(
    store_dir: &Path,
    job_id: &str,
    run_number: u32,
    slot: Option<(&str, usize)>,
    extension: &str,
) -> PathBuf {
    store_dir.join(build_file_name(job_id, run_number, slot, extension))
}

/// Next run number for the store: highest suffix in the store root plus one.
///
/// Subdirectories (the archive in particular) are not scanned. Must be
/// called once per invocation, while holding the run lock.
pub fn next_run_number(store_dir: &Path) -> Result<u32> {
    if !store_dir.exists() {
        return Ok(1);
    }

    let mut highest = 0;
    for entry in std::fs::read_dir(store_dir)
        .with_context(|| format!("Failed to read run store: {}", store_dir.display()))?
    {
        let entry = entry.context("Failed to read run store entry")?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        if let Some(run) = entry.file_name().to_str().and_then(parse_run_number) {
            highest = highest.max(run);
        }
    }

    Ok(highest + 1)
}
