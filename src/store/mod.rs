//! The run store: the log directory that is the single source of truth for
//! orchestration state.
//!
//! Layout:
//!
//! | File                                         | Written by                  |
//! |----------------------------------------------|-----------------------------|
//! | `<jobId>.<run>.log`                          | check jobs                  |
//! | `<jobId>_<adapter>@<slot>.<run>.{log,json}`  | review slots                |
//! | `console.<run>.log`                          | run summary                 |
//! | `.run.lock`                                  | [`lock::RunLock`]           |
//! | `.execution_state`                           | [`ExecutionState`]          |
//! | `previous/`                                  | [`RunStore::archive`]       |
//!
//! Nothing is cached in memory; every query rescans the directory.

pub mod execution_state;
pub mod lock;
pub mod sequence;

pub use execution_state::ExecutionState;
pub use lock::{LOCK_FILE, RunLock, is_locked, lock_path};
pub use sequence::{LogName, build_file_name, next_run_number, parse_log_name};

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Archive subdirectory holding the files of the last completed cycle.
pub const ARCHIVE_DIR: &str = "previous";

/// Job id used for the per-run console transcript.
pub const CONSOLE_JOB_ID: &str = "console";

/// Handle to a run store directory.
#[derive(Debug, Clone)]
pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.dir.join(ARCHIVE_DIR)
    }

    pub fn is_locked(&self) -> bool {
        is_locked(&self.dir)
    }

    /// Numbered files in the store root, sorted by name.
    pub fn numbered_files(&self) -> Result<Vec<(PathBuf, LogName)>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read run store: {}", self.dir.display()))?
        {
            let entry = entry.context("Failed to read run store entry")?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_str().and_then(parse_log_name) {
                files.push((entry.path(), name));
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }

    /// Gate log and result files, excluding console transcripts.
    pub fn gate_files(&self) -> Result<Vec<(PathBuf, LogName)>> {
        Ok(self
            .numbered_files()?
            .into_iter()
            .filter(|(_, name)| name.job_id != CONSOLE_JOB_ID)
            .collect())
    }

    /// Whether the current cycle has produced any gate files.
    pub fn has_gate_files(&self) -> Result<bool> {
        Ok(!self.gate_files()?.is_empty())
    }

    /// Path of this run's console transcript.
    pub fn console_path(&self, run_number: u32) -> PathBuf {
        sequence::build_path(&self.dir, CONSOLE_JOB_ID, run_number, None, "log")
    }

    /// Move the current cycle's files into the archive.
    ///
    /// Prior archive contents are deleted first. The lock marker and the
    /// execution state stay in place. Callers must hold the run lock.
    pub fn archive(&self) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let archive = self.archive_dir();
        if archive.exists() {
            std::fs::remove_dir_all(&archive)
                .with_context(|| format!("Failed to clear archive: {}", archive.display()))?;
        }
        std::fs::create_dir_all(&archive)
            .with_context(|| format!("Failed to create archive: {}", archive.display()))?;

        let mut moved = 0;
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read run store: {}", self.dir.display()))?
        {
            let entry = entry.context("Failed to read run store entry")?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name();
            if name.to_str().is_some_and(|n| n.starts_with('.')) {
                continue;
            }
            let target = archive.join(&name);
            std::fs::rename(entry.path(), &target).with_context(|| {
                format!("Failed to archive {}", entry.path().display())
            })?;
            debug!(file = %target.display(), "archived");
            moved += 1;
        }

        info!(files = moved, archive = %archive.display(), "archived run store");
        Ok(moved)
    }
}
