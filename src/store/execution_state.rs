use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Execution state file name inside the run store.
pub const EXECUTION_STATE_FILE: &str = ".execution_state";

/// Record of the last run that actually executed gates.
///
/// Written by the run executor only; the stop hook reads it for throttling
/// and the executor reads it back for fix-only diffs and merge detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub last_run_completed_at: DateTime<Utc>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
    /// Snapshot of the full working tree when the run finished.
    #[serde(default)]
    pub working_tree_ref: Option<String>,
}

impl ExecutionState {
    pub fn path(store_dir: &Path) -> PathBuf {
        store_dir.join(EXECUTION_STATE_FILE)
    }

    /// Load the record, `None` if no run has completed yet.
    pub fn load(store_dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(store_dir);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read execution state: {}", path.display()))?;
        let state = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse execution state: {}", path.display()))?;
        Ok(Some(state))
    }

    /// Overwrite the record via a temp file and rename.
    pub fn save(&self, store_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(store_dir)
            .with_context(|| format!("Failed to create run store: {}", store_dir.display()))?;
        let path = Self::path(store_dir);
        let tmp = store_dir.join(format!("{}.tmp", EXECUTION_STATE_FILE));
        let json = serde_json::to_string_pretty(self).context("Failed to serialize execution state")?;
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write execution state: {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace execution state: {}", path.display()))?;
        Ok(())
    }

    pub fn remove(store_dir: &Path) -> Result<()> {
        let path = Self::path(store_dir);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove execution state: {}", path.display()))?;
        }
        Ok(())
    }

    /// Whether `interval` has passed since the last completed run.
    pub fn interval_elapsed(&self, now: DateTime<Utc>, interval: chrono::Duration) -> bool {
        now - self.last_run_completed_at >= interval
    }
}
