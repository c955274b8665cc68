//! `gauntlet clean`: archive the current cycle under the lock.

use anyhow::Result;
use console::style;
use gauntlet::config::GauntletConfig;
use gauntlet::errors::LockError;
use gauntlet::store::{ExecutionState, RunLock, RunStore};
use std::path::Path;
use std::process::ExitCode;

use crate::EXIT_LOCKED;

pub fn cmd_clean(project_dir: &Path) -> Result<ExitCode> {
    let config = GauntletConfig::load(project_dir)?;
    let store = RunStore::new(config.log_dir_path(project_dir));

    let lock = match RunLock::acquire(store.dir()) {
        Ok(lock) => lock,
        Err(e @ LockError::AlreadyLocked { .. }) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            return Ok(ExitCode::from(EXIT_LOCKED));
        }
        Err(e) => return Err(e.into()),
    };

    let moved = store.archive()?;
    ExecutionState::remove(store.dir())?;
    lock.release();

    println!(
        "Archived {} file(s) to {}",
        moved,
        style(store.archive_dir().display()).dim()
    );
    Ok(ExitCode::SUCCESS)
}
