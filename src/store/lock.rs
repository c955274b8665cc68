//! Run lock: an atomically created marker file in the run store.
//!
//! The marker's existence means a run is in progress. There is no PID
//! tracking; a stale marker left by a killed process is removed by hand.

use crate::errors::LockError;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lock marker file name inside the run store.
pub const LOCK_FILE: &str = ".run.lock";

/// Held lock over one run store. Released on [`RunLock::release`] or drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    released: bool,
}

impl RunLock {
    /// Create the lock marker, failing if it already exists.
    ///
    /// The store directory is created if missing; nothing else is written,
    /// so a failed acquisition leaves the store as it was.
    pub fn acquire(store_dir: &Path) -> Result<Self, LockError> {
        let path = lock_path(store_dir);
        std::fs::create_dir_all(store_dir).map_err(|source| LockError::CreateFailed {
            path: path.clone(),
            source,
        })?;

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                // Informational only; nothing reads it back.
                if let Err(e) = writeln!(file, "{}", chrono::Utc::now().to_rfc3339()) {
                    debug!(path = %path.display(), error = %e, "failed to write lock timestamp");
                }
                debug!(path = %path.display(), "acquired run lock");
                Ok(Self {
                    path,
                    released: false,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(LockError::AlreadyLocked { path })
            }
            Err(source) => Err(LockError::CreateFailed { path, source }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the marker. Already-absent markers are not an error.
    pub fn release(mut self) {
        self.remove_marker();
    }

    fn remove_marker(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "released run lock"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove run lock"),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        self.remove_marker();
    }
}

/// Absolute path of the lock marker for a store.
pub fn lock_path(store_dir: &Path) -> PathBuf {
    let dir = std::path::absolute(store_dir).unwrap_or_else(|_| store_dir.to_path_buf());
    dir.join(LOCK_FILE)
}

/// Whether a run currently holds the store's lock.
pub fn is_locked(store_dir: &Path) -> bool {
    store_dir.join(LOCK_FILE).exists()
}
