//! Typed error hierarchy for the gauntlet orchestrator.
//!
//! Four enums cover the failure classes a run can hit:
//! - `LockError`: contention over the run store
//! - `ConfigError`: missing or malformed `.gauntlet/config.yml`
//! - `GateError`: tooling failures while executing a single gate
//! - `RunError`: everything the run executor can surface to its caller

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the run store lock.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Another gauntlet run is in progress (lock file: {})", path.display())]
    AlreadyLocked { path: PathBuf },

    #[error("Failed to create lock file at {}: {source}", path.display())]
    CreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No gauntlet configuration found at {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Failed to read configuration at {}: {source}", path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration at {}: {source}", path.display())]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tooling errors raised while executing a gate.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("No healthy reviewer adapters available for review '{review}'")]
    NoHealthyAdapters { review: String },

    #[error("Failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("'{command}' exited with code {code}")]
    NonZeroExit { command: String, code: i32 },

    #[error("Could not parse reviewer output from {adapter}: {message}")]
    UnparseableOutput { adapter: String, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors surfaced by the run executor.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Version control error: {0}")]
    Vcs(#[source] anyhow::Error),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RunError {
    /// Whether this error means the tooling was unavailable rather than the
    /// code under review being wrong.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            RunError::Gate(
                GateError::NoHealthyAdapters { .. }
                    | GateError::SpawnFailed { .. }
                    | GateError::Timeout { .. }
            )
        )
    }

    /// Lock path when the run was rejected for contention.
    pub fn lock_path(&self) -> Option<&std::path::Path> {
        match self {
            RunError::Lock(LockError::AlreadyLocked { path }) => Some(path),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_error_already_locked_carries_path() {
        let err = LockError::AlreadyLocked {
            path: PathBuf::from("/repo/gauntlet_logs/.run.lock"),
        };
        assert!(err.to_string().contains("/repo/gauntlet_logs/.run.lock"));
    }

    #[test]
    fn run_error_exposes_lock_path() {
        let path = PathBuf::from("/tmp/logs/.run.lock");
        let err: RunError = LockError::AlreadyLocked { path: path.clone() }.into();
        assert_eq!(err.lock_path(), Some(path.as_path()));
        assert!(!err.is_infrastructure());
    }

    #[test]
    fn no_healthy_adapters_is_infrastructure() {
        let err: RunError = GateError::NoHealthyAdapters {
            review: "code-quality".to_string(),
        }
        .into();
        assert!(err.is_infrastructure());
        assert!(err.lock_path().is_none());
    }

    #[test]
    fn spawn_failed_is_infrastructure() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "sh not found");
        let err: RunError = GateError::SpawnFailed {
            command: "sh".to_string(),
            source: io_err,
        }
        .into();
        assert!(err.is_infrastructure());
    }

    #[test]
    fn config_errors_are_not_infrastructure() {
        let err: RunError = ConfigError::Invalid("no entry points".to_string()).into();
        assert!(!err.is_infrastructure());
        assert!(err.to_string().contains("no entry points"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&LockError::AlreadyLocked {
            path: PathBuf::from("x"),
        });
        assert_std_error(&ConfigError::Invalid("x".into()));
        assert_std_error(&GateError::Timeout {
            command: "x".into(),
            secs: 1,
        });
    }
}
