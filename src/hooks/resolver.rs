//! Stop-hook decision: precedence over guard conditions, then the run.
//!
//! First match wins:
//!
//! | Condition                                   | Decision | Status                 |
//! |---------------------------------------------|----------|------------------------|
//! | `stop_hook_active` in the input             | approve  | `stop_hook_active`     |
//! | no config file / unreadable config          | approve  | `no_config` / `error`  |
//! | hook disabled                               | approve  | `disabled`             |
//! | run lock held                               | approve  | `lock_conflict`        |
//! | new cycle within `run_interval_minutes`     | approve  | `interval_not_elapsed` |
//! | run outcome `failed`                        | block    | `failed`               |
//! | any other run outcome                       | approve  | outcome status         |
//! | run timed out / tooling unavailable         | approve  | `infrastructure_error` |
//! | anything else                               | approve  | `error`                |

use super::types::{StopHookInput, StopHookResponse, StopHookStatus};
use crate::config::GauntletConfig;
use crate::errors::{ConfigError, RunError};
use crate::orchestrator::{RunExecutor, RunOptions, RunOutcome, RunStatus};
use crate::review::AdapterRegistry;
use crate::store::{ExecutionState, RunStore};
use crate::tracker::git::GitTracker;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Runs the gates for the hook. Abstracted so the precedence rules can be
/// tested without git or reviewer CLIs.
#[async_trait]
pub trait GateRunner: Send + Sync {
    async fn run(&self, project_dir: &Path, config: GauntletConfig) -> Result<RunOutcome, RunError>;
}

/// Production runner: git tracker, configured adapters, default options.
pub struct ExecutorGateRunner;

#[async_trait]
impl GateRunner for ExecutorGateRunner {
    async fn run(&self, project_dir: &Path, config: GauntletConfig) -> Result<RunOutcome, RunError> {
        let vcs = GitTracker::new(project_dir).map_err(RunError::Vcs)?;
        let registry = AdapterRegistry::from_config(&config, project_dir);
        RunExecutor::new(project_dir, config, Arc::new(vcs), registry)
            .run(&RunOptions::default())
            .await
    }
}

/// Whether a new cycle would start too soon after the last completed run.
///
/// Never throttles while gate files exist: a verification iteration is
/// always allowed to proceed.
fn throttled(store: &RunStore, config: &GauntletConfig, now: DateTime<Utc>) -> bool {
    match store.has_gate_files() {
        Ok(false) => {}
        Ok(true) => return false,
        Err(e) => {
            warn!(error = %e, "could not read run store, not throttling");
            return false;
        }
    }
    let interval = chrono::Duration::minutes(config.stop_hook.run_interval_minutes as i64);
    match ExecutionState::load(store.dir()) {
        Ok(Some(state)) => !state.interval_elapsed(now, interval),
        Ok(None) => false,
        Err(e) => {
            warn!(error = %e, "ignoring unreadable execution state");
            false
        }
    }
}

fn from_outcome(outcome: RunOutcome) -> StopHookResponse {
    let message = if outcome.message.is_empty() {
        format!("Gauntlet run {}: {}", outcome.run_number, outcome.status)
    } else {
        outcome.message
    };
    let status = StopHookStatus::from(outcome.status);
    match outcome.status {
        RunStatus::Failed => StopHookResponse::block(status, message),
        _ => StopHookResponse::approve(status, message),
    }
}

fn from_error(err: RunError) -> StopHookResponse {
    if let Some(path) = err.lock_path() {
        return StopHookResponse::approve(
            StopHookStatus::LockConflict,
            format!("Another gauntlet run holds the lock ({}).", path.display()),
        );
    }
    if err.is_infrastructure() {
        warn!(error = %err, "gauntlet infrastructure error");
        return StopHookResponse::approve(
            StopHookStatus::InfrastructureError,
            format!("Gauntlet could not run its gates: {}", err),
        );
    }
    warn!(error = %err, "gauntlet run failed unexpectedly");
    StopHookResponse::approve(StopHookStatus::Error, format!("Gauntlet error: {}", err))
}

pub async fn resolve(
    input: &StopHookInput,
    project_dir: &Path,
    runner: &dyn GateRunner,
    now: DateTime<Utc>,
) -> StopHookResponse {
    if input.stop_hook_active {
        return StopHookResponse::approve(
            StopHookStatus::StopHookActive,
            "Stop hook already active for this stop; not running gates again.",
        );
    }

    let config = match GauntletConfig::load(project_dir) {
        Ok(config) => config,
        Err(ConfigError::NotFound { path }) => {
            debug!(path = %path.display(), "no configuration, approving");
            return StopHookResponse::approve(
                StopHookStatus::NoConfig,
                format!("No gauntlet configuration at {}.", path.display()),
            );
        }
        Err(e) => return StopHookResponse::approve(StopHookStatus::Error, e.to_string()),
    };

    if !config.stop_hook.enabled {
        return StopHookResponse::approve(StopHookStatus::Disabled, "Gauntlet stop hook is disabled.");
    }

    let store = RunStore::new(config.log_dir_path(project_dir));
    if store.is_locked() {
        return StopHookResponse::approve(
            StopHookStatus::LockConflict,
            "Another gauntlet run is in progress.",
        );
    }

    if throttled(&store, &config, now) {
        return StopHookResponse::approve(
            StopHookStatus::IntervalNotElapsed,
            format!(
                "Last gauntlet run finished less than {} minute(s) ago.",
                config.stop_hook.run_interval_minutes
            ),
        );
    }

    let secs = config.stop_hook.timeout_secs;
    info!(project = %project_dir.display(), "stop hook running gates");
    match tokio::time::timeout(Duration::from_secs(secs), runner.run(project_dir, config)).await {
        Ok(Ok(outcome)) => from_outcome(outcome),
        Ok(Err(e)) => from_error(e),
        Err(_) => StopHookResponse::approve(
            StopHookStatus::InfrastructureError,
            format!("Gauntlet run timed out after {}s.", secs),
        ),
    }
}
