//! The run executor and the state it derives from the run store.
//!
//! - [`rerun`] decides first run versus verification run and rebuilds the
//!   previous iteration's violations.
//! - [`retry`] caps the number of iterations per cycle.
//! - [`runner`] drives one invocation end to end under the run lock.

pub mod rerun;
pub mod retry;
pub mod runner;

pub use rerun::{PreviousState, RunKind, SlotHistory, SlotState, classify, load_previous_state};
pub use retry::{DEFAULT_MAX_RETRIES, RetryDecision, RetryGovernor};
pub use runner::RunExecutor;

use crate::gates::{GateResult, JobFilter};
use crate::tracker::ChangeRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Final label of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NoChanges,
    NoApplicableGates,
    Passed,
    /// Passed, but the agent skipped some violations.
    PassedWithWarnings,
    /// Gates failed and retries remain.
    Failed,
    /// Gates failed on the final attempt, or the cycle is already exhausted.
    RetryLimitExceeded,
    /// Some gates could not run (spawn failure, timeout, unreadable reviewer
    /// output) and none reported a failure.
    InfrastructureError,
}

impl RunStatus {
    pub fn code(&self) -> &'static str {
        match self {
            RunStatus::NoChanges => "no_changes",
            RunStatus::NoApplicableGates => "no_applicable_gates",
            RunStatus::Passed => "passed",
            RunStatus::PassedWithWarnings => "passed_with_warnings",
            RunStatus::Failed => "failed",
            RunStatus::RetryLimitExceeded => "retry_limit_exceeded",
            RunStatus::InfrastructureError => "infrastructure_error",
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunStatus::Failed | RunStatus::InfrastructureError => 1,
            RunStatus::RetryLimitExceeded => 2,
            _ => 0,
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, RunStatus::Passed | RunStatus::PassedWithWarnings)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// What a run did, for the CLI and the stop hook.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub run_number: u32,
    pub kind: RunKind,
    pub results: Vec<GateResult>,
    /// Human-readable summary; remediation instructions when failed.
    pub message: String,
    pub console_log: Option<PathBuf>,
}

impl RunOutcome {
    pub(crate) fn early(status: RunStatus, run_number: u32, kind: RunKind, message: impl Into<String>) -> Self {
        Self {
            status,
            run_number,
            kind,
            results: Vec::new(),
            message: message.into(),
            console_log: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Reference to diff against; the configured base branch when `None`.
    pub change_ref: Option<ChangeRef>,
    pub filter: JobFilter,
}
