//! First-run versus verification-run detection and previous-iteration state.
//!
//! Everything here is rebuilt from the run store on each call. Reading the
//! same unchanged store twice yields the same [`PreviousState`].

use crate::gates::GateStatus;
use crate::gates::check::parse_result_marker;
use crate::review::findings::{ReviewResultFile, Violation, ViolationStatus};
use crate::store::{LogName, RunStore};
use crate::util::tail_lines;
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Lines of a failing check log carried into the next iteration.
const FAILURE_CONTEXT_LINES: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    /// No gate files: the cycle starts fresh.
    FirstRun,
    /// Gate files from an earlier iteration exist: verify the fixes.
    Rerun,
}

/// Latest recorded state of one review slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotState {
    /// Violations still relevant: `fixed` ones to verify and outstanding ones.
    pub violations: Vec<Violation>,
    /// Run in which the slot passed, if its latest result is a pass.
    pub pass_iteration: Option<u32>,
    /// Run number of the result file this state came from.
    pub run_number: u32,
}

impl SlotState {
    pub fn passed(&self) -> bool {
        self.pass_iteration.is_some()
    }
}

/// Slot states of one review job, keyed by 1-based slot index.
pub type SlotHistory = BTreeMap<usize, SlotState>;

/// Tail of the latest log of a check that did not pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckFailure {
    pub run_number: u32,
    pub status: GateStatus,
    pub log_path: PathBuf,
    pub context: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviousState {
    pub reviews: BTreeMap<String, SlotHistory>,
    pub check_failures: BTreeMap<String, CheckFailure>,
    /// Violations the agent chose to skip in the latest results.
    pub skipped_violations: usize,
}

impl PreviousState {
    pub fn slot_history(&self, job_id: &str) -> Option<&SlotHistory> {
        self.reviews.get(job_id)
    }
}

/// `Rerun` iff the store root holds at least one gate file.
pub fn classify(store: &RunStore) -> Result<RunKind> {
    Ok(if store.has_gate_files()? {
        RunKind::Rerun
    } else {
        RunKind::FirstRun
    })
}

/// Keep `fixed` for verification and `new` as outstanding; drop `skipped`.
fn retain_violation(v: &Violation) -> bool {
    match &v.status {
        ViolationStatus::Fixed | ViolationStatus::New => true,
        ViolationStatus::Skipped => false,
        ViolationStatus::Other(status) => {
            warn!(file = %v.file, status = %status, "unrecognized violation status, treating as outstanding");
            true
        }
    }
}

/// Rebuild the previous iteration from the latest file of each job and slot.
pub fn load_previous_state(store: &RunStore) -> Result<PreviousState> {
    let mut latest_reviews: BTreeMap<(String, usize), (PathBuf, LogName)> = BTreeMap::new();
    let mut latest_checks: BTreeMap<String, (PathBuf, LogName)> = BTreeMap::new();

    for (path, name) in store.gate_files()? {
        match (name.review_index(), name.extension.as_str()) {
            (Some(index), "json") => {
                let key = (name.job_id.clone(), index);
                let newer = latest_reviews
                    .get(&key)
                    .is_none_or(|(_, current)| name.run_number > current.run_number);
                if newer {
                    latest_reviews.insert(key, (path, name));
                }
            }
            (None, "log") => {
                let newer = latest_checks
                    .get(&name.job_id)
                    .is_none_or(|(_, current)| name.run_number > current.run_number);
                if newer {
                    latest_checks.insert(name.job_id.clone(), (path, name));
                }
            }
            _ => {}
        }
    }

    let mut state = PreviousState::default();

    for ((job_id, index), (path, name)) in latest_reviews {
        let result = match ReviewResultFile::load(&path) {
            Ok(result) => result,
            Err(e) => {
                // An unreadable result counts as a slot that has not passed.
                warn!(path = %path.display(), error = %e, "ignoring unreadable review result");
                continue;
            }
        };

        state.skipped_violations += result
            .violations
            .iter()
            .filter(|v| v.status == ViolationStatus::Skipped)
            .count();

        let slot = SlotState {
            pass_iteration: result.passed().then_some(name.run_number),
            violations: result.violations.into_iter().filter(retain_violation).collect(),
            run_number: name.run_number,
        };
        debug!(job = %job_id, slot = index, passed = slot.passed(), "loaded slot state");
        state.reviews.entry(job_id).or_default().insert(index, slot);
    }

    for (job_id, (path, name)) in latest_checks {
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable check log");
                continue;
            }
        };
        let status = parse_result_marker(&content).unwrap_or(GateStatus::Error);
        if status.is_passing() {
            continue;
        }
        state.check_failures.insert(
            job_id,
            CheckFailure {
                run_number: name.run_number,
                status,
                log_path: path,
                context: tail_lines(&content, FAILURE_CONTEXT_LINES),
            },
        );
    }

    Ok(state)
}
