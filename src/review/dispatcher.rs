//! Review slot dispatch.
//!
//! A review gate with `num_reviews = N` has slots `1..=N`. Each invocation:
//!
//! 1. [`assign`] fills the slots round-robin from the healthy adapters, in
//!    preference order.
//! 2. [`plan_slots`] skips slots whose latest result passed (only when
//!    `N > 1`), always leaving at least one slot to run.
//! 3. [`run_review_job`] runs the remaining slots concurrently, writes a log
//!    and a JSON result per slot, and merges them into one [`GateResult`].
//!
//! Slot identity across runs is the index, not the adapter: a slot may be
//! served by a different adapter on the next iteration.

use super::adapter::ReviewAdapter;
use super::findings::{ReviewResultFile, Violation, ViolationStatus, parse_reviewer_output};
use crate::config::ReviewDefinition;
use crate::errors::GateError;
use crate::gates::{GateResult, GateStatus, Job, SlotResult};
use crate::gates::check::RESULT_MARKER;
use crate::orchestrator::rerun::{SlotHistory, SlotState};
use crate::store::sequence;
use futures::future::join_all;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Round-robin slot assignment: slot `i` gets `healthy[(i - 1) % len]`.
///
/// Returns `(review_index, adapter)` pairs in ascending slot order.
pub fn assign<T: Clone>(healthy: &[T], num_reviews: usize, review: &str) -> Result<Vec<(usize, T)>, GateError> {
    if healthy.is_empty() {
        return Err(GateError::NoHealthyAdapters {
            review: review.to_string(),
        });
    }
    Ok((1..=num_reviews)
        .map(|index| (index, healthy[(index - 1) % healthy.len()].clone()))
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotPlan<T> {
    Run { review_index: usize, adapter: T },
    Skip { review_index: usize, pass_iteration: u32 },
}

impl<T> SlotPlan<T> {
    pub fn review_index(&self) -> usize {
        match self {
            SlotPlan::Run { review_index, .. } | SlotPlan::Skip { review_index, .. } => *review_index,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, SlotPlan::Skip { .. })
    }
}

/// Apply skip-on-prior-pass to an assignment.
///
/// With a single slot nothing is skipped. If every slot would be skipped,
/// the lowest-index slot runs anyway.
pub fn plan_slots<T>(assignments: Vec<(usize, T)>, history: Option<&SlotHistory>) -> Vec<SlotPlan<T>> {
    let skip_allowed = assignments.len() > 1;
    let prior_passes: Vec<Option<u32>> = assignments
        .iter()
        .map(|(review_index, _)| {
            history
                .and_then(|h| h.get(review_index))
                .and_then(|slot| slot.pass_iteration)
                .filter(|_| skip_allowed)
        })
        .collect();
    let latch = !prior_passes.is_empty() && prior_passes.iter().all(Option::is_some);
    if latch {
        debug!("every slot passed previously, forcing the first slot to run");
    }

    assignments
        .into_iter()
        .zip(prior_passes)
        .enumerate()
        .map(|(position, ((review_index, adapter), prior_pass))| match prior_pass {
            Some(pass_iteration) if !(latch && position == 0) => SlotPlan::Skip {
                review_index,
                pass_iteration,
            },
            _ => SlotPlan::Run {
                review_index,
                adapter,
            },
        })
        .collect()
}

/// Merge slot outcomes: any `fail` fails the gate, otherwise any `error`
/// errors it. Skipped slots count as passed.
pub fn merge_verdict(slots: &[SlotResult]) -> GateStatus {
    if slots.iter().any(|s| s.status == GateStatus::Fail) {
        GateStatus::Fail
    } else if slots.iter().any(|s| s.status == GateStatus::Error) {
        GateStatus::Error
    } else {
        GateStatus::Pass
    }
}

const OUTPUT_FORMAT: &str = r#"## Output Format

Respond with a single JSON object:

```json
{
  "status": "pass|fail",
  "violations": [
    {
      "file": "path/to/file",
      "line": 42,
      "issue": "What is wrong",
      "priority": "critical|high|medium|low",
      "fix": "How to fix it"
    }
  ]
}
```

Report `"status": "pass"` with an empty `violations` list when nothing needs fixing."#;

/// Prompt for one slot: the configured prompt, the slot's previous
/// violations when there are any, and the expected output format.
pub fn build_slot_prompt(base: &str, previous: Option<&SlotState>) -> String {
    let mut prompt = base.trim_end().to_string();
    prompt.push_str("\n\n");

    if let Some(slot) = previous.filter(|s| !s.violations.is_empty()) {
        let _ = writeln!(prompt, "## Previous Iteration\n");
        let _ = writeln!(
            prompt,
            "Run {} of this review reported the violations below. Violations marked \
             `fixed` were addressed by the author: verify each fix and report it again \
             only if the problem remains. Violations marked `new` are still outstanding.\n",
            slot.run_number
        );
        for violation in &slot.violations {
            let _ = writeln!(prompt, "{}", describe_violation(violation));
        }
        prompt.push('\n');
    }

    prompt.push_str(OUTPUT_FORMAT);
    prompt.push('\n');
    prompt
}

fn describe_violation(v: &Violation) -> String {
    let status: String = v.status.clone().into();
    let mut line = format!("- [{}] {} ({}): {}", status, v.location(), v.priority, v.issue);
    if v.status == ViolationStatus::Fixed
        && let Some(ref note) = v.result
    {
        let _ = write!(line, " (author: {})", note);
    }
    line
}

/// Inputs shared by every slot of one review job.
pub struct ReviewRun<'a> {
    pub job: &'a Job,
    pub review: &'a ReviewDefinition,
    pub prompt: String,
    pub diff: String,
    pub store_dir: &'a Path,
    pub run_number: u32,
    pub history: Option<&'a SlotHistory>,
}

async fn run_slot(ctx: &ReviewRun<'_>, review_index: usize, adapter: Arc<dyn ReviewAdapter>) -> SlotResult {
    let name = adapter.name().to_string();
    let slot = Some((name.as_str(), review_index));
    let log_path = sequence::build_path(ctx.store_dir, &ctx.job.id, ctx.run_number, slot, "log");
    let json_path = sequence::build_path(ctx.store_dir, &ctx.job.id, ctx.run_number, slot, "json");

    let previous = ctx.history.and_then(|h| h.get(&review_index));
    let prompt = build_slot_prompt(&ctx.prompt, previous);
    let timeout = Duration::from_secs(ctx.review.timeout_secs);

    debug!(job = %ctx.job.id, slot = review_index, adapter = %name, "invoking reviewer");
    let start = Instant::now();
    let outcome = adapter.invoke(&prompt, &ctx.diff, timeout).await;

    let mut log = String::new();
    let _ = writeln!(log, "[gauntlet] job: {}", ctx.job.id);
    let _ = writeln!(log, "[gauntlet] adapter: {}", name);
    let _ = writeln!(log, "[gauntlet] slot: {}", review_index);
    let _ = writeln!(log, "[gauntlet] run: {}", ctx.run_number);
    log.push('\n');

    let (file, status, message) = match outcome {
        Ok(raw) => {
            log.push_str(&raw);
            if !log.ends_with('\n') {
                log.push('\n');
            }
            match parse_reviewer_output(&name, &raw) {
                Ok(file) => {
                    let status = if file.passed() { GateStatus::Pass } else { GateStatus::Fail };
                    let message = (!file.violations.is_empty())
                        .then(|| format!("{} violation(s)", file.violations.len()));
                    (file, status, message)
                }
                Err(e) => {
                    let _ = writeln!(log, "[gauntlet] error: {}", e);
                    (ReviewResultFile::errored(&name, raw), GateStatus::Error, Some(e.to_string()))
                }
            }
        }
        Err(e) => {
            let _ = writeln!(log, "[gauntlet] error: {}", e);
            (ReviewResultFile::errored(&name, ""), GateStatus::Error, Some(e.to_string()))
        }
    };
    let _ = writeln!(log, "{}{}", RESULT_MARKER, status);

    let log_path = match std::fs::write(&log_path, &log) {
        Ok(()) => Some(log_path),
        Err(e) => {
            warn!(path = %log_path.display(), error = %e, "failed to write review log");
            None
        }
    };
    let json_path = match file.save(&json_path) {
        Ok(()) => Some(json_path),
        Err(e) => {
            warn!(path = %json_path.display(), error = %e, "failed to write review result");
            None
        }
    };

    info!(
        job = %ctx.job.id,
        slot = review_index,
        adapter = %name,
        status = %status,
        duration_ms = start.elapsed().as_millis() as u64,
        "review slot finished"
    );

    SlotResult {
        review_index,
        adapter: Some(name),
        status,
        pass_iteration: None,
        violations: file.violations.len(),
        log_path,
        json_path,
        message,
    }
}

/// Run the planned slots of one review job concurrently and merge them.
pub async fn run_review_job(ctx: &ReviewRun<'_>, plans: Vec<SlotPlan<Arc<dyn ReviewAdapter>>>) -> GateResult {
    let start = Instant::now();

    let mut skipped = Vec::new();
    let mut runs = Vec::new();
    for plan in plans {
        match plan {
            SlotPlan::Skip {
                review_index,
                pass_iteration,
            } => skipped.push(SlotResult {
                review_index,
                adapter: None,
                status: GateStatus::SkippedPriorPass,
                pass_iteration: Some(pass_iteration),
                violations: 0,
                log_path: None,
                json_path: None,
                message: Some(format!("passed in run {}", pass_iteration)),
            }),
            SlotPlan::Run {
                review_index,
                adapter,
            } => runs.push(run_slot(ctx, review_index, adapter)),
        }
    }

    let mut slots: Vec<SlotResult> = join_all(runs).await;
    slots.extend(skipped);
    slots.sort_by_key(|s| s.review_index);

    let status = merge_verdict(&slots);
    let ran = slots.iter().filter(|s| s.status != GateStatus::SkippedPriorPass).count();
    let violations: usize = slots.iter().map(|s| s.violations).sum();

    let mut result = GateResult::new(ctx.job, status, start.elapsed());
    result.message = Some(format!(
        "{} of {} slot(s) ran, {} violation(s)",
        ran,
        slots.len(),
        violations
    ));
    result.slots = slots;
    result
}
