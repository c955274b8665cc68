//! One gauntlet invocation, start to finish.
//!
//! Order of operations inside [`RunExecutor::run`]:
//!
//! 1. acquire the run lock (nothing else touches the store before this)
//! 2. archive a cycle whose branch has since been merged
//! 3. classify the run and rebuild the previous iteration
//! 4. compute the run number once
//! 5. resolve changes and select jobs
//! 6. consult the retry governor
//! 7. assign review slots, then run every job concurrently
//! 8. write the console transcript and the execution state
//! 9. archive the cycle if everything passed
//! 10. release the lock

use super::rerun::{self, PreviousState, RunKind};
use super::retry::{RetryDecision, RetryGovernor};
use super::{RunOptions, RunOutcome, RunStatus};
use crate::config::{EntryPoint, GauntletConfig};
use crate::errors::{ConfigError, RunError};
use crate::gates::check::{self, CheckContext};
use crate::gates::{self, GateResult, GateStatus, Job, JobKind, JobSpec};
use crate::review::adapter::{AdapterRegistry, ReviewAdapter};
use crate::review::dispatcher::{self, ReviewRun, SlotPlan};
use crate::store::{ExecutionState, RunLock, RunStore, next_run_number};
use crate::tracker::{ChangeRef, ChangeSet, VersionControl, short_sha};
use chrono::Utc;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const REMEDIATION: &str = "Fix the reported issues. In each review result file, set a violation's \
\"status\" to \"fixed\" once it is addressed, or to \"skipped\" with a reason in \"result\" if it \
should not be fixed. Then run gauntlet again.";

enum PreparedJob<'a> {
    Check(&'a Job, &'a crate::config::CheckDefinition),
    Review(ReviewRun<'a>, Vec<SlotPlan<Arc<dyn ReviewAdapter>>>),
}

pub struct RunExecutor {
    project_dir: PathBuf,
    config: GauntletConfig,
    vcs: Arc<dyn VersionControl>,
    registry: AdapterRegistry,
}

impl RunExecutor {
    pub fn new(
        project_dir: impl Into<PathBuf>,
        config: GauntletConfig,
        vcs: Arc<dyn VersionControl>,
        registry: AdapterRegistry,
    ) -> Self {
        Self {
            project_dir: project_dir.into(),
            config,
            vcs,
            registry,
        }
    }

    pub fn config(&self) -> &GauntletConfig {
        &self.config
    }

    pub fn store(&self) -> RunStore {
        RunStore::new(self.config.log_dir_path(&self.project_dir))
    }

    /// Run the gates once under the run lock.
    pub async fn run(&self, options: &RunOptions) -> Result<RunOutcome, RunError> {
        let store = self.store();
        let lock = RunLock::acquire(store.dir())?;
        let result = self.run_locked(&store, options).await;
        lock.release();
        result
    }

    /// Jobs the current changes would trigger, without running anything.
    pub fn detect(&self, options: &RunOptions) -> Result<(ChangeSet, Vec<Job>), RunError> {
        let change_ref = self.change_ref(options);
        let changes = self.changes(&change_ref, &gates::entry_prefixes(&self.config))?;
        let jobs = gates::select_jobs(&self.config, &changes, &options.filter);
        Ok((changes, jobs))
    }

    async fn run_locked(&self, store: &RunStore, options: &RunOptions) -> Result<RunOutcome, RunError> {
        self.reset_if_merged(store)?;

        let kind = rerun::classify(store)?;
        let previous = match kind {
            RunKind::Rerun => rerun::load_previous_state(store)?,
            RunKind::FirstRun => PreviousState::default(),
        };
        let run_number = next_run_number(store.dir())?;
        info!(run = run_number, ?kind, "starting run");

        let change_ref = self.change_ref(options);
        let prefixes = gates::entry_prefixes(&self.config);
        let changes = self.changes(&change_ref, &prefixes)?;
        if changes.is_empty() {
            return Ok(RunOutcome::early(
                RunStatus::NoChanges,
                run_number,
                kind,
                format!("No changes against {}.", change_ref),
            ));
        }

        let jobs = gates::select_jobs(&self.config, &changes, &options.filter);
        if jobs.is_empty() {
            return Ok(RunOutcome::early(
                RunStatus::NoApplicableGates,
                run_number,
                kind,
                format!("{} changed file(s) matched no configured gates.", changes.files.len()),
            ));
        }

        let governor = RetryGovernor::new(self.config.max_retries);
        let final_attempt = match governor.evaluate(run_number) {
            RetryDecision::Proceed { final_attempt } => final_attempt,
            RetryDecision::Exhausted => {
                warn!(run = run_number, "retry limit reached, refusing to run");
                return Ok(RunOutcome::early(
                    RunStatus::RetryLimitExceeded,
                    run_number,
                    kind,
                    governor.exhausted_message(run_number),
                ));
            }
        };

        let fix_only = match kind {
            RunKind::Rerun => self.fix_only_changes(store, &prefixes),
            RunKind::FirstRun => None,
        };
        let prepared = self
            .prepare_jobs(&jobs, &previous, &changes, fix_only.as_ref(), store.dir(), run_number)
            .await?;

        let check_ctx = CheckContext {
            project_dir: &self.project_dir,
            store_dir: store.dir(),
            run_number,
        };
        let futures: Vec<BoxFuture<'_, GateResult>> = prepared
            .into_iter()
            .map(|job| match job {
                PreparedJob::Check(job, def) => check::run_check(job, def, &check_ctx).boxed(),
                PreparedJob::Review(run, plans) => {
                    async move { dispatcher::run_review_job(&run, plans).await }.boxed()
                }
            })
            .collect();
        let results = join_all(futures).await;

        let all_passed = results.iter().all(|r| r.status.is_passing());
        let gate_failed = results.iter().any(|r| r.status == GateStatus::Fail);
        let status = match (all_passed, gate_failed, final_attempt) {
            (true, _, _) if previous.skipped_violations > 0 => RunStatus::PassedWithWarnings,
            (true, _, _) => RunStatus::Passed,
            // Only tooling errors: nothing in the code to fix.
            (false, false, _) => RunStatus::InfrastructureError,
            (false, true, true) => RunStatus::RetryLimitExceeded,
            (false, true, false) => RunStatus::Failed,
        };
        let message = summarize(status, &results, &previous, run_number, &governor);

        let console_log = write_console(store, run_number, kind, &change_ref, &changes, &results, status, &message);
        self.record_execution(store);

        if status.is_passed() {
            store.archive()?;
        }

        info!(run = run_number, status = %status, jobs = results.len(), "run finished");
        Ok(RunOutcome {
            status,
            run_number,
            kind,
            results,
            message,
            console_log,
        })
    }

    fn change_ref(&self, options: &RunOptions) -> ChangeRef {
        options
            .change_ref
            .clone()
            .unwrap_or_else(|| ChangeRef::BaseBranch(self.config.base_branch.clone()))
    }

    /// Changes with the run store itself filtered out.
    fn changes(&self, reference: &ChangeRef, prefixes: &[PathBuf]) -> Result<ChangeSet, RunError> {
        let changes = self.vcs.changes(reference, prefixes).map_err(RunError::Vcs)?;
        Ok(self.without_store(changes))
    }

    fn without_store(&self, changes: ChangeSet) -> ChangeSet {
        let log_dir = self.config.log_dir_path(&self.project_dir);
        let Ok(relative) = log_dir.strip_prefix(&self.project_dir) else {
            return changes;
        };
        changes.filtered(|p| !p.starts_with(relative))
    }

    /// Changes since the last run's working tree snapshot.
    fn fix_only_changes(&self, store: &RunStore, prefixes: &[PathBuf]) -> Option<ChangeSet> {
        let state = match ExecutionState::load(store.dir()) {
            Ok(state) => state?,
            Err(e) => {
                warn!(error = %e, "ignoring unreadable execution state");
                return None;
            }
        };
        let snapshot = state.working_tree_ref?;
        match self.vcs.changes(&ChangeRef::Snapshot(snapshot.clone()), prefixes) {
            Ok(changes) => {
                debug!(snapshot = short_sha(&snapshot), files = changes.files.len(), "fix-only changes");
                Some(self.without_store(changes))
            }
            Err(e) => {
                warn!(snapshot = short_sha(&snapshot), error = %e, "snapshot diff failed, reviewers get the full diff");
                None
            }
        }
    }

    fn entry_point(&self, job: &Job) -> Option<&EntryPoint> {
        self.config.entry_points.iter().find(|e| e.path == job.entry_point)
    }

    /// Diff a review job shows its reviewers: fix-only when available and
    /// non-empty for the job's entry point, the full diff otherwise.
    fn review_diff(&self, job: &Job, changes: &ChangeSet, fix_only: Option<&ChangeSet>) -> String {
        let Some(entry) = self.entry_point(job) else {
            return changes.unified_diff();
        };
        let scoped = |set: &ChangeSet| set.filtered(|p| gates::entry_matches(entry, p));
        if let Some(fix_only) = fix_only.map(scoped).filter(|set| !set.is_empty()) {
            return fix_only.unified_diff();
        }
        scoped(changes).unified_diff()
    }

    async fn prepare_jobs<'a>(
        &'a self,
        jobs: &'a [Job],
        previous: &'a PreviousState,
        changes: &ChangeSet,
        fix_only: Option<&ChangeSet>,
        store_dir: &'a Path,
        run_number: u32,
    ) -> Result<Vec<PreparedJob<'a>>, RunError> {
        let mut prepared = Vec::with_capacity(jobs.len());

        for job in jobs {
            match &job.spec {
                JobSpec::Check(def) => prepared.push(PreparedJob::Check(job, def)),
                JobSpec::Review(def) => {
                    let prompt = def.load_prompt(&self.project_dir).map_err(|e| {
                        ConfigError::Invalid(format!("review '{}': {:#}", job.name, e))
                    })?;
                    let healthy = self.registry.healthy(&self.config.preference_for(def)).await;
                    let assignments = dispatcher::assign(&healthy, def.num_reviews, &job.name)?;
                    let history = previous.slot_history(&job.id);
                    let plans = dispatcher::plan_slots(assignments, history);

                    prepared.push(PreparedJob::Review(
                        ReviewRun {
                            job,
                            review: def,
                            prompt,
                            diff: self.review_diff(job, changes, fix_only),
                            store_dir,
                            run_number,
                            history,
                        },
                        plans,
                    ));
                }
            }
        }

        Ok(prepared)
    }

    /// Archive the cycle when its branch was merged into the base branch and
    /// the repository has since moved to another branch.
    fn reset_if_merged(&self, store: &RunStore) -> Result<(), RunError> {
        let state = match ExecutionState::load(store.dir()) {
            Ok(Some(state)) => state,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable execution state");
                return Ok(());
            }
        };
        let (Some(branch), Some(commit)) = (state.branch.as_deref(), state.commit.as_deref()) else {
            return Ok(());
        };
        let base = &self.config.base_branch;
        if is_same_branch(branch, base) {
            return Ok(());
        }
        if self.vcs.current_branch().ok().flatten().as_deref() == Some(branch) {
            return Ok(());
        }

        match self.vcs.is_ancestor(commit, base) {
            Ok(true) => {
                info!(branch = %branch, base = %base, "previous branch was merged, resetting run state");
                store.archive()?;
                ExecutionState::remove(store.dir())?;
            }
            Ok(false) => {}
            Err(e) => debug!(error = %e, "could not check whether the previous branch was merged"),
        }
        Ok(())
    }

    fn record_execution(&self, store: &RunStore) {
        let working_tree_ref = match self.vcs.snapshot_working_tree() {
            Ok(sha) => Some(sha),
            Err(e) => {
                warn!(error = %e, "failed to snapshot working tree");
                None
            }
        };
        let state = ExecutionState {
            last_run_completed_at: Utc::now(),
            branch: self.vcs.current_branch().ok().flatten(),
            commit: self.vcs.head_sha(),
            working_tree_ref,
        };
        if let Err(e) = state.save(store.dir()) {
            warn!(error = %e, "failed to save execution state");
        }
    }
}

/// `main` and `origin/main` name the same branch.
fn is_same_branch(branch: &str, base: &str) -> bool {
    branch == base || base.rsplit_once('/').is_some_and(|(_, name)| name == branch)
}

fn failure_details(results: &[GateResult], previous: &PreviousState) -> String {
    let mut out = String::new();
    for result in results.iter().filter(|r| !r.status.is_passing()) {
        match result.kind {
            JobKind::Check => {
                let _ = write!(out, "- {} [{}]", result.job_id, result.status);
                if let Some(ref message) = result.message {
                    let _ = write!(out, ": {}", message);
                }
                if let Some(ref path) = result.log_path {
                    let _ = write!(out, "\n  log: {}", path.display());
                }
                if let Some(failure) = previous.check_failures.get(&result.job_id) {
                    let _ = write!(
                        out,
                        "\n  previous result: {} in run {} (log: {})",
                        failure.status,
                        failure.run_number,
                        failure.log_path.display()
                    );
                    if !failure.context.trim().is_empty() {
                        out.push_str("\n  previous output:");
                        for line in failure.context.lines() {
                            let _ = write!(out, "\n    {}", line);
                        }
                    }
                }
                out.push('\n');
            }
            JobKind::Review => {
                let _ = writeln!(out, "- {} [{}]", result.job_id, result.status);
                for slot in result.slots.iter().filter(|s| !s.status.is_passing()) {
                    let _ = write!(
                        out,
                        "  - slot {} ({}): {}",
                        slot.review_index,
                        slot.adapter.as_deref().unwrap_or("-"),
                        slot.status
                    );
                    if let Some(ref message) = slot.message {
                        let _ = write!(out, ", {}", message);
                    }
                    if let Some(ref path) = slot.json_path {
                        let _ = write!(out, "\n    result: {}", path.display());
                    }
                    out.push('\n');
                }
            }
        }
    }
    out
}

fn summarize(
    status: RunStatus,
    results: &[GateResult],
    previous: &PreviousState,
    run_number: u32,
    governor: &RetryGovernor,
) -> String {
    match status {
        RunStatus::Passed => format!("All {} gate(s) passed.", results.len()),
        RunStatus::PassedWithWarnings => format!(
            "All {} gate(s) passed; {} violation(s) were skipped.",
            results.len(),
            previous.skipped_violations
        ),
        RunStatus::Failed => format!(
            "Gates failed on attempt {} of {}.\n\n{}\n{}",
            run_number,
            governor.allowed_attempts(),
            failure_details(results, previous),
            REMEDIATION
        ),
        RunStatus::RetryLimitExceeded => format!(
            "Retry limit exceeded: attempt {} of {} failed.\n\n{}\nRun `gauntlet clean` to archive this cycle and start over.",
            run_number,
            governor.allowed_attempts(),
            failure_details(results, previous)
        ),
        RunStatus::InfrastructureError => format!(
            "Some gates could not run and none reported a failure.\n\n{}\nCheck the tooling (commands, reviewer CLIs) and run gauntlet again.",
            failure_details(results, previous)
        ),
        RunStatus::NoChanges | RunStatus::NoApplicableGates => String::new(),
    }
}

#[allow(clippy::too_many_arguments)]
fn write_console(
    store: &RunStore,
    run_number: u32,
    kind: RunKind,
    change_ref: &ChangeRef,
    changes: &ChangeSet,
    results: &[GateResult],
    status: RunStatus,
    message: &str,
) -> Option<PathBuf> {
    let mut out = String::new();
    let label = match kind {
        RunKind::FirstRun => "first run",
        RunKind::Rerun => "verification run",
    };
    let _ = writeln!(out, "gauntlet run {} ({})", run_number, label);
    let _ = writeln!(out, "finished: {}", Utc::now().to_rfc3339());
    let _ = writeln!(
        out,
        "changes: {} file(s), +{} -{} against {}",
        changes.files.len(),
        changes.total_lines_added(),
        changes.total_lines_removed(),
        change_ref
    );
    out.push('\n');

    for result in results {
        let _ = write!(
            out,
            "[{}] {} ({:.1}s)",
            result.status,
            result.job_id,
            result.duration.as_secs_f64()
        );
        if let Some(ref message) = result.message {
            let _ = write!(out, " {}", message);
        }
        out.push('\n');
        for slot in &result.slots {
            let _ = writeln!(
                out,
                "    slot {} {}: {}{}",
                slot.review_index,
                slot.adapter.as_deref().unwrap_or("-"),
                slot.status,
                slot.message.as_deref().map(|m| format!(" ({})", m)).unwrap_or_default()
            );
        }
    }

    let _ = writeln!(out, "\nstatus: {}", status);
    if !message.is_empty() {
        let _ = writeln!(out, "{}", message);
    }

    let path = store.console_path(run_number);
    match std::fs::write(&path, out) {
        Ok(()) => Some(path),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to write console log");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{GateError, LockError};
    use crate::review::findings::{ReviewResultFile, ViolationStatus};
    use crate::store::LOCK_FILE;
    use crate::tracker::{ChangeType, FileChange};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    // =========================================
    // Test doubles
    // =========================================

    struct MockVcs {
        full: ChangeSet,
        fix_only: Option<ChangeSet>,
        merged: bool,
        branch: Option<String>,
        snapshots: AtomicUsize,
    }

    impl MockVcs {
        fn with_files(paths: &[&str]) -> Self {
            Self {
                full: change_set(paths),
                fix_only: None,
                merged: false,
                branch: Some("feature".to_string()),
                snapshots: AtomicUsize::new(0),
            }
        }
    }

    impl VersionControl for MockVcs {
        fn changes(&self, reference: &ChangeRef, _: &[PathBuf]) -> anyhow::Result<ChangeSet> {
            match reference {
                ChangeRef::Snapshot(_) => self
                    .fix_only
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("snapshot missing")),
                _ => Ok(self.full.clone()),
            }
        }

        fn snapshot_working_tree(&self) -> anyhow::Result<String> {
            let n = self.snapshots.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{:040}", n))
        }

        fn is_ancestor(&self, _: &str, _: &str) -> anyhow::Result<bool> {
            Ok(self.merged)
        }

        fn current_branch(&self) -> anyhow::Result<Option<String>> {
            Ok(self.branch.clone())
        }

        fn head_sha(&self) -> Option<String> {
            Some("c".repeat(40))
        }
    }

    fn change_set(paths: &[&str]) -> ChangeSet {
        ChangeSet::new(
            paths
                .iter()
                .map(|p| FileChange {
                    path: PathBuf::from(p),
                    change_type: ChangeType::Modified,
                    lines_added: 1,
                    lines_removed: 0,
                    patch: format!("diff --git a/{p} b/{p}\n+changed\n"),
                })
                .collect(),
        )
    }

    /// Replies in order, repeating the last one; records every diff seen.
    struct ScriptedAdapter {
        name: String,
        replies: Mutex<VecDeque<String>>,
        diffs: Mutex<Vec<String>>,
    }

    impl ScriptedAdapter {
        fn new(name: &str, replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                diffs: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ReviewAdapter for ScriptedAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn invoke(&self, _: &str, diff: &str, _: Duration) -> Result<String, GateError> {
            self.diffs.lock().unwrap().push(diff.to_string());
            let mut replies = self.replies.lock().unwrap();
            let reply = if replies.len() > 1 {
                replies.pop_front().unwrap()
            } else {
                replies.front().cloned().unwrap_or_default()
            };
            Ok(reply)
        }
    }

    const PASS: &str = r#"{"status": "pass", "violations": []}"#;
    const FAIL: &str = r#"{"status": "fail", "violations": [{"file": "src/a.rs", "line": 1, "issue": "bug", "priority": "high"}]}"#;

    fn setup(yaml: &str) -> (TempDir, GauntletConfig) {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        let config = GauntletConfig::parse(yaml).unwrap();
        config.validate().unwrap();
        (dir, config)
    }

    fn executor(
        dir: &TempDir,
        config: &GauntletConfig,
        vcs: MockVcs,
        adapters: &[Arc<ScriptedAdapter>],
    ) -> RunExecutor {
        let mut registry = AdapterRegistry::new();
        for adapter in adapters {
            registry.register(adapter.clone());
        }
        RunExecutor::new(dir.path(), config.clone(), Arc::new(vcs), registry)
    }

    fn check_config(command: &str, max_retries: u32) -> String {
        format!(
            "base_branch: origin/main\nmax_retries: {max_retries}\nentry_points:\n  - path: src\n    checks: [lint]\nchecks:\n  lint: {{ command: \"{command}\" }}\n"
        )
    }

    fn review_config(num_reviews: usize, preference: &[&str]) -> String {
        format!(
            "base_branch: origin/main\ncli:\n  default_preference: [{}]\nentry_points:\n  - path: src\n    reviews: [quality]\nreviews:\n  quality:\n    prompt: \"Review.\"\n    num_reviews: {num_reviews}\n",
            preference.join(", ")
        )
    }

    fn store_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    // =========================================
    // Early exits
    // =========================================

    #[tokio::test]
    async fn test_no_changes() {
        let (dir, config) = setup(&check_config("true", 3));
        let exec = executor(&dir, &config, MockVcs::with_files(&[]), &[]);

        let outcome = exec.run(&RunOptions::default()).await.unwrap();
        assert_eq!(outcome.status, RunStatus::NoChanges);
        assert!(store_files(exec.store().dir()).is_empty());
    }

    #[tokio::test]
    async fn test_no_applicable_gates() {
        let (dir, config) = setup(&check_config("true", 3));
        let exec = executor(&dir, &config, MockVcs::with_files(&["docs/readme.md"]), &[]);

        let outcome = exec.run(&RunOptions::default()).await.unwrap();
        assert_eq!(outcome.status, RunStatus::NoApplicableGates);
    }

    #[tokio::test]
    async fn test_store_changes_are_ignored() {
        let (dir, config) = setup(&check_config("true", 3));
        let exec = executor(
            &dir,
            &config,
            MockVcs::with_files(&["gauntlet_logs/console.1.log"]),
            &[],
        );

        let outcome = exec.run(&RunOptions::default()).await.unwrap();
        assert_eq!(outcome.status, RunStatus::NoChanges);
    }

    #[tokio::test]
    async fn test_lock_held_leaves_store_untouched() {
        let (dir, config) = setup(&check_config("true", 3));
        let exec = executor(&dir, &config, MockVcs::with_files(&["src/a.rs"]), &[]);
        let store_dir = exec.store().dir().to_path_buf();
        fs::create_dir_all(&store_dir).unwrap();
        fs::write(store_dir.join(LOCK_FILE), "held").unwrap();

        let err = exec.run(&RunOptions::default()).await.unwrap_err();
        match err {
            RunError::Lock(LockError::AlreadyLocked { ref path }) => assert!(path.is_absolute()),
            other => panic!("Expected lock error, got {other:?}"),
        }
        assert_eq!(store_files(&store_dir), vec![LOCK_FILE.to_string()]);
    }

    // =========================================
    // Check iterations and retries
    // =========================================

    #[tokio::test]
    async fn test_failing_check_numbers_runs_sequentially() {
        let (dir, config) = setup(&check_config("exit 1", 3));
        let exec = executor(&dir, &config, MockVcs::with_files(&["src/a.rs"]), &[]);

        let first = exec.run(&RunOptions::default()).await.unwrap();
        assert_eq!(first.status, RunStatus::Failed);
        assert_eq!(first.run_number, 1);
        assert_eq!(first.kind, RunKind::FirstRun);
        assert!(first.message.contains("check.src.lint"));

        let second = exec.run(&RunOptions::default()).await.unwrap();
        assert_eq!(second.run_number, 2);
        assert_eq!(second.kind, RunKind::Rerun);
        assert!(second.message.contains("previous result: fail in run 1"));

        let files = store_files(exec.store().dir());
        assert!(files.contains(&"check.src.lint.1.log".to_string()));
        assert!(files.contains(&"check.src.lint.2.log".to_string()));
        assert!(files.contains(&"console.2.log".to_string()));
        assert!(files.contains(&".execution_state".to_string()));
        assert!(!files.contains(&LOCK_FILE.to_string()));
    }

    #[tokio::test]
    async fn test_repeated_check_failure_carries_previous_output() {
        let (dir, config) = setup(&check_config("echo boom-output; exit 1", 3));
        let exec = executor(&dir, &config, MockVcs::with_files(&["src/a.rs"]), &[]);

        exec.run(&RunOptions::default()).await.unwrap();
        let second = exec.run(&RunOptions::default()).await.unwrap();
        assert_eq!(second.status, RunStatus::Failed);
        assert!(second.message.contains("check.src.lint.1.log"));
        assert!(second.message.contains("previous output:"));
        assert!(second.message.contains("    boom-output"));

        let console = fs::read_to_string(second.console_log.unwrap()).unwrap();
        assert!(console.contains("check.src.lint.1.log"));
        assert!(console.contains("boom-output"));
    }

    #[tokio::test]
    async fn test_retry_limit_then_refusal() {
        let (dir, config) = setup(&check_config("exit 1", 1));
        let exec = executor(&dir, &config, MockVcs::with_files(&["src/a.rs"]), &[]);

        assert_eq!(exec.run(&RunOptions::default()).await.unwrap().status, RunStatus::Failed);
        let last = exec.run(&RunOptions::default()).await.unwrap();
        assert_eq!(last.status, RunStatus::RetryLimitExceeded);
        assert_eq!(last.results.len(), 1);

        let refused = exec.run(&RunOptions::default()).await.unwrap();
        assert_eq!(refused.status, RunStatus::RetryLimitExceeded);
        assert!(refused.results.is_empty());
        assert!(refused.message.contains("gauntlet clean"));
        assert!(!store_files(exec.store().dir()).iter().any(|f| f.contains(".3.")));
    }

    #[tokio::test]
    async fn test_passing_run_archives_cycle() {
        let (dir, config) = setup(&check_config("true", 3));
        let exec = executor(&dir, &config, MockVcs::with_files(&["src/a.rs"]), &[]);

        let outcome = exec.run(&RunOptions::default()).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Passed);

        let store = exec.store();
        assert_eq!(store_files(store.dir()), vec![".execution_state".to_string()]);
        assert!(store.archive_dir().join("check.src.lint.1.log").exists());
        assert!(store.archive_dir().join("console.1.log").exists());
        assert_eq!(next_run_number(store.dir()).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_merged_branch_resets_cycle() {
        let (dir, config) = setup(&check_config("exit 1", 3));
        let mut vcs = MockVcs::with_files(&["src/a.rs"]);
        vcs.merged = true;
        vcs.branch = Some("main".to_string());
        let exec = executor(&dir, &config, vcs, &[]);

        let store = exec.store();
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.dir().join("check.src.lint.3.log"), "[gauntlet] result: fail\n").unwrap();
        ExecutionState {
            last_run_completed_at: Utc::now(),
            branch: Some("feature".to_string()),
            commit: Some("a".repeat(40)),
            working_tree_ref: None,
        }
        .save(store.dir())
        .unwrap();

        let outcome = exec.run(&RunOptions::default()).await.unwrap();
        assert_eq!(outcome.kind, RunKind::FirstRun);
        assert_eq!(outcome.run_number, 1);
        assert!(store.archive_dir().join("check.src.lint.3.log").exists());
    }

    #[tokio::test]
    async fn test_corrupt_execution_state_does_not_block_runs() {
        let (dir, config) = setup(&check_config("exit 1", 3));
        let exec = executor(&dir, &config, MockVcs::with_files(&["src/a.rs"]), &[]);
        let store = exec.store();
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.dir().join(".execution_state"), "{truncated").unwrap();

        let first = exec.run(&RunOptions::default()).await.unwrap();
        assert_eq!(first.status, RunStatus::Failed);
        assert_eq!(first.run_number, 1);
        assert!(store.dir().join("check.src.lint.1.log").exists());

        let second = exec.run(&RunOptions::default()).await.unwrap();
        assert_eq!(second.run_number, 2);
        assert!(ExecutionState::load(store.dir()).unwrap().is_some());
    }

    #[test]
    fn test_is_same_branch() {
        assert!(is_same_branch("main", "origin/main"));
        assert!(is_same_branch("main", "main"));
        assert!(!is_same_branch("feature", "origin/main"));
    }

    // =========================================
    // Reviews
    // =========================================

    #[tokio::test]
    async fn test_single_adapter_fills_all_slots() {
        let (dir, config) = setup(&review_config(3, &["claude", "gemini"]));
        let claude = ScriptedAdapter::new("claude", &[PASS]);
        let exec = executor(&dir, &config, MockVcs::with_files(&["src/a.rs"]), &[claude]);

        let outcome = exec.run(&RunOptions::default()).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Passed);
        let slots = &outcome.results[0].slots;
        assert_eq!(slots.len(), 3);
        assert!(slots.iter().all(|s| s.adapter.as_deref() == Some("claude")));
        for index in 1..=3 {
            let file = format!("review.src.quality_claude@{}.1.json", index);
            assert!(exec.store().archive_dir().join(file).exists());
        }
    }

    #[tokio::test]
    async fn test_reviewer_tooling_error_is_infrastructure() {
        let (dir, config) = setup(&review_config(1, &["claude"]));
        let claude = ScriptedAdapter::new("claude", &["reviewer crashed: rate limited"]);
        let exec = executor(&dir, &config, MockVcs::with_files(&["src/a.rs"]), &[claude]);

        let outcome = exec.run(&RunOptions::default()).await.unwrap();
        assert_eq!(outcome.status, RunStatus::InfrastructureError);
        assert_eq!(outcome.results[0].status, GateStatus::Error);
        assert!(outcome.message.contains("review.src.quality"));
        // Not archived: the errored slot reruns next time.
        assert!(store_files(exec.store().dir()).contains(&"console.1.log".to_string()));
    }

    #[tokio::test]
    async fn test_gate_failure_wins_over_tooling_error() {
        let yaml = r#"
base_branch: origin/main
cli:
  default_preference: [claude]
entry_points:
  - path: src
    checks: [lint]
    reviews: [quality]
checks:
  lint: { command: "exit 1" }
reviews:
  quality:
    prompt: "Review."
"#;
        let (dir, config) = setup(yaml);
        let claude = ScriptedAdapter::new("claude", &["not json"]);
        let exec = executor(&dir, &config, MockVcs::with_files(&["src/a.rs"]), &[claude]);

        let outcome = exec.run(&RunOptions::default()).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_no_healthy_adapters_is_fatal() {
        let (dir, config) = setup(&review_config(1, &["claude"]));
        let exec = executor(&dir, &config, MockVcs::with_files(&["src/a.rs"]), &[]);

        let err = exec.run(&RunOptions::default()).await.unwrap_err();
        assert!(err.is_infrastructure());
        assert!(!exec.store().is_locked());
        assert!(store_files(exec.store().dir()).is_empty());
    }

    #[tokio::test]
    async fn test_passed_slot_is_skipped_on_rerun() {
        let (dir, config) = setup(&review_config(2, &["good", "bad"]));
        let good = ScriptedAdapter::new("good", &[PASS]);
        let bad = ScriptedAdapter::new("bad", &[FAIL]);
        let exec = executor(
            &dir,
            &config,
            MockVcs::with_files(&["src/a.rs"]),
            &[good.clone(), bad.clone()],
        );

        assert_eq!(exec.run(&RunOptions::default()).await.unwrap().status, RunStatus::Failed);
        let second = exec.run(&RunOptions::default()).await.unwrap();
        let slots = &second.results[0].slots;
        assert_eq!(slots[0].status, GateStatus::SkippedPriorPass);
        assert_eq!(slots[0].pass_iteration, Some(1));
        assert_eq!(slots[1].status, GateStatus::Fail);
        assert_eq!(good.diffs.lock().unwrap().len(), 1);
        assert_eq!(bad.diffs.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rerun_reviews_fix_only_diff() {
        let (dir, config) = setup(&review_config(1, &["claude"]));
        let claude = ScriptedAdapter::new("claude", &[FAIL, PASS]);
        let mut vcs = MockVcs::with_files(&["src/a.rs", "src/b.rs"]);
        vcs.fix_only = Some(change_set(&["src/b.rs"]));
        let exec = executor(&dir, &config, vcs, &[claude.clone()]);

        exec.run(&RunOptions::default()).await.unwrap();
        let outcome = exec.run(&RunOptions::default()).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Passed);

        let diffs = claude.diffs.lock().unwrap();
        assert!(diffs[0].contains("src/a.rs") && diffs[0].contains("src/b.rs"));
        assert!(diffs[1].contains("src/b.rs"));
        assert!(!diffs[1].contains("src/a.rs"));
    }

    #[tokio::test]
    async fn test_empty_fix_only_diff_falls_back_to_full() {
        let (dir, config) = setup(&review_config(1, &["claude"]));
        let claude = ScriptedAdapter::new("claude", &[FAIL]);
        let mut vcs = MockVcs::with_files(&["src/a.rs"]);
        vcs.fix_only = Some(ChangeSet::default());
        let exec = executor(&dir, &config, vcs, &[claude.clone()]);

        exec.run(&RunOptions::default()).await.unwrap();
        exec.run(&RunOptions::default()).await.unwrap();
        let diffs = claude.diffs.lock().unwrap();
        assert!(diffs[1].contains("src/a.rs"));
    }

    #[tokio::test]
    async fn test_skipped_violations_pass_with_warnings() {
        let (dir, config) = setup(&review_config(1, &["claude"]));
        let claude = ScriptedAdapter::new("claude", &[FAIL, PASS]);
        let exec = executor(&dir, &config, MockVcs::with_files(&["src/a.rs"]), &[claude]);

        assert_eq!(exec.run(&RunOptions::default()).await.unwrap().status, RunStatus::Failed);

        let path = exec.store().dir().join("review.src.quality_claude@1.1.json");
        let mut result = ReviewResultFile::load(&path).unwrap();
        result.violations[0].status = ViolationStatus::Skipped;
        result.violations[0].result = Some("intentional".to_string());
        result.save(&path).unwrap();

        let outcome = exec.run(&RunOptions::default()).await.unwrap();
        assert_eq!(outcome.status, RunStatus::PassedWithWarnings);
        assert_eq!(outcome.status.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_detect_lists_jobs_without_writing() {
        let (dir, config) = setup(&review_config(1, &["claude"]));
        let exec = executor(&dir, &config, MockVcs::with_files(&["src/a.rs"]), &[]);

        let (changes, jobs) = exec.detect(&RunOptions::default()).unwrap();
        assert_eq!(changes.files.len(), 1);
        assert_eq!(jobs[0].id, "review.src.quality");
        assert!(!exec.store().dir().exists());
    }
}
