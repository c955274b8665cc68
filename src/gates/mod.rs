//! Gates: the checks and reviews a change set triggers.
//!
//! [`select_jobs`] maps changed files onto configured entry points and
//! expands each matching entry into one [`Job`] per check and review. The
//! job list is rebuilt from configuration on every invocation.

pub mod check;

use crate::config::{CheckDefinition, EntryPoint, GauntletConfig, ReviewDefinition};
use crate::tracker::ChangeSet;
use crate::util::sanitize_segment;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Check,
    Review,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Check => "check",
            JobKind::Review => "review",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSpec {
    Check(CheckDefinition),
    Review(ReviewDefinition),
}

/// One gate to execute for one entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// `<kind>.<entry>.<name>`, with every segment sanitized.
    pub id: String,
    /// Gate name as configured.
    pub name: String,
    pub entry_point: PathBuf,
    pub spec: JobSpec,
}

impl Job {
    pub fn kind(&self) -> JobKind {
        match self.spec {
            JobSpec::Check(_) => JobKind::Check,
            JobSpec::Review(_) => JobKind::Review,
        }
    }
}

/// Build the id for a gate under an entry point.
pub fn job_id(kind: JobKind, entry_point: &Path, name: &str) -> String {
    format!(
        "{}.{}.{}",
        kind.as_str(),
        sanitize_segment(&entry_point.to_string_lossy()),
        sanitize_segment(name)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pass,
    Fail,
    Error,
    SkippedPriorPass,
}

impl GateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateStatus::Pass => "pass",
            GateStatus::Fail => "fail",
            GateStatus::Error => "error",
            GateStatus::SkippedPriorPass => "skipped_prior_pass",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "pass" => Some(GateStatus::Pass),
            "fail" => Some(GateStatus::Fail),
            "error" => Some(GateStatus::Error),
            "skipped_prior_pass" => Some(GateStatus::SkippedPriorPass),
            _ => None,
        }
    }

    /// Whether this status lets the run pass.
    pub fn is_passing(&self) -> bool {
        matches!(self, GateStatus::Pass | GateStatus::SkippedPriorPass)
    }
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one review slot within a review gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotResult {
    pub review_index: usize,
    /// Adapter that ran the slot; `None` when skipped.
    pub adapter: Option<String>,
    pub status: GateStatus,
    /// Run in which a skipped slot last passed.
    pub pass_iteration: Option<u32>,
    pub violations: usize,
    pub log_path: Option<PathBuf>,
    pub json_path: Option<PathBuf>,
    pub message: Option<String>,
}

/// Result of one job in one invocation. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateResult {
    pub job_id: String,
    pub kind: JobKind,
    pub status: GateStatus,
    pub duration: Duration,
    pub message: Option<String>,
    pub log_path: Option<PathBuf>,
    pub json_path: Option<PathBuf>,
    /// Per-slot outcomes for review gates, ascending by slot index.
    pub slots: Vec<SlotResult>,
}

impl GateResult {
    pub fn new(job: &Job, status: GateStatus, duration: Duration) -> Self {
        Self {
            job_id: job.id.clone(),
            kind: job.kind(),
            status,
            duration,
            message: None,
            log_path: None,
            json_path: None,
            slots: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_log_path(mut self, path: PathBuf) -> Self {
        self.log_path = Some(path);
        self
    }
}

/// Restricts selection to one gate name and/or one kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub gate: Option<String>,
    pub kind: Option<JobKind>,
}

impl JobFilter {
    pub fn kind(kind: JobKind) -> Self {
        Self {
            gate: None,
            kind: Some(kind),
        }
    }

    fn accepts(&self, kind: JobKind, name: &str) -> bool {
        self.kind.is_none_or(|k| k == kind) && self.gate.as_deref().is_none_or(|g| g == name)
    }
}

/// Whether an entry point path covers the whole repository.
pub fn is_root_entry(path: &Path) -> bool {
    path.as_os_str().is_empty() || path == Path::new(".")
}

/// Whether a changed file triggers `entry`: it lies under the entry path and
/// matches none of its exclude patterns.
pub fn entry_matches(entry: &EntryPoint, file: &Path) -> bool {
    let relative = if is_root_entry(&entry.path) {
        file
    } else {
        match file.strip_prefix(&entry.path) {
            Ok(rel) => rel,
            Err(_) => return false,
        }
    };

    !entry.exclude.iter().any(|pattern| match Pattern::new(pattern) {
        Ok(p) => p.matches_path(relative),
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "ignoring invalid exclude pattern");
            false
        }
    })
}

/// Path prefixes to restrict diffs to; empty when an entry covers the root.
pub fn entry_prefixes(config: &GauntletConfig) -> Vec<PathBuf> {
    if config.entry_points.iter().any(|e| is_root_entry(&e.path)) {
        return Vec::new();
    }
    config.entry_points.iter().map(|e| e.path.clone()).collect()
}

/// Expand the change set into jobs, deduplicated by id and ordered by
/// entry point then configuration order (checks before reviews).
pub fn select_jobs(config: &GauntletConfig, changes: &ChangeSet, filter: &JobFilter) -> Vec<Job> {
    let mut jobs = Vec::new();
    let mut seen = HashSet::new();

    for entry in &config.entry_points {
        let triggered = changes.paths().any(|p| entry_matches(entry, p));
        if !triggered {
            debug!(entry = %entry.path.display(), "entry point not triggered");
            continue;
        }

        let checks = entry.checks.iter().filter_map(|name| {
            config
                .checks
                .get(name)
                .map(|def| (JobKind::Check, name, JobSpec::Check(def.clone())))
        });
        let reviews = entry.reviews.iter().filter_map(|name| {
            config
                .reviews
                .get(name)
                .map(|def| (JobKind::Review, name, JobSpec::Review(def.clone())))
        });

        for (kind, name, spec) in checks.chain(reviews) {
            if !filter.accepts(kind, name) {
                continue;
            }
            let id = job_id(kind, &entry.path, name);
            if !seen.insert(id.clone()) {
                warn!(job = %id, "duplicate job id, keeping the first");
                continue;
            }
            jobs.push(Job {
                id,
                name: name.clone(),
                entry_point: entry.path.clone(),
                spec,
            });
        }
    }

    jobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{ChangeType, FileChange};

    const CONFIG: &str = r#"
entry_points:
  - path: src
    exclude: ["**/*.md"]
    checks: [lint]
    reviews: [quality]
  - path: docs
    checks: [spell]
  - path: "."
    checks: [fmt]
checks:
  lint: { command: "true" }
  spell: { command: "true" }
  fmt: { command: "true" }
reviews:
  quality: { prompt: "Review it." }
"#;

    fn config() -> GauntletConfig {
        GauntletConfig::parse(CONFIG).unwrap()
    }

    fn changes(paths: &[&str]) -> ChangeSet {
        ChangeSet::new(
            paths
                .iter()
                .map(|p| FileChange {
                    path: PathBuf::from(p),
                    change_type: ChangeType::Modified,
                    lines_added: 1,
                    lines_removed: 0,
                    patch: String::new(),
                })
                .collect(),
        )
    }

    fn ids(jobs: &[Job]) -> Vec<&str> {
        jobs.iter().map(|j| j.id.as_str()).collect()
    }

    #[test]
    fn test_select_jobs_by_entry_point() {
        let jobs = select_jobs(&config(), &changes(&["src/main.rs"]), &JobFilter::default());
        assert_eq!(
            ids(&jobs),
            vec!["check.src.lint", "review.src.quality", "check.root.fmt"]
        );
        assert_eq!(jobs[1].kind(), JobKind::Review);
    }

    #[test]
    fn test_excluded_files_do_not_trigger_entry() {
        let jobs = select_jobs(&config(), &changes(&["src/notes/README.md"]), &JobFilter::default());
        assert_eq!(ids(&jobs), vec!["check.root.fmt"]);
    }

    #[test]
    fn test_entry_prefix_is_component_based() {
        let jobs = select_jobs(&config(), &changes(&["srcfoo/x.rs"]), &JobFilter::default());
        assert_eq!(ids(&jobs), vec!["check.root.fmt"]);
    }

    #[test]
    fn test_filter_by_kind_and_gate() {
        let set = changes(&["src/main.rs", "docs/a.txt"]);
        let reviews = select_jobs(&config(), &set, &JobFilter::kind(JobKind::Review));
        assert_eq!(ids(&reviews), vec!["review.src.quality"]);

        let filter = JobFilter {
            gate: Some("spell".to_string()),
            kind: None,
        };
        assert_eq!(ids(&select_jobs(&config(), &set, &filter)), vec!["check.docs.spell"]);
    }

    #[test]
    fn test_no_changes_selects_nothing() {
        assert!(select_jobs(&config(), &ChangeSet::default(), &JobFilter::default()).is_empty());
    }

    #[test]
    fn test_similar_entry_points_get_distinct_jobs() {
        let yaml = r#"
entry_points:
  - path: src/api
    checks: [lint]
  - path: src-api
    checks: [lint]
checks:
  lint: { command: "true" }
"#;
        let config = GauntletConfig::parse(yaml).unwrap();
        let jobs = select_jobs(
            &config,
            &changes(&["src/api/a.rs", "src-api/b.rs"]),
            &JobFilter::default(),
        );
        assert_eq!(jobs.len(), 2);
        assert_ne!(jobs[0].id, jobs[1].id);
        assert_eq!(jobs[0].entry_point, PathBuf::from("src/api"));
        assert_eq!(jobs[1].entry_point, PathBuf::from("src-api"));
        assert_eq!(jobs[1].id, "check.src-api.lint");
        assert!(!jobs[0].id.contains('/'));
    }

    #[test]
    fn test_repeated_entry_point_is_collapsed() {
        let yaml = r#"
entry_points:
  - path: src
    checks: [lint]
  - path: src/
    checks: [lint]
checks:
  lint: { command: "true" }
"#;
        let config = GauntletConfig::parse(yaml).unwrap();
        let jobs = select_jobs(&config, &changes(&["src/a.rs"]), &JobFilter::default());
        assert_eq!(ids(&jobs), vec!["check.src.lint"]);
    }

    #[test]
    fn test_entry_prefixes() {
        assert!(entry_prefixes(&config()).is_empty());
        let yaml = "entry_points:\n  - path: src\n  - path: lib\n";
        let config = GauntletConfig::parse(yaml).unwrap();
        assert_eq!(
            entry_prefixes(&config),
            vec![PathBuf::from("src"), PathBuf::from("lib")]
        );
    }

    #[test]
    fn test_gate_status_round_trip_strings() {
        for status in [
            GateStatus::Pass,
            GateStatus::Fail,
            GateStatus::Error,
            GateStatus::SkippedPriorPass,
        ] {
            assert_eq!(GateStatus::parse(status.as_str()), Some(status));
        }
        assert!(GateStatus::SkippedPriorPass.is_passing());
        assert!(!GateStatus::Error.is_passing());
    }
}
