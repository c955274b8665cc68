//! Change set resolution over version control.
//!
//! The orchestrator only talks to [`VersionControl`]; [`GitTracker`] is the
//! `git2` implementation used by the CLI.

pub mod git;

pub use git::GitTracker;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Reference point a change set is computed against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeRef {
    /// Merge base of HEAD and this branch, to the working tree.
    BaseBranch(String),
    /// The changes introduced by a single commit.
    Commit(String),
    /// HEAD to the working tree.
    Uncommitted,
    /// A working tree snapshot to the working tree.
    Snapshot(String),
}

impl std::fmt::Display for ChangeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeRef::BaseBranch(branch) => write!(f, "base branch {}", branch),
            ChangeRef::Commit(commit) => write!(f, "commit {}", commit),
            ChangeRef::Uncommitted => write!(f, "uncommitted changes"),
            ChangeRef::Snapshot(sha) => write!(f, "snapshot {}", short_sha(sha)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// One changed file with its line deltas and patch text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub change_type: ChangeType,
    pub lines_added: usize,
    pub lines_removed: usize,
    pub patch: String,
}

/// Files changed relative to a [`ChangeRef`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub files: Vec<FileChange>,
}

impl ChangeSet {
    pub fn new(files: Vec<FileChange>) -> Self {
        Self { files }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|f| f.path.as_path())
    }

    pub fn total_lines_added(&self) -> usize {
        self.files.iter().map(|f| f.lines_added).sum()
    }

    pub fn total_lines_removed(&self) -> usize {
        self.files.iter().map(|f| f.lines_removed).sum()
    }

    /// The subset of files accepted by `keep`.
    pub fn filtered(&self, keep: impl Fn(&Path) -> bool) -> ChangeSet {
        ChangeSet {
            files: self
                .files
                .iter()
                .filter(|f| keep(&f.path))
                .cloned()
                .collect(),
        }
    }

    /// Concatenated unified diff of every file.
    pub fn unified_diff(&self) -> String {
        self.files
            .iter()
            .map(|f| f.patch.as_str())
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Version-control operations the orchestrator depends on.
pub trait VersionControl: Send + Sync {
    /// Files changed relative to `reference`, limited to `prefixes` when
    /// non-empty.
    fn changes(&self, reference: &ChangeRef, prefixes: &[PathBuf]) -> Result<ChangeSet>;

    /// Record the full working tree (tracked and untracked) as an
    /// addressable object without touching the working tree, index or refs.
    fn snapshot_working_tree(&self) -> Result<String>;

    /// Whether `commit` is reachable from `branch`.
    fn is_ancestor(&self, commit: &str, branch: &str) -> Result<bool>;

    /// Current branch name, `None` when detached or unborn.
    fn current_branch(&self) -> Result<Option<String>>;

    /// HEAD commit SHA, `None` for an unborn branch.
    fn head_sha(&self) -> Option<String>;
}

/// First eight bytes of a SHA, or the whole string when it is shorter or
/// the cut would split a character.
pub fn short_sha(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}
