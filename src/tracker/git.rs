use super::{ChangeRef, ChangeSet, ChangeType, FileChange, VersionControl};
use anyhow::{Context, Result};
use git2::{Delta, Diff, DiffOptions, ErrorCode, IndexAddOption, Oid, Repository, Signature};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct GitTracker {
    workdir: PathBuf,
}

impl GitTracker {
    pub fn new(project_dir: &Path) -> Result<Self> {
        let repo = Repository::discover(project_dir).context("Failed to open git repository")?;
        let workdir = repo
            .workdir()
            .context("Bare git repositories are not supported")?
            .to_path_buf();
        Ok(Self { workdir })
    }

    /// Repository root; changed paths are relative to it.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    // git2::Repository is not Sync, so each operation opens its own handle.
    fn repo(&self) -> Result<Repository> {
        Repository::open(&self.workdir)
            .with_context(|| format!("Failed to open git repository at {}", self.workdir.display()))
    }
}

/// Get the HEAD commit if it exists (returns None for unborn branches)
fn head_commit(repo: &Repository) -> Option<git2::Commit<'_>> {
    repo.head().ok().and_then(|head| head.peel_to_commit().ok())
}

fn resolve_commit<'r>(repo: &'r Repository, rev: &str) -> Result<git2::Commit<'r>> {
    repo.revparse_single(rev)
        .with_context(|| format!("Unknown git reference '{}'", rev))?
        .peel_to_commit()
        .with_context(|| format!("Git reference '{}' does not point at a commit", rev))
}

/// Tree object for the full working tree, tracked and untracked files alike.
///
/// Staged through an in-memory copy of the index that is never written back.
fn working_tree(repo: &Repository) -> Result<git2::Tree<'_>> {
    let mut index = repo.index().context("Failed to read git index")?;
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
    index.update_all(["*"].iter(), None)?;
    let tree_id = index.write_tree()?;
    Ok(repo.find_tree(tree_id)?)
}

fn is_root(prefix: &Path) -> bool {
    prefix.as_os_str().is_empty() || prefix == Path::new(".")
}

fn include_untracked(opts: &mut DiffOptions) {
    opts.include_untracked(true)
        .recurse_untracked_dirs(true)
        .show_untracked_content(true);
}

fn collect_changes(diff: &Diff<'_>) -> Result<ChangeSet> {
    let mut files = Vec::new();

    for delta_idx in 0..diff.deltas().len() {
        let Some(delta) = diff.get_delta(delta_idx) else {
            continue;
        };
        let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) else {
            continue;
        };
        let path = path.to_path_buf();

        let change_type = match delta.status() {
            Delta::Added | Delta::Untracked => ChangeType::Added,
            Delta::Modified | Delta::Typechange => ChangeType::Modified,
            Delta::Deleted => ChangeType::Deleted,
            Delta::Renamed | Delta::Copied => ChangeType::Renamed,
            _ => continue,
        };

        let (lines_added, lines_removed, patch) = match git2::Patch::from_diff(diff, delta_idx)? {
            Some(mut patch) => {
                let (_, added, removed) = patch.line_stats()?;
                let text = patch
                    .to_buf()
                    .map(|buf| String::from_utf8_lossy(&buf).to_string())
                    .unwrap_or_default();
                (added, removed, text)
            }
            None => (0, 0, String::new()),
        };

        files.push(FileChange {
            path,
            change_type,
            lines_added,
            lines_removed,
            patch,
        });
    }

    Ok(ChangeSet::new(files))
}

impl VersionControl for GitTracker {
    fn changes(&self, reference: &ChangeRef, prefixes: &[PathBuf]) -> Result<ChangeSet> {
        let repo = self.repo()?;
        let mut opts = DiffOptions::new();
        // A root prefix covers everything, so no pathspec at all.
        if !prefixes.iter().any(|p| is_root(p)) {
            for prefix in prefixes {
                opts.pathspec(prefix);
            }
        }

        let mut diff = match reference {
            ChangeRef::BaseBranch(branch) => {
                let base = resolve_commit(&repo, branch)?;
                let tree = match head_commit(&repo) {
                    Some(head) => {
                        let merge_base = repo
                            .merge_base(head.id(), base.id())
                            .with_context(|| format!("No merge base between HEAD and '{}'", branch))?;
                        repo.find_commit(merge_base)?.tree()?
                    }
                    None => base.tree()?,
                };
                include_untracked(&mut opts);
                repo.diff_tree_to_workdir_with_index(Some(&tree), Some(&mut opts))?
            }
            ChangeRef::Commit(rev) => {
                let commit = resolve_commit(&repo, rev)?;
                let parent_tree = if commit.parent_count() > 0 {
                    Some(commit.parent(0)?.tree()?)
                } else {
                    None
                };
                repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&commit.tree()?), Some(&mut opts))?
            }
            ChangeRef::Uncommitted => {
                let tree = head_commit(&repo).map(|c| c.tree()).transpose()?;
                include_untracked(&mut opts);
                repo.diff_tree_to_workdir_with_index(tree.as_ref(), Some(&mut opts))?
            }
            ChangeRef::Snapshot(sha) => {
                let oid = Oid::from_str(sha).with_context(|| format!("Invalid snapshot '{}'", sha))?;
                let tree = repo
                    .find_commit(oid)
                    .with_context(|| format!("Snapshot {} no longer exists", sha))?
                    .tree()?;
                // Tree to tree, so files untracked at snapshot time diff as
                // content changes rather than as deletions.
                let current = working_tree(&repo)?;
                repo.diff_tree_to_tree(Some(&tree), Some(&current), Some(&mut opts))?
            }
        };
        diff.find_similar(None)?;

        let changes = collect_changes(&diff)?;
        debug!(reference = %reference, files = changes.files.len(), "resolved change set");
        Ok(changes)
    }

    fn snapshot_working_tree(&self) -> Result<String> {
        let repo = self.repo()?;
        let tree = working_tree(&repo)?;

        let sig = Signature::now("gauntlet", "gauntlet@localhost")?;
        let parents: Vec<git2::Commit<'_>> = head_commit(&repo).into_iter().collect();
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
        let oid = repo.commit(
            None,
            &sig,
            &sig,
            "gauntlet: working tree snapshot",
            &tree,
            &parent_refs,
        )?;

        Ok(oid.to_string())
    }

    fn is_ancestor(&self, commit: &str, branch: &str) -> Result<bool> {
        let repo = self.repo()?;
        let commit_oid = resolve_commit(&repo, commit)?.id();
        let branch_oid = resolve_commit(&repo, branch)?.id();
        if commit_oid == branch_oid {
            return Ok(true);
        }
        Ok(repo.graph_descendant_of(branch_oid, commit_oid)?)
    }

    fn current_branch(&self) -> Result<Option<String>> {
        let repo = self.repo()?;
        match repo.head() {
            Ok(head) if head.is_branch() => Ok(head.shorthand().map(str::to_string)),
            Ok(_) => Ok(None),
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                Ok(None)
            }
            Err(e) => Err(e).context("Failed to read HEAD"),
        }
    }

    fn head_sha(&self) -> Option<String> {
        let repo = self.repo().ok()?;
        head_commit(&repo).map(|c| c.id().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Repository;
    use std::fs;
    use tempfile::tempdir;

    fn setup_repo() -> (GitTracker, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        drop(config);
        let tracker = GitTracker::new(dir.path()).unwrap();
        (tracker, dir)
    }

    fn commit_file(dir: &Path, name: &str, content: &str, msg: &str) -> String {
        let repo = Repository::open(dir).unwrap();
        let file_path = dir.join(name);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&file_path, content).unwrap();
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("test", "test@test.com").unwrap();
        let oid = if let Ok(head) = repo.head() {
            let parent = head.peel_to_commit().unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[&parent])
                .unwrap()
        } else {
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[])
                .unwrap()
        };
        oid.to_string()
    }

    #[test]
    fn test_head_sha_unborn_then_populated() {
        let (tracker, dir) = setup_repo();
        assert!(tracker.head_sha().is_none());
        assert!(tracker.current_branch().unwrap().is_none());
        commit_file(dir.path(), "a.txt", "hello", "init");
        assert_eq!(tracker.head_sha().unwrap().len(), 40);
        assert!(tracker.current_branch().unwrap().is_some());
    }

    #[test]
    fn test_uncommitted_detects_untracked_with_line_counts() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "existing.txt", "original\n", "init");
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/new_file.rs"), "fn main() {}\nfn other() {}\n").unwrap();

        let changes = tracker.changes(&ChangeRef::Uncommitted, &[]).unwrap();
        let added = changes
            .files
            .iter()
            .find(|f| f.path.ends_with("new_file.rs"))
            .unwrap();
        assert_eq!(added.change_type, ChangeType::Added);
        assert_eq!(added.lines_added, 2);
        assert!(added.patch.contains("fn other()"));
    }

    #[test]
    fn test_uncommitted_detects_modified_file() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "existing.txt", "line one\n", "init");
        fs::write(dir.path().join("existing.txt"), "line one\nline two\n").unwrap();

        let changes = tracker.changes(&ChangeRef::Uncommitted, &[]).unwrap();
        assert_eq!(changes.files.len(), 1);
        assert_eq!(changes.files[0].change_type, ChangeType::Modified);
        assert_eq!(changes.total_lines_added(), 1);
        assert_eq!(changes.total_lines_removed(), 0);
    }

    #[test]
    fn test_changes_restricted_to_prefix() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "readme.txt", "hi\n", "init");
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "pub fn f() {}\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "note\n").unwrap();

        let changes = tracker
            .changes(&ChangeRef::Uncommitted, &[PathBuf::from("src")])
            .unwrap();
        assert_eq!(changes.files.len(), 1);
        assert!(changes.files[0].path.starts_with("src"));

        let everything = tracker
            .changes(&ChangeRef::Uncommitted, &[PathBuf::from("src"), PathBuf::from(".")])
            .unwrap();
        assert_eq!(everything.files.len(), 2);
    }

    #[test]
    fn test_commit_reference_diffs_against_parent() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "a.txt", "one\n", "init");
        let second = commit_file(dir.path(), "b.txt", "two\n", "add b");

        let changes = tracker.changes(&ChangeRef::Commit(second), &[]).unwrap();
        assert_eq!(changes.files.len(), 1);
        assert!(changes.files[0].path.ends_with("b.txt"));
        assert_eq!(changes.files[0].change_type, ChangeType::Added);
    }

    #[test]
    fn test_base_branch_includes_committed_and_uncommitted() {
        let (tracker, dir) = setup_repo();
        let base = commit_file(dir.path(), "a.txt", "one\n", "init");
        commit_file(dir.path(), "b.txt", "two\n", "feature work");
        fs::write(dir.path().join("c.txt"), "three\n").unwrap();

        let changes = tracker.changes(&ChangeRef::BaseBranch(base), &[]).unwrap();
        let paths: Vec<_> = changes.paths().collect();
        assert!(paths.iter().any(|p| p.ends_with("b.txt")));
        assert!(paths.iter().any(|p| p.ends_with("c.txt")));
        assert!(!paths.iter().any(|p| p.ends_with("a.txt")));
    }

    #[test]
    fn test_snapshot_does_not_touch_index_or_head() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "a.txt", "one\n", "init");
        let head_before = tracker.head_sha();
        fs::write(dir.path().join("untracked.txt"), "wip\n").unwrap();

        let snapshot = tracker.snapshot_working_tree().unwrap();
        assert_eq!(snapshot.len(), 40);
        assert_eq!(tracker.head_sha(), head_before);

        // untracked.txt must still be untracked from git's point of view
        let uncommitted = tracker.changes(&ChangeRef::Uncommitted, &[]).unwrap();
        assert!(uncommitted.paths().any(|p| p.ends_with("untracked.txt")));
        let repo = Repository::open(dir.path()).unwrap();
        let index = repo.index().unwrap();
        assert!(index.get_path(Path::new("untracked.txt"), 0).is_none());
    }

    #[test]
    fn test_snapshot_scopes_later_diff_to_fix_changes() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "a.txt", "one\n", "init");
        fs::write(dir.path().join("a.txt"), "one\nfeature\n").unwrap();
        fs::write(dir.path().join("b.txt"), "new file\n").unwrap();
        let snapshot = tracker.snapshot_working_tree().unwrap();

        fs::write(dir.path().join("b.txt"), "new file\nfix\n").unwrap();
        let fix_only = tracker.changes(&ChangeRef::Snapshot(snapshot), &[]).unwrap();
        assert_eq!(fix_only.files.len(), 1);
        assert!(fix_only.files[0].path.ends_with("b.txt"));
        assert_eq!(fix_only.total_lines_added(), 1);
    }

    #[test]
    fn test_is_ancestor() {
        let (tracker, dir) = setup_repo();
        let first = commit_file(dir.path(), "a.txt", "one\n", "init");
        let second = commit_file(dir.path(), "b.txt", "two\n", "second");

        assert!(tracker.is_ancestor(&first, "HEAD").unwrap());
        assert!(tracker.is_ancestor(&second, "HEAD").unwrap());
        assert!(!tracker.is_ancestor(&second, &first).unwrap());
    }
}
