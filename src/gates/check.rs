//! Check execution: a configured shell command run against an entry point.
//!
//! Each run writes `<jobId>.<run>.log` holding the command output followed by
//! a `[gauntlet] result: <status>` marker line, which the rerun resolver
//! reads back on the next iteration.

use super::{GateResult, GateStatus, Job};
use crate::config::CheckDefinition;
use crate::errors::GateError;
use crate::store::sequence;
use anyhow::Context;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Prefix of the final status line in a check log.
pub const RESULT_MARKER: &str = "[gauntlet] result: ";

/// Status recorded by the last result marker in a check log.
pub fn parse_result_marker(log: &str) -> Option<GateStatus> {
    log.lines()
        .rev()
        .find_map(|line| line.strip_prefix(RESULT_MARKER))
        .and_then(GateStatus::parse)
}

/// Everything a check run needs besides the job itself.
#[derive(Debug, Clone)]
pub struct CheckContext<'a> {
    pub project_dir: &'a Path,
    pub store_dir: &'a Path,
    pub run_number: u32,
}

fn working_dir(job: &Job, check: &CheckDefinition, project_dir: &Path) -> PathBuf {
    match check.working_directory {
        Some(ref dir) if dir.is_absolute() => dir.clone(),
        Some(ref dir) => project_dir.join(dir),
        None if super::is_root_entry(&job.entry_point) => project_dir.to_path_buf(),
        None => project_dir.join(&job.entry_point),
    }
}

struct CommandOutput {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

async fn execute(
    job: &Job,
    check: &CheckDefinition,
    dir: &Path,
    run_number: u32,
) -> Result<CommandOutput, GateError> {
    let child = Command::new("sh")
        .arg("-c")
        .arg(&check.command)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("GAUNTLET_JOB_ID", &job.id)
        .env("GAUNTLET_RUN_NUMBER", run_number.to_string())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| GateError::SpawnFailed {
            command: check.command.clone(),
            source,
        })?;

    let output = match timeout(Duration::from_secs(check.timeout_secs), child.wait_with_output()).await
    {
        Ok(result) => result
            .with_context(|| format!("Failed to wait for check command: {}", check.command))?,
        Err(_) => {
            return Err(GateError::Timeout {
                command: check.command.clone(),
                secs: check.timeout_secs,
            });
        }
    };

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Run one check job and write its log.
///
/// Command failures are results, not errors: a non-zero exit is `fail`, and
/// a spawn failure or timeout is `error`.
pub async fn run_check(job: &Job, check: &CheckDefinition, ctx: &CheckContext<'_>) -> GateResult {
    let start = Instant::now();
    let dir = working_dir(job, check, ctx.project_dir);
    let log_path = sequence::build_path(ctx.store_dir, &job.id, ctx.run_number, None, "log");

    debug!(job = %job.id, command = %check.command, dir = %dir.display(), "running check");

    let mut log = String::new();
    let _ = writeln!(log, "[gauntlet] job: {}", job.id);
    let _ = writeln!(log, "[gauntlet] command: {}", check.command);
    let _ = writeln!(log, "[gauntlet] working directory: {}", dir.display());
    let _ = writeln!(log, "[gauntlet] run: {}", ctx.run_number);
    log.push('\n');

    let (status, message) = match execute(job, check, &dir, ctx.run_number).await {
        Ok(output) => {
            log.push_str(&output.stdout);
            if !output.stderr.is_empty() {
                if !log.ends_with('\n') {
                    log.push('\n');
                }
                log.push_str(&output.stderr);
            }
            if !log.ends_with('\n') {
                log.push('\n');
            }
            let _ = writeln!(log, "[gauntlet] exit code: {}", output.exit_code);
            if output.exit_code == 0 {
                (GateStatus::Pass, None)
            } else {
                (
                    GateStatus::Fail,
                    Some(format!("'{}' exited with code {}", check.command, output.exit_code)),
                )
            }
        }
        Err(e) => {
            let _ = writeln!(log, "[gauntlet] error: {}", e);
            (GateStatus::Error, Some(e.to_string()))
        }
    };
    let _ = writeln!(log, "{}{}", RESULT_MARKER, status);

    let duration = start.elapsed();
    let mut result = GateResult::new(job, status, duration);
    if let Some(message) = message {
        result = result.with_message(message);
    }

    match std::fs::write(&log_path, &log) {
        Ok(()) => result = result.with_log_path(log_path),
        Err(e) => warn!(path = %log_path.display(), error = %e, "failed to write check log"),
    }

    info!(job = %job.id, status = %status, duration_ms = duration.as_millis() as u64, "check finished");
    result
}
