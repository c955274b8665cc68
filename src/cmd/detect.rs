//! `gauntlet detect`: show what a run would do.

use anyhow::Result;
use console::style;
use gauntlet::gates::JobKind;
use gauntlet::orchestrator::RunOptions;
use std::path::Path;
use std::process::ExitCode;

use super::build_executor;

pub fn cmd_detect(project_dir: &Path, options: RunOptions) -> Result<ExitCode> {
    let executor = build_executor(project_dir)?;
    let (changes, jobs) = executor.detect(&options)?;

    println!();
    println!(
        "{} changed file(s), +{} -{}",
        changes.files.len(),
        changes.total_lines_added(),
        changes.total_lines_removed()
    );

    if jobs.is_empty() {
        println!("No gates would run.");
        println!();
        return Ok(ExitCode::SUCCESS);
    }

    println!();
    println!("{:<8} {:<40} Entry point", "Kind", "Job");
    println!("{:<8} {:<40} -----------", "------", "---");
    for job in &jobs {
        let kind = match job.kind() {
            JobKind::Check => style(job.kind().as_str()).cyan(),
            JobKind::Review => style(job.kind().as_str()).magenta(),
        };
        println!("{:<8} {:<40} {}", kind, job.id, job.entry_point.display());
    }
    println!();
    Ok(ExitCode::SUCCESS)
}
