//! `gauntlet run`, `gauntlet check` and `gauntlet review`.

use anyhow::Result;
use console::style;
use gauntlet::gates::{GateResult, GateStatus};
use gauntlet::orchestrator::{RunKind, RunOptions, RunOutcome, RunStatus};
use std::path::Path;
use std::process::ExitCode;

use super::build_executor;
use crate::EXIT_LOCKED;

fn styled_status(status: GateStatus) -> console::StyledObject<&'static str> {
    let label = status.as_str();
    match status {
        GateStatus::Pass => style(label).green(),
        GateStatus::SkippedPriorPass => style(label).dim(),
        GateStatus::Fail => style(label).red(),
        GateStatus::Error => style(label).yellow(),
    }
}

fn print_result(result: &GateResult) {
    print!(
        "  {:<8} {} ({:.1}s)",
        styled_status(result.status),
        result.job_id,
        result.duration.as_secs_f64()
    );
    if let Some(ref message) = result.message {
        print!(" {}", style(message).dim());
    }
    println!();

    for slot in &result.slots {
        println!(
            "    {:<8} slot {} {}",
            styled_status(slot.status),
            slot.review_index,
            slot.adapter.as_deref().unwrap_or("-")
        );
    }
}

fn print_outcome(outcome: &RunOutcome) {
    let kind = match outcome.kind {
        RunKind::FirstRun => "first run",
        RunKind::Rerun => "verification run",
    };

    println!();
    if !outcome.results.is_empty() {
        println!("Run {} ({})", outcome.run_number, kind);
        for result in &outcome.results {
            print_result(result);
        }
        println!();
    }

    let status = match outcome.status {
        RunStatus::Passed | RunStatus::PassedWithWarnings => style(outcome.status.code()).green().bold(),
        RunStatus::Failed | RunStatus::RetryLimitExceeded => style(outcome.status.code()).red().bold(),
        RunStatus::InfrastructureError => style(outcome.status.code()).yellow().bold(),
        RunStatus::NoChanges | RunStatus::NoApplicableGates => style(outcome.status.code()).dim(),
    };
    println!("Status: {}", status);
    if !outcome.message.is_empty() {
        println!("{}", outcome.message);
    }
    if let Some(ref path) = outcome.console_log {
        println!("Log: {}", style(path.display()).dim());
    }
    println!();
}

pub async fn cmd_run(project_dir: &Path, options: RunOptions) -> Result<ExitCode> {
    let executor = build_executor(project_dir)?;

    match executor.run(&options).await {
        Ok(outcome) => {
            print_outcome(&outcome);
            Ok(ExitCode::from(outcome.status.exit_code()))
        }
        Err(e) if e.lock_path().is_some() => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            Ok(ExitCode::from(EXIT_LOCKED))
        }
        Err(e) => Err(e.into()),
    }
}
