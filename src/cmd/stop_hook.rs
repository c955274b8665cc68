//! `gauntlet stop-hook`: JSON in on stdin, JSON decision out on stdout.

use anyhow::{Context, Result};
use chrono::Utc;
use gauntlet::hooks::{ExecutorGateRunner, StopHookInput, resolve};
use std::path::Path;
use std::process::ExitCode;
use tokio::io::AsyncReadExt;

pub async fn cmd_stop_hook(project_dir: &Path) -> Result<ExitCode> {
    let mut raw = String::new();
    tokio::io::stdin()
        .read_to_string(&mut raw)
        .await
        .context("Failed to read stop hook input")?;

    let input = StopHookInput::parse(&raw);
    let response = resolve(&input, project_dir, &ExecutorGateRunner, Utc::now()).await;
    println!("{}", serde_json::to_string(&response)?);
    Ok(ExitCode::SUCCESS)
}
