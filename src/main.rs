use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use gauntlet::gates::{JobFilter, JobKind};
use gauntlet::orchestrator::RunOptions;
use gauntlet::tracker::ChangeRef;

mod cmd;

/// Exit code for a run rejected because another run holds the lock.
pub const EXIT_LOCKED: u8 = 3;

#[derive(Parser)]
#[command(name = "gauntlet")]
#[command(version, about = "Run checks and AI reviews over changed files until they pass")]
pub struct Cli {
    /// Debug-level diagnostics on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every check and review triggered by the current changes
    Run(RunArgs),
    /// Run only checks
    Check(RunArgs),
    /// Run only reviews
    Review(RunArgs),
    /// List the gates the current changes would trigger, without running them
    Detect(RunArgs),
    /// Archive the current cycle's logs and start over
    Clean,
    /// Agent stop hook: reads the hook input on stdin, writes a decision on stdout
    StopHook,
}

#[derive(Args, Clone, Debug, Default)]
pub struct RunArgs {
    /// Only run gates with this name
    #[arg(short, long)]
    pub gate: Option<String>,

    /// Diff a single commit instead of the base branch
    #[arg(long, conflicts_with = "uncommitted")]
    pub commit: Option<String>,

    /// Diff uncommitted changes only (HEAD to working tree)
    #[arg(long)]
    pub uncommitted: bool,
}

impl RunArgs {
    pub fn options(&self, kind: Option<JobKind>) -> RunOptions {
        let change_ref = match (&self.commit, self.uncommitted) {
            (Some(commit), _) => Some(ChangeRef::Commit(commit.clone())),
            (None, true) => Some(ChangeRef::Uncommitted),
            (None, false) => None,
        };
        RunOptions {
            change_ref,
            filter: JobFilter {
                gate: self.gate.clone(),
                kind,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    gauntlet::logging::init(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => std::path::absolute(&dir)
            .with_context(|| format!("Invalid project directory: {}", dir.display()))?,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run(args) => cmd::cmd_run(&project_dir, args.options(None)).await,
        Commands::Check(args) => cmd::cmd_run(&project_dir, args.options(Some(JobKind::Check))).await,
        Commands::Review(args) => cmd::cmd_run(&project_dir, args.options(Some(JobKind::Review))).await,
        Commands::Detect(args) => cmd::cmd_detect(&project_dir, args.options(None)),
        Commands::Clean => cmd::cmd_clean(&project_dir),
        Commands::StopHook => cmd::cmd_stop_hook(&project_dir).await,
    }
}
