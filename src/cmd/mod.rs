//! CLI command implementations.
//!
//! | Module      | Commands handled            |
//! |-------------|-----------------------------|
//! | `run`       | `Run`, `Check`, `Review`    |
//! | `detect`    | `Detect`                    |
//! | `clean`     | `Clean`                     |
//! | `stop_hook` | `StopHook`                  |

pub mod clean;
pub mod detect;
pub mod run;
pub mod stop_hook;

pub use clean::cmd_clean;
pub use detect::cmd_detect;
pub use run::cmd_run;
pub use stop_hook::cmd_stop_hook;

use anyhow::Result;
use gauntlet::config::GauntletConfig;
use gauntlet::orchestrator::RunExecutor;
use gauntlet::review::AdapterRegistry;
use gauntlet::tracker::GitTracker;
use std::path::Path;
use std::sync::Arc;

/// Executor wired to the project's git repository and configured adapters.
pub fn build_executor(project_dir: &Path) -> Result<RunExecutor> {
    let config = GauntletConfig::load(project_dir)?;
    let vcs = GitTracker::new(project_dir)?;
    let registry = AdapterRegistry::from_config(&config, project_dir);
    Ok(RunExecutor::new(project_dir, config, Arc::new(vcs), registry))
}
