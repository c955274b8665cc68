//! Configuration for gauntlet, read from `.gauntlet/config.yml`.
//!
//! Layering: file → environment → CLI flags (the last applied by the
//! commands themselves).
//!
//! # Configuration File Format
//!
//! ```yaml
//! base_branch: origin/main
//! log_dir: gauntlet_logs
//! max_retries: 3
//!
//! cli:
//!   default_preference: [claude, gemini]
//!   adapters:
//!     claude: { command: claude, args: ["--print"] }
//!
//! entry_points:
//!   - path: src
//!     exclude: ["**/*.md"]
//!     checks: [lint, test]
//!     reviews: [code-quality]
//!
//! checks:
//!   lint: { command: "cargo clippy -- -D warnings", timeout_secs: 300 }
//!   test: { command: "cargo test" }
//!
//! reviews:
//!   code-quality:
//!     prompt_file: .gauntlet/reviews/code-quality.md
//!     num_reviews: 2
//!
//! stop_hook:
//!   enabled: true
//!   run_interval_minutes: 10
//! ```

use crate::errors::ConfigError;
use crate::store::sequence::ADAPTER_DELIMITER;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Directory holding gauntlet configuration, relative to the project root.
pub const CONFIG_DIR: &str = ".gauntlet";
/// Configuration file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "config.yml";

pub const ENV_MAX_RETRIES: &str = "GAUNTLET_MAX_RETRIES";
pub const ENV_LOG_DIR: &str = "GAUNTLET_LOG_DIR";
pub const ENV_STOP_HOOK_DISABLED: &str = "GAUNTLET_STOP_HOOK_DISABLED";

fn default_base_branch() -> String {
    "origin/main".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("gauntlet_logs")
}

fn default_max_retries() -> u32 {
    crate::orchestrator::retry::DEFAULT_MAX_RETRIES
}

fn default_check_timeout() -> u64 {
    300
}

fn default_review_timeout() -> u64 {
    600
}

fn default_num_reviews() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_run_interval_minutes() -> u64 {
    10
}

fn default_stop_hook_timeout() -> u64 {
    1800
}

/// Top-level gauntlet configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GauntletConfig {
    /// Reference the default change set is diffed against.
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    /// Run store directory, relative to the project root.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Failed iterations allowed after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub cli: CliConfig,
    #[serde(default)]
    pub entry_points: Vec<EntryPoint>,
    #[serde(default)]
    pub checks: BTreeMap<String, CheckDefinition>,
    #[serde(default)]
    pub reviews: BTreeMap<String, ReviewDefinition>,
    #[serde(default)]
    pub stop_hook: StopHookConfig,
}

/// Reviewer adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Adapter names in preference order, used when a review sets none.
    pub default_preference: Vec<String>,
    /// Command lines for adapters. Unlisted adapters run their own name.
    #[serde(default)]
    pub adapters: BTreeMap<String, AdapterDefinition>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            default_preference: vec!["claude".to_string(), "gemini".to_string()],
            adapters: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterDefinition {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// A directory whose changes trigger a set of gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryPoint {
    pub path: PathBuf,
    /// Glob patterns, relative to `path`, for files that never trigger gates.
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub checks: Vec<String>,
    #[serde(default)]
    pub reviews: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckDefinition {
    pub command: String,
    #[serde(default = "default_check_timeout")]
    pub timeout_secs: u64,
    /// Overrides the entry point as working directory.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDefinition {
    #[serde(default)]
    pub prompt: Option<String>,
    /// Markdown prompt file, relative to the project root.
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,
    #[serde(default = "default_num_reviews")]
    pub num_reviews: usize,
    #[serde(default)]
    pub cli_preference: Option<Vec<String>>,
    #[serde(default = "default_review_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopHookConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum minutes between automatic runs that start a new cycle.
    #[serde(default = "default_run_interval_minutes")]
    pub run_interval_minutes: u64,
    /// Upper bound on one orchestrator run triggered by the hook.
    #[serde(default = "default_stop_hook_timeout")]
    pub timeout_secs: u64,
}

impl Default for StopHookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            run_interval_minutes: default_run_interval_minutes(),
            timeout_secs: default_stop_hook_timeout(),
        }
    }
}

/// Path of the configuration file for a project.
pub fn config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
}

impl GauntletConfig {
    /// Load, apply environment overrides and validate the project's config.
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_path(project_dir);
        if !path.exists() {
            return Err(ConfigError::NotFound { path });
        }
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::ReadFailed {
            path: path.clone(),
            source,
        })?;
        let mut config = Self::parse(&content).map_err(|source| ConfigError::ParseFailed {
            path: path.clone(),
            source,
        })?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string without validating it.
    pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(retries) = lookup(ENV_MAX_RETRIES).and_then(|v| v.trim().parse().ok()) {
            self.max_retries = retries;
        }
        if let Some(dir) = lookup(ENV_LOG_DIR).filter(|v| !v.trim().is_empty()) {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(disabled) = lookup(ENV_STOP_HOOK_DISABLED) {
            let disabled = matches!(disabled.trim(), "1" | "true" | "yes");
            self.stop_hook.enabled = !disabled;
        }
    }

    /// Reject configurations the orchestrator cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entry_points.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one entry point is required".to_string(),
            ));
        }

        for entry in &self.entry_points {
            for check in &entry.checks {
                if !self.checks.contains_key(check) {
                    return Err(ConfigError::Invalid(format!(
                        "entry point '{}' references undefined check '{}'",
                        entry.path.display(),
                        check
                    )));
                }
            }
            for review in &entry.reviews {
                if !self.reviews.contains_key(review) {
                    return Err(ConfigError::Invalid(format!(
                        "entry point '{}' references undefined review '{}'",
                        entry.path.display(),
                        review
                    )));
                }
            }
            for pattern in &entry.exclude {
                glob::Pattern::new(pattern).map_err(|e| {
                    ConfigError::Invalid(format!("invalid exclude pattern '{}': {}", pattern, e))
                })?;
            }
        }

        for (name, review) in &self.reviews {
            if review.num_reviews == 0 {
                return Err(ConfigError::Invalid(format!(
                    "review '{}' must set num_reviews to at least 1",
                    name
                )));
            }
            if review.prompt.is_none() && review.prompt_file.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "review '{}' needs a prompt or prompt_file",
                    name
                )));
            }
            if self.preference_for(review).is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "review '{}' has an empty adapter preference list",
                    name
                )));
            }
        }

        let adapter_names = self
            .cli
            .default_preference
            .iter()
            .chain(self.cli.adapters.keys())
            .chain(self.reviews.values().filter_map(|r| r.cli_preference.as_ref()).flatten());
        for name in adapter_names {
            if name.is_empty() || name.contains(ADAPTER_DELIMITER) {
                return Err(ConfigError::Invalid(format!(
                    "adapter name '{}' must be non-empty and must not contain '{}'",
                    name, ADAPTER_DELIMITER
                )));
            }
            // The name becomes part of a file name in the run store.
            let separator = name
                .chars()
                .any(|c| c == '/' || c == '\\' || std::path::is_separator(c));
            if separator || name == "." || name == ".." {
                return Err(ConfigError::Invalid(format!(
                    "adapter name '{}' must not contain a path separator",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Absolute run store directory for `project_dir`.
    pub fn log_dir_path(&self, project_dir: &Path) -> PathBuf {
        if self.log_dir.is_absolute() {
            self.log_dir.clone()
        } else {
            project_dir.join(&self.log_dir)
        }
    }

    /// Adapter preference for a review, falling back to the global default.
    pub fn preference_for(&self, review: &ReviewDefinition) -> Vec<String> {
        review
            .cli_preference
            .clone()
            .unwrap_or_else(|| self.cli.default_preference.clone())
    }

    /// Command line for an adapter name.
    pub fn adapter_definition(&self, name: &str) -> AdapterDefinition {
        self.cli.adapters.get(name).cloned().unwrap_or_else(|| AdapterDefinition {
            command: name.to_string(),
            args: Vec::new(),
        })
    }

    /// Every adapter name mentioned anywhere, in first-seen order.
    pub fn adapter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let all = self
            .cli
            .default_preference
            .iter()
            .chain(self.reviews.values().filter_map(|r| r.cli_preference.as_ref()).flatten())
            .chain(self.cli.adapters.keys());
        for name in all {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

impl ReviewDefinition {
    /// Prompt text, reading `prompt_file` relative to `project_dir` if set.
    pub fn load_prompt(&self, project_dir: &Path) -> anyhow::Result<String> {
        use anyhow::Context;

        if let Some(ref file) = self.prompt_file {
            let path = project_dir.join(file);
            return std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read review prompt: {}", path.display()));
        }
        Ok(self.prompt.clone().unwrap_or_default())
    }
}
