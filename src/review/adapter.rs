//! Reviewer adapters and the registry they are resolved from.

use crate::config::{AdapterDefinition, GauntletConfig};
use crate::errors::GateError;
use anyhow::Context;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// An external reviewer.
#[async_trait]
pub trait ReviewAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the reviewer can be invoked right now.
    async fn is_available(&self) -> bool;

    /// Send the prompt and diff, return the reviewer's raw output.
    async fn invoke(&self, prompt: &str, diff: &str, timeout: Duration) -> Result<String, GateError>;
}

/// Prompt and diff as one stdin payload.
pub fn render_input(prompt: &str, diff: &str) -> String {
    format!("{}\n\n## Diff\n\n```diff\n{}\n```\n", prompt.trim_end(), diff.trim_end())
}

/// Reviewer run as a subprocess that reads its input from stdin.
pub struct CliAdapter {
    name: String,
    definition: AdapterDefinition,
    working_dir: PathBuf,
}

impl CliAdapter {
    pub fn new(name: impl Into<String>, definition: AdapterDefinition, working_dir: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            definition,
            working_dir: working_dir.as_ref().to_path_buf(),
        }
    }

    fn command_line(&self) -> String {
        std::iter::once(self.definition.command.as_str())
            .chain(self.definition.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl ReviewAdapter for CliAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        which::which(&self.definition.command).is_ok()
    }

    async fn invoke(&self, prompt: &str, diff: &str, timeout: Duration) -> Result<String, GateError> {
        let command = self.command_line();
        let mut child = Command::new(&self.definition.command)
            .args(&self.definition.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GateError::SpawnFailed {
                command: command.clone(),
                source,
            })?;

        let input = render_input(prompt, diff);
        let mut stdin = child.stdin.take().context("Failed to open reviewer stdin")?;
        let writer = async move {
            // A reviewer may exit without draining stdin; its exit status decides.
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                debug!(error = %e, "reviewer closed stdin early");
            }
            let _ = stdin.shutdown().await;
        };

        let run = async move {
            let (_, output) = tokio::join!(writer, child.wait_with_output());
            output
        };

        let output = match tokio::time::timeout(timeout, run).await {
            Ok(result) => result.with_context(|| format!("Failed to wait for reviewer: {}", command))?,
            Err(_) => {
                return Err(GateError::Timeout {
                    command,
                    secs: timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                debug!(adapter = %self.name, stderr = %stderr.trim(), "reviewer stderr");
            }
            return Err(GateError::NonZeroExit {
                command,
                code: output.status.code().unwrap_or(-1),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Adapters by name, resolved when reviews are dispatched.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn ReviewAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`CliAdapter`] for every adapter name the configuration mentions.
    pub fn from_config(config: &GauntletConfig, working_dir: &Path) -> Self {
        let mut registry = Self::new();
        for name in config.adapter_names() {
            let definition = config.adapter_definition(&name);
            registry.register(Arc::new(CliAdapter::new(name, definition, working_dir)));
        }
        registry
    }

    /// Add or replace an adapter under its own name.
    pub fn register(&mut self, adapter: Arc<dyn ReviewAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ReviewAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    /// Available adapters from `preference`, in preference order.
    pub async fn healthy(&self, preference: &[String]) -> Vec<Arc<dyn ReviewAdapter>> {
        let mut healthy = Vec::new();
        for name in preference {
            let Some(adapter) = self.get(name) else {
                warn!(adapter = %name, "adapter is not registered");
                continue;
            };
            if adapter.is_available().await {
                healthy.push(adapter);
            } else {
                warn!(adapter = %name, "adapter unavailable, skipping");
            }
        }
        healthy
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}
