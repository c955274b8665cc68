//! Agent stop hook.
//!
//! Agent runtimes call `gauntlet stop-hook` when an agent is about to stop.
//! The hook runs the gates and either lets the agent stop (`approve`) or
//! sends it back to work with remediation instructions (`block`).
//!
//! Only a failed run with retries remaining blocks. Every other outcome,
//! including internal errors, approves so a broken tool never traps the
//! agent in a loop.
//!
//! # Usage
//!
//! ```ignore
//! use gauntlet::hooks::{resolve, ExecutorGateRunner, StopHookInput};
//!
//! let input = StopHookInput::parse(&stdin);
//! let response = resolve(&input, &project_dir, &ExecutorGateRunner, Utc::now()).await;
//! println!("{}", serde_json::to_string(&response)?);
//! ```

pub mod resolver;
pub mod types;

pub use resolver::{ExecutorGateRunner, GateRunner, resolve};
pub use types::{HookDecision, StopHookInput, StopHookResponse, StopHookStatus};
