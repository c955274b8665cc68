//! Wire types for the agent stop hook.
//!
//! The agent runtime writes a [`StopHookInput`] to stdin and reads a
//! [`StopHookResponse`] from stdout.

use crate::orchestrator::RunStatus;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StopHookInput {
    #[serde(default)]
    pub session_id: Option<String>,
    /// Set by the runtime when the agent is already continuing because of a
    /// previous block.
    #[serde(default)]
    pub stop_hook_active: bool,
}

impl StopHookInput {
    /// Parse stdin. Empty or malformed input is treated as an empty object.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::default();
        }
        serde_json::from_str(raw).unwrap_or_else(|e| {
            warn!(error = %e, "malformed stop hook input, using defaults");
            Self::default()
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookDecision {
    Approve,
    Block,
}

/// Why the hook decided the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopHookStatus {
    StopHookActive,
    NoConfig,
    Disabled,
    LockConflict,
    IntervalNotElapsed,
    NoChanges,
    NoApplicableGates,
    Passed,
    PassedWithWarnings,
    Failed,
    RetryLimitExceeded,
    InfrastructureError,
    Error,
}

impl From<RunStatus> for StopHookStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::NoChanges => StopHookStatus::NoChanges,
            RunStatus::NoApplicableGates => StopHookStatus::NoApplicableGates,
            RunStatus::Passed => StopHookStatus::Passed,
            RunStatus::PassedWithWarnings => StopHookStatus::PassedWithWarnings,
            RunStatus::Failed => StopHookStatus::Failed,
            RunStatus::RetryLimitExceeded => StopHookStatus::RetryLimitExceeded,
            RunStatus::InfrastructureError => StopHookStatus::InfrastructureError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopHookResponse {
    pub decision: HookDecision,
    pub status: StopHookStatus,
    pub message: String,
    /// Instructions fed back to the agent when blocking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StopHookResponse {
    pub fn approve(status: StopHookStatus, message: impl Into<String>) -> Self {
        Self {
            decision: HookDecision::Approve,
            status,
            message: message.into(),
            reason: None,
        }
    }

    pub fn block(status: StopHookStatus, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            decision: HookDecision::Block,
            status,
            reason: Some(message.clone()),
            message,
        }
    }

    pub fn is_block(&self) -> bool {
        self.decision == HookDecision::Block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input_variants() {
        assert_eq!(StopHookInput::parse(""), StopHookInput::default());
        assert_eq!(StopHookInput::parse("garbage"), StopHookInput::default());

        let input = StopHookInput::parse(r#"{"session_id": "abc", "stop_hook_active": true, "extra": 1}"#);
        assert_eq!(input.session_id.as_deref(), Some("abc"));
        assert!(input.stop_hook_active);
    }

    #[test]
    fn test_block_response_carries_reason() {
        let json = serde_json::to_value(StopHookResponse::block(StopHookStatus::Failed, "fix it")).unwrap();
        assert_eq!(json["decision"], "block");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "fix it");
    }

    #[test]
    fn test_approve_response_omits_reason() {
        let json = serde_json::to_value(StopHookResponse::approve(StopHookStatus::NoConfig, "none")).unwrap();
        assert_eq!(json["decision"], "approve");
        assert_eq!(json["status"], "no_config");
        assert!(json.get("reason").is_none());
    }
}
