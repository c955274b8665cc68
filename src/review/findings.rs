//! Review result types and reviewer output parsing.
//!
//! Every review slot writes one [`ReviewResultFile`] per run. Between
//! iterations the fixing agent edits the `status` of each [`Violation`] in
//! that file (`fixed` or `skipped`); the rerun resolver reads the edited file
//! back on the next invocation.
//!
//! ## Example
//!
//! ```
//! use gauntlet::review::findings::{parse_reviewer_output, Priority, ReviewStatus};
//!
//! let raw = r#"Looks mostly fine.
//! {"status": "fail", "violations": [
//!   {"file": "src/auth.rs", "line": 42, "issue": "Token logged in plain text", "priority": "high"}
//! ]}"#;
//!
//! let result = parse_reviewer_output("claude", raw).unwrap();
//! assert_eq!(result.status, ReviewStatus::Fail);
//! assert_eq!(result.violations[0].priority, Priority::High);
//! ```

use crate::errors::GateError;
use crate::util::extract_json_object;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Violation priority, ordered from most to least severe.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Whether a violation of this priority fails the review on its own.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Critical | Self::High | Self::Medium)
    }

    fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "critical" | "blocker" => Self::Critical,
            "high" | "error" => Self::High,
            "low" | "info" | "note" | "nit" => Self::Low,
            _ => Self::Medium,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle of a violation across iterations.
///
/// Unknown strings round-trip through [`ViolationStatus::Other`] so that a
/// hand-edited file is never rewritten or rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ViolationStatus {
    #[default]
    New,
    Fixed,
    Skipped,
    Other(String),
}

impl From<String> for ViolationStatus {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "new" => Self::New,
            "fixed" => Self::Fixed,
            "skipped" => Self::Skipped,
            _ => Self::Other(s),
        }
    }
}

impl From<ViolationStatus> for String {
    fn from(status: ViolationStatus) -> Self {
        match status {
            ViolationStatus::New => "new".to_string(),
            ViolationStatus::Fixed => "fixed".to_string(),
            ViolationStatus::Skipped => "skipped".to_string(),
            ViolationStatus::Other(s) => s,
        }
    }
}

/// One issue a reviewer raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub issue: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
    #[serde(default)]
    pub status: ViolationStatus,
    /// Note from the fixing agent, e.g. why a violation was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl Violation {
    pub fn new(file: impl Into<String>, issue: impl Into<String>, priority: Priority) -> Self {
        Self {
            file: file.into(),
            line: None,
            issue: issue.into(),
            priority,
            fix: None,
            status: ViolationStatus::New,
            result: None,
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }

    pub fn with_status(mut self, status: ViolationStatus) -> Self {
        self.status = status;
        self
    }

    /// `file:line` location string.
    pub fn location(&self) -> String {
        match self.line {
            Some(line) => format!("{}:{}", self.file, line),
            None => self.file.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pass,
    Fail,
}

/// Persisted outcome of one review slot in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResultFile {
    pub adapter: String,
    pub timestamp: DateTime<Utc>,
    pub status: ReviewStatus,
    #[serde(default)]
    pub raw_output: String,
    #[serde(default)]
    pub violations: Vec<Violation>,
}

impl ReviewResultFile {
    /// A failed result with no violations, recorded when the reviewer could
    /// not produce a usable answer. The slot reruns next iteration.
    pub fn errored(adapter: &str, raw_output: impl Into<String>) -> Self {
        Self {
            adapter: adapter.to_string(),
            timestamp: Utc::now(),
            status: ReviewStatus::Fail,
            raw_output: raw_output.into(),
            violations: Vec::new(),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == ReviewStatus::Pass
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read review result: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse review result: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize review result")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write review result: {}", path.display()))
    }
}

/// Parse a reviewer's raw response.
///
/// The last JSON object in the output is read as
/// `{"status": "pass"|"fail", "violations": [...]}`. Violations without a
/// file or issue are dropped. The review fails if the reviewer said so or if
/// any violation is medium priority or above. Every parsed violation starts
/// as `new`.
pub fn parse_reviewer_output(adapter: &str, raw: &str) -> Result<ReviewResultFile, GateError> {
    let unparseable = |message: &str| GateError::UnparseableOutput {
        adapter: adapter.to_string(),
        message: message.to_string(),
    };

    let json = extract_json_object(raw).ok_or_else(|| unparseable("no JSON object in output"))?;
    let value: serde_json::Value =
        serde_json::from_str(&json).map_err(|e| unparseable(&e.to_string()))?;

    let stated_fail = value
        .get("status")
        .and_then(|v| v.as_str())
        .is_some_and(|s| s.eq_ignore_ascii_case("fail"));

    let violations: Vec<Violation> = value
        .get("violations")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(parse_violation).collect())
        .unwrap_or_default();

    let blocking = violations.iter().any(|v| v.priority.is_blocking());
    let status = if stated_fail || blocking {
        ReviewStatus::Fail
    } else {
        ReviewStatus::Pass
    };

    Ok(ReviewResultFile {
        adapter: adapter.to_string(),
        timestamp: Utc::now(),
        status,
        raw_output: raw.to_string(),
        violations,
    })
}

fn parse_violation(value: &serde_json::Value) -> Option<Violation> {
    let file = value.get("file").and_then(|v| v.as_str())?;
    let issue = value.get("issue").and_then(|v| v.as_str())?;
    let priority = value
        .get("priority")
        .and_then(|v| v.as_str())
        .map(Priority::parse_lenient)
        .unwrap_or_default();

    let mut violation = Violation::new(file, issue, priority);
    if let Some(line) = value.get("line").and_then(|v| v.as_u64()) {
        violation = violation.with_line(line as u32);
    }
    if let Some(fix) = value.get("fix").and_then(|v| v.as_str()) {
        violation = violation.with_fix(fix);
    }
    Some(violation)
}
