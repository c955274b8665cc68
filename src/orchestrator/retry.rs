//! Iteration cap for the fix/verify loop.
//!
//! The attempt number is the run number: the store numbers every iteration
//! of the current cycle, and archiving after a pass starts the count again.

/// Failed iterations allowed after the first attempt, when not configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Gates may run. `final_attempt` marks the last allowed invocation.
    Proceed { final_attempt: bool },
    /// Every allowed attempt has been used; nothing may run until reset.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryGovernor {
    max_retries: u32,
}

impl RetryGovernor {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// First attempt plus `max_retries`.
    pub fn allowed_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn evaluate(&self, attempt: u32) -> RetryDecision {
        let allowed = self.allowed_attempts();
        if attempt > allowed {
            RetryDecision::Exhausted
        } else {
            RetryDecision::Proceed {
                final_attempt: attempt == allowed,
            }
        }
    }

    /// Message for a refused invocation.
    pub fn exhausted_message(&self, attempt: u32) -> String {
        format!(
            "Retry limit reached: attempt {} exceeds the {} allowed (max_retries = {}). \
             Run `gauntlet clean` to archive this cycle and start over.",
            attempt,
            self.allowed_attempts(),
            self.max_retries
        )
    }
}

impl Default for RetryGovernor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}
