//! Reviewer-backed gates.
//!
//! ## Components
//!
//! - [`adapter`]: reviewer CLIs behind the [`ReviewAdapter`] trait, and the
//!   registry that health-checks them
//! - [`dispatcher`]: slot assignment, skip-on-prior-pass and concurrent
//!   execution of one review job
//! - [`findings`]: the per-slot result file and reviewer output parsing

pub mod adapter;
pub mod dispatcher;
pub mod findings;

pub use adapter::{AdapterRegistry, CliAdapter, ReviewAdapter};
pub use dispatcher::{ReviewRun, SlotPlan, assign, merge_verdict, plan_slots, run_review_job};
pub use findings::{
    Priority, ReviewResultFile, ReviewStatus, Violation, ViolationStatus, parse_reviewer_output,
};
