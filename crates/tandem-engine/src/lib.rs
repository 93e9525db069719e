//! Workflow orchestration core for the Tandem dual-platform monitor.
//!
//! This crate implements the engine around the replaceable I/O adapters: the
//! per-platform branch pipeline (authenticate → extract → classify), the
//! bounded retry controller, the two-branch synchronization barrier, the
//! two-level status aggregator, and the run-level error handling.

pub mod aggregate;
pub mod barrier;
pub mod branch;
pub mod events;
pub mod retry;
pub mod runner;

pub use aggregate::{aggregate, fold_group_statuses, fold_task_states};
pub use barrier::await_both;
pub use branch::{BranchConfig, BranchPipeline};
pub use events::{EventEmitter, RunEvent};
pub use retry::{run_with_retry, run_with_retry_if, BackoffPolicy};
pub use runner::{RunOutcome, WorkflowRunner};
