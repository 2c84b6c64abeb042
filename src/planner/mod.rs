//! Planning module for reconciliation.
//!
//! This module compares desired and observed state, producing an ordered
//! [`Diff`] of operations, and executes that diff against the API.

mod diff;
mod executor;
mod merge;
mod plan;

pub use diff::compute_diff;
pub use executor::{ExecutionReport, OperationExecutor};
pub use merge::{generate_password, merge_with_observed, ReinstallParams, PASSWORD_LENGTH};
pub use plan::{ActionKind, CreateRequest, Diff, FieldSet, Operation};
