//! Diff engine for comparing desired vs observed state.
//!
//! [`compute_diff`] is a pure function: the same desired state and observed
//! resource always produce the same [`Diff`].

use tracing::debug;

use crate::error::Result;
use crate::resource::{ManagedResource, Target};

use super::plan::{Diff, Operation};

/// Computes the operations that bring `observed` to `desired`.
///
/// | target  | observed | result                  |
/// |---------|----------|-------------------------|
/// | absent  | none     | `[NoOp]`                |
/// | absent  | some     | teardown                |
/// | present | none     | create, then follow-ups |
/// | present | some     | in-place changes        |
///
/// Operations are stable-sorted by phase so that updates run before actions.
///
/// # Errors
///
/// Returns an error if create fields are missing or the desired state cannot
/// be reached from the observed one.
pub fn compute_diff<R: ManagedResource>(desired: &R, observed: Option<&R::Observed>) -> Result<Diff> {
    let kind = R::KIND;
    let mut diff = match (desired.target(), observed) {
        (Target::Absent, None) => {
            debug!("{kind} {} is absent as desired", desired.label());
            Diff::noop()
        }
        (Target::Absent, Some(observed)) => Diff {
            operations: desired.teardown(observed),
            warnings: Vec::new(),
        },
        (Target::Present, None) => {
            let mut operations = vec![Operation::Create(desired.create_request()?)];
            operations.extend(desired.after_create());
            Diff {
                operations,
                warnings: Vec::new(),
            }
        }
        (Target::Present, Some(observed)) => {
            let changes = desired.changes(observed)?;
            let operations = if changes.operations.is_empty() {
                vec![Operation::NoOp]
            } else {
                changes.operations
            };
            Diff {
                operations,
                warnings: changes.warnings,
            }
        }
    };

    diff.operations.sort_by_key(Operation::phase);
    debug!("{kind} {}: {:?}", desired.label(), diff.labels());
    Ok(diff)
}
