// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is reported
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are reported
#![warn(unused_variables)]            // Unused variables are reported
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # cherrysync
//!
//! Declarative, idempotent reconciliation of Cherry Servers infrastructure.
//!
//! ## Overview
//!
//! cherrysync brings servers, floating IPs, SSH keys, storage volumes and
//! projects to a declared state:
//!
//! - Describe resources in a `cherry.yaml` manifest
//! - Preview the create, update, action and delete calls with `plan`
//! - Converge with `apply`; a second run on a converged manifest is a no-op
//! - Browse the live inventory with `list` and `get`
//!
//! ## Architecture
//!
//! Each resource is reconciled on its own, with no state kept between runs:
//!
//! 1. **Lookup**: find the resource by ID or by a unique match key
//! 2. **Diff**: compare desired and observed state into ordered operations
//! 3. **Execute**: run the operations in order, retrying transient failures
//! 4. **Wait**: optionally poll until a terminal condition holds
//!
//! ## Modules
//!
//! - [`cherry`]: API client, wire types and inventory listing
//! - [`resource`]: Desired-state models for each resource kind
//! - [`planner`]: Diff computation and operation execution
//! - [`waiter`]: Poll loop for asynchronous provider operations
//! - [`reconciler`]: Per-resource reconciliation driver
//! - [`config`]: Engine settings, manifest parsing and validation
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! resources:
//!   - kind: ssh_key
//!     label: deploy
//!     key: ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAI deploy@ci
//!
//!   - kind: server
//!     project_id: 123
//!     hostname: web-1
//!     plan: e5_1620v4
//!     region: LT-Siauliai
//!     image: ubuntu_22_04
//!     state: active
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cherry;
pub mod cli;
pub mod config;
pub mod error;
pub mod planner;
pub mod reconciler;
pub mod resource;
pub mod waiter;

// ============================================================================
// Re-exports
// ============================================================================

pub use cherry::{CherryClient, Inventory, ServerFilter};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, EngineConfig, Manifest, ManifestValidator};
pub use error::{CherryError, Result};
pub use planner::{compute_diff, Diff, Operation, OperationExecutor};
pub use reconciler::{PlanReport, ReconcileResult, Reconciler};
pub use resource::{DesiredResource, ManagedResource, ResourceKind};
pub use waiter::{WaitOutcome, Waiter};
