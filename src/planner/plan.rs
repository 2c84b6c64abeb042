//! Operation model produced by the diff engine.
//!
//! A [`Diff`] is an ordered list of [`Operation`]s for a single resource.
//! Field sets are ordered maps so that the same inputs always serialize
//! to the same payloads.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::resource::Scope;

/// Ordered set of JSON fields sent to the API.
pub type FieldSet = BTreeMap<String, serde_json::Value>;

/// A single step of a reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Nothing to do.
    NoOp,
    /// Create the resource.
    Create(CreateRequest),
    /// Mutate fields in place.
    Update(FieldSet),
    /// Trigger a provider-side action.
    Action {
        /// Which action.
        action: ActionKind,
        /// Action parameters.
        params: FieldSet,
    },
    /// Delete the resource.
    Delete,
}

/// Payload and target collection for a create call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateRequest {
    /// Collection the resource is created in.
    pub scope: Scope,
    /// Request body.
    pub fields: FieldSet,
}

/// Provider-side actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Reinstall the operating system.
    Reinstall,
    /// Power the server on.
    PowerOn,
    /// Power the server off.
    PowerOff,
    /// Attach a volume to a server.
    Attach,
    /// Detach a volume from its server.
    Detach,
}

/// Ordered operations for one resource plus non-fatal findings.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Diff {
    /// Operations in execution order.
    pub operations: Vec<Operation>,
    /// Drift that will not be acted on.
    pub warnings: Vec<String>,
}

impl Operation {
    /// Creates an action operation.
    #[must_use]
    pub const fn action(action: ActionKind, params: FieldSet) -> Self {
        Self::Action { action, params }
    }

    /// Execution phase; operations are stable-sorted by it.
    #[must_use]
    pub const fn phase(&self) -> u8 {
        match self {
            Self::NoOp => 0,
            Self::Create(_) => 1,
            Self::Update(_) => 2,
            Self::Action { .. } => 3,
            Self::Delete => 4,
        }
    }

    /// Whether the operation changes anything.
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        !matches!(self, Self::NoOp)
    }

    /// Whether repeating the call has no additional effect.
    #[must_use]
    pub const fn is_idempotent(&self) -> bool {
        matches!(self, Self::NoOp | Self::Update(_) | Self::Delete)
    }
}

impl ActionKind {
    /// Value of the `type` field for server actions.
    #[must_use]
    pub const fn api_type(self) -> &'static str {
        match self {
            Self::Reinstall => "reinstall",
            Self::PowerOn => "power_on",
            Self::PowerOff => "power_off",
            Self::Attach => "attach",
            Self::Detach => "detach",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.api_type())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoOp => write!(f, "noop"),
            Self::Create(_) => write!(f, "create"),
            Self::Update(fields) => {
                let names: Vec<&str> = fields.keys().map(String::as_str).collect();
                write!(f, "update({})", names.join(", "))
            }
            Self::Action { action, .. } => write!(f, "action({action})"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

impl Diff {
    /// A diff with nothing to do.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            operations: vec![Operation::NoOp],
            warnings: Vec::new(),
        }
    }

    /// Returns true if no operation mutates anything.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.operations.iter().all(|op| !op.is_mutating())
    }

    /// Operations that mutate, in order.
    pub fn mutating(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(|op| op.is_mutating())
    }

    /// Short labels of every mutating operation.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.mutating().map(ToString::to_string).collect()
    }
}
