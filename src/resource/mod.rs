//! Resource kinds and the shared reconciliation interface.
//!
//! Every kind (server, floating IP, SSH key, volume, project) implements
//! [`ManagedResource`]: how to look it up, how to build its create payload,
//! and which operations bring an observed resource to the desired state.
//! [`DesiredResource`] is the closed set of kinds a manifest can declare.

mod floating_ip;
mod kind;
mod project;
mod server;
mod ssh_key;
mod volume;

use serde::{Deserialize, Serialize};

use crate::cherry::ObservedResource;
use crate::config::{WaitPolicy, WaitSettings};
use crate::error::Result;
use crate::planner::{CreateRequest, Operation};

pub use floating_ip::FloatingIpSpec;
pub use kind::{ResourceKind, ResourceStatus, Scope};
pub use project::ProjectSpec;
pub use server::{PowerState, ReinstallPolicy, ServerSpec, ServerState};
pub use ssh_key::SshKeySpec;
pub use volume::{VolumeSpec, VolumeState};

/// Whether the resource should exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The resource must exist.
    Present,
    /// The resource must not exist.
    Absent,
}

/// Simple present/absent state for kinds without richer states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// The resource must exist.
    #[default]
    Present,
    /// The resource must not exist.
    Absent,
}

impl From<Presence> for Target {
    fn from(presence: Presence) -> Self {
        match presence {
            Presence::Present => Self::Present,
            Presence::Absent => Self::Absent,
        }
    }
}

/// How an existing resource is located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Direct fetch by provider-assigned ID.
    ById(String),
    /// List a collection and keep the entries [`ManagedResource::matches`] accepts.
    ByKey {
        /// Collection to list.
        scope: Scope,
        /// Description of the match key, for messages.
        key: String,
    },
    /// Nothing identifies an existing resource; it will be created.
    Unaddressable,
}

/// Operations needed to converge an existing resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    /// Operations, in any order; the diff engine sorts them by phase.
    pub operations: Vec<Operation>,
    /// Drift that will not be acted on.
    pub warnings: Vec<String>,
}

/// Terminal condition to wait for after executing a diff.
pub struct WaitRequest<T> {
    /// Description of the condition, for messages.
    pub goal: String,
    /// Polling cadence and budget.
    pub policy: WaitPolicy,
    /// Returns true once the condition holds.
    pub predicate: Box<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T> WaitRequest<T> {
    /// Creates a wait request.
    pub fn new(goal: impl Into<String>, policy: WaitPolicy, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self {
            goal: goal.into(),
            policy,
            predicate: Box::new(predicate),
        }
    }

    /// Evaluates the condition.
    pub fn is_satisfied(&self, observed: &T) -> bool {
        (self.predicate)(observed)
    }
}

impl<T> std::fmt::Debug for WaitRequest<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitRequest")
            .field("goal", &self.goal)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Reconciliation interface shared by every resource kind.
pub trait ManagedResource: Send + Sync {
    /// Provider representation of this kind.
    type Observed: ObservedResource;

    /// Kind tag.
    const KIND: ResourceKind;

    /// Whether the resource should exist.
    fn target(&self) -> Target;

    /// How to locate an existing resource.
    fn lookup(&self) -> Lookup;

    /// Whether an entry of a listed collection matches the lookup key.
    fn matches(&self, _observed: &Self::Observed) -> bool {
        false
    }

    /// Rejects observed resources this desired state must not manage.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is of the wrong type.
    fn check_observed(&self, _observed: &Self::Observed) -> Result<()> {
        Ok(())
    }

    /// Builds the create payload.
    ///
    /// # Errors
    ///
    /// Returns an error if fields required for creation are missing or invalid.
    fn create_request(&self) -> Result<CreateRequest>;

    /// Operations to run right after a create.
    fn after_create(&self) -> Vec<Operation> {
        Vec::new()
    }

    /// Server that must exist, with no storage attached, before a create.
    fn create_attachment_target(&self) -> Option<u64> {
        None
    }

    /// Operations that bring `observed` to the desired state.
    ///
    /// # Errors
    ///
    /// Returns an error if the desired state cannot be reached from `observed`.
    fn changes(&self, observed: &Self::Observed) -> Result<Changes>;

    /// Operations that remove `observed`.
    fn teardown(&self, _observed: &Self::Observed) -> Vec<Operation> {
        vec![Operation::Delete]
    }

    /// Terminal condition to wait for, if the caller asked for one.
    fn wait_request(&self, _waits: &WaitSettings) -> Option<WaitRequest<Self::Observed>> {
        None
    }

    /// Human-readable name for messages.
    fn label(&self) -> String;
}

/// One entry of a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DesiredResource {
    /// A server.
    Server(ServerSpec),
    /// A floating IP.
    FloatingIp(FloatingIpSpec),
    /// An SSH key.
    SshKey(SshKeySpec),
    /// A storage volume.
    Volume(VolumeSpec),
    /// A project.
    Project(ProjectSpec),
}

impl DesiredResource {
    /// Kind of this entry.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Server(_) => ResourceKind::Server,
            Self::FloatingIp(_) => ResourceKind::FloatingIp,
            Self::SshKey(_) => ResourceKind::SshKey,
            Self::Volume(_) => ResourceKind::Volume,
            Self::Project(_) => ResourceKind::Project,
        }
    }

    /// Human-readable name for messages.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Server(spec) => spec.label(),
            Self::FloatingIp(spec) => spec.label(),
            Self::SshKey(spec) => spec.label(),
            Self::Volume(spec) => spec.label(),
            Self::Project(spec) => spec.label(),
        }
    }

    /// Whether the resource should exist.
    #[must_use]
    pub fn target(&self) -> Target {
        match self {
            Self::Server(spec) => spec.target(),
            Self::FloatingIp(spec) => spec.target(),
            Self::SshKey(spec) => spec.target(),
            Self::Volume(spec) => spec.target(),
            Self::Project(spec) => spec.target(),
        }
    }

    /// How an existing resource is located.
    #[must_use]
    pub fn lookup(&self) -> Lookup {
        match self {
            Self::Server(spec) => spec.lookup(),
            Self::FloatingIp(spec) => spec.lookup(),
            Self::SshKey(spec) => spec.lookup(),
            Self::Volume(spec) => spec.lookup(),
            Self::Project(spec) => spec.lookup(),
        }
    }

    /// Builds the create payload without contacting the API.
    ///
    /// # Errors
    ///
    /// Returns an error if fields required for creation are missing or invalid.
    pub fn create_request(&self) -> Result<CreateRequest> {
        match self {
            Self::Server(spec) => spec.create_request(),
            Self::FloatingIp(spec) => spec.create_request(),
            Self::SshKey(spec) => spec.create_request(),
            Self::Volume(spec) => spec.create_request(),
            Self::Project(spec) => spec.create_request(),
        }
    }
}

/// Case-insensitive slug comparison; `None` observed never matches.
#[must_use]
pub fn slugs_equal(desired: &str, observed: Option<&str>) -> bool {
    observed.is_some_and(|o| o.eq_ignore_ascii_case(desired))
}

/// Collects names of required fields that are unset.
pub(crate) fn missing_fields(checks: &[(&str, bool)]) -> Vec<String> {
    checks
        .iter()
        .filter(|(_, present)| !present)
        .map(|(name, _)| (*name).to_string())
        .collect()
}
