//! Storage volume desired state and diff rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cherry::Volume;
use crate::config::WaitSettings;
use crate::error::{ReconcileError, Result};
use crate::planner::{ActionKind, CreateRequest, FieldSet, Operation};

use super::{missing_fields, slugs_equal, Changes, Lookup, ManagedResource, ResourceKind, Scope, Target, WaitRequest};

/// Desired lifecycle state of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeState {
    /// Exists; attached to `target_server_id` when one is given.
    #[default]
    Present,
    /// Exists and is attached to `target_server_id`.
    Attached,
    /// Exists and is not attached to any server.
    Detached,
    /// Does not exist.
    Absent,
}

/// Desired state of a storage volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeSpec {
    /// Lifecycle state.
    #[serde(default)]
    pub state: VolumeState,
    /// Existing volume ID.
    #[serde(default)]
    pub id: Option<u64>,
    /// Project the volume belongs to.
    #[serde(default)]
    pub project_id: Option<u64>,
    /// Region slug.
    #[serde(default)]
    pub region: Option<String>,
    /// Size in GB.
    #[serde(default)]
    pub size: Option<u64>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Server to attach to.
    #[serde(default)]
    pub target_server_id: Option<u64>,
    /// Wait until the attachment is observed.
    #[serde(default)]
    pub wait: bool,
}

impl VolumeSpec {
    /// Checks that state and target agree.
    ///
    /// # Errors
    ///
    /// Returns an error for `detached` with a target, or `attached` without one.
    pub fn check_state(&self) -> Result<()> {
        match (self.state, self.target_server_id) {
            (VolumeState::Detached, Some(_)) => Err(ReconcileError::invalid(
                Self::KIND,
                "target_server_id cannot be set when state is detached",
            )
            .into()),
            (VolumeState::Attached, None) => Err(ReconcileError::invalid(
                Self::KIND,
                "target_server_id is required when state is attached",
            )
            .into()),
            _ => Ok(()),
        }
    }

    /// Server the volume should end up attached to, if any.
    const fn wanted_attachment(&self) -> Option<u64> {
        match self.state {
            VolumeState::Detached | VolumeState::Absent => None,
            VolumeState::Present | VolumeState::Attached => self.target_server_id,
        }
    }
}

fn attach(server_id: u64) -> Operation {
    let mut params = FieldSet::new();
    params.insert(String::from("attach_to"), Value::from(server_id));
    Operation::action(ActionKind::Attach, params)
}

fn detach() -> Operation {
    Operation::action(ActionKind::Detach, FieldSet::new())
}

impl ManagedResource for VolumeSpec {
    type Observed = Volume;

    const KIND: ResourceKind = ResourceKind::Volume;

    fn target(&self) -> Target {
        match self.state {
            VolumeState::Absent => Target::Absent,
            _ => Target::Present,
        }
    }

    fn lookup(&self) -> Lookup {
        self.id
            .map_or(Lookup::Unaddressable, |id| Lookup::ById(id.to_string()))
    }

    fn create_request(&self) -> Result<CreateRequest> {
        self.check_state()?;
        let missing = missing_fields(&[
            ("project_id", self.project_id.is_some()),
            ("region", self.region.is_some()),
            ("size", self.size.is_some()),
        ]);
        let (Some(project), true) = (self.project_id, missing.is_empty()) else {
            return Err(ReconcileError::MissingCreateFields {
                kind: Self::KIND,
                fields: missing,
            }
            .into());
        };

        let mut fields = FieldSet::new();
        if let Some(size) = self.size {
            fields.insert(String::from("size"), Value::from(size));
        }
        if let Some(region) = &self.region {
            fields.insert(String::from("region"), Value::from(region.clone()));
        }
        if let Some(description) = &self.description {
            fields.insert(String::from("description"), Value::from(description.clone()));
        }
        Ok(CreateRequest {
            scope: Scope::Project(project),
            fields,
        })
    }

    fn after_create(&self) -> Vec<Operation> {
        self.wanted_attachment().map(attach).into_iter().collect()
    }

    fn create_attachment_target(&self) -> Option<u64> {
        self.wanted_attachment()
    }

    fn changes(&self, observed: &Volume) -> Result<Changes> {
        self.check_state()?;
        let mut changes = Changes::default();

        if let Some(region) = &self.region {
            if !slugs_equal(region, observed.region.as_deref()) {
                changes.warnings.push(format!(
                    "volume {}: region is '{}' but '{region}' was requested; it cannot change in place",
                    observed.id,
                    observed.region.as_deref().unwrap_or("unset")
                ));
            }
        }

        let mut update = FieldSet::new();
        if let Some(size) = self.size {
            if size < observed.size {
                return Err(ReconcileError::invalid(
                    Self::KIND,
                    format!("volume {} is {} GB and cannot shrink to {size} GB", observed.id, observed.size),
                )
                .into());
            }
            if size != observed.size {
                update.insert(String::from("size"), Value::from(size));
            }
        }
        if let Some(description) = &self.description {
            if observed.description.as_ref() != Some(description) {
                update.insert(String::from("description"), Value::from(description.clone()));
            }
        }
        if !update.is_empty() {
            changes.operations.push(Operation::Update(update));
        }

        let attached = observed.attached_server_id();
        match (self.state, self.wanted_attachment()) {
            (VolumeState::Detached, _) => {
                if attached.is_some() {
                    changes.operations.push(detach());
                }
            }
            (_, Some(server)) if attached != Some(server) => {
                if attached.is_some() {
                    changes.operations.push(detach());
                }
                changes.operations.push(attach(server));
            }
            _ => {}
        }

        Ok(changes)
    }

    fn teardown(&self, observed: &Volume) -> Vec<Operation> {
        let mut operations = Vec::new();
        if observed.attached_server_id().is_some() {
            operations.push(detach());
        }
        operations.push(Operation::Delete);
        operations
    }

    fn wait_request(&self, waits: &WaitSettings) -> Option<WaitRequest<Volume>> {
        if !self.wait {
            return None;
        }
        let policy = waits.for_kind(Self::KIND);
        match (self.state, self.wanted_attachment()) {
            (VolumeState::Absent, _) => None,
            (VolumeState::Detached, _) => Some(WaitRequest::new("detachment", policy, |v: &Volume| {
                v.attached_server_id().is_none()
            })),
            (_, Some(server)) => Some(WaitRequest::new(
                format!("attachment to server {server}"),
                policy,
                move |v: &Volume| v.attached_server_id() == Some(server),
            )),
            (_, None) => None,
        }
    }

    fn label(&self) -> String {
        self.description
            .clone()
            .or_else(|| self.id.map(|id| id.to_string()))
            .unwrap_or_else(|| String::from("(new)"))
    }
}
