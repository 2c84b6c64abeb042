//! Project desired state and diff rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cherry::Project;
use crate::error::{ReconcileError, Result};
use crate::planner::{CreateRequest, FieldSet, Operation};

use super::{missing_fields, Changes, Lookup, ManagedResource, Presence, ResourceKind, Scope, Target};

/// Desired state of a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectSpec {
    /// Whether the project should exist.
    #[serde(default)]
    pub state: Presence,
    /// Existing project ID.
    #[serde(default)]
    pub id: Option<u64>,
    /// Team the project belongs to.
    #[serde(default)]
    pub team_id: Option<u64>,
    /// Name.
    #[serde(default)]
    pub name: Option<String>,
    /// Whether BGP is enabled.
    #[serde(default)]
    pub bgp: Option<bool>,
}

impl ManagedResource for ProjectSpec {
    type Observed = Project;

    const KIND: ResourceKind = ResourceKind::Project;

    fn target(&self) -> Target {
        self.state.into()
    }

    fn lookup(&self) -> Lookup {
        if let Some(id) = self.id {
            return Lookup::ById(id.to_string());
        }
        match (self.team_id, &self.name) {
            (Some(team), Some(name)) => Lookup::ByKey {
                scope: Scope::Team(team),
                key: format!("name={name}"),
            },
            _ => Lookup::Unaddressable,
        }
    }

    fn matches(&self, observed: &Project) -> bool {
        self.name.as_deref() == Some(observed.name.as_str())
    }

    fn create_request(&self) -> Result<CreateRequest> {
        let missing = missing_fields(&[("name", self.name.is_some()), ("team_id", self.team_id.is_some())]);
        let (Some(name), Some(team)) = (&self.name, self.team_id) else {
            return Err(ReconcileError::MissingCreateFields {
                kind: Self::KIND,
                fields: missing,
            }
            .into());
        };

        let mut fields = FieldSet::new();
        fields.insert(String::from("name"), Value::from(name.clone()));
        if let Some(bgp) = self.bgp {
            fields.insert(String::from("bgp"), Value::from(bgp));
        }
        Ok(CreateRequest {
            scope: Scope::Team(team),
            fields,
        })
    }

    fn changes(&self, observed: &Project) -> Result<Changes> {
        let mut update = FieldSet::new();
        if let Some(name) = &self.name {
            if *name != observed.name {
                update.insert(String::from("name"), Value::from(name.clone()));
            }
        }
        if let Some(bgp) = self.bgp {
            if bgp != observed.bgp_enabled() {
                update.insert(String::from("bgp"), Value::from(bgp));
            }
        }

        let mut changes = Changes::default();
        if !update.is_empty() {
            changes.operations.push(Operation::Update(update));
        }
        Ok(changes)
    }

    fn label(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.id.map(|id| id.to_string()))
            .unwrap_or_else(|| String::from("(unnamed)"))
    }
}
