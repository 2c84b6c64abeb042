//! Floating IP desired state and diff rules.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::cherry::types::{normalize_a_record, normalize_ptr_record, FLOATING_IP_TYPE};
use crate::cherry::FloatingIp;
use crate::error::{ReconcileError, Result};
use crate::planner::{CreateRequest, FieldSet, Operation};

use super::{missing_fields, slugs_equal, Changes, Lookup, ManagedResource, Presence, ResourceKind, Scope, Target};

/// Desired state of a floating IP.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FloatingIpSpec {
    /// Whether the IP should exist.
    #[serde(default)]
    pub state: Presence,
    /// Existing IP ID.
    #[serde(default)]
    pub id: Option<String>,
    /// Project the IP belongs to.
    #[serde(default)]
    pub project_id: Option<u64>,
    /// Region slug.
    #[serde(default)]
    pub region: Option<String>,
    /// Route traffic to this IP ID.
    #[serde(default)]
    pub route_ip_id: Option<String>,
    /// Target this server ID; 0 unassigns.
    #[serde(default)]
    pub target_server_id: Option<u64>,
    /// Reverse DNS record.
    #[serde(default)]
    pub ptr_record: Option<String>,
    /// Forward DNS record, without the provider suffix.
    #[serde(default)]
    pub a_record: Option<String>,
    /// Tags.
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

impl FloatingIpSpec {
    /// Rejects setting both a route and a target.
    ///
    /// # Errors
    ///
    /// Returns an error if both `route_ip_id` and `target_server_id` are set.
    pub fn check_exclusive(&self) -> Result<()> {
        if self.route_ip_id.is_some() && self.target_server_id.is_some() {
            return Err(ReconcileError::invalid(
                ResourceKind::FloatingIp,
                "route_ip_id and target_server_id are mutually exclusive",
            )
            .into());
        }
        Ok(())
    }
}

impl ManagedResource for FloatingIpSpec {
    type Observed = FloatingIp;

    const KIND: ResourceKind = ResourceKind::FloatingIp;

    fn target(&self) -> Target {
        self.state.into()
    }

    fn lookup(&self) -> Lookup {
        self.id
            .clone()
            .map_or(Lookup::Unaddressable, Lookup::ById)
    }

    fn check_observed(&self, observed: &FloatingIp) -> Result<()> {
        if observed.ip_type == FLOATING_IP_TYPE {
            Ok(())
        } else {
            Err(ReconcileError::UnexpectedType {
                kind: Self::KIND,
                id: observed.id.clone(),
                found: observed.ip_type.clone(),
            }
            .into())
        }
    }

    fn create_request(&self) -> Result<CreateRequest> {
        self.check_exclusive()?;
        let missing = missing_fields(&[
            ("project_id", self.project_id.is_some()),
            ("region", self.region.is_some()),
        ]);
        let (Some(project), true) = (self.project_id, missing.is_empty()) else {
            return Err(ReconcileError::MissingCreateFields {
                kind: Self::KIND,
                fields: missing,
            }
            .into());
        };

        let mut fields = FieldSet::new();
        if let Some(region) = &self.region {
            fields.insert(String::from("region"), Value::from(region.clone()));
        }
        if let Some(route) = &self.route_ip_id {
            fields.insert(String::from("routed_to"), Value::from(route.clone()));
        }
        if let Some(target) = self.target_server_id {
            fields.insert(String::from("targeted_to"), Value::from(target));
        }
        if let Some(ptr) = &self.ptr_record {
            fields.insert(String::from("ptr_record"), Value::from(ptr.clone()));
        }
        if let Some(a) = &self.a_record {
            fields.insert(String::from("a_record"), Value::from(a.clone()));
        }
        if let Some(tags) = &self.tags {
            fields.insert(String::from("tags"), json!(tags));
        }

        Ok(CreateRequest {
            scope: Scope::Project(project),
            fields,
        })
    }

    fn changes(&self, observed: &FloatingIp) -> Result<Changes> {
        self.check_exclusive()?;
        let mut changes = Changes::default();

        if let Some(region) = &self.region {
            if !slugs_equal(region, observed.region.as_deref()) {
                changes.warnings.push(format!(
                    "floating_ip {}: region is '{}' but '{region}' was requested; it cannot change in place",
                    observed.id,
                    observed.region.as_deref().unwrap_or("unset")
                ));
            }
        }

        let mut update = FieldSet::new();
        if let Some(ptr) = &self.ptr_record {
            if observed.normalized_ptr_record().unwrap_or_default() != normalize_ptr_record(ptr) {
                update.insert(String::from("ptr_record"), Value::from(ptr.clone()));
            }
        }
        if let Some(a) = &self.a_record {
            if observed.normalized_a_record().unwrap_or_default() != normalize_a_record(a) {
                update.insert(String::from("a_record"), Value::from(a.clone()));
            }
        }
        if let Some(tags) = &self.tags {
            if *tags != observed.tags {
                update.insert(String::from("tags"), json!(tags));
            }
        }
        if let Some(route) = &self.route_ip_id {
            if observed.route_ip_id() != Some(route.as_str()) {
                update.insert(String::from("routed_to"), Value::from(route.clone()));
            }
        }
        if let Some(target) = self.target_server_id {
            if observed.target_server_id() != target {
                update.insert(String::from("targeted_to"), Value::from(target));
            }
        }
        if !update.is_empty() {
            changes.operations.push(Operation::Update(update));
        }

        Ok(changes)
    }

    fn teardown(&self, observed: &FloatingIp) -> Vec<Operation> {
        let mut operations = Vec::new();
        if observed.target_server_id() != 0 {
            let mut unassign = FieldSet::new();
            unassign.insert(String::from("targeted_to"), Value::from(0));
            operations.push(Operation::Update(unassign));
        }
        operations.push(Operation::Delete);
        operations
    }

    fn label(&self) -> String {
        self.id
            .clone()
            .or_else(|| self.a_record.clone())
            .unwrap_or_else(|| String::from("(new)"))
    }
}
