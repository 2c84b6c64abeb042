//! Server desired state and diff rules.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::cherry::{ObservedResource, Server};
use crate::config::WaitSettings;
use crate::error::{ReconcileError, Result};
use crate::planner::{merge_with_observed, ActionKind, CreateRequest, FieldSet, Operation};

use super::{missing_fields, slugs_equal, Changes, Lookup, ManagedResource, ResourceKind, ResourceStatus, Scope, Target, WaitRequest};

/// Desired lifecycle state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    /// Exists; returns as soon as the API accepts the request.
    #[default]
    Present,
    /// Exists and is deployed; waits for the active status.
    Active,
    /// Does not exist.
    Absent,
}

/// When a reinstall may be issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReinstallPolicy {
    /// Never reinstall; changes that need one are an error.
    #[default]
    Never,
    /// Reinstall when image or SSH keys differ from the observed server.
    OnChange,
    /// Reinstall on this run regardless of drift.
    Always,
}

/// Desired power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    /// Powered on.
    On,
    /// Powered off.
    Off,
}

/// Desired state of a server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSpec {
    /// Lifecycle state.
    #[serde(default)]
    pub state: ServerState,
    /// Existing server ID.
    #[serde(default)]
    pub id: Option<u64>,
    /// Project the server belongs to.
    #[serde(default)]
    pub project_id: Option<u64>,
    /// Plan slug.
    #[serde(default)]
    pub plan: Option<String>,
    /// Region slug.
    #[serde(default)]
    pub region: Option<String>,
    /// Image slug.
    #[serde(default)]
    pub image: Option<String>,
    /// OS partition size in GB.
    #[serde(default)]
    pub os_partition_size: Option<u32>,
    /// Hostname.
    #[serde(default)]
    pub hostname: Option<String>,
    /// SSH key IDs to install.
    #[serde(default)]
    pub ssh_keys: Option<Vec<u64>>,
    /// Extra IP address IDs to attach at creation.
    #[serde(default)]
    pub extra_ip_addresses: Option<Vec<String>>,
    /// Base64-encoded cloud-init user data.
    #[serde(default)]
    pub user_data: Option<String>,
    /// Tags.
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
    /// Spot market instance.
    #[serde(default)]
    pub spot_market: Option<bool>,
    /// Storage volume to attach at creation.
    #[serde(default)]
    pub storage_id: Option<u64>,
    /// Desired power state.
    #[serde(default)]
    pub power: Option<PowerState>,
    /// When a reinstall may be issued.
    #[serde(default)]
    pub reinstall: ReinstallPolicy,
    /// Overrides the wait budget when `state` is `active`.
    #[serde(default)]
    pub active_timeout_secs: Option<u64>,
}

impl ServerSpec {
    /// Validates `user_data` as base64.
    ///
    /// # Errors
    ///
    /// Returns an error if `user_data` is set and not valid base64.
    pub fn check_user_data(&self) -> Result<()> {
        if let Some(data) = &self.user_data {
            STANDARD.decode(data.trim()).map_err(|e| {
                ReconcileError::invalid(ResourceKind::Server, format!("user_data is not valid base64: {e}"))
            })?;
        }
        Ok(())
    }

    /// Sorted, deduplicated SSH key IDs, if managed.
    #[must_use]
    pub fn sorted_ssh_keys(&self) -> Option<Vec<u64>> {
        self.ssh_keys.as_ref().map(|keys| {
            let mut keys = keys.clone();
            keys.sort_unstable();
            keys.dedup();
            keys
        })
    }

    /// Fields that differ from `observed` and can only change through a reinstall.
    #[must_use]
    pub fn reinstall_drift(&self, observed: &Server) -> Vec<String> {
        let mut fields = Vec::new();
        if let Some(image) = &self.image {
            if !slugs_equal(image, observed.image.as_deref()) {
                fields.push(String::from("image"));
            }
        }
        if let Some(keys) = self.sorted_ssh_keys() {
            if keys != observed.ssh_key_ids() {
                fields.push(String::from("ssh_keys"));
            }
        }
        fields
    }

    fn immutable_drift(&self, observed: &Server) -> Vec<String> {
        let mut warnings = Vec::new();
        let mut check = |field: &str, desired: Option<&str>, actual: Option<&str>| {
            if let Some(desired) = desired {
                if !slugs_equal(desired, actual) {
                    warnings.push(format!(
                        "server {}: {field} is '{}' but '{desired}' was requested; it cannot change in place",
                        observed.id,
                        actual.unwrap_or("unset")
                    ));
                }
            }
        };
        check("plan", self.plan.as_deref(), observed.plan.as_deref());
        check("region", self.region.as_deref(), observed.region.as_deref());

        if let Some(project) = self.project_id {
            if observed.project_id().is_some_and(|p| p != project) {
                warnings.push(format!("server {}: belongs to another project than {project}", observed.id));
            }
        }
        if let Some(spot) = self.spot_market {
            if spot != observed.spot_instance {
                warnings.push(format!("server {}: spot_market cannot change in place", observed.id));
            }
        }
        warnings
    }

    fn power_operation(&self, observed: &Server) -> Option<Operation> {
        let desired = self.power?;
        let actual = observed.power.as_deref()?;
        let is_on = actual.eq_ignore_ascii_case("on");
        match desired {
            PowerState::On if !is_on => Some(Operation::action(ActionKind::PowerOn, FieldSet::new())),
            PowerState::Off if is_on => Some(Operation::action(ActionKind::PowerOff, FieldSet::new())),
            _ => None,
        }
    }
}

impl ManagedResource for ServerSpec {
    type Observed = Server;

    const KIND: ResourceKind = ResourceKind::Server;

    fn target(&self) -> Target {
        match self.state {
            ServerState::Absent => Target::Absent,
            ServerState::Present | ServerState::Active => Target::Present,
        }
    }

    fn lookup(&self) -> Lookup {
        if let Some(id) = self.id {
            return Lookup::ById(id.to_string());
        }
        match (self.project_id, &self.hostname) {
            (Some(project), Some(hostname)) => Lookup::ByKey {
                scope: Scope::Project(project),
                key: format!("hostname={hostname}"),
            },
            _ => Lookup::Unaddressable,
        }
    }

    fn matches(&self, observed: &Server) -> bool {
        self.hostname.as_deref() == Some(observed.hostname.as_str())
    }

    fn create_request(&self) -> Result<CreateRequest> {
        let missing = missing_fields(&[
            ("project_id", self.project_id.is_some()),
            ("region", self.region.is_some()),
            ("plan", self.plan.is_some()),
        ]);
        let (Some(project), true) = (self.project_id, missing.is_empty()) else {
            return Err(ReconcileError::MissingCreateFields {
                kind: Self::KIND,
                fields: missing,
            }
            .into());
        };
        self.check_user_data()?;

        let mut fields = FieldSet::new();
        let mut set = |key: &str, value: Option<Value>| {
            if let Some(value) = value {
                fields.insert(key.to_string(), value);
            }
        };
        set("plan", self.plan.clone().map(Value::from));
        set("region", self.region.clone().map(Value::from));
        set("image", self.image.clone().map(Value::from));
        set("os_partition_size", self.os_partition_size.map(Value::from));
        set("hostname", self.hostname.clone().map(Value::from));
        set("ssh_keys", self.sorted_ssh_keys().map(Value::from));
        set("ip_addresses", self.extra_ip_addresses.clone().map(Value::from));
        set("user_data", self.user_data.clone().map(Value::from));
        set("spot_market", self.spot_market.map(Value::from));
        set("storage_id", self.storage_id.map(Value::from));
        set("tags", self.tags.as_ref().map(|t| json!(t)));

        Ok(CreateRequest {
            scope: Scope::Project(project),
            fields,
        })
    }

    fn after_create(&self) -> Vec<Operation> {
        match self.power {
            Some(PowerState::Off) => vec![Operation::action(ActionKind::PowerOff, FieldSet::new())],
            _ => Vec::new(),
        }
    }

    fn changes(&self, observed: &Server) -> Result<Changes> {
        let mut changes = Changes {
            operations: Vec::new(),
            warnings: self.immutable_drift(observed),
        };

        let mut update = FieldSet::new();
        if let Some(hostname) = &self.hostname {
            if *hostname != observed.hostname {
                update.insert(String::from("hostname"), Value::from(hostname.clone()));
            }
        }
        if let Some(tags) = &self.tags {
            if *tags != observed.tags {
                update.insert(String::from("tags"), json!(tags));
            }
        }
        if !update.is_empty() {
            changes.operations.push(Operation::Update(update));
        }

        let drift = self.reinstall_drift(observed);
        let reinstall = match self.reinstall {
            ReinstallPolicy::Always => true,
            ReinstallPolicy::OnChange => !drift.is_empty(),
            ReinstallPolicy::Never if !drift.is_empty() => {
                return Err(ReconcileError::ReinstallRequired {
                    id: observed.id(),
                    fields: drift,
                }
                .into());
            }
            ReinstallPolicy::Never => false,
        };

        if reinstall {
            self.check_user_data()?;
            let params = merge_with_observed(self, observed);
            changes
                .operations
                .push(Operation::action(ActionKind::Reinstall, params.into_fields()));
        } else if self.user_data.is_some() || self.os_partition_size.is_some() {
            changes.warnings.push(format!(
                "server {}: user_data and os_partition_size only apply on create or with reinstall: always",
                observed.id
            ));
        }

        if let Some(power) = self.power_operation(observed) {
            changes.operations.push(power);
        }

        Ok(changes)
    }

    fn wait_request(&self, waits: &WaitSettings) -> Option<WaitRequest<Server>> {
        if self.state != ServerState::Active {
            return None;
        }
        let mut policy = waits.for_kind(Self::KIND);
        if let Some(secs) = self.active_timeout_secs {
            policy = policy.with_timeout(std::time::Duration::from_secs(secs));
        }
        Some(WaitRequest::new("active status", policy, |server: &Server| {
            server.status() == ResourceStatus::Active
        }))
    }

    fn label(&self) -> String {
        self.hostname
            .clone()
            .or_else(|| self.id.map(|id| id.to_string()))
            .unwrap_or_else(|| String::from("(unnamed)"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::compute_diff;

    fn observed() -> Server {
        serde_json::from_value(json!({
            "id": 383_531,
            "hostname": "web-1",
            "status": "deployed",
            "power": "on",
            "image": "ubuntu_22_04",
            "plan": {"slug": "e5_1620v4"},
            "region": {"slug": "LT-Siauliai"},
            "project": {"id": 9},
            "ssh_keys": [{"id": 1}],
            "tags": {"env": "prod"}
        }))
        .unwrap()
    }

    fn converged() -> ServerSpec {
        ServerSpec {
            project_id: Some(9),
            plan: Some(String::from("E5_1620V4")),
            region: Some(String::from("lt-siauliai")),
            image: Some(String::from("ubuntu_22_04")),
            hostname: Some(String::from("web-1")),
            ssh_keys: Some(vec![1]),
            tags: Some(BTreeMap::from([(String::from("env"), String::from("prod"))])),
            ..ServerSpec::default()
        }
    }

    #[test]
    fn test_converged_server_is_noop() {
        let diff = compute_diff(&converged(), Some(&observed())).unwrap();
        assert_eq!(diff.operations, vec![Operation::NoOp]);
        assert!(diff.warnings.is_empty());
    }

    #[test]
    fn test_lookup_prefers_id() {
        let spec = ServerSpec {
            id: Some(5),
            ..converged()
        };
        assert_eq!(spec.lookup(), Lookup::ById(String::from("5")));
        assert!(matches!(converged().lookup(), Lookup::ByKey { scope: Scope::Project(9), .. }));
        assert_eq!(ServerSpec::default().lookup(), Lookup::Unaddressable);
    }

    #[test]
    fn test_create_requires_project_region_plan() {
        let spec = ServerSpec {
            hostname: Some(String::from("web-1")),
            region: Some(String::from("LT-Siauliai")),
            ..ServerSpec::default()
        };
        let err = spec.create_request().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("project_id"));
        assert!(text.contains("plan"));
        assert!(!text.contains("region"));
    }

    #[test]
    fn test_create_payload_only_carries_set_fields() {
        let request = converged().create_request().unwrap();
        assert_eq!(request.scope, Scope::Project(9));
        assert_eq!(request.fields.get("hostname"), Some(&json!("web-1")));
        assert_eq!(request.fields.get("ssh_keys"), Some(&json!([1])));
        assert!(!request.fields.contains_key("spot_market"));
        assert!(!request.fields.contains_key("user_data"));
    }

    #[test]
    fn test_invalid_user_data_is_rejected() {
        let spec = ServerSpec {
            user_data: Some(String::from("not base64!!")),
            ..converged()
        };
        assert!(spec.create_request().is_err());
    }

    #[test]
    fn test_hostname_and_tags_update_in_place() {
        let spec = ServerSpec {
            hostname: Some(String::from("web-2")),
            tags: Some(BTreeMap::new()),
            ..converged()
        };
        let diff = compute_diff(&spec, Some(&observed())).unwrap();
        assert_eq!(diff.labels(), vec![String::from("update(hostname, tags)")]);
    }

    #[test]
    fn test_image_change_without_permission_fails() {
        let spec = ServerSpec {
            image: Some(String::from("debian_12")),
            ..converged()
        };
        let err = compute_diff(&spec, Some(&observed())).unwrap_err();
        assert!(err.to_string().contains("require server reinstall"));
    }

    #[test]
    fn test_update_precedes_reinstall() {
        let spec = ServerSpec {
            hostname: Some(String::from("web-2")),
            image: Some(String::from("debian_12")),
            reinstall: ReinstallPolicy::OnChange,
            ..converged()
        };
        let diff = compute_diff(&spec, Some(&observed())).unwrap();
        assert_eq!(
            diff.labels(),
            vec![String::from("update(hostname)"), String::from("action(reinstall)")]
        );
    }

    #[test]
    fn test_immutable_drift_is_a_warning() {
        let spec = ServerSpec {
            plan: Some(String::from("e3_1240v3")),
            ..converged()
        };
        let diff = compute_diff(&spec, Some(&observed())).unwrap();
        assert!(diff.is_noop());
        assert_eq!(diff.warnings.len(), 1);
        assert!(diff.warnings[0].contains("plan"));
    }

    #[test]
    fn test_power_off() {
        let spec = ServerSpec {
            power: Some(PowerState::Off),
            ..converged()
        };
        let diff = compute_diff(&spec, Some(&observed())).unwrap();
        assert_eq!(diff.labels(), vec![String::from("action(power_off)")]);
    }

    #[test]
    fn test_wait_only_when_active_requested() {
        let waits = WaitSettings::default();
        assert!(converged().wait_request(&waits).is_none());

        let spec = ServerSpec {
            state: ServerState::Active,
            active_timeout_secs: Some(60),
            ..converged()
        };
        let request = spec.wait_request(&waits).unwrap();
        assert_eq!(request.policy.timeout(), std::time::Duration::from_secs(60));
        assert!(request.is_satisfied(&observed()));
    }
}
