//! SSH key desired state and diff rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cherry::SshKey;
use crate::error::{ReconcileError, Result};
use crate::planner::{CreateRequest, FieldSet, Operation};

use super::{missing_fields, Changes, Lookup, ManagedResource, Presence, ResourceKind, Scope, Target};

/// Desired state of an SSH key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshKeySpec {
    /// Whether the key should exist.
    #[serde(default)]
    pub state: Presence,
    /// Existing key ID.
    #[serde(default)]
    pub id: Option<u64>,
    /// Label.
    #[serde(default)]
    pub label: Option<String>,
    /// Public key.
    #[serde(default)]
    pub key: Option<String>,
    /// Fingerprint, for lookup only.
    #[serde(default)]
    pub fingerprint: Option<String>,
}

fn same_key(a: &str, b: &str) -> bool {
    a.trim() == b.trim()
}

impl ManagedResource for SshKeySpec {
    type Observed = SshKey;

    const KIND: ResourceKind = ResourceKind::SshKey;

    fn target(&self) -> Target {
        self.state.into()
    }

    fn lookup(&self) -> Lookup {
        if let Some(id) = self.id {
            return Lookup::ById(id.to_string());
        }
        let mut keys = Vec::new();
        if let Some(fingerprint) = &self.fingerprint {
            keys.push(format!("fingerprint={fingerprint}"));
        }
        if let Some(label) = &self.label {
            keys.push(format!("label={label}"));
        }
        if self.key.is_some() {
            keys.push(String::from("key=<public key>"));
        }
        if keys.is_empty() {
            Lookup::Unaddressable
        } else {
            Lookup::ByKey {
                scope: Scope::Account,
                key: keys.join(" or "),
            }
        }
    }

    fn matches(&self, observed: &SshKey) -> bool {
        self.fingerprint.as_deref().is_some_and(|f| f == observed.fingerprint)
            || self.label.as_deref().is_some_and(|l| l == observed.label)
            || self.key.as_deref().is_some_and(|k| same_key(k, &observed.key))
    }

    fn create_request(&self) -> Result<CreateRequest> {
        let missing = missing_fields(&[("label", self.label.is_some()), ("key", self.key.is_some())]);
        let (Some(label), Some(key)) = (&self.label, &self.key) else {
            return Err(ReconcileError::MissingCreateFields {
                kind: Self::KIND,
                fields: missing,
            }
            .into());
        };

        let mut fields = FieldSet::new();
        fields.insert(String::from("label"), Value::from(label.clone()));
        fields.insert(String::from("key"), Value::from(key.trim()));
        Ok(CreateRequest {
            scope: Scope::Account,
            fields,
        })
    }

    fn changes(&self, observed: &SshKey) -> Result<Changes> {
        let mut update = FieldSet::new();
        if let Some(label) = &self.label {
            if *label != observed.label {
                update.insert(String::from("label"), Value::from(label.clone()));
            }
        }
        if let Some(key) = &self.key {
            if !same_key(key, &observed.key) {
                update.insert(String::from("key"), Value::from(key.trim()));
            }
        }

        let mut changes = Changes::default();
        if !update.is_empty() {
            changes.operations.push(Operation::Update(update));
        }
        Ok(changes)
    }

    fn label(&self) -> String {
        self.label
            .clone()
            .or_else(|| self.id.map(|id| id.to_string()))
            .unwrap_or_else(|| String::from("(unlabelled)"))
    }
}
