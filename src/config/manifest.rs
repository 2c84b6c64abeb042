//! Manifest model: engine settings plus the desired resources.

use serde::{Deserialize, Serialize};

use crate::resource::DesiredResource;

use super::settings::Settings;

/// A manifest file (`cherry.yaml`).
///
/// ```yaml
/// settings:
///   request_timeout_secs: 60
/// resources:
///   - kind: ssh_key
///     label: deploy
///     key: ssh-ed25519 AAAA...
///   - kind: server
///     project_id: 123
///     hostname: web-1
///     plan: e5_1620v4
///     region: LT-Siauliai
///     image: ubuntu_22_04
///     state: active
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Engine settings overlaid on the environment.
    #[serde(default)]
    pub settings: Settings,
    /// Resources, reconciled in order.
    #[serde(default)]
    pub resources: Vec<DesiredResource>,
}

impl Manifest {
    /// Returns the number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if the manifest declares no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
