//! Resource kinds, collection scopes, and normalized status values.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, Result};

/// The closed set of resource kinds the engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Bare-metal or virtual server.
    Server,
    /// Floating IP address.
    FloatingIp,
    /// Account-wide SSH public key.
    SshKey,
    /// Elastic block storage volume.
    Volume,
    /// Project grouping servers, IPs and volumes.
    Project,
}

/// Where a collection of resources lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Nested under `projects/{id}`.
    Project(u64),
    /// Nested under `teams/{id}`.
    Team(u64),
    /// Account-wide collection.
    Account,
}

/// Provider status normalized across resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Accepted, not started.
    Pending,
    /// Being built, reinstalled or rebooted.
    Provisioning,
    /// Ready for use.
    Active,
    /// Being torn down.
    Deleting,
    /// The provider marked the resource as failed.
    Error,
    /// Status string not recognised.
    #[default]
    Unknown,
}

/// Default request timeout for server calls.
const SERVER_TIMEOUT_SECS: u64 = 20;

/// Default request timeout for floating IP, SSH key and volume calls.
const NETWORK_RESOURCE_TIMEOUT_SECS: u64 = 120;

/// Project reads.
const PROJECT_READ_TIMEOUT_SECS: u64 = 10;

/// Project writes.
const PROJECT_WRITE_TIMEOUT_SECS: u64 = 15;

impl ResourceKind {
    /// Path segment of the top-level collection.
    #[must_use]
    pub const fn segment(self) -> &'static str {
        match self {
            Self::Server => "servers",
            Self::FloatingIp => "ips",
            Self::SshKey => "ssh-keys",
            Self::Volume => "storages",
            Self::Project => "projects",
        }
    }

    /// Path of a single resource.
    #[must_use]
    pub fn item_path(self, id: &str) -> String {
        format!("{}/{id}", self.segment())
    }

    /// Path of the collection this kind lives in.
    ///
    /// # Errors
    ///
    /// Returns an error if the kind is not listed under the given scope.
    pub fn collection_path(self, scope: Scope) -> Result<String> {
        match (self, scope) {
            (Self::Server | Self::FloatingIp | Self::Volume, Scope::Project(project)) => {
                Ok(format!("projects/{project}/{}", self.segment()))
            }
            (Self::Project, Scope::Team(team)) => Ok(format!("teams/{team}/projects")),
            (Self::SshKey, Scope::Account) => Ok(String::from("ssh-keys")),
            _ => Err(ReconcileError::invalid(self, format!("{self} resources are not listed under {scope}")).into()),
        }
    }

    /// Name of the scope [`Self::collection_path`] expects, for messages.
    #[must_use]
    pub const fn scope_hint(self) -> &'static str {
        match self {
            Self::Server | Self::FloatingIp | Self::Volume => "project",
            Self::Project => "team",
            Self::SshKey => "account",
        }
    }

    /// Default timeout for read calls.
    #[must_use]
    pub const fn read_timeout(self) -> Duration {
        match self {
            Self::Server => Duration::from_secs(SERVER_TIMEOUT_SECS),
            Self::FloatingIp | Self::SshKey | Self::Volume => Duration::from_secs(NETWORK_RESOURCE_TIMEOUT_SECS),
            Self::Project => Duration::from_secs(PROJECT_READ_TIMEOUT_SECS),
        }
    }

    /// Default timeout for mutating calls.
    #[must_use]
    pub const fn write_timeout(self) -> Duration {
        match self {
            Self::Project => Duration::from_secs(PROJECT_WRITE_TIMEOUT_SECS),
            other => other.read_timeout(),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Server => "server",
            Self::FloatingIp => "floating_ip",
            Self::SshKey => "ssh_key",
            Self::Volume => "volume",
            Self::Project => "project",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "server" | "servers" => Ok(Self::Server),
            "floating_ip" | "floating_ips" | "ip" | "ips" | "fip" => Ok(Self::FloatingIp),
            "ssh_key" | "ssh_keys" | "key" | "keys" => Ok(Self::SshKey),
            "volume" | "volumes" | "storage" | "storages" => Ok(Self::Volume),
            "project" | "projects" => Ok(Self::Project),
            other => Err(format!("unknown resource kind: {other}")),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Project(id) => write!(f, "project {id}"),
            Self::Team(id) => write!(f, "team {id}"),
            Self::Account => write!(f, "account"),
        }
    }
}

impl ResourceStatus {
    /// Normalizes a raw provider status string.
    #[must_use]
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "deployed" | "active" => Self::Active,
            "pending" => Self::Pending,
            "provisioning" | "deploying" | "reinstalling" | "rebooting" => Self::Provisioning,
            "terminating" | "terminated" => Self::Deleting,
            "failed" | "error" => Self::Error,
            _ => Self::Unknown,
        }
    }

    /// Returns true if no further transition is expected without external action.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Active | Self::Error)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Deleting => "deleting",
            Self::Error => "error",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_normalization() {
        assert_eq!(ResourceStatus::from_provider("deployed"), ResourceStatus::Active);
        assert_eq!(ResourceStatus::from_provider("Active"), ResourceStatus::Active);
        assert_eq!(ResourceStatus::from_provider("pending"), ResourceStatus::Pending);
        assert_eq!(ResourceStatus::from_provider("reinstalling"), ResourceStatus::Provisioning);
        assert_eq!(ResourceStatus::from_provider("terminating"), ResourceStatus::Deleting);
        assert_eq!(ResourceStatus::from_provider("failed"), ResourceStatus::Error);
        assert_eq!(ResourceStatus::from_provider("weird"), ResourceStatus::Unknown);
        assert!(ResourceStatus::Error.is_terminal());
        assert!(!ResourceStatus::Provisioning.is_terminal());
    }

    #[test]
    fn test_collection_paths() {
        assert_eq!(
            ResourceKind::Server.collection_path(Scope::Project(7)).ok().as_deref(),
            Some("projects/7/servers")
        );
        assert_eq!(
            ResourceKind::Volume.collection_path(Scope::Project(7)).ok().as_deref(),
            Some("projects/7/storages")
        );
        assert_eq!(
            ResourceKind::Project.collection_path(Scope::Team(3)).ok().as_deref(),
            Some("teams/3/projects")
        );
        assert_eq!(
            ResourceKind::SshKey.collection_path(Scope::Account).ok().as_deref(),
            Some("ssh-keys")
        );
        assert!(ResourceKind::SshKey.collection_path(Scope::Project(1)).is_err());
        assert_eq!(ResourceKind::FloatingIp.item_path("abc"), "ips/abc");
        assert_eq!(ResourceKind::Volume.scope_hint(), "project");
        assert_eq!(ResourceKind::Project.scope_hint(), "team");
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("floating-ip".parse::<ResourceKind>(), Ok(ResourceKind::FloatingIp));
        assert_eq!("storages".parse::<ResourceKind>(), Ok(ResourceKind::Volume));
        assert!("bucket".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_project_timeouts_split_read_and_write() {
        assert_eq!(ResourceKind::Project.read_timeout(), Duration::from_secs(10));
        assert_eq!(ResourceKind::Project.write_timeout(), Duration::from_secs(15));
        assert_eq!(ResourceKind::Server.write_timeout(), Duration::from_secs(20));
    }
}
