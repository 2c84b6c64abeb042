//! Read-only inventory listing.
//!
//! Lists resources for external consumption, reusing the API client
//! without any reconciliation logic.

use serde_json::Value;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{ApiError, Result};
use crate::resource::{ResourceKind, ResourceStatus, Scope};

use super::client::CherryClient;
use super::types::{FloatingIp, ObservedResource, Project, Server, SshKey, Tags, Volume};

/// Inventory facility over a client.
#[derive(Debug, Clone)]
pub struct Inventory {
    /// API client.
    client: CherryClient,
    /// Timeouts come from here.
    config: EngineConfig,
}

/// Filters applied to a server listing.
#[derive(Debug, Clone, Default)]
pub struct ServerFilter {
    /// Region slug, case-insensitive.
    pub region: Option<String>,
    /// Normalized status.
    pub status: Option<ResourceStatus>,
    /// Exact hostname.
    pub hostname: Option<String>,
    /// Plan slug, case-insensitive.
    pub plan: Option<String>,
    /// Image slug, case-insensitive.
    pub image: Option<String>,
    /// Every tag here must be present with the same value.
    pub tags: Tags,
}

impl ServerFilter {
    /// Returns true if the server passes every set filter.
    #[must_use]
    pub fn matches(&self, server: &Server) -> bool {
        slug_filter(self.region.as_deref(), server.region.as_deref())
            && slug_filter(self.plan.as_deref(), server.plan.as_deref())
            && slug_filter(self.image.as_deref(), server.image.as_deref())
            && self.status.is_none_or(|s| server.status() == s)
            && self.hostname.as_ref().is_none_or(|h| *h == server.hostname)
            && self.tags.iter().all(|(k, v)| server.tags.get(k) == Some(v))
    }
}

fn slug_filter(wanted: Option<&str>, actual: Option<&str>) -> bool {
    wanted.is_none_or(|w| actual.is_some_and(|a| a.eq_ignore_ascii_case(w)))
}

impl Inventory {
    /// Creates a new inventory over a client.
    #[must_use]
    pub const fn new(client: CherryClient, config: EngineConfig) -> Self {
        Self { client, config }
    }

    /// Lists any collection as raw JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn list(&self, kind: ResourceKind, scope: Scope) -> Result<Vec<Value>> {
        info!("Listing {kind} resources in {scope}");
        let items = self
            .client
            .list_raw(kind, scope, self.config.read_timeout(kind))
            .await?;
        debug!("Found {} {kind} resources", items.len());
        Ok(items)
    }

    /// Gets a single resource as raw JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if no resource has this ID.
    pub async fn get(&self, kind: ResourceKind, id: &str) -> Result<Value> {
        self.client
            .find::<Value>(kind, id, self.config.read_timeout(kind))
            .await?
            .ok_or_else(|| ApiError::not_found(kind, id).into())
    }

    /// Lists the servers of a project that pass a filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn servers(&self, project_id: u64, filter: &ServerFilter) -> Result<Vec<Server>> {
        info!("Listing servers for project {project_id}");
        let servers: Vec<Server> = self
            .client
            .list(ResourceKind::Server, Scope::Project(project_id), self.config.read_timeout(ResourceKind::Server))
            .await?;
        let filtered: Vec<Server> = servers.into_iter().filter(|s| filter.matches(s)).collect();
        debug!("{} servers match the filter", filtered.len());
        Ok(filtered)
    }

    /// Lists the floating IPs of a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn floating_ips(&self, project_id: u64) -> Result<Vec<FloatingIp>> {
        self.typed(ResourceKind::FloatingIp, Scope::Project(project_id)).await
    }

    /// Lists the volumes of a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn volumes(&self, project_id: u64) -> Result<Vec<Volume>> {
        self.typed(ResourceKind::Volume, Scope::Project(project_id)).await
    }

    /// Lists the account's SSH keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn ssh_keys(&self) -> Result<Vec<SshKey>> {
        self.typed(ResourceKind::SshKey, Scope::Account).await
    }

    /// Lists the projects of a team.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn projects(&self, team_id: u64) -> Result<Vec<Project>> {
        self.typed(ResourceKind::Project, Scope::Team(team_id)).await
    }

    async fn typed<T: ObservedResource>(&self, kind: ResourceKind, scope: Scope) -> Result<Vec<T>> {
        info!("Listing {kind} resources in {scope}");
        self.client
            .list(kind, scope, self.config.read_timeout(kind))
            .await
    }
}
