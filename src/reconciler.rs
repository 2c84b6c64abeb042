//! Reconciler driving one resource to its desired state.
//!
//! Each run is a small state machine: look the resource up, diff it
//! against the desired state, execute the operations in order, then
//! optionally wait for a terminal condition. Nothing is cached between
//! runs; the API is the only source of truth.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cherry::{CherryClient, ObservedResource, Server};
use crate::config::EngineConfig;
use crate::error::{ApiError, CherryError, ReconcileError, Result};
use crate::planner::{compute_diff, Diff, Operation, OperationExecutor};
use crate::resource::{DesiredResource, Lookup, ManagedResource, ResourceKind, Target};
use crate::waiter::{ResourceProbe, WaitOutcome, Waiter};

/// Reconciler for single resources.
#[derive(Debug, Clone)]
pub struct Reconciler {
    /// API client.
    client: CherryClient,
    /// Timeouts, retry and wait policies.
    config: EngineConfig,
}

/// Outcome of a reconciliation.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileResult<T> {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource ID, if the resource exists or existed.
    pub id: Option<String>,
    /// Whether any mutation was applied.
    pub changed: bool,
    /// Applied operations, in order.
    pub operations: Vec<String>,
    /// Final observed state; `None` when the resource is absent.
    pub observed: Option<T>,
    /// Drift not acted on and soft failures.
    pub warnings: Vec<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

/// Planned operations for one resource (check mode).
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Human-readable name.
    pub label: String,
    /// ID of the existing resource, if any.
    pub id: Option<String>,
    /// Operations that would run.
    pub diff: Diff,
    /// Wait condition that does not hold yet, if one was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_wait: Option<String>,
}

impl PlanReport {
    /// Returns true if applying the plan would change anything.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.diff.is_noop()
    }

    /// Returns true if a reconcile run has anything to do, either
    /// operations or a wait.
    #[must_use]
    pub fn needs_apply(&self) -> bool {
        self.has_changes() || self.pending_wait.is_some()
    }
}

impl<T: Serialize> ReconcileResult<T> {
    /// Converts the observed state to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the observed state cannot be serialized.
    pub fn into_json(self) -> Result<ReconcileResult<Value>> {
        let observed = self
            .observed
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| CherryError::internal(format!("Failed to serialize {}: {e}", self.kind)))?;

        Ok(ReconcileResult {
            kind: self.kind,
            id: self.id,
            changed: self.changed,
            operations: self.operations,
            observed,
            warnings: self.warnings,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

impl Reconciler {
    /// Creates a new reconciler.
    #[must_use]
    pub const fn new(client: CherryClient, config: EngineConfig) -> Self {
        Self { client, config }
    }

    /// API client used by this reconciler.
    #[must_use]
    pub const fn client(&self) -> &CherryClient {
        &self.client
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Finds the existing resource for `desired`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if an explicit ID does not exist and the
    /// resource should be present, or [`ReconcileError::AmbiguousResource`]
    /// if more than one resource matches the lookup key.
    pub async fn lookup<R: ManagedResource>(&self, desired: &R) -> Result<Option<R::Observed>> {
        let kind = R::KIND;
        let timeout = self.config.read_timeout(kind);

        let found = match desired.lookup() {
            Lookup::ById(id) => {
                let found = self.client.find::<R::Observed>(kind, &id, timeout).await?;
                if found.is_none() && desired.target() == Target::Present {
                    return Err(ApiError::not_found(kind, id).into());
                }
                found
            }
            Lookup::ByKey { scope, key } => {
                let mut matches: Vec<R::Observed> = self
                    .client
                    .list::<R::Observed>(kind, scope, timeout)
                    .await?
                    .into_iter()
                    .filter(|observed| desired.matches(observed))
                    .collect();

                if matches.len() > 1 {
                    return Err(ReconcileError::AmbiguousResource {
                        kind,
                        key,
                        matches: matches.iter().map(ObservedResource::id).collect(),
                    }
                    .into());
                }
                matches.pop()
            }
            Lookup::Unaddressable => None,
        };

        if let Some(observed) = &found {
            desired.check_observed(observed)?;
            debug!("Found {kind} {}", observed.id());
        }
        Ok(found)
    }

    /// Checks the server a new resource will be attached to.
    ///
    /// # Errors
    ///
    /// Returns an error if the server does not exist or already has storage.
    async fn check_create_target<R: ManagedResource>(&self, desired: &R, diff: &Diff) -> Result<()> {
        let creates = diff.operations.iter().any(|op| matches!(op, Operation::Create(_)));
        let Some(server_id) = desired.create_attachment_target().filter(|_| creates) else {
            return Ok(());
        };

        let kind = ResourceKind::Server;
        let server = self
            .client
            .find::<Server>(kind, &server_id.to_string(), self.config.read_timeout(kind))
            .await?;
        match server.map(|s| s.storage_id()) {
            None => Err(ReconcileError::invalid(R::KIND, format!("server {server_id} does not exist")).into()),
            Some(Some(storage)) => Err(ReconcileError::invalid(
                R::KIND,
                format!("target server {server_id} already has storage {storage} attached"),
            )
            .into()),
            Some(None) => Ok(()),
        }
    }

    /// Computes the operations that `reconcile` would run, without mutating.
    ///
    /// # Errors
    ///
    /// Returns an error if lookup fails or the desired state is unreachable.
    pub async fn plan<R: ManagedResource>(&self, desired: &R) -> Result<PlanReport> {
        let observed = self.lookup(desired).await?;
        let diff = compute_diff(desired, observed.as_ref())?;
        self.check_create_target(desired, &diff).await?;
        let pending_wait = match (desired.wait_request(&self.config.waits), observed.as_ref()) {
            (Some(request), Some(o)) if diff.is_noop() && !request.is_satisfied(o) => Some(request.goal),
            _ => None,
        };
        Ok(PlanReport {
            kind: R::KIND,
            label: desired.label(),
            id: observed.as_ref().map(ObservedResource::id),
            diff,
            pending_wait,
        })
    }

    /// Brings one resource to its desired state.
    ///
    /// # Errors
    ///
    /// Returns an error if lookup, diffing or an operation fails, or if the
    /// resource errors while waiting. A wait that runs out of time is not an
    /// error; it is reported as a warning.
    pub async fn reconcile<R: ManagedResource>(&self, desired: &R) -> Result<ReconcileResult<R::Observed>> {
        let kind = R::KIND;
        let started_at = Utc::now();
        info!("Reconciling {kind} {}", desired.label());

        let observed = self.lookup(desired).await?;
        let diff = compute_diff(desired, observed.as_ref())?;
        self.check_create_target(desired, &diff).await?;
        for warning in &diff.warnings {
            warn!("{warning}");
        }

        let id = observed.as_ref().map(ObservedResource::id);
        let report = OperationExecutor::new(&self.client, &self.config)
            .execute(kind, id, observed, &diff)
            .await?;

        let changed = report.changed();
        let mut warnings = diff.warnings;
        warnings.extend(report.warnings);
        let mut observed = report.observed;

        if let (Some(request), Some(id)) = (desired.wait_request(&self.config.waits), report.id.as_deref()) {
            let satisfied = observed.as_ref().is_some_and(|o| request.is_satisfied(o));
            if !satisfied {
                let probe = ResourceProbe::new(&self.client, kind, id, self.config.read_timeout(kind));
                let outcome = Waiter::new(request.policy)
                    .wait_for(kind, id, &probe, |o: &R::Observed| request.is_satisfied(o))
                    .await;

                match outcome {
                    WaitOutcome::Reached(o) => observed = Some(o),
                    WaitOutcome::TimedOut { polls, last } => {
                        let message = format!(
                            "{kind} {id}: {} not reached after {polls} polls ({:?}); the request was accepted",
                            request.goal,
                            request.policy.timeout()
                        );
                        warn!("{message}");
                        warnings.push(message);
                        if last.is_some() {
                            observed = last;
                        }
                    }
                    WaitOutcome::Failed(source) => {
                        return Err(ReconcileError::WaitFailed {
                            kind,
                            id: id.to_string(),
                            goal: request.goal,
                            applied: report.applied,
                            source: Box::new(source),
                        }
                        .into());
                    }
                }
            }
        }

        let result = ReconcileResult {
            kind,
            id: report.id,
            changed,
            operations: report.applied,
            observed,
            warnings,
            started_at,
            finished_at: Utc::now(),
        };

        if result.changed {
            info!("{kind} {}: applied {}", desired.label(), result.operations.join(", "));
        } else {
            info!("{kind} {} is up to date", desired.label());
        }
        Ok(result)
    }

    /// Reconciles a manifest entry of any kind.
    ///
    /// # Errors
    ///
    /// See [`Self::reconcile`].
    pub async fn reconcile_any(&self, desired: &DesiredResource) -> Result<ReconcileResult<Value>> {
        match desired {
            DesiredResource::Server(spec) => self.reconcile(spec).await?.into_json(),
            DesiredResource::FloatingIp(spec) => self.reconcile(spec).await?.into_json(),
            DesiredResource::SshKey(spec) => self.reconcile(spec).await?.into_json(),
            DesiredResource::Volume(spec) => self.reconcile(spec).await?.into_json(),
            DesiredResource::Project(spec) => self.reconcile(spec).await?.into_json(),
        }
    }

    /// Plans a manifest entry of any kind.
    ///
    /// # Errors
    ///
    /// See [`Self::plan`].
    pub async fn plan_any(&self, desired: &DesiredResource) -> Result<PlanReport> {
        match desired {
            DesiredResource::Server(spec) => self.plan(spec).await,
            DesiredResource::FloatingIp(spec) => self.plan(spec).await,
            DesiredResource::SshKey(spec) => self.plan(spec).await,
            DesiredResource::Volume(spec) => self.plan(spec).await,
            DesiredResource::Project(spec) => self.plan(spec).await,
        }
    }

    /// Plans every manifest entry.
    ///
    /// A failing entry does not stop the others; its error is returned in
    /// its slot.
    pub async fn plan_each(&self, resources: &[DesiredResource]) -> Vec<Result<PlanReport>> {
        let mut plans = Vec::with_capacity(resources.len());
        for desired in resources {
            let plan = self.plan_any(desired).await;
            if let Err(e) = &plan {
                warn!("Planning {} {} failed: {e}", desired.kind(), desired.label());
            }
            plans.push(plan);
        }
        plans
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cherry::SshKey;
    use crate::planner::Operation;

    #[test]
    fn test_into_json_keeps_metadata() {
        let now = Utc::now();
        let result = ReconcileResult {
            kind: ResourceKind::SshKey,
            id: Some(String::from("11")),
            changed: true,
            operations: vec![String::from("update(label)")],
            observed: Some(SshKey {
                id: 11,
                label: String::from("deploy"),
                key: String::from("ssh-ed25519 AAAA"),
                fingerprint: String::from("aa"),
            }),
            warnings: vec![],
            started_at: now,
            finished_at: now,
        };

        let json = result.into_json().unwrap();
        assert_eq!(json.id.as_deref(), Some("11"));
        assert!(json.changed);
        assert_eq!(json.observed.unwrap()["label"], "deploy");
    }

    #[test]
    fn test_plan_report_changes() {
        let report = PlanReport {
            kind: ResourceKind::Project,
            label: String::from("staging"),
            id: None,
            diff: Diff::noop(),
            pending_wait: None,
        };
        assert!(!report.has_changes());
        assert!(!report.needs_apply());

        let waiting = PlanReport {
            pending_wait: Some(String::from("active status")),
            ..report.clone()
        };
        assert!(!waiting.has_changes());
        assert!(waiting.needs_apply());

        let report = PlanReport {
            diff: Diff {
                operations: vec![Operation::Delete],
                warnings: vec![],
            },
            ..report
        };
        assert!(report.has_changes());
    }
}
