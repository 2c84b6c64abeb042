//! Operation executor.
//!
//! Runs the operations of a [`Diff`] one at a time against the API,
//! retrying transient failures and reporting exactly which operations were
//! applied when a later one fails. Nothing is rolled back.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cherry::{CherryClient, ObservedResource, ResourceRef};
use crate::config::EngineConfig;
use crate::error::{CherryError, ReconcileError, Result};
use crate::resource::ResourceKind;

use super::merge::{generate_password, PASSWORD_LENGTH};
use super::plan::{ActionKind, Diff, FieldSet, Operation};

/// Executor for the operations of one resource.
#[derive(Debug)]
pub struct OperationExecutor<'a> {
    /// API client.
    client: &'a CherryClient,
    /// Timeouts and retry policy.
    config: &'a EngineConfig,
}

/// Outcome of a fully executed diff.
#[derive(Debug, Clone)]
pub struct ExecutionReport<T> {
    /// Most recent resource ID.
    pub id: Option<String>,
    /// Labels of the applied operations, in order.
    pub applied: Vec<String>,
    /// Observed state after the last operation; `None` once deleted.
    pub observed: Option<T>,
    /// Problems that did not stop execution.
    pub warnings: Vec<String>,
}

impl<T> ExecutionReport<T> {
    /// Returns true if any operation was applied.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.applied.is_empty()
    }
}

impl<'a> OperationExecutor<'a> {
    /// Creates a new executor.
    #[must_use]
    pub const fn new(client: &'a CherryClient, config: &'a EngineConfig) -> Self {
        Self { client, config }
    }

    /// Executes the diff sequentially.
    ///
    /// `id` and `observed` describe the resource found during lookup, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::OperationFailed`] if the first mutating
    /// operation fails, or [`ReconcileError::PartialApply`] if a later one does.
    pub async fn execute<T: ObservedResource>(
        &self,
        kind: ResourceKind,
        id: Option<String>,
        observed: Option<T>,
        diff: &Diff,
    ) -> Result<ExecutionReport<T>> {
        let mut report = ExecutionReport {
            id,
            applied: Vec::new(),
            observed,
            warnings: Vec::new(),
        };

        for op in diff.mutating() {
            let label = op.to_string();
            debug!("{kind} {}: executing {label}", report.id.as_deref().unwrap_or("(new)"));

            if let Err(source) = self.apply(kind, op, &mut report).await {
                let source = Box::new(source);
                let err = if report.applied.is_empty() {
                    ReconcileError::OperationFailed {
                        kind,
                        id: report.id,
                        operation: label,
                        source,
                    }
                } else {
                    ReconcileError::PartialApply {
                        kind,
                        id: report.id,
                        applied: report.applied,
                        failed: label,
                        source,
                    }
                };
                return Err(err.into());
            }

            info!("{kind} {}: {label} applied", report.id.as_deref().unwrap_or("(new)"));
            report.applied.push(label);

            if !matches!(op, Operation::Delete) {
                self.refresh(kind, &mut report).await;
            }
        }

        Ok(report)
    }

    /// Applies one operation, updating the tracked ID.
    async fn apply<T: ObservedResource>(
        &self,
        kind: ResourceKind,
        op: &Operation,
        report: &mut ExecutionReport<T>,
    ) -> Result<()> {
        let timeout = self.config.write_timeout(kind);
        let client = self.client;

        match op {
            Operation::NoOp => Ok(()),
            Operation::Create(request) => {
                let scope = request.scope;
                let fields = &request.fields;
                let body: Value = self
                    .with_retry(op, move || client.create(kind, scope, fields, timeout))
                    .await?;
                let created: ResourceRef = serde_json::from_value(body.clone())
                    .map_err(|e| CherryError::internal(format!("create response carries no ID: {e}")))?;
                report.id = Some(created.id);
                report.observed = serde_json::from_value(body).ok();
                Ok(())
            }
            Operation::Update(fields) => {
                let id = require_id(kind, report.id.as_deref())?;
                let body: Option<Value> = self
                    .with_retry(op, move || client.update(kind, id, fields, timeout))
                    .await?;
                if let Some(returned) = body.and_then(|b| serde_json::from_value::<ResourceRef>(b).ok()) {
                    if report.id.as_deref() != Some(returned.id.as_str()) {
                        debug!("{kind} {id} is now {}", returned.id);
                        report.id = Some(returned.id);
                    }
                }
                Ok(())
            }
            Operation::Action { action, params } => {
                let id = require_id(kind, report.id.as_deref())?;
                let action = *action;
                let params = with_password(action, params);
                let params = &params;
                self.with_retry(op, move || client.perform_action(kind, id, action, params, timeout))
                    .await?;
                Ok(())
            }
            Operation::Delete => {
                let id = require_id(kind, report.id.as_deref())?;
                match self.with_retry(op, move || client.delete(kind, id, timeout)).await {
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => debug!("{kind} {id} was already gone"),
                    Err(e) => return Err(e),
                }
                report.observed = None;
                Ok(())
            }
        }
    }

    /// Re-fetches the resource after a mutation.
    ///
    /// A fetch that still fails after retries leaves the previous observed
    /// state in place and records a warning saying so.
    async fn refresh<T: ObservedResource>(&self, kind: ResourceKind, report: &mut ExecutionReport<T>) {
        let Some(id) = report.id.clone() else {
            return;
        };
        let client = self.client;
        let timeout = self.config.read_timeout(kind);
        let id_ref = id.as_str();
        let fetched = self
            .retrying("refresh", true, move || client.find::<T>(kind, id_ref, timeout))
            .await;

        match fetched {
            Ok(Some(observed)) => report.observed = Some(observed),
            Ok(None) => debug!("{kind} {id} not visible yet"),
            Err(e) => {
                warn!("Failed to refresh {kind} {id}: {e}");
                report.warnings.push(format!(
                    "{kind} {id}: could not re-read state after {} ({e}); observed state predates it",
                    report.applied.last().map_or("the last operation", String::as_str)
                ));
            }
        }
    }

    /// Runs `call`, retrying failures the policy allows for `op`.
    async fn with_retry<V, F, Fut>(&self, op: &Operation, call: F) -> Result<V>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        self.retrying(&op.to_string(), op.is_idempotent(), call).await
    }

    /// Retry loop shared by operations and refreshes.
    ///
    /// Transport failures are only retried when `idempotent` is set.
    async fn retrying<V, F, Fut>(&self, label: &str, idempotent: bool, mut call: F) -> Result<V>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let policy = &self.config.retry;
        let attempts = policy.attempts();
        let mut attempt = 0;

        loop {
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let retryable = err.is_retryable() && (!err.is_transport() || idempotent);
            if !retryable {
                return Err(err);
            }
            attempt += 1;
            if attempt >= attempts {
                if attempts == 1 {
                    return Err(err);
                }
                return Err(ReconcileError::RetriesExhausted {
                    attempts,
                    source: Box::new(err),
                }
                .into());
            }

            let backoff = policy.delay_for_attempt(attempt - 1);
            let delay = err.retry_after_secs().map_or(backoff, |secs| {
                Duration::from_secs(secs).min(Duration::from_millis(policy.max_delay_ms))
            });
            warn!("{label} failed ({err}), retry {attempt}/{} in {delay:?}", attempts - 1);
            tokio::time::sleep(delay).await;
        }
    }
}

fn require_id(kind: ResourceKind, id: Option<&str>) -> Result<&str> {
    id.ok_or_else(|| CherryError::internal(format!("{kind} has no ID to operate on")))
}

/// Adds a one-time password to reinstall parameters.
fn with_password(action: ActionKind, params: &FieldSet) -> FieldSet {
    let mut params = params.clone();
    if action == ActionKind::Reinstall && !params.contains_key("password") {
        params.insert(String::from("password"), Value::from(generate_password(PASSWORD_LENGTH)));
    }
    params
}
