//! Wait/poll controller.
//!
//! Polls a resource until a predicate holds, the provider reports an error
//! status, or the poll budget of the [`WaitPolicy`] is spent.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::cherry::{CherryClient, ObservedResource};
use crate::config::WaitPolicy;
use crate::error::{CherryError, ReconcileError, Result};
use crate::resource::{ResourceKind, ResourceStatus};

/// Source of fresh observations for one resource.
#[async_trait]
pub trait StatusProbe<T: Send>: Send + Sync {
    /// Fetches the current state.
    async fn fetch(&self) -> Result<T>;
}

/// Probe backed by the API client.
#[derive(Debug)]
pub struct ResourceProbe<'a> {
    client: &'a CherryClient,
    kind: ResourceKind,
    id: String,
    timeout: Duration,
}

impl<'a> ResourceProbe<'a> {
    /// Creates a probe for one resource.
    #[must_use]
    pub fn new(client: &'a CherryClient, kind: ResourceKind, id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            kind,
            id: id.into(),
            timeout,
        }
    }
}

#[async_trait]
impl<T: ObservedResource> StatusProbe<T> for ResourceProbe<'_> {
    async fn fetch(&self) -> Result<T> {
        self.client.get(self.kind, &self.id, self.timeout).await
    }
}

/// Result of a wait.
#[derive(Debug)]
pub enum WaitOutcome<T> {
    /// The predicate held.
    Reached(T),
    /// The poll budget ran out.
    TimedOut {
        /// Polls performed.
        polls: u32,
        /// Last successful observation.
        last: Option<T>,
    },
    /// The resource errored or could not be fetched.
    Failed(CherryError),
}

/// Polling loop bounded by a [`WaitPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct Waiter {
    policy: WaitPolicy,
}

impl Waiter {
    /// Creates a waiter.
    #[must_use]
    pub const fn new(policy: WaitPolicy) -> Self {
        Self { policy }
    }

    /// Polls `probe` until `predicate` holds.
    ///
    /// Performs at most [`WaitPolicy::max_polls`] fetches and never sleeps
    /// after the last one. A retryable fetch error counts as a poll.
    pub async fn wait_for<T, P, F>(&self, kind: ResourceKind, id: &str, probe: &P, predicate: F) -> WaitOutcome<T>
    where
        T: ObservedResource,
        P: StatusProbe<T> + ?Sized,
        F: Fn(&T) -> bool,
    {
        let max_polls = self.policy.max_polls();
        let interval = self.policy.poll_interval();
        let mut last = None;

        info!("Waiting for {kind} {id} (up to {max_polls} polls every {interval:?})");

        for poll in 1..=max_polls {
            match probe.fetch().await {
                Ok(observed) => {
                    if observed.status() == ResourceStatus::Error {
                        return WaitOutcome::Failed(
                            ReconcileError::ResourceErrored {
                                kind,
                                id: id.to_string(),
                                status: observed.raw_status().to_string(),
                            }
                            .into(),
                        );
                    }
                    if predicate(&observed) {
                        debug!("{kind} {id} reached its goal after {poll} polls");
                        return WaitOutcome::Reached(observed);
                    }
                    debug!("{kind} {id} is {} (poll {poll}/{max_polls})", observed.raw_status());
                    last = Some(observed);
                }
                Err(e) if e.is_retryable() => {
                    warn!("Polling {kind} {id} failed: {e}");
                }
                Err(e) => return WaitOutcome::Failed(e),
            }

            if poll < max_polls {
                tokio::time::sleep(interval).await;
            }
        }

        WaitOutcome::TimedOut { polls: max_polls, last }
    }
}
