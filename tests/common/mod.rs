//! Shared fixtures for the API-backed tests.

#![allow(dead_code)]

use std::time::Duration;

use cherrysync::cherry::CherryClient;
use cherrysync::config::{EngineConfig, RetryPolicy, WaitPolicy, WaitSettings};
use cherrysync::reconciler::Reconciler;
use serde_json::{json, Value};
use wiremock::MockServer;

/// Retry policy with millisecond delays.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay_ms: 1,
        max_delay_ms: 2,
        multiplier: 1.0,
    }
}

/// Wait budget of a few short polls.
pub fn short_waits() -> WaitSettings {
    let policy = WaitPolicy::new(Duration::from_millis(10), Duration::from_millis(30));
    WaitSettings {
        server: policy,
        volume: policy,
    }
}

/// Engine configuration pointing at the mock server.
pub fn config(server: &MockServer) -> EngineConfig {
    EngineConfig::new("test-token")
        .with_base_url(server.uri())
        .with_retry(fast_retry(2))
        .with_transport_retry(fast_retry(3))
        .with_waits(short_waits())
}

/// Reconciler pointing at the mock server.
pub fn reconciler(server: &MockServer) -> Reconciler {
    let config = config(server);
    let client = CherryClient::new(&config).unwrap();
    Reconciler::new(client, config)
}

/// Server body as the API returns it.
pub fn server_json(id: u64, hostname: &str, status: &str) -> Value {
    json!({
        "id": id,
        "hostname": hostname,
        "status": status,
        "power": "on",
        "image": "ubuntu_22_04",
        "plan": {"slug": "e5_1620v4"},
        "region": {"slug": "LT-Siauliai"},
        "project": {"id": 9},
        "ssh_keys": [{"id": 2}, {"id": 1}],
        "tags": {}
    })
}

/// Methods of every request the mock server saw, in order.
pub async fn request_log(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| format!("{} {}", r.method, r.url.path()))
        .collect()
}
