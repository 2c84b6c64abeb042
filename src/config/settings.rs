//! Engine configuration: endpoint, credentials, timeouts, retry and wait budgets.
//!
//! Configuration is an explicit value handed to the client and reconciler.
//! Nothing here is process-wide.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::resource::ResourceKind;

/// Production API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.cherryservers.com/v1/";

/// Primary environment variable holding the API token.
pub const ENV_AUTH_TOKEN: &str = "CHERRY_AUTH_TOKEN";

/// Fallback environment variable holding the API token.
pub const ENV_AUTH_KEY: &str = "CHERRY_AUTH_KEY";

/// Environment variable overriding the API endpoint.
pub const ENV_BASE_URL: &str = "CHERRY_BASE_URL";

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay.
    pub max_delay_ms: u64,
    /// Growth factor between retries.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Policy for mutating operations.
    #[must_use]
    pub const fn mutating() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }

    /// Policy for transport failures on GET calls.
    #[must_use]
    pub const fn transport() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 250,
            max_delay_ms: 5_000,
            multiplier: 2.0,
        }
    }

    /// Policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = (self.initial_delay_ms as f64) * self.multiplier.powi(exponent);
        let capped = delay.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Attempts, never less than one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::mutating()
    }
}

/// Polling cadence and budget for one resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaitPolicy {
    /// Delay between polls.
    pub poll_interval_ms: u64,
    /// Total budget.
    pub timeout_ms: u64,
}

impl WaitPolicy {
    /// Creates a policy from durations.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval_ms: poll_interval.as_millis() as u64,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Servers take tens of minutes to provision.
    #[must_use]
    pub const fn server() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(1800))
    }

    /// Volume attachment converges within minutes.
    #[must_use]
    pub const fn volume() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(300))
    }

    /// Delay between polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Total budget.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Maximum number of polls the budget allows.
    #[must_use]
    pub fn max_polls(&self) -> u32 {
        if self.poll_interval_ms == 0 {
            return 1;
        }
        let polls = self.timeout_ms / self.poll_interval_ms;
        u32::try_from(polls).unwrap_or(u32::MAX).max(1)
    }

    /// Returns a copy with a different total budget.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }
}

/// Wait policies per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaitSettings {
    /// Server status waits.
    #[serde(default = "WaitPolicy::server")]
    pub server: WaitPolicy,
    /// Volume attachment waits.
    #[serde(default = "WaitPolicy::volume")]
    pub volume: WaitPolicy,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            server: WaitPolicy::server(),
            volume: WaitPolicy::volume(),
        }
    }
}

impl WaitSettings {
    /// Policy for a kind.
    #[must_use]
    pub const fn for_kind(&self, kind: ResourceKind) -> WaitPolicy {
        match kind {
            ResourceKind::Volume => self.volume,
            _ => self.server,
        }
    }
}

/// `settings:` block of a manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// API endpoint override.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Request timeout applied to every kind.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// Retry policy for mutating operations.
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    /// Retry policy for transport failures on reads.
    #[serde(default)]
    pub transport_retry: Option<RetryPolicy>,
    /// Wait policies.
    #[serde(default)]
    pub waits: Option<WaitSettings>,
}

/// Everything the client and reconciler need to talk to the API.
#[derive(Clone)]
pub struct EngineConfig {
    /// API endpoint.
    pub base_url: String,
    /// Bearer token.
    pub auth_token: String,
    /// `User-Agent` header.
    pub user_agent: String,
    /// Request timeout override; per-kind defaults apply when unset.
    pub request_timeout_secs: Option<u64>,
    /// Retry policy for mutating operations.
    pub retry: RetryPolicy,
    /// Retry policy for transport failures on reads.
    pub transport_retry: RetryPolicy,
    /// Wait policies.
    pub waits: WaitSettings,
}

impl EngineConfig {
    /// Creates a configuration with default endpoint and budgets.
    #[must_use]
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self {
            base_url: String::from(DEFAULT_BASE_URL),
            auth_token: auth_token.into(),
            user_agent: format!("cherrysync/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: None,
            retry: RetryPolicy::mutating(),
            transport_retry: RetryPolicy::transport(),
            waits: WaitSettings::default(),
        }
    }

    /// Builds a configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if no API token is set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if no API token is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = super::parser::auth_token_from(&lookup)?;
        let mut config = Self::new(token);
        if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            config.base_url = url;
        }
        Ok(config)
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the retry policy for mutating operations.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the retry policy for transport failures on reads.
    #[must_use]
    pub fn with_transport_retry(mut self, retry: RetryPolicy) -> Self {
        self.transport_retry = retry;
        self
    }

    /// Sets the wait policies.
    #[must_use]
    pub const fn with_waits(mut self, waits: WaitSettings) -> Self {
        self.waits = waits;
        self
    }

    /// Overlays a manifest `settings:` block.
    #[must_use]
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        if let Some(url) = &settings.base_url {
            self.base_url.clone_from(url);
        }
        if settings.request_timeout_secs.is_some() {
            self.request_timeout_secs = settings.request_timeout_secs;
        }
        if let Some(retry) = &settings.retry {
            self.retry = retry.clone();
        }
        if let Some(retry) = &settings.transport_retry {
            self.transport_retry = retry.clone();
        }
        if let Some(waits) = settings.waits {
            self.waits = waits;
        }
        self
    }

    /// Timeout for read calls on a kind.
    #[must_use]
    pub fn read_timeout(&self, kind: ResourceKind) -> Duration {
        self.request_timeout_secs
            .map_or_else(|| kind.read_timeout(), Duration::from_secs)
    }

    /// Timeout for mutating calls on a kind.
    #[must_use]
    pub fn write_timeout(&self, kind: ResourceKind) -> Duration {
        self.request_timeout_secs
            .map_or_else(|| kind.write_timeout(), Duration::from_secs)
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("base_url", &self.base_url)
            .field("auth_token", &"<redacted>")
            .field("user_agent", &self.user_agent)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("retry", &self.retry)
            .field("transport_retry", &self.transport_retry)
            .field("waits", &self.waits)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(1_000));
    }

    #[test]
    fn test_max_polls() {
        let policy = WaitPolicy::new(Duration::from_secs(10), Duration::from_secs(1800));
        assert_eq!(policy.max_polls(), 180);

        let tiny = WaitPolicy::new(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(tiny.max_polls(), 1);
    }

    #[test]
    fn test_token_falls_back_to_auth_key() {
        let env: HashMap<&str, &str> = HashMap::from([(ENV_AUTH_KEY, "secret")]);
        let config = EngineConfig::from_lookup(|k| env.get(k).map(|v| (*v).to_string())).unwrap();
        assert_eq!(config.auth_token, "secret");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_missing_token_is_reported() {
        let result = EngineConfig::from_lookup(|_| None);
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = EngineConfig::new("super-secret");
        let printed = format!("{config:?}");
        assert!(!printed.contains("super-secret"));
    }

    #[test]
    fn test_settings_overlay() {
        let settings = Settings {
            base_url: Some(String::from("http://localhost:9000/")),
            request_timeout_secs: Some(3),
            retry: Some(RetryPolicy::none()),
            transport_retry: None,
            waits: None,
        };
        let config = EngineConfig::new("t").with_settings(&settings);
        assert_eq!(config.base_url, "http://localhost:9000/");
        assert_eq!(config.read_timeout(ResourceKind::Project), Duration::from_secs(3));
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.transport_retry, RetryPolicy::transport());
    }
}
