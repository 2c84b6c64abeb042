//! Manifest validation.
//!
//! Pre-flight checks that need no network access: malformed values,
//! contradictory fields and duplicate resources are caught before any API
//! call is made.

use crate::error::{CherryError, ConfigError, ReconcileError, Result};
use crate::resource::{
    DesiredResource, FloatingIpSpec, Lookup, ServerSpec, SshKeySpec, Target, VolumeSpec,
};
use std::collections::HashSet;
use tracing::debug;

use super::manifest::Manifest;
use super::settings::{RetryPolicy, Settings, WaitPolicy};

/// Public key algorithms accepted by the provider.
const KNOWN_KEY_PREFIXES: &[&str] = &[
    "ssh-rsa",
    "ssh-dss",
    "ssh-ed25519",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
    "sk-ssh-ed25519@openssh.com",
    "sk-ecdsa-sha2-nistp256@openssh.com",
];

/// Validator for manifests.
#[derive(Debug, Default)]
pub struct ManifestValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ManifestValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a manifest.
    ///
    /// # Errors
    ///
    /// Returns the first validation error, if any.
    pub fn validate(&self, manifest: &Manifest) -> Result<ValidationResult> {
        let result = self.check(manifest);

        if result.errors.is_empty() {
            debug!("Manifest validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(CherryError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Runs every check and collects all findings.
    #[must_use]
    pub fn check(&self, manifest: &Manifest) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_settings(&manifest.settings, &mut result);

        if manifest.is_empty() {
            result.warnings.push(String::from("No resources defined in manifest"));
            return result;
        }

        let mut seen = HashSet::new();
        for (i, resource) in manifest.resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if let Some(identity) = identity(resource) {
                if !seen.insert(identity.clone()) {
                    result.errors.push(ValidationError {
                        field: prefix.clone(),
                        message: format!("Duplicate resource: {identity}"),
                    });
                }
            }

            match resource {
                DesiredResource::Server(spec) => Self::validate_server(spec, &prefix, &mut result),
                DesiredResource::FloatingIp(spec) => Self::validate_floating_ip(spec, &prefix, &mut result),
                DesiredResource::SshKey(spec) => Self::validate_ssh_key(spec, &prefix, &mut result),
                DesiredResource::Volume(spec) => Self::validate_volume(spec, &prefix, &mut result),
                DesiredResource::Project(_) => {}
            }

            Self::validate_create_fields(resource, &prefix, &mut result);
        }

        result
    }

    /// Validates the `settings:` block.
    fn validate_settings(settings: &Settings, result: &mut ValidationResult) {
        if settings.request_timeout_secs == Some(0) {
            result.errors.push(ValidationError {
                field: String::from("settings.request_timeout_secs"),
                message: String::from("Request timeout must be at least 1 second"),
            });
        }

        let retries = [("settings.retry", &settings.retry), ("settings.transport_retry", &settings.transport_retry)];
        for (field, retry) in retries {
            if let Some(retry) = retry {
                Self::validate_retry(retry, field, result);
            }
        }

        if let Some(waits) = &settings.waits {
            Self::validate_wait(&waits.server, "settings.waits.server", result);
            Self::validate_wait(&waits.volume, "settings.waits.volume", result);
        }
    }

    fn validate_retry(retry: &RetryPolicy, field: &str, result: &mut ValidationResult) {
        if retry.max_attempts == 0 {
            result.warnings.push(format!("{field}.max_attempts: 0 is treated as a single attempt"));
        }
        if retry.multiplier < 1.0 {
            result.errors.push(ValidationError {
                field: format!("{field}.multiplier"),
                message: String::from("Backoff multiplier must be at least 1"),
            });
        }
    }

    fn validate_wait(wait: &WaitPolicy, field: &str, result: &mut ValidationResult) {
        if wait.poll_interval_ms == 0 {
            result.errors.push(ValidationError {
                field: format!("{field}.poll_interval_ms"),
                message: String::from("Poll interval must be positive"),
            });
        } else if wait.timeout_ms < wait.poll_interval_ms {
            result.warnings.push(format!(
                "{field}: timeout is shorter than the poll interval; only one poll will be made"
            ));
        }
    }

    /// Validates a server entry.
    fn validate_server(spec: &ServerSpec, prefix: &str, result: &mut ValidationResult) {
        if let Err(e) = spec.check_user_data() {
            result.errors.push(ValidationError {
                field: format!("{prefix}.user_data"),
                message: e.to_string(),
            });
        }

        if let Some(hostname) = &spec.hostname {
            if !is_valid_hostname(hostname) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.hostname"),
                    message: format!(
                        "Hostname '{hostname}' is invalid. Labels must be 1-63 alphanumeric characters or hyphens."
                    ),
                });
            }
        }

        if spec.active_timeout_secs == Some(0) {
            result.errors.push(ValidationError {
                field: format!("{prefix}.active_timeout_secs"),
                message: String::from("Active timeout must be at least 1 second"),
            });
        }
    }

    /// Validates a floating IP entry.
    fn validate_floating_ip(spec: &FloatingIpSpec, prefix: &str, result: &mut ValidationResult) {
        if let Err(e) = spec.check_exclusive() {
            result.errors.push(ValidationError {
                field: format!("{prefix}.target_server_id"),
                message: e.to_string(),
            });
        }
    }

    /// Validates an SSH key entry.
    fn validate_ssh_key(spec: &SshKeySpec, prefix: &str, result: &mut ValidationResult) {
        if let Some(key) = &spec.key {
            let algorithm = key.split_whitespace().next().unwrap_or_default();
            if !KNOWN_KEY_PREFIXES.contains(&algorithm) {
                result.warnings.push(format!(
                    "{prefix}.key: Unrecognised key type '{algorithm}'. The API may reject it."
                ));
            }
        }
    }

    /// Validates a volume entry.
    fn validate_volume(spec: &VolumeSpec, prefix: &str, result: &mut ValidationResult) {
        if let Err(e) = spec.check_state() {
            result.errors.push(ValidationError {
                field: format!("{prefix}.state"),
                message: e.to_string(),
            });
        }

        if spec.size == Some(0) {
            result.errors.push(ValidationError {
                field: format!("{prefix}.size"),
                message: String::from("Volume size must be at least 1 GB"),
            });
        }
    }

    /// Warns when a resource that may need creating lacks its create fields.
    fn validate_create_fields(resource: &DesiredResource, prefix: &str, result: &mut ValidationResult) {
        if resource.target() == Target::Absent || matches!(resource.lookup(), Lookup::ById(_)) {
            return;
        }
        if let Err(CherryError::Reconcile(ReconcileError::MissingCreateFields { fields, .. })) =
            resource.create_request()
        {
            result.warnings.push(format!(
                "{prefix}: {} '{}' cannot be created if missing: {} not set",
                resource.kind(),
                resource.label(),
                fields.join(", ")
            ));
        }
    }
}

/// Key under which a resource is unique within a manifest.
fn identity(resource: &DesiredResource) -> Option<String> {
    let kind = resource.kind();
    match resource.lookup() {
        Lookup::ById(id) => Some(format!("{kind} id={id}")),
        Lookup::ByKey { scope, key } => Some(format!("{kind} {key} in {scope}")),
        Lookup::Unaddressable => None,
    }
}

/// Validates a hostname as dot-separated DNS labels.
fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 253 {
        return false;
    }

    hostname.trim_end_matches('.').split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn check(yaml: &str) -> ValidationResult {
        let manifest = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        ManifestValidator::new().check(&manifest)
    }

    #[test]
    fn test_valid_hostname() {
        assert!(is_valid_hostname("web-1"));
        assert!(is_valid_hostname("web-1.example.com"));
        assert!(is_valid_hostname("a"));
    }

    #[test]
    fn test_invalid_hostname() {
        assert!(!is_valid_hostname(""));
        assert!(!is_valid_hostname("-web"));
        assert!(!is_valid_hostname("web_1"));
        assert!(!is_valid_hostname("web..example"));
        assert!(!is_valid_hostname(&"a".repeat(64)));
    }

    #[test]
    fn test_valid_manifest() {
        let result = check(
            r"
resources:
  - kind: ssh_key
    label: deploy
    key: ssh-ed25519 AAAA
  - kind: server
    project_id: 1
    hostname: web-1
    plan: e5_1620v4
    region: LT-Siauliai
    user_data: I2Nsb3VkLWNvbmZpZw==
",
        );
        assert!(result.is_valid(), "{:?}", result.errors);
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_bad_user_data_and_hostname() {
        let result = check(
            r"
resources:
  - kind: server
    project_id: 1
    hostname: web_1
    plan: e5_1620v4
    region: LT-Siauliai
    user_data: '!!not base64!!'
",
        );
        assert_eq!(result.error_count(), 2);
        assert!(result.errors.iter().any(|e| e.field == "resources[0].user_data"));
        assert!(result.errors.iter().any(|e| e.field == "resources[0].hostname"));
    }

    #[test]
    fn test_exclusive_route_and_target() {
        let result = check(
            r"
resources:
  - kind: floating_ip
    project_id: 1
    region: LT-Siauliai
    route_ip_id: abc
    target_server_id: 7
",
        );
        assert!(!result.is_valid());
        assert!(result.errors[0].message.contains("mutually exclusive"));
    }

    #[test]
    fn test_volume_state_conflicts() {
        let result = check(
            r"
resources:
  - kind: volume
    id: 5
    state: detached
    target_server_id: 1
  - kind: volume
    id: 6
    state: attached
",
        );
        assert_eq!(result.error_count(), 2);
    }

    #[test]
    fn test_duplicate_resources() {
        let result = check(
            r"
resources:
  - kind: project
    team_id: 1
    name: prod
  - kind: project
    team_id: 1
    name: prod
",
        );
        assert_eq!(result.error_count(), 1);
        assert!(result.errors[0].message.contains("Duplicate"));
        assert_eq!(result.errors[0].field, "resources[1]");
    }

    #[test]
    fn test_missing_create_fields_is_warning() {
        let result = check(
            r"
resources:
  - kind: server
    project_id: 1
    hostname: web-1
",
        );
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 1);
        assert!(result.warnings[0].contains("region, plan"));
    }

    #[test]
    fn test_unknown_key_type_is_warning() {
        let result = check(
            r"
resources:
  - kind: ssh_key
    label: deploy
    key: ssh-foo AAAA
",
        );
        assert!(result.is_valid());
        assert!(result.warnings[0].contains("ssh-foo"));
    }

    #[test]
    fn test_validate_returns_first_error() {
        let manifest = ConfigParser::new()
            .parse_yaml("settings:\n  request_timeout_secs: 0\n", None)
            .unwrap();
        let err = ManifestValidator::new().validate(&manifest).unwrap_err();
        assert!(err.to_string().contains("Request timeout"));
    }
}
