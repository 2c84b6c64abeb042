//! Error types for the cherrysync reconciliation engine.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration loading, API transport, and reconciliation of a single
//! resource (lookup, execution, waiting).

use std::path::PathBuf;
use thiserror::Error;

use crate::resource::ResourceKind;

/// The main error type for cherrysync.
#[derive(Debug, Error)]
pub enum CherryError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Cherry Servers API errors.
    #[error("Cherry Servers API error: {0}")]
    Api(#[from] ApiError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The manifest file was not found.
    #[error("Manifest file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The manifest could not be parsed.
    #[error("Failed to parse manifest: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Manifest validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// A single field-level message returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FieldError {
    /// Field name as reported by the API.
    pub field: String,
    /// Message for that field.
    pub message: String,
}

/// Cherry Servers API errors, one per HTTP failure class.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The token was rejected (401/403).
    #[error("authentication failed ({status}): {message}")]
    Authentication {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// The resource does not exist (404).
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of the missing resource.
        kind: ResourceKind,
        /// Identifier or path that was requested.
        id: String,
    },

    /// The request payload was rejected (400/409/422).
    #[error("request rejected ({status}): {message}{}", format_fields(.fields))]
    Validation {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
        /// Field-level messages, if the API supplied them.
        fields: Vec<FieldError>,
    },

    /// Rate limited (429).
    #[error("rate limited{}", .retry_after_secs.map(|s| format!(", retry after {s} seconds")).unwrap_or_default())]
    RateLimited {
        /// Seconds to wait before retrying, from `Retry-After`.
        retry_after_secs: Option<u64>,
    },

    /// The provider failed (5xx).
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Network-level failure: DNS, TLS, connection reset, timeout.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the network error.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("invalid response: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A non-ID lookup matched more than one resource.
    #[error("multiple {kind} resources match {key}: {}", .matches.join(", "))]
    AmbiguousResource {
        /// Kind being looked up.
        kind: ResourceKind,
        /// Description of the match key.
        key: String,
        /// IDs of every matching resource.
        matches: Vec<String>,
    },

    /// The resource does not exist and cannot be created from what was given.
    #[error("cannot create {kind}: missing required fields: {}", .fields.join(", "))]
    MissingCreateFields {
        /// Kind being created.
        kind: ResourceKind,
        /// Names of the missing fields.
        fields: Vec<String>,
    },

    /// The desired state is contradictory.
    #[error("invalid desired state for {kind}: {message}")]
    InvalidDesiredState {
        /// Kind being reconciled.
        kind: ResourceKind,
        /// What is wrong.
        message: String,
    },

    /// The requested changes need a reinstall that was not allowed.
    #[error("server {id}: provided options require server reinstall ({})", .fields.join(", "))]
    ReinstallRequired {
        /// Server ID.
        id: String,
        /// Fields that can only change through a reinstall.
        fields: Vec<String>,
    },

    /// The resource found by ID is not of the expected type.
    #[error("{kind} {id} has unexpected type '{found}'")]
    UnexpectedType {
        /// Kind being reconciled.
        kind: ResourceKind,
        /// Resource ID.
        id: String,
        /// Type reported by the provider.
        found: String,
    },

    /// A retryable failure persisted past the retry budget.
    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last observed error.
        source: Box<CherryError>,
    },

    /// The first operation of a diff failed; nothing was applied.
    #[error("{kind} {}: operation {operation} failed: {source}", display_id(.id.as_deref()))]
    OperationFailed {
        /// Kind being reconciled.
        kind: ResourceKind,
        /// Resource ID, if known.
        id: Option<String>,
        /// Operation that failed.
        operation: String,
        /// Underlying error.
        source: Box<CherryError>,
    },

    /// Some operations were applied before a later one failed.
    #[error(
        "{kind} {}: applied [{}] then {failed} failed: {source}",
        display_id(.id.as_deref()),
        .applied.join(", ")
    )]
    PartialApply {
        /// Kind being reconciled.
        kind: ResourceKind,
        /// Resource ID, if known.
        id: Option<String>,
        /// Operations that completed, in order.
        applied: Vec<String>,
        /// Operation that failed.
        failed: String,
        /// Underlying error.
        source: Box<CherryError>,
    },

    /// The provider put the resource into an error state while waiting.
    #[error("{kind} {id} failed while waiting for {goal}: {source}")]
    WaitFailed {
        /// Kind being reconciled.
        kind: ResourceKind,
        /// Resource ID.
        id: String,
        /// Condition that was awaited.
        goal: String,
        /// Operations applied before the wait.
        applied: Vec<String>,
        /// Underlying error.
        source: Box<CherryError>,
    },

    /// The provider reported an error status for the resource.
    #[error("{kind} {id} entered error status '{status}'")]
    ResourceErrored {
        /// Kind being reconciled.
        kind: ResourceKind,
        /// Resource ID.
        id: String,
        /// Raw status reported by the provider.
        status: String,
    },
}

/// Result type alias for cherrysync operations.
pub type Result<T> = std::result::Result<T, CherryError>;

fn format_fields(fields: &[FieldError]) -> String {
    if fields.is_empty() {
        return String::new();
    }
    let joined: Vec<String> = fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.message))
        .collect();
    format!(" [{}]", joined.join("; "))
}

fn display_id(id: Option<&str>) -> &str {
    id.unwrap_or("(new)")
}

impl CherryError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the API error at the root of this error, if any.
    #[must_use]
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(e) => Some(e),
            Self::Reconcile(
                ReconcileError::RetriesExhausted { source, .. }
                | ReconcileError::OperationFailed { source, .. }
                | ReconcileError::PartialApply { source, .. }
                | ReconcileError::WaitFailed { source, .. },
            ) => source.api_error(),
            _ => None,
        }
    }

    /// Returns true if this error is worth retrying at all.
    ///
    /// Transport failures are included; callers that issue non-idempotent
    /// requests must additionally check [`Self::is_transport`].
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Api(
                ApiError::RateLimited { .. } | ApiError::Server { .. } | ApiError::Transport { .. }
            )
        )
    }

    /// Returns true for network-level failures.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Api(ApiError::Transport { .. }))
    }

    /// Returns true if the API reported the resource as missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Api(ApiError::NotFound { .. }))
    }

    /// Returns the provider's retry hint in seconds, if applicable.
    #[must_use]
    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Api(ApiError::RateLimited { retry_after_secs }) => *retry_after_secs,
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl ApiError {
    /// Creates a transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an invalid response error.
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    #[must_use]
    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl ReconcileError {
    /// Creates an invalid desired state error.
    #[must_use]
    pub fn invalid(kind: ResourceKind, message: impl Into<String>) -> Self {
        Self::InvalidDesiredState {
            kind,
            message: message.into(),
        }
    }
}
