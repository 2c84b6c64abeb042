//! Cherry Servers API client implementation.
//!
//! This module provides a thin, typed HTTP transport over the Cherry
//! Servers v1 REST API: request building, bearer authentication,
//! response decoding and mapping of HTTP failures to [`ApiError`].
//! Only GET requests are retried here, and only on transport failures.

use std::time::Duration;

use reqwest::{header, Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::config::{EngineConfig, RetryPolicy};
use crate::error::{ApiError, CherryError, FieldError, Result};
use crate::planner::{ActionKind, FieldSet};
use crate::resource::{ResourceKind, Scope};

/// Fallback timeout for calls not tied to a resource kind.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Retry hint used when a 429 carries no `Retry-After` header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Cherry Servers API client.
#[derive(Debug, Clone)]
pub struct CherryClient {
    /// HTTP client.
    client: Client,
    /// API endpoint, without trailing slash.
    base_url: String,
    /// Bearer token.
    auth_token: String,
    /// Retry policy for transport failures on reads.
    transport_retry: RetryPolicy,
}

/// Acknowledgement of a completed delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack;

impl CherryClient {
    /// Creates a new API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ApiError::transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
            transport_retry: config.transport_retry.clone(),
        })
    }

    /// API endpoint this client talks to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Checks that the token is accepted.
    ///
    /// # Errors
    ///
    /// Returns an authentication error if the token is rejected.
    pub async fn validate_token(&self) -> Result<Value> {
        let body = self
            .get_with_retry(None, "user", Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .await?;
        Ok(body.unwrap_or(Value::Null))
    }

    /// Gets a resource by ID.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the resource does not exist.
    pub async fn get<T: DeserializeOwned>(&self, kind: ResourceKind, id: &str, timeout: Duration) -> Result<T> {
        debug!("Getting {kind} {id}");
        let body = self.get_with_retry(Some(kind), &kind.item_path(id), timeout).await?;
        decode(body)
    }

    /// Gets a resource by ID, mapping "not found" to `None`.
    ///
    /// The provider answers 403 for floating IPs that do not exist in the
    /// caller's account; that is treated as absent too.
    ///
    /// # Errors
    ///
    /// Returns an error for any failure other than absence.
    pub async fn find<T: DeserializeOwned>(
        &self,
        kind: ResourceKind,
        id: &str,
        timeout: Duration,
    ) -> Result<Option<T>> {
        match self.get(kind, id, timeout).await {
            Ok(found) => Ok(Some(found)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(CherryError::Api(ApiError::Authentication { status: 403, .. })) if kind == ResourceKind::FloatingIp => {
                debug!("Floating IP {id} is not visible, treating as absent");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Lists a collection as raw JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails or the body is not a list.
    pub async fn list_raw(&self, kind: ResourceKind, scope: Scope, timeout: Duration) -> Result<Vec<Value>> {
        let path = kind.collection_path(scope)?;
        debug!("Listing {kind} in {scope}");
        match self.get_with_retry(Some(kind), &path, timeout).await? {
            Some(Value::Array(items)) => Ok(items),
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(other) => Err(ApiError::invalid_response(format!("expected a list from {path}, got {other}")).into()),
        }
    }

    /// Lists a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails or an item cannot be decoded.
    pub async fn list<T: DeserializeOwned>(&self, kind: ResourceKind, scope: Scope, timeout: Duration) -> Result<Vec<T>> {
        self.list_raw(kind, scope, timeout)
            .await?
            .into_iter()
            .map(|item| decode(Some(item)))
            .collect()
    }

    /// Creates a resource.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] if the payload is rejected.
    pub async fn create<T: DeserializeOwned>(
        &self,
        kind: ResourceKind,
        scope: Scope,
        fields: &FieldSet,
        timeout: Duration,
    ) -> Result<T> {
        let path = kind.collection_path(scope)?;
        let body = serde_json::to_value(fields).map_err(|e| CherryError::internal(e.to_string()))?;
        let response = self.send(Some(kind), Method::POST, &path, Some(&body), timeout).await?;
        decode(response)
    }

    /// Updates fields of a resource in place.
    ///
    /// Returns the decoded body, or `None` when the API answers without one.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn update<T: DeserializeOwned>(
        &self,
        kind: ResourceKind,
        id: &str,
        fields: &FieldSet,
        timeout: Duration,
    ) -> Result<Option<T>> {
        let body = serde_json::to_value(fields).map_err(|e| CherryError::internal(e.to_string()))?;
        let response = self
            .send(Some(kind), Method::PUT, &kind.item_path(id), Some(&body), timeout)
            .await?;
        response.map(|value| decode(Some(value))).transpose()
    }

    /// Performs a provider-side action.
    ///
    /// # Errors
    ///
    /// Returns an error if the action is not supported for the kind or the API call fails.
    pub async fn perform_action(
        &self,
        kind: ResourceKind,
        id: &str,
        action: ActionKind,
        params: &FieldSet,
        timeout: Duration,
    ) -> Result<Option<Value>> {
        let (method, path, body) = match (kind, action) {
            (ResourceKind::Server, ActionKind::Reinstall | ActionKind::PowerOn | ActionKind::PowerOff) => {
                let mut body = params.clone();
                body.insert(String::from("type"), Value::from(action.api_type()));
                (Method::POST, format!("{}/actions", kind.item_path(id)), Some(body))
            }
            (ResourceKind::Volume, ActionKind::Attach) => (
                Method::POST,
                format!("{}/attachments", kind.item_path(id)),
                Some(params.clone()),
            ),
            (ResourceKind::Volume, ActionKind::Detach) => {
                (Method::DELETE, format!("{}/attachments", kind.item_path(id)), None)
            }
            _ => {
                return Err(CherryError::internal(format!("action {action} is not supported for {kind}")));
            }
        };

        let body = body
            .map(|b| serde_json::to_value(b).map_err(|e| CherryError::internal(e.to_string())))
            .transpose()?;
        self.send(Some(kind), method, &path, body.as_ref(), timeout).await
    }

    /// Deletes a resource.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the resource does not exist.
    pub async fn delete(&self, kind: ResourceKind, id: &str, timeout: Duration) -> Result<Ack> {
        self.send(Some(kind), Method::DELETE, &kind.item_path(id), None, timeout)
            .await?;
        Ok(Ack)
    }

    /// Issues a GET, retrying transport failures with bounded backoff.
    async fn get_with_retry(&self, kind: Option<ResourceKind>, path: &str, timeout: Duration) -> Result<Option<Value>> {
        let attempts = self.transport_retry.attempts();
        let mut attempt = 0;

        loop {
            match self.send(kind, Method::GET, path, None, timeout).await {
                Err(e) if e.is_transport() && attempt + 1 < attempts => {
                    let delay = self.transport_retry.delay_for_attempt(attempt);
                    attempt += 1;
                    warn!("GET {path} failed ({e}), retry {attempt}/{} in {delay:?}", attempts - 1);
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Sends a single request and maps the response.
    ///
    /// `kind` is `None` for endpoints that are not a resource.
    async fn send(
        &self,
        kind: Option<ResourceKind>,
        method: Method,
        path: &str,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<Option<Value>> {
        trace!("{method} {path}");

        let mut request = self
            .client
            .request(method.clone(), self.url(path))
            .timeout(timeout)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.auth_token))
            .header(header::CONTENT_TYPE, "application/json");

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| transport_error(&e, timeout))?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let text = response.text().await.map_err(|e| transport_error(&e, timeout))?;

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(None);
            }
            return serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| ApiError::invalid_response(format!("{method} {path}: {e}")).into());
        }

        debug!("{method} {path} returned {status}");
        Err(map_status(kind, path, status, retry_after, &text).into())
    }
}

fn decode<T: DeserializeOwned>(body: Option<Value>) -> Result<T> {
    let value = body.ok_or_else(|| ApiError::invalid_response("empty response body"))?;
    serde_json::from_value(value).map_err(|e| ApiError::invalid_response(e.to_string()).into())
}

fn transport_error(error: &reqwest::Error, timeout: Duration) -> ApiError {
    if error.is_timeout() {
        ApiError::transport(format!("request timed out after {timeout:?}"))
    } else {
        ApiError::transport(error.to_string())
    }
}

/// Maps a non-success HTTP status to a typed error.
fn map_status(kind: Option<ResourceKind>, path: &str, status: StatusCode, retry_after: Option<u64>, body: &str) -> ApiError {
    let (message, fields) = parse_error_body(body, status);
    match status.as_u16() {
        401 | 403 => ApiError::Authentication {
            status: status.as_u16(),
            message,
        },
        404 => match kind {
            Some(kind) => ApiError::not_found(kind, path),
            None => ApiError::Validation {
                status: 404,
                message,
                fields,
            },
        },
        429 => ApiError::RateLimited {
            retry_after_secs: Some(retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS)),
        },
        code if status.is_server_error() => ApiError::Server { status: code, message },
        code => ApiError::Validation {
            status: code,
            message,
            fields,
        },
    }
}

/// Extracts the message and field errors from an error body.
fn parse_error_body(body: &str, status: StatusCode) -> (String, Vec<FieldError>) {
    let fallback = || {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            trimmed.to_string()
        }
    };

    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return (fallback(), Vec::new());
    };

    let message = ["message", "error", "detail"]
        .iter()
        .find_map(|key| json.get(key).and_then(Value::as_str))
        .map_or_else(fallback, String::from);

    let mut fields = Vec::new();
    match json.get("errors") {
        Some(Value::Object(map)) => {
            for (field, value) in map {
                match value {
                    Value::String(msg) => fields.push(FieldError {
                        field: field.clone(),
                        message: msg.clone(),
                    }),
                    Value::Array(items) => fields.extend(items.iter().filter_map(Value::as_str).map(|msg| FieldError {
                        field: field.clone(),
                        message: msg.to_string(),
                    })),
                    _ => {}
                }
            }
        }
        Some(Value::Array(items)) => {
            for item in items {
                if let (Some(field), Some(msg)) = (
                    item.get("field").and_then(Value::as_str),
                    item.get("message").and_then(Value::as_str),
                ) {
                    fields.push(FieldError {
                        field: field.to_string(),
                        message: msg.to_string(),
                    });
                }
            }
        }
        _ => {}
    }

    (message, fields)
}
