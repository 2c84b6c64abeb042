//! Configuration module for cherrysync.
//!
//! This module handles all configuration-related functionality:
//! - Engine settings (endpoint, credentials, timeouts, retry and wait budgets)
//! - Parsing and deserializing `cherry.yaml` manifests
//! - Offline validation of manifest values

mod manifest;
mod parser;
mod settings;
mod validator;

pub use manifest::Manifest;
pub use parser::{auth_token_from, find_manifest_file, ConfigParser, DEFAULT_MANIFEST_FILES};
pub use settings::{
    EngineConfig, RetryPolicy, Settings, WaitPolicy, WaitSettings, DEFAULT_BASE_URL, ENV_AUTH_KEY,
    ENV_AUTH_TOKEN, ENV_BASE_URL,
};
pub use validator::{ManifestValidator, ValidationError, ValidationResult};
