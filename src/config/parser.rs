//! Manifest parser for loading manifest files and environment.
//!
//! This module handles loading the manifest from YAML files and the API
//! credentials from the environment, with proper error handling.

use crate::error::{CherryError, ConfigError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::manifest::Manifest;
use super::settings::{EngineConfig, ENV_AUTH_KEY, ENV_AUTH_TOKEN};

/// Parser for manifest files.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new manifest parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving `.env`.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a manifest from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let path = path.as_ref();
        info!("Loading manifest from: {}", path.display());

        if !path.exists() {
            return Err(CherryError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            CherryError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a manifest from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Manifest> {
        debug!("Parsing YAML manifest");

        let manifest: Manifest = serde_yaml::from_str(content).map_err(|e| {
            let file = source.map(|p| p.display().to_string());
            let location = match (file, e.location()) {
                (Some(file), Some(at)) => Some(format!("{file}:{}:{}", at.line(), at.column())),
                (None, Some(at)) => Some(format!("line {} column {}", at.line(), at.column())),
                (file, None) => file,
            };
            CherryError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!("Parsed manifest with {} resources", manifest.len());
        Ok(manifest)
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                CherryError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Builds the engine configuration from the environment and the
    /// manifest's `settings:` block.
    ///
    /// # Errors
    ///
    /// Returns an error if no API token is set.
    pub fn engine_config(&self, manifest: &Manifest) -> Result<EngineConfig> {
        Ok(EngineConfig::from_env()?.with_settings(&manifest.settings))
    }
}

/// Reads the API token through `lookup`.
///
/// `CHERRY_AUTH_TOKEN` wins over `CHERRY_AUTH_KEY`; blank values are ignored.
///
/// # Errors
///
/// Returns an error if neither variable is set.
pub fn auth_token_from<F>(lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    [ENV_AUTH_TOKEN, ENV_AUTH_KEY]
        .iter()
        .find_map(|name| lookup(name).filter(|v| !v.trim().is_empty()))
        .map(|token| token.trim().to_string())
        .ok_or_else(|| {
            CherryError::Config(ConfigError::MissingEnvVar {
                name: String::from(ENV_AUTH_TOKEN),
            })
        })
}

/// Default manifest file names to search for.
pub const DEFAULT_MANIFEST_FILES: &[&str] = &["cherry.yaml", "cherry.yml", "cherrysync.yaml"];

/// Finds the manifest in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no manifest is found.
pub fn find_manifest_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_MANIFEST_FILES {
            let manifest_path = current.join(filename);
            if manifest_path.exists() {
                info!("Found manifest: {}", manifest_path.display());
                return Ok(manifest_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(CherryError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_MANIFEST_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{DesiredResource, ResourceKind, ServerState};
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_manifest() {
        let yaml = r"
resources:
  - kind: ssh_key
    label: deploy
    key: ssh-ed25519 AAAA
";
        let manifest = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.resources[0].kind(), ResourceKind::SshKey);
        assert_eq!(manifest.settings.request_timeout_secs, None);
    }

    #[test]
    fn test_parse_full_manifest() {
        let yaml = r#"
settings:
  request_timeout_secs: 60
  retry:
    max_attempts: 2
  waits:
    server:
      poll_interval_ms: 1000
      timeout_ms: 60000

resources:
  - kind: project
    team_id: 12
    name: staging
    bgp: true
  - kind: server
    project_id: 123
    hostname: web-1
    plan: e5_1620v4
    region: LT-Siauliai
    image: ubuntu_22_04
    ssh_keys: [1, 2]
    tags:
      env: staging
    state: active
    reinstall: on_change
  - kind: floating_ip
    project_id: 123
    region: LT-Siauliai
    ptr_record: web.example.com.
  - kind: volume
    project_id: 123
    region: LT-Siauliai
    size: 50
    target_server_id: 77
    wait: true
"#;
        let manifest = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        assert_eq!(manifest.len(), 4);
        assert_eq!(manifest.settings.request_timeout_secs, Some(60));
        assert_eq!(manifest.settings.retry.as_ref().map(|r| r.max_attempts), Some(2));

        let DesiredResource::Server(server) = &manifest.resources[1] else {
            panic!("expected a server");
        };
        assert_eq!(server.state, ServerState::Active);
        assert_eq!(server.ssh_keys, Some(vec![1, 2]));
    }

    #[test]
    fn test_parse_error_has_location() {
        let yaml = "resources:\n  - kind: spaceship\n";
        let err = ConfigParser::new().parse_yaml(yaml, None).unwrap_err();
        match err {
            CherryError::Config(ConfigError::ParseError { location, .. }) => assert!(location.is_some()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cherry.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "resources:\n  - kind: project\n    team_id: 1\n    name: prod").unwrap();

        let manifest = ConfigParser::new().load_file(&path).unwrap();
        assert_eq!(manifest.resources[0].label(), "prod");

        let missing = ConfigParser::new().load_file(dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(CherryError::Config(ConfigError::FileNotFound { .. }))));
    }

    #[test]
    fn test_find_manifest_in_parent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cherry.yml"), "resources: []\n").unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_manifest_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("cherry.yml"));
    }

    #[test]
    fn test_auth_token_precedence() {
        let env: HashMap<&str, &str> = HashMap::from([(ENV_AUTH_TOKEN, " primary "), (ENV_AUTH_KEY, "fallback")]);
        let token = auth_token_from(|k| env.get(k).map(|v| (*v).to_string())).unwrap();
        assert_eq!(token, "primary");

        let env: HashMap<&str, &str> = HashMap::from([(ENV_AUTH_TOKEN, "  "), (ENV_AUTH_KEY, "fallback")]);
        let token = auth_token_from(|k| env.get(k).map(|v| (*v).to_string())).unwrap();
        assert_eq!(token, "fallback");
    }
}
