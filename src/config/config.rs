//! Configuration loading
//!
//! A TOML file provides defaults; command-line flags are layered on top in
//! `main`, and the result is validated into an immutable [`RuntimeConfig`].

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_POWERBI_API: &str = "https://api.powerbi.com/v1.0/myorg";
pub const DEFAULT_FABRIC_API: &str = "https://api.fabric.microsoft.com/v1";
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
pub const DEFAULT_POWERBI_SCOPE: &str = "https://analysis.windows.net/powerbi/api/.default";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// On-disk configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub powerbi: PowerBiSection,
    pub auth: AuthSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Default rows per page for table contents
    pub page_size: usize,
    pub max_page_size: usize,
    /// When non-empty, only these tools may run
    pub allow: Vec<String>,
    /// Tools disabled by the administrator
    pub disallow: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            page_size: 10,
            max_page_size: 1000,
            allow: Vec::new(),
            disallow: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PowerBiSection {
    pub api_base: String,
    pub fabric_base: String,
    pub authority_host: String,
    pub scope: String,
    pub request_timeout_secs: u64,
    pub operation_timeout_secs: u64,
}

impl Default for PowerBiSection {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_POWERBI_API.to_string(),
            fabric_base: DEFAULT_FABRIC_API.to_string(),
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
            scope: DEFAULT_POWERBI_SCOPE.to_string(),
            request_timeout_secs: 120,
            operation_timeout_secs: 1800,
        }
    }
}

/// Service principal credentials. Environment variables take precedence.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// REST and identity endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoints {
    pub api_base: String,
    pub fabric_base: String,
    pub authority_host: String,
    pub scope: String,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_POWERBI_API.to_string(),
            fabric_base: DEFAULT_FABRIC_API.to_string(),
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
            scope: DEFAULT_POWERBI_SCOPE.to_string(),
        }
    }
}

/// Validated configuration used at runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub page_size: usize,
    pub max_page_size: usize,
    pub allow: Option<HashSet<String>>,
    pub disallow: HashSet<String>,
    pub endpoints: ServiceEndpoints,
    pub request_timeout: Duration,
    pub operation_timeout: Duration,
    pub auth: AuthSection,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `path` if given, otherwise use built-in defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Validate and convert into runtime configuration
    pub fn to_runtime(&self) -> Result<RuntimeConfig, ConfigError> {
        if self.server.page_size == 0 {
            return Err(ConfigError::Invalid(
                "server.page_size must be 1 or greater".to_string(),
            ));
        }
        if self.server.max_page_size < self.server.page_size {
            return Err(ConfigError::Invalid(format!(
                "server.max_page_size ({}) must not be smaller than server.page_size ({})",
                self.server.max_page_size, self.server.page_size
            )));
        }

        let endpoints = ServiceEndpoints {
            api_base: normalize_base(&self.powerbi.api_base, "powerbi.api_base")?,
            fabric_base: normalize_base(&self.powerbi.fabric_base, "powerbi.fabric_base")?,
            authority_host: normalize_base(&self.powerbi.authority_host, "powerbi.authority_host")?,
            scope: self.powerbi.scope.trim().to_string(),
        };
        if endpoints.scope.is_empty() {
            return Err(ConfigError::Invalid("powerbi.scope must not be empty".to_string()));
        }

        let allow: HashSet<String> = tool_names(&self.server.allow);

        Ok(RuntimeConfig {
            page_size: self.server.page_size,
            max_page_size: self.server.max_page_size,
            allow: if allow.is_empty() { None } else { Some(allow) },
            disallow: tool_names(&self.server.disallow),
            endpoints,
            request_timeout: Duration::from_secs(self.powerbi.request_timeout_secs.max(1)),
            operation_timeout: Duration::from_secs(self.powerbi.operation_timeout_secs.max(1)),
            auth: self.auth.clone(),
        })
    }
}

fn normalize_base(value: &str, field: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim().trim_end_matches('/');
    if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
        return Err(ConfigError::Invalid(format!(
            "{} must be an http(s) URL, got '{}'",
            field, value
        )));
    }
    Ok(trimmed.to_string())
}

fn tool_names(names: &[String]) -> HashSet<String> {
    names
        .iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let runtime = Config::default().to_runtime().unwrap();
        assert_eq!(runtime.page_size, 10);
        assert_eq!(runtime.endpoints.api_base, DEFAULT_POWERBI_API);
        assert!(runtime.allow.is_none());
        assert!(runtime.disallow.is_empty());
        assert_eq!(runtime.operation_timeout, Duration::from_secs(1800));
    }

    #[test]
    fn test_parse_partial_file() {
        let config: Config = toml::from_str(
            r#"
            [server]
            page_size = 25
            disallow = ["get_table_contents", " "]

            [powerbi]
            api_base = "https://api.powerbi.com/v1.0/myorg/"
            "#,
        )
        .unwrap();

        let runtime = config.to_runtime().unwrap();
        assert_eq!(runtime.page_size, 25);
        assert_eq!(runtime.max_page_size, 1000);
        assert_eq!(runtime.disallow.len(), 1);
        assert!(runtime.disallow.contains("get_table_contents"));
        assert_eq!(runtime.endpoints.api_base, "https://api.powerbi.com/v1.0/myorg");
    }

    #[test]
    fn test_rejects_zero_page_size() {
        let mut config = Config::default();
        config.server.page_size = 0;
        assert!(matches!(config.to_runtime(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_non_url_base() {
        let mut config = Config::default();
        config.powerbi.fabric_base = "api.fabric.microsoft.com".to_string();
        let err = config.to_runtime().unwrap_err();
        assert!(err.to_string().contains("powerbi.fabric_base"));
    }
}
