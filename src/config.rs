// ⚙️ Configuration - TOML file plus environment overrides
//
// Precedence: environment > file > defaults
//   BACKOFFICE_API_URL   → api.base_url
//   BACKOFFICE_AUDIT_DB  → audit.db_path
//   BACKOFFICE_TOKEN     → session token (never stored in the file)

use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "backoffice.toml";
pub const ENV_API_URL: &str = "BACKOFFICE_API_URL";
pub const ENV_AUDIT_DB: &str = "BACKOFFICE_AUDIT_DB";
pub const ENV_TOKEN: &str = "BACKOFFICE_TOKEN";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: "http://localhost:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// SQLite journal; no journal when unset
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub audit: AuditConfig,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api: ApiConfig::default(),
            audit: AuditConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load from `path`, or from `backoffice.toml` when present, then apply the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::load_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Config::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    pub fn load_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (the process environment in production)
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api.base_url = url.trim().to_string();
        }
        if let Some(db) = lookup(ENV_AUDIT_DB).filter(|v| !v.trim().is_empty()) {
            self.audit.db_path = Some(PathBuf::from(db.trim()));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.api.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "api.base_url must start with http:// or https:// (got '{}')",
                url
            )));
        }
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::Validation("log_level must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Session from `BACKOFFICE_TOKEN`, if set
pub fn token_from_env() -> Option<Session> {
    session_from_lookup(|key| std::env::var(key).ok())
}

fn session_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Session> {
    lookup(ENV_TOKEN)
        .map(Session::from_token)
        .filter(|s| s.bearer().is_some())
}
