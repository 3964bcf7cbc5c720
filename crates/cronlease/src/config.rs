//! Settings file and environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use cronlease_lease::RedisSettings;
use cronlease_runner::{DEFAULT_MUTEX_TTL, LeaseLossPolicy};
use cronlease_scheduler::ExecutionDefaults;

const FILE_NAME: &str = "cronlease.yml";

/// Errors that can occur while loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    /// The file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid settings YAML.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// An override variable holds an unusable value.
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RedisSection {
    pub uri: String,
    pub password: Option<String>,
}

impl Default for RedisSection {
    fn default() -> Self {
        Self {
            uri: "redis://127.0.0.1:6379".to_string(),
            password: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MutexSection {
    /// Prepended to every lease name.
    pub prefix: String,
    /// Lease TTL in seconds when a run or entry does not set one.
    pub default_ttl: u64,
    pub on_lease_loss: LeaseLossPolicy,
}

impl Default for MutexSection {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            default_ttl: DEFAULT_MUTEX_TTL.as_secs(),
            on_lease_loss: LeaseLossPolicy::default(),
        }
    }
}

/// Process-wide settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub redis: RedisSection,
    pub mutex: MutexSection,
}

impl Settings {
    /// Locate, read and parse the settings file, then apply `CM_*` overrides
    /// from the process environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match locate(explicit, &candidates())? {
            Some(path) => {
                debug!(path = %path.display(), "loading config");
                Self::read(&path)?
            }
            None => {
                debug!("no config file found, using defaults");
                Self::default()
            }
        };
        settings.apply_env(|var| std::env::var(var).ok())?;
        Ok(settings)
    }

    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let document = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&document).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn parse(document: &str) -> Result<Self, serde_yaml::Error> {
        if document.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(document)
    }

    /// Override fields from `CM_*` variables; empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.is_empty());

        if let Some(uri) = get("CM_REDIS_URI") {
            self.redis.uri = uri;
        }
        if let Some(password) = get("CM_REDIS_PASSWORD") {
            self.redis.password = Some(password);
        }
        if let Some(prefix) = get("CM_MUTEX_PREFIX") {
            self.mutex.prefix = prefix;
        }
        if let Some(value) = get("CM_MUTEX_DEFAULT_TTL") {
            self.mutex.default_ttl = value
                .parse()
                .ok()
                .filter(|ttl| *ttl > 0)
                .ok_or(ConfigError::InvalidEnv {
                    var: "CM_MUTEX_DEFAULT_TTL",
                    value,
                })?;
        }
        if let Some(value) = get("CM_MUTEX_ON_LEASE_LOSS") {
            self.mutex.on_lease_loss = match value.to_lowercase().as_str() {
                "continue" => LeaseLossPolicy::Continue,
                "kill" => LeaseLossPolicy::Kill,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        var: "CM_MUTEX_ON_LEASE_LOSS",
                        value,
                    });
                }
            };
        }
        Ok(())
    }

    pub fn redis_settings(&self) -> RedisSettings {
        RedisSettings {
            uri: self.redis.uri.clone(),
            password: self.redis.password.clone(),
        }
    }

    /// Lease TTL for callers that do not set one. Never zero.
    pub fn default_ttl(&self) -> Duration {
        if self.mutex.default_ttl == 0 {
            DEFAULT_MUTEX_TTL
        } else {
            Duration::from_secs(self.mutex.default_ttl)
        }
    }

    pub fn execution_defaults(&self) -> ExecutionDefaults {
        ExecutionDefaults {
            prefix: self.mutex.prefix.clone(),
            mutex_ttl: self.default_ttl(),
            lease_loss: self.mutex.on_lease_loss,
        }
    }
}

/// Well-known locations, most global first.
fn candidates() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc").join(FILE_NAME)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join(FILE_NAME));
    }
    paths.push(PathBuf::from(FILE_NAME));
    paths
}

/// An explicit path must exist; otherwise the first existing candidate wins.
fn locate(
    explicit: Option<&Path>,
    candidates: &[PathBuf],
) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        return Ok(Some(path.to_path_buf()));
    }
    Ok(candidates.iter().find(|path| path.is_file()).cloned())
}
