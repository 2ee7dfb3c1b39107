//! Client configuration.
//!
//! Holds the API base URL, the auth endpoint paths, timeouts and the
//! persistence choice. Stored at `~/.config/sessionward/config.json`;
//! `SESSIONWARD_*` environment variables override the file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::ApiError;
use crate::auth::{FileSessionPersistence, KeyringSessionPersistence, SessionPersistence};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "sessionward";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding `base_url`
pub const ENV_BASE_URL: &str = "SESSIONWARD_BASE_URL";

/// Environment variable overriding `persistence`
pub const ENV_PERSISTENCE: &str = "SESSIONWARD_PERSISTENCE";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceMode {
    /// Session lives only as long as the process
    #[default]
    None,
    File,
    Keyring,
}

impl std::str::FromStr for PersistenceMode {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(PersistenceMode::None),
            "file" => Ok(PersistenceMode::File),
            "keyring" => Ok(PersistenceMode::Keyring),
            other => Err(ApiError::Config(format!("unknown persistence mode: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub identity_path: String,
    pub refresh_path: String,
    pub logout_path: String,
    /// Server path that starts the provider login flow
    pub login_path: String,
    /// Client route the guard redirects to
    pub login_route: String,
    pub request_timeout_secs: u64,
    pub bootstrap_wait_timeout_secs: u64,
    pub max_rate_limit_retries: u32,
    pub rate_limit_backoff_ms: u64,
    pub persistence: PersistenceMode,
    /// Persisted sessions older than this are ignored; `None` keeps them forever
    pub max_session_age_days: Option<i64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            identity_path: "/api/auth/user/me".to_string(),
            refresh_path: "/api/auth/refresh-token".to_string(),
            logout_path: "/api/auth/logout".to_string(),
            login_path: "/api/auth/login".to_string(),
            login_route: "/auth/login".to_string(),
            request_timeout_secs: 30,
            bootstrap_wait_timeout_secs: 30,
            max_rate_limit_retries: 3,
            rate_limit_backoff_ms: 1000,
            persistence: PersistenceMode::None,
            max_session_age_days: Some(30),
        }
    }
}

impl Config {
    /// Load from the config file, falling back to defaults when it is absent.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(serde_json::from_str(&contents).context("Failed to parse config file")?)
        } else {
            Ok(Self::default())
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Apply `SESSIONWARD_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ApiError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ApiError> {
        if let Some(base_url) = lookup(ENV_BASE_URL) {
            self.base_url = base_url;
        }
        if let Some(mode) = lookup(ENV_PERSISTENCE) {
            self.persistence = mode.parse()?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        let base = self.base_url.trim();
        if base.is_empty() {
            return Err(ApiError::Config("base_url must not be empty".into()));
        }
        let url = reqwest::Url::parse(base)
            .map_err(|e| ApiError::Config(format!("base_url {:?}: {}", base, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ApiError::Config(format!(
                "base_url must be http or https, got {}",
                url.scheme()
            )));
        }

        for (name, path) in [
            ("identity_path", &self.identity_path),
            ("refresh_path", &self.refresh_path),
            ("logout_path", &self.logout_path),
            ("login_path", &self.login_path),
            ("login_route", &self.login_route),
        ] {
            if !path.starts_with('/') {
                return Err(ApiError::Config(format!(
                    "{} must start with '/', got {:?}",
                    name, path
                )));
            }
        }

        if self.request_timeout_secs == 0 {
            return Err(ApiError::Config("request_timeout_secs must be positive".into()));
        }
        if self.bootstrap_wait_timeout_secs == 0 {
            return Err(ApiError::Config(
                "bootstrap_wait_timeout_secs must be positive".into(),
            ));
        }
        if let Some(days) = self.max_session_age_days {
            if days <= 0 || chrono::TimeDelta::try_days(days).is_none() {
                return Err(ApiError::Config(format!(
                    "max_session_age_days out of range: {}",
                    days
                )));
            }
        }
        Ok(())
    }

    /// Absolute URL for an API path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim().trim_end_matches('/'), path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn bootstrap_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_wait_timeout_secs)
    }

    /// Out-of-range values are rejected by `validate`; here they mean no limit.
    pub fn max_session_age(&self) -> Option<chrono::TimeDelta> {
        self.max_session_age_days.and_then(chrono::TimeDelta::try_days)
    }

    /// Build the persistence backend this config asks for.
    pub fn persistence_backend(&self) -> Option<Arc<dyn SessionPersistence>> {
        let backend: Option<Arc<dyn SessionPersistence>> = match self.persistence {
            PersistenceMode::None => None,
            PersistenceMode::File => {
                let cache_dir = self.cache_dir().unwrap_or_else(|e| {
                    warn!(error = %e, "No cache directory, keeping session in ./cache");
                    PathBuf::from("./cache")
                });
                Some(Arc::new(FileSessionPersistence::new(cache_dir)))
            }
            PersistenceMode::Keyring => Some(Arc::new(KeyringSessionPersistence::new())),
        };
        backend
    }
}
