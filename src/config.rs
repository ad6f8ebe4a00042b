//! Configuration management for Tollgate.
//!
//! The shared backend is selected purely by environment: when both
//! `TOLLGATE_REDIS_URL` and `TOLLGATE_REDIS_TOKEN` are set the distributed
//! limiter is used, otherwise counting stays in-process. A missing backend is
//! never a startup error.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Result, TollgateError};
use crate::ratelimit::LimitTable;

/// Prefix shared by every environment variable Tollgate reads.
pub const ENV_PREFIX: &str = "TOLLGATE";

/// Upper bound on a single shared-backend call.
pub const MAX_BACKEND_TIMEOUT: Duration = Duration::from_millis(1000);

/// Main configuration for a rate limiter.
#[derive(Debug, Clone, Default)]
pub struct TollgateConfig {
    /// Shared backend connection, if configured
    pub redis: Option<RedisConfig>,

    /// Per limit type quotas
    pub limits: LimitTable,
}

/// Connection settings for the shared counter backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Backend endpoint, e.g. `rediss://host:6379`
    pub url: String,

    /// Backend auth token, sent as the connection password when non-empty
    pub token: String,

    /// Per-call timeout in milliseconds, clamped to one second
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Namespace for counter keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl RedisConfig {
    /// Create a backend config with default timeout and key prefix.
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            timeout_ms: default_timeout_ms(),
            key_prefix: default_key_prefix(),
        }
    }

    /// The effective per-call timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1)).min(MAX_BACKEND_TIMEOUT)
    }
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_key_prefix() -> String {
    "tollgate".to_string()
}

/// Raw `TOLLGATE_*` variables.
#[derive(Debug, Default, Deserialize)]
struct EnvSettings {
    redis_url: Option<String>,
    redis_token: Option<String>,
    redis_timeout_ms: Option<u64>,
    redis_key_prefix: Option<String>,
    limits_file: Option<String>,
}

impl TollgateConfig {
    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_environment(::config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Build configuration from an explicit variable map instead of the process environment.
    pub fn from_env_map(vars: HashMap<String, String>) -> Result<Self> {
        Self::from_environment(::config::Environment::with_prefix(ENV_PREFIX).source(Some(vars)))
    }

    fn from_environment(source: ::config::Environment) -> Result<Self> {
        let settings: EnvSettings = ::config::Config::builder()
            .add_source(source)
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TollgateError::Config(e.to_string()))?;

        let limits = match settings.limits_file.as_deref() {
            Some(path) => LimitTable::from_file(path)?,
            None => LimitTable::default(),
        };

        let redis = match (non_empty(settings.redis_url), non_empty(settings.redis_token)) {
            (Some(url), Some(token)) => {
                let mut redis = RedisConfig::new(url, token);
                if let Some(timeout_ms) = settings.redis_timeout_ms {
                    redis.timeout_ms = timeout_ms;
                }
                if let Some(prefix) = non_empty(settings.redis_key_prefix) {
                    redis.key_prefix = prefix;
                }
                info!(timeout = ?redis.timeout(), "Shared rate limit backend configured");
                Some(redis)
            }
            _ => {
                debug!("No shared rate limit backend configured, counting locally");
                None
            }
        };

        Ok(Self { redis, limits })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
