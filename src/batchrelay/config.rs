use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, RelayError};

fn default_environment() -> String {
    "development".into()
}

fn default_log_level() -> String {
    "info".into()
}

fn default_send_timeout_ms() -> u64 {
    5_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_channel_capacity() -> usize {
    32
}

fn default_reap_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub id: String,
    pub addr: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Upper bound for pushing one message onto one channel
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Upper bound for webhook and trigger requests
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Outbound queue length per channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Subscriptions older than this are abandoned. No expiry when unset.
    #[serde(default)]
    pub subscription_ttl_secs: Option<u64>,
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub upstreams: Vec<UpstreamConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token → user id
    #[serde(default)]
    pub tokens: HashMap<String, String>,
    /// Serve `/ws/batch-status/{user_id}` without a credential. Development only.
    #[serde(default)]
    pub allow_path_identity: bool,
}

/// A batch worker reachable through the trigger proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub kind: String,
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    /// Environment variable holding the token, read at call time
    #[serde(default)]
    pub token_env: Option<String>,
    /// Call the worker without a credential when none is available
    #[serde(default)]
    pub allow_unauthenticated: bool,
}

impl UpstreamConfig {
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| self.token_env.as_ref().and_then(|var| std::env::var(var).ok()))
            .filter(|token| !token.trim().is_empty())
    }

    pub fn endpoint(&self) -> String {
        format!("{}/upload-data", self.url.trim_end_matches('/'))
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, RelayError> {
        let content = fs::read_to_string(path)
            .map_err(|e| RelayError::new(ErrorCode::ConfigInvalid, format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, RelayError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RelayError::new(ErrorCode::ConfigInvalid, format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.addr.trim().is_empty() {
            return Err(RelayError::new(ErrorCode::ConfigInvalid, "addr must not be empty"));
        }
        if self.channel_capacity == 0 {
            return Err(RelayError::new(ErrorCode::ConfigInvalid, "channel_capacity must be at least 1"));
        }
        if self.send_timeout_ms == 0 {
            return Err(RelayError::new(ErrorCode::ConfigInvalid, "send_timeout_ms must be at least 1"));
        }
        if self.reap_interval_secs == 0 {
            return Err(RelayError::new(ErrorCode::ConfigInvalid, "reap_interval_secs must be at least 1"));
        }

        let mut kinds = HashSet::new();
        for upstream in &self.upstreams {
            if upstream.url.trim().is_empty() {
                return Err(RelayError::new(
                    ErrorCode::ConfigInvalid,
                    format!("upstream {} has no url", upstream.kind),
                ));
            }
            if !kinds.insert(upstream.kind.as_str()) {
                return Err(RelayError::new(
                    ErrorCode::ConfigInvalid,
                    format!("duplicate upstream kind: {}", upstream.kind),
                ));
            }
        }
        Ok(())
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn subscription_ttl(&self) -> Option<Duration> {
        self.subscription_ttl_secs.map(Duration::from_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}
