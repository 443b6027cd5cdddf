//! Configuration management for Floodgate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::error::{Result, ThrottleError};
use crate::http::IdentitySource;
use crate::store::StoreFailurePolicy;
use crate::throttle::{ThrottleMode, ThrottleOptions};

/// Main configuration for the Floodgate service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration; must state a failure policy
    pub store: StoreConfig,

    /// Request normalization settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Throttle rules and whitelists
    #[serde(default)]
    pub throttle: ThrottleOptions,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Which counter store backs the throttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store implementation
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL, required for the redis backend
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Memory store sweep interval in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// What to do with requests when the store fails
    pub failure_policy: StoreFailurePolicy,
}

impl StoreConfig {
    pub fn new(backend: StoreBackend, failure_policy: StoreFailurePolicy) -> Self {
        Self {
            backend,
            redis_url: None,
            cleanup_interval_secs: default_cleanup_interval(),
            failure_policy,
        }
    }
}

fn default_cleanup_interval() -> u64 {
    60
}

/// Request normalization settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Where the caller identity is read from
    #[serde(default)]
    pub identity: Option<IdentitySource>,
}

impl FloodgateConfig {
    pub fn new(store: StoreConfig, throttle: ThrottleOptions) -> Self {
        Self {
            server: ServerConfig::default(),
            store,
            http: HttpConfig::default(),
            throttle,
        }
    }

    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: FloodgateConfig =
            serde_yaml::from_str(yaml).map_err(|e| ThrottleError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings that span sections.
    pub fn validate(&self) -> Result<()> {
        if self.store.backend == StoreBackend::Redis
            && self.store.redis_url.as_deref().map_or(true, |url| url.trim().is_empty())
        {
            return Err(ThrottleError::Config(
                "store.redis_url is required for the redis backend".to_string(),
            ));
        }

        if self.store.cleanup_interval_secs == 0 {
            return Err(ThrottleError::Config(
                "store.cleanup_interval_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// The configured identity source, or the default for the throttle mode.
    pub fn identity_source(&self) -> IdentitySource {
        self.http.identity.clone().unwrap_or_else(|| match self.throttle.mode {
            ThrottleMode::Identity => IdentitySource::default_header(),
            ThrottleMode::Address => IdentitySource::RemoteAddress,
        })
    }
}
