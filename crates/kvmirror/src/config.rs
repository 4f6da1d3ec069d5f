//! # Mirror Configuration
//!
//! Configuration for the remote store connection and the sync loop.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     CONSUL_HTTP_ADDR=127.0.0.1:8500                                    │
//! │     CONSUL_HTTP_TOKEN=...                                              │
//! │     KVMIRROR_MAX_WAIT_SECS=300                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/kvmirror/mirror.toml (Linux)                             │
//! │     ~/Library/Application Support/io.kvmirror.kvmirror/mirror.toml     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     local agent on :8500, 5 minute watch, fixed 1s retry               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # mirror.toml
//! [consul]
//! address = "http://127.0.0.1:8500"
//! token = "..."
//! datacenter = "dc1"
//! request_timeout_secs = 10
//!
//! [sync]
//! max_wait_secs = 300
//! retry_interval_ms = 1000
//! max_retry_interval_ms = 1000
//! empty_listing = "ignore"  # ignore | clear
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{MirrorError, MirrorResult};

// =============================================================================
// Empty Listing Policy
// =============================================================================

/// What a full resync does when the remote store reports no keys at all.
///
/// An empty listing is ambiguous: the subtree really may be empty, or the
/// store may have answered from a node that has not caught up yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyListingPolicy {
    /// Keep the current table and clock. Logged at warn.
    #[default]
    Ignore,

    /// Treat the listing as authoritative and drop every entry.
    Clear,
}

impl std::fmt::Display for EmptyListingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmptyListingPolicy::Ignore => write!(f, "ignore"),
            EmptyListingPolicy::Clear => write!(f, "clear"),
        }
    }
}

impl std::str::FromStr for EmptyListingPolicy {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ignore" | "keep" => Ok(EmptyListingPolicy::Ignore),
            "clear" => Ok(EmptyListingPolicy::Clear),
            other => Err(MirrorError::InvalidConfig(format!(
                "Unknown empty listing policy: '{}'. Valid options: ignore, clear",
                other
            ))),
        }
    }
}

// =============================================================================
// Consul Settings
// =============================================================================

/// Connection settings for the Consul HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsulSettings {
    /// Base URL of the agent, e.g. `http://127.0.0.1:8500`.
    #[serde(default = "default_address")]
    pub address: String,

    /// ACL token sent as `X-Consul-Token`.
    #[serde(default)]
    pub token: Option<String>,

    /// Datacenter to query. Defaults to the agent's own.
    #[serde(default)]
    pub datacenter: Option<String>,

    /// Timeout for list/put/delete requests (seconds).
    /// Watches use their own bound derived from `max_wait_secs`.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_address() -> String {
    "http://127.0.0.1:8500".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for ConsulSettings {
    fn default() -> Self {
        ConsulSettings {
            address: default_address(),
            token: None,
            datacenter: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ConsulSettings {
    /// Returns the request timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Background sync behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Upper bound on how long one watch call blocks (seconds).
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,

    /// Pause after a failed watch or resync (milliseconds).
    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: u64,

    /// Ceiling for the pause. Equal to `retry_interval_ms` means a fixed
    /// interval; larger enables exponential growth.
    #[serde(default = "default_max_retry_interval")]
    pub max_retry_interval_ms: u64,

    /// How a full resync treats an empty listing.
    #[serde(default)]
    pub empty_listing: EmptyListingPolicy,
}

fn default_max_wait() -> u64 {
    300
}
fn default_retry_interval() -> u64 {
    1000
}
fn default_max_retry_interval() -> u64 {
    1000
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            max_wait_secs: default_max_wait(),
            retry_interval_ms: default_retry_interval(),
            max_retry_interval_ms: default_max_retry_interval(),
            empty_listing: EmptyListingPolicy::default(),
        }
    }
}

impl SyncSettings {
    /// Returns the watch bound as a `Duration`.
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    /// Returns the initial retry pause as a `Duration`.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Returns the retry pause ceiling as a `Duration`.
    pub fn max_retry_interval(&self) -> Duration {
        Duration::from_millis(self.max_retry_interval_ms)
    }
}

// =============================================================================
// Main Mirror Configuration
// =============================================================================

/// Complete mirror configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Remote store connection.
    #[serde(default)]
    pub consul: ConsulSettings,

    /// Sync loop behavior.
    #[serde(default)]
    pub sync: SyncSettings,
}

impl MirrorConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (mirror.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> MirrorResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading mirror config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load mirror config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Builds a config from defaults plus environment variables only.
    pub fn from_env() -> MirrorResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> MirrorResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| MirrorError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MirrorError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| MirrorError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Mirror config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> MirrorResult<()> {
        let address = &self.consul.address;
        if !address.starts_with("http://") && !address.starts_with("https://") {
            return Err(MirrorError::InvalidUrl(format!(
                "Consul address must start with http:// or https://, got: {}",
                address
            )));
        }

        if self.sync.max_wait_secs == 0 {
            return Err(MirrorError::InvalidConfig(
                "max_wait_secs must be greater than 0".into(),
            ));
        }

        if self.sync.retry_interval_ms == 0 {
            return Err(MirrorError::InvalidConfig(
                "retry_interval_ms must be greater than 0".into(),
            ));
        }

        if self.sync.max_retry_interval_ms < self.sync.retry_interval_ms {
            return Err(MirrorError::InvalidConfig(format!(
                "max_retry_interval_ms ({}) must not be below retry_interval_ms ({})",
                self.sync.max_retry_interval_ms, self.sync.retry_interval_ms
            )));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Applies overrides from an arbitrary variable lookup.
    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("CONSUL_HTTP_ADDR") {
            // The Consul CLI accepts a bare host:port here.
            let addr = if addr.contains("://") {
                addr
            } else {
                format!("http://{}", addr)
            };
            debug!(address = %addr, "Overriding Consul address from environment");
            self.consul.address = addr;
        }

        if let Some(token) = lookup("CONSUL_HTTP_TOKEN") {
            if !token.is_empty() {
                self.consul.token = Some(token);
            }
        }

        if let Some(dc) = lookup("CONSUL_DATACENTER") {
            if !dc.is_empty() {
                self.consul.datacenter = Some(dc);
            }
        }

        if let Some(wait) = lookup("KVMIRROR_MAX_WAIT_SECS") {
            match wait.parse::<u64>() {
                Ok(w) => {
                    debug!(max_wait_secs = w, "Overriding watch bound from environment");
                    self.sync.max_wait_secs = w;
                }
                Err(_) => warn!(value = %wait, "Ignoring invalid KVMIRROR_MAX_WAIT_SECS"),
            }
        }

        if let Some(retry) = lookup("KVMIRROR_RETRY_INTERVAL_MS") {
            match retry.parse::<u64>() {
                Ok(r) => {
                    self.sync.retry_interval_ms = r;
                    if self.sync.max_retry_interval_ms < r {
                        self.sync.max_retry_interval_ms = r;
                    }
                }
                Err(_) => warn!(value = %retry, "Ignoring invalid KVMIRROR_RETRY_INTERVAL_MS"),
            }
        }

        if let Some(policy) = lookup("KVMIRROR_EMPTY_LISTING") {
            match policy.parse() {
                Ok(p) => self.sync.empty_listing = p,
                Err(_) => warn!(policy = %policy, "Unknown empty listing policy in environment"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "kvmirror", "kvmirror")
            .map(|dirs| dirs.config_dir().join("mirror.toml"))
    }
}
