//! Discovery configuration loaded from environment variables.

use serde::Deserialize;
use std::time::Duration;

/// Top-level discovery configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DiscoveryConfig {
    /// Enclave endpoint and attestation pinning
    #[serde(default)]
    pub enclave: EnclaveConfig,

    /// Undiscoverable cache tuning
    #[serde(default)]
    pub cache: CacheConfig,

    /// Diff-state persistence
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnclaveConfig {
    /// Discovery service endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Hex-encoded pinned enclave code measurement
    #[serde(default)]
    pub mrenclave: String,

    /// How old attestation evidence may be before it is rejected
    #[serde(default = "default_attestation_max_age", with = "humantime_serde")]
    pub attestation_max_age: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// How long a "not discoverable" verdict stays fresh
    #[serde(default = "default_cache_ttl", with = "humantime_serde")]
    pub ttl: Duration,

    /// Entry bound before oldest entries are evicted
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StateConfig {
    /// SQLite path for the diff token store; in-memory when unset
    #[serde(default)]
    pub database_path: Option<String>,
}

impl Default for EnclaveConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            mrenclave: String::new(),
            attestation_max_age: default_attestation_max_age(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_cache_ttl(),
            max_entries: default_max_entries(),
        }
    }
}

// Default value functions
fn default_endpoint() -> String {
    "wss://cds.example.org/v1/discovery".into()
}

fn default_attestation_max_age() -> Duration {
    Duration::from_secs(60 * 60) // 1 hour
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(6 * 60 * 60) // 6 hours
}

fn default_max_entries() -> usize {
    4096
}

impl DiscoveryConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("DISCOVERY")
                    .separator("__")
                    // Keep strings as strings: try_parsing(true) would turn
                    // hex measurements into numbers.
                    .try_parsing(false),
            )
            .build()?;

        config.try_deserialize()
    }
}
