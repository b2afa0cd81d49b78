//! Configuration surfaces for the provider and its regions.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// REGION STRATEGY
// ============================================================================

/// How a region treats clearing.
///
/// Generational regions embed a generation counter in every physical key so
/// `clear()` is O(1); pinned regions skip the generation round trips
/// entirely and reject `clear()`, trading invalidation for cheaper traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegionStrategy {
    /// Clearable via the generation counter.
    Generational,
    /// Never clearable; generation pinned at zero.
    Pinned,
}

impl RegionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionStrategy::Generational => "generational",
            RegionStrategy::Pinned => "pinned",
        }
    }
}

impl Default for RegionStrategy {
    fn default() -> Self {
        RegionStrategy::Generational
    }
}

impl fmt::Display for RegionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RegionStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "generational" => Ok(RegionStrategy::Generational),
            "pinned" => Ok(RegionStrategy::Pinned),
            _ => Err(ConfigError::UnknownStrategy {
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// REGION OPTIONS
// ============================================================================

/// Per-region tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionOptions {
    /// TTL applied to every entry written by this region.
    pub expiration: Duration,
    /// How long `lock()` polls before giving up.
    pub lock_acquisition_timeout: Duration,
    /// How long an acquired lock stays valid before an outsider may seize it.
    pub lock_timeout: Duration,
    /// Optional namespace prefix composed ahead of the region name.
    pub prefix: Option<String>,
    pub strategy: RegionStrategy,
    /// Generation-mismatch / commit-abort retries allowed before the
    /// operation fails with the retry-exhausted error.
    pub retry_ceiling: u32,
}

impl Default for RegionOptions {
    fn default() -> Self {
        Self {
            expiration: Duration::from_secs(300),
            lock_acquisition_timeout: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(30),
            prefix: None,
            strategy: RegionStrategy::Generational,
            retry_ceiling: 64,
        }
    }
}

impl RegionOptions {
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_lock_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.lock_acquisition_timeout = timeout;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_strategy(mut self, strategy: RegionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_retry_ceiling(mut self, ceiling: u32) -> Self {
        self.retry_ceiling = ceiling;
        self
    }

    /// Build options from a host-supplied string properties map.
    ///
    /// Recognized keys: `expiration`, `lock_acquisition_timeout` and
    /// `lock_timeout` (whole seconds), `region_prefix`, `strategy`
    /// (`generational` or `pinned`). Unrecognized keys are ignored so hosts
    /// can pass their full configuration bag through.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut options = Self::default();
        if let Some(value) = properties.get("expiration") {
            options.expiration = Duration::from_secs(parse_seconds("expiration", value)?);
        }
        if let Some(value) = properties.get("lock_acquisition_timeout") {
            options.lock_acquisition_timeout =
                Duration::from_secs(parse_seconds("lock_acquisition_timeout", value)?);
        }
        if let Some(value) = properties.get("lock_timeout") {
            options.lock_timeout = Duration::from_secs(parse_seconds("lock_timeout", value)?);
        }
        if let Some(value) = properties.get("region_prefix") {
            if !value.is_empty() {
                options.prefix = Some(value.clone());
            }
        }
        if let Some(value) = properties.get("strategy") {
            options.strategy = value.parse()?;
        }
        Ok(options)
    }
}

fn parse_seconds(field: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: "must be whole seconds".to_string(),
    })
}

// ============================================================================
// PROVIDER SETTINGS
// ============================================================================

/// Backing-store connection settings consumed by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Backing store host.
    pub host: String,
    /// Backing store port.
    pub port: u16,
    /// Reserved read-side pool bound; reads currently share the write pool.
    pub max_read_pool_size: usize,
    /// Connections the shared pool hands out concurrently.
    pub max_write_pool_size: usize,
    /// How long a checkout waits for a free connection.
    pub checkout_timeout: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            max_read_pool_size: 10,
            max_write_pool_size: 10,
            checkout_timeout: Duration::from_secs(30),
        }
    }
}

impl ProviderSettings {
    /// Create settings from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("STRATA_HOST").unwrap_or(defaults.host),
            port: std::env::var("STRATA_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            max_read_pool_size: std::env::var("STRATA_MAX_READ_POOL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_read_pool_size),
            max_write_pool_size: std::env::var("STRATA_MAX_WRITE_POOL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_write_pool_size),
            checkout_timeout: Duration::from_secs(
                std::env::var("STRATA_POOL_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.checkout_timeout.as_secs()),
            ),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_pool_sizes(mut self, read: usize, write: usize) -> Self {
        self.max_read_pool_size = read;
        self.max_write_pool_size = write;
        self
    }

    pub fn with_checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }
}
