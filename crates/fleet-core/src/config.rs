//! Conductor configuration.
//!
//! One explicit value constructed at startup and passed to every component
//! that needs it. Override via environment variables or explicit
//! construction for tests.

use std::str::FromStr;
use std::time::Duration;

use crate::identity::ConductorId;

/// Where inspection data (hardware inventory plus plugin data) is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InventoryBackend {
    /// Inspection data is discarded.
    Disabled,
    /// Inspection data is written to the inventory store.
    Database,
}

impl InventoryBackend {
    /// The configuration token for this backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "none",
            Self::Database => "database",
        }
    }
}

impl FromStr for InventoryBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::Disabled),
            "database" => Ok(Self::Database),
            other => Err(ConfigError::InvalidValue {
                var: "FLEET_INVENTORY_BACKEND".to_string(),
                value: other.to_string(),
                reason: "expected one of: none, database".to_string(),
            }),
        }
    }
}

impl std::fmt::Display for InventoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration of a single conductor process.
#[derive(Debug, Clone)]
pub struct ConductorConfig {
    /// Identity this conductor registers under and writes into reservations.
    pub host: ConductorId,
    /// How often the conductor refreshes its heartbeat.
    pub heartbeat_interval: Duration,
    /// Age after which a conductor without a heartbeat is considered dead
    /// and its reservations may be taken over.
    pub heartbeat_timeout: Duration,
    /// How often periodic maintenance (stale reservation reaping,
    /// inspect-wait timeouts) runs.
    pub periodic_interval: Duration,
    /// Maximum number of workflows this conductor runs concurrently.
    pub workers_pool_size: usize,
    /// How long a node may stay in `inspect wait` before it is failed.
    /// `None` disables the check.
    pub inspect_wait_timeout: Option<Duration>,
    /// Where inspection data is stored.
    pub inventory_backend: InventoryBackend,
}

impl ConductorConfig {
    /// Default heartbeat interval.
    pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
    /// Default staleness window for reservations.
    pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);
    /// Default periodic maintenance interval.
    pub const DEFAULT_PERIODIC_INTERVAL: Duration = Duration::from_secs(60);
    /// Default worker pool size.
    pub const DEFAULT_WORKERS_POOL_SIZE: usize = 100;
    /// Default inspect-wait timeout.
    pub const DEFAULT_INSPECT_WAIT_TIMEOUT: Duration = Duration::from_secs(1800);

    /// Configuration with defaults for everything but the host identity.
    pub fn for_host(host: ConductorId) -> Self {
        Self {
            host,
            heartbeat_interval: Self::DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: Self::DEFAULT_HEARTBEAT_TIMEOUT,
            periodic_interval: Self::DEFAULT_PERIODIC_INTERVAL,
            workers_pool_size: Self::DEFAULT_WORKERS_POOL_SIZE,
            inspect_wait_timeout: Some(Self::DEFAULT_INSPECT_WAIT_TIMEOUT),
            inventory_backend: InventoryBackend::Database,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `FLEET_CONDUCTOR_HOST` (required)
    /// - `FLEET_HEARTBEAT_INTERVAL_SECS` (default: 10)
    /// - `FLEET_HEARTBEAT_TIMEOUT_SECS` (default: 60)
    /// - `FLEET_PERIODIC_INTERVAL_SECS` (default: 60)
    /// - `FLEET_WORKERS_POOL_SIZE` (default: 100)
    /// - `FLEET_INSPECT_WAIT_TIMEOUT_SECS` (default: 1800, `0` disables)
    /// - `FLEET_INVENTORY_BACKEND` (`none` | `database`, default: `database`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_host = lookup("FLEET_CONDUCTOR_HOST").ok_or(ConfigError::MissingHost)?;
        let host = ConductorId::new(raw_host.clone()).map_err(|e| ConfigError::InvalidValue {
            var: "FLEET_CONDUCTOR_HOST".to_string(),
            value: raw_host,
            reason: e.to_string(),
        })?;

        let mut config = Self::for_host(host);
        if let Some(secs) = parse_var::<u64>(&lookup, "FLEET_HEARTBEAT_INTERVAL_SECS")? {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "FLEET_HEARTBEAT_TIMEOUT_SECS")? {
            config.heartbeat_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "FLEET_PERIODIC_INTERVAL_SECS")? {
            config.periodic_interval = Duration::from_secs(secs);
        }
        if let Some(size) = parse_var::<usize>(&lookup, "FLEET_WORKERS_POOL_SIZE")? {
            config.workers_pool_size = size;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "FLEET_INSPECT_WAIT_TIMEOUT_SECS")? {
            config.inspect_wait_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(backend) = lookup("FLEET_INVENTORY_BACKEND") {
            config.inventory_backend = backend.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Inconsistent(
                "heartbeat interval must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_timeout <= self.heartbeat_interval {
            return Err(ConfigError::Inconsistent(format!(
                "heartbeat timeout ({}s) must exceed heartbeat interval ({}s)",
                self.heartbeat_timeout.as_secs(),
                self.heartbeat_interval.as_secs()
            )));
        }
        if self.periodic_interval.is_zero() {
            return Err(ConfigError::Inconsistent(
                "periodic interval must be greater than zero".to_string(),
            ));
        }
        if self.workers_pool_size == 0 {
            return Err(ConfigError::Inconsistent(
                "workers pool size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                var: var.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `FLEET_CONDUCTOR_HOST` is unset.
    #[error("FLEET_CONDUCTOR_HOST environment variable is required")]
    MissingHost,
    /// A variable is set but does not parse.
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidValue {
        /// Variable name.
        var: String,
        /// Raw value as found.
        value: String,
        /// Parser message.
        reason: String,
    },
    /// Values parse but contradict each other.
    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}
