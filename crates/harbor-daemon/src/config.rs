//! Configuration for the Harbor daemon.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// A warm pool to create at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSpec {
    pub template: String,
    pub min_size: usize,
    pub max_size: usize,
}

impl PoolSpec {
    /// Parse `template:min:max`.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidPoolSpec(s.to_string());
        let mut parts = s.trim().split(':');
        let (Some(template), Some(min), Some(max), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if template.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            template: template.to_string(),
            min_size: min.parse().map_err(|_| invalid())?,
            max_size: max.parse().map_err(|_| invalid())?,
        })
    }

    /// Parse a comma-separated list of specs. Blank entries are skipped.
    pub fn parse_list(s: &str) -> Result<Vec<Self>, ConfigError> {
        s.split(',')
            .filter(|entry| !entry.trim().is_empty())
            .map(Self::parse)
            .collect()
    }
}

/// Configuration for the Harbor daemon.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Root directory of the sandbox blob store.
    pub storage_root: PathBuf,

    /// Domain appended to sandbox hostnames.
    pub hostname_domain: String,

    /// Maximum registered sandboxes (0 = unlimited).
    pub max_sandboxes: usize,

    /// Warm pools created at start-up.
    pub pools: Vec<PoolSpec>,

    /// Interval between pool maintenance rounds.
    pub pool_interval: Duration,

    /// Interval between idle/expiry sweeps.
    pub sweep_interval: Duration,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid pool spec {0:?}, expected template:min:max")]
    InvalidPoolSpec(String),

    #[error("pool {template}: min_size {min_size} exceeds max_size {max_size}")]
    PoolSizes {
        template: String,
        min_size: usize,
        max_size: usize,
    },

    #[error("pool {0}: max_size must be > 0")]
    EmptyPool(String),

    #[error("pool {0} configured more than once")]
    DuplicatePool(String),

    #[error("{0} must be > 0")]
    ZeroInterval(&'static str),

    #[error("storage root parent directory not found: {0}")]
    InvalidStorageRoot(PathBuf),
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("/tmp/harbor/sandboxes"),
            hostname_domain: "sandbox.local".to_string(),
            max_sandboxes: 100,
            pools: vec![PoolSpec {
                template: "basic-agent".to_string(),
                min_size: 2,
                max_size: 10,
            }],
            pool_interval: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `HARBOR_STORAGE_ROOT` | `/tmp/harbor/sandboxes` |
    /// | `HARBOR_HOSTNAME_DOMAIN` | `sandbox.local` |
    /// | `HARBOR_MAX_SANDBOXES` | `100` (0 = unlimited) |
    /// | `HARBOR_POOLS` | `basic-agent:2:10` (comma list of `template:min:max`, empty for none) |
    /// | `HARBOR_POOL_INTERVAL_SECS` | `10` |
    /// | `HARBOR_SWEEP_INTERVAL_SECS` | `60` |
    ///
    /// Unparseable numbers fall back to their defaults; a malformed pool list
    /// is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let default = Self::default();

        let pools = match std::env::var("HARBOR_POOLS") {
            Ok(v) => PoolSpec::parse_list(&v)?,
            Err(_) => default.pools,
        };

        Ok(Self {
            storage_root: std::env::var("HARBOR_STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.storage_root),
            hostname_domain: std::env::var("HARBOR_HOSTNAME_DOMAIN")
                .unwrap_or(default.hostname_domain),
            max_sandboxes: std::env::var("HARBOR_MAX_SANDBOXES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_sandboxes),
            pools,
            pool_interval: std::env::var("HARBOR_POOL_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.pool_interval),
            sweep_interval: std::env::var("HARBOR_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.sweep_interval),
        })
    }

    /// Validate the configuration.
    ///
    /// Call this at startup to get clear error messages. The storage root
    /// itself is created on demand, so only its parent has to exist.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("pool interval"));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("sweep interval"));
        }

        let mut seen = HashSet::new();
        for pool in &self.pools {
            if pool.max_size == 0 {
                return Err(ConfigError::EmptyPool(pool.template.clone()));
            }
            if pool.min_size > pool.max_size {
                return Err(ConfigError::PoolSizes {
                    template: pool.template.clone(),
                    min_size: pool.min_size,
                    max_size: pool.max_size,
                });
            }
            if !seen.insert(pool.template.as_str()) {
                return Err(ConfigError::DuplicatePool(pool.template.clone()));
            }
        }

        if let Some(parent) = self.storage_root.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(ConfigError::InvalidStorageRoot(self.storage_root.clone()));
            }
        }

        Ok(())
    }
}
