//! Gravity database configuration.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default location of the gravity database.
pub const DEFAULT_DATABASE_PATH: &str = "/etc/pihole/gravity.db";

/// Default busy timeout used while opening the database (milliseconds).
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 1000;

/// Minimum capacity of the connection's prepared statement cache.
const MIN_STATEMENT_CACHE: usize = 16;

/// Cached statements not tied to a client: the audit lookup and one scan per list.
const SHARED_STATEMENTS: usize = 7;

bitflags! {
    /// Debug categories that enable verbose diagnostics.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct DebugFlags: u32 {
        /// Database lifecycle and per-lookup results
        const DATABASE = 1 << 0;
        /// Regex filter enablement and matches
        const REGEX = 1 << 1;
        /// Plan arena resizing
        const VECTORS = 1 << 2;
    }
}

/// Configuration for a [`GravityDb`](crate::GravityDb) handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GravityConfig {
    /// Path to the gravity database file
    pub database: PathBuf,
    /// Busy timeout applied while the database is being opened
    pub busy_timeout_ms: u64,
    /// Enabled debug categories
    pub debug: DebugFlags,
    /// Extra prepared statement cache slots on top of three per client and the shared statements
    pub plan_cache_slack: usize,
}

impl Default for GravityConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from(DEFAULT_DATABASE_PATH),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            debug: DebugFlags::empty(),
            plan_cache_slack: 8,
        }
    }
}

impl GravityConfig {
    /// Create a configuration for the database at `path` with default settings.
    pub fn with_database(path: impl AsRef<Path>) -> Self {
        Self {
            database: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Parse a configuration from YAML text.
    ///
    /// Missing fields take their default values.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: GravityConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Check the configuration for values that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.database.as_os_str().is_empty() {
            return Err(Error::Config("database path must not be empty".to_string()));
        }
        Ok(())
    }

    /// Busy timeout used during the open phase.
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Enable debug categories (builder style).
    pub fn with_debug(mut self, flags: DebugFlags) -> Self {
        self.debug |= flags;
        self
    }

    /// Whether a debug category is enabled.
    #[inline]
    pub fn debug(&self, flag: DebugFlags) -> bool {
        self.debug.contains(flag)
    }

    /// Statement cache capacity needed to keep every per-client plan prepared.
    ///
    /// Three plans per client plus the shared statements always fit, so a
    /// built plan is never evicted and recompiled while the handle is open.
    pub(crate) fn statement_cache_capacity(&self, clients: usize) -> usize {
        (clients * 3 + SHARED_STATEMENTS + self.plan_cache_slack).max(MIN_STATEMENT_CACHE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GravityConfig::default();
        assert_eq!(config.database, PathBuf::from("/etc/pihole/gravity.db"));
        assert_eq!(config.busy_timeout(), Duration::from_secs(1));
        assert!(config.debug.is_empty());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
database: /tmp/gravity.db
busy_timeout_ms: 250
debug: DATABASE | REGEX
"#;
        let config = GravityConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.database, PathBuf::from("/tmp/gravity.db"));
        assert_eq!(config.busy_timeout_ms, 250);
        assert!(config.debug(DebugFlags::DATABASE));
        assert!(config.debug(DebugFlags::REGEX));
        assert!(!config.debug(DebugFlags::VECTORS));
        assert_eq!(config.plan_cache_slack, 8);
    }

    #[test]
    fn test_config_partial_yaml() {
        let config = GravityConfig::from_yaml_str("busy_timeout_ms: 10").unwrap();
        assert_eq!(config.database, PathBuf::from(DEFAULT_DATABASE_PATH));
        assert_eq!(config.busy_timeout_ms, 10);
    }

    #[test]
    fn test_config_rejects_empty_path() {
        assert!(GravityConfig::from_yaml_str("database: ''").is_err());
    }

    #[test]
    fn test_statement_cache_capacity() {
        let config = GravityConfig::default();
        assert_eq!(config.statement_cache_capacity(0), 16);
        assert_eq!(config.statement_cache_capacity(100), 315);
    }

    #[test]
    fn test_statement_cache_holds_every_plan() {
        let config = GravityConfig {
            plan_cache_slack: 0,
            ..GravityConfig::default()
        };
        for clients in [0, 1, 3, 10, 250] {
            let capacity = config.statement_cache_capacity(clients);
            assert!(capacity >= clients * 3 + crate::ListCategory::ALL.len() + 1);
        }
    }
}
