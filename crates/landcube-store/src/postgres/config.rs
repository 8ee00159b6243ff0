//! PostgreSQL configuration

use landcube_core::error::{LandcubeError, Result};
use std::time::Duration;

/// PostgreSQL connection and behavior configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL
    pub database_url: String,
    /// Connection pool configuration
    pub pool: PoolConfig,
    /// Apply pending migrations when connecting
    pub run_migrations: bool,
    /// Upper bound for one persistence transaction
    pub transaction_timeout: Duration,
}

impl PostgresConfig {
    /// Create a new configuration with the given database URL
    pub fn new(database_url: impl Into<String>) -> Result<Self> {
        let config = Self {
            database_url: database_url.into(),
            pool: PoolConfig::default(),
            run_migrations: true,
            transaction_timeout: Duration::from_secs(60),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(LandcubeError::ConfigInvalid {
                key: "database_url".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }
        self.pool.validate()
    }
}

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(LandcubeError::ConfigInvalid {
                key: "pool.max_connections".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.min_connections > self.max_connections {
            return Err(LandcubeError::ConfigInvalid {
                key: "pool.min_connections".to_string(),
                reason: format!(
                    "min_connections ({}) cannot be greater than max_connections ({})",
                    self.min_connections, self.max_connections
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new_valid() {
        let config = PostgresConfig::new("postgresql://localhost/landcube").unwrap();
        assert!(config.run_migrations);
    }

    #[test]
    fn test_config_new_empty_url() {
        match PostgresConfig::new("  ") {
            Err(LandcubeError::ConfigInvalid { key, .. }) => assert_eq!(key, "database_url"),
            other => panic!("Expected ConfigInvalid, got {:?}", other),
        }
    }

    #[test]
    fn test_pool_config_invalid_min_max() {
        let pool = PoolConfig { min_connections: 20, max_connections: 10, ..Default::default() };
        assert!(pool.validate().is_err());

        let pool = PoolConfig { max_connections: 0, min_connections: 0, ..Default::default() };
        assert!(pool.validate().is_err());
    }
}
