//! Centralized worker configuration.
//!
//! Loaded via the `config` crate from environment variables. Nested keys
//! use a double underscore, e.g. `POLL__INTERVAL_SECONDS=10`.

use serde::Deserialize;

/// Worker configuration.
#[derive(Debug, Deserialize)]
pub struct WorkerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Maximum number of pooled database connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Polling configuration.
    #[serde(default)]
    pub poll: PollConfig,
}

/// How the worker polls for executions.
#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Interval between polls, in seconds.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    /// Maximum executions claimed per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long a claim hides an execution from other workers, in seconds.
    /// Must outlast the slowest execution run.
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: i64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_interval_seconds() -> u64 {
    5
}

fn default_batch_size() -> usize {
    25
}

fn default_lease_seconds() -> i64 {
    300
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            batch_size: default_batch_size(),
            lease_seconds: default_lease_seconds(),
        }
    }
}

impl WorkerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_source(
            config::Environment::default()
                .separator("__")
                .try_parsing(true),
        )
    }

    fn from_source(
        source: impl config::Source + Send + Sync + 'static,
    ) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn environment(vars: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        config::Environment::default()
            .separator("__")
            .try_parsing(true)
            .source(Some(source))
    }

    #[test]
    fn poll_config_has_correct_defaults() {
        let config = PollConfig::default();
        assert_eq!(config.interval_seconds, 5);
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.lease_seconds, 300);
    }

    #[test]
    fn loads_nested_keys_from_environment() {
        let config = WorkerConfig::from_source(environment(&[
            ("DATABASE_URL", "postgres://localhost/waypoint"),
            ("POLL__BATCH_SIZE", "10"),
        ]))
        .unwrap();

        assert_eq!(config.database_url, "postgres://localhost/waypoint");
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.poll.batch_size, 10);
        assert_eq!(config.poll.interval_seconds, 5);
    }

    #[test]
    fn database_url_is_required() {
        assert!(WorkerConfig::from_source(environment(&[])).is_err());
    }
}
