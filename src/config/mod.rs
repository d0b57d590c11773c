/// Configuration management for the flowgate service
///
/// Handles server configuration, queue backend connection, worker parameters,
/// and the retry policy applied to scheduled jobs.

use crate::scheduling::job::{RetryPolicy, DEFAULT_BACKOFF_BASE_MS, DEFAULT_LEASE_TIMEOUT_MS, DEFAULT_MAX_ATTEMPTS};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Queue backend configuration
    pub queue: QueueConfig,
    /// Retry policy for job execution
    pub retry: RetryConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Which queue backend to construct at start-up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// Durable SQLite job table
    Sqlite,
    /// In-process queue; jobs are lost on restart
    Memory,
}

impl QueueBackend {
    /// Parse a backend name, case-insensitively
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Some(QueueBackend::Sqlite),
            "memory" => Some(QueueBackend::Memory),
            _ => None,
        }
    }
}

/// Queue backend connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Backend kind
    pub backend: QueueBackend,
    /// Database URL for the SQLite backend (e.g., "sqlite://data/jobs.db")
    pub database_url: String,
    /// Maximum pooled connections to the backend
    pub max_connections: u32,
    /// How often an embedded worker polls for due jobs
    pub poll_interval_ms: u64,
    /// How long a claimed attempt may run without reporting back before another
    /// worker takes the job over
    pub lease_timeout_ms: u64,
}

/// Execution retry configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per job, including the first
    pub max_attempts: u32,
    /// Backoff before the first retry; doubles for each later retry
    pub backoff_base_ms: u64,
}

impl RetryConfig {
    /// Retry policy attached to newly scheduled jobs
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff_base_ms: self.backoff_base_ms,
        }
    }
}

/// Read and parse an environment variable, falling back to `default`
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("FLOWGATE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("FLOWGATE_PORT")
                    .unwrap_or_else(|_| "3004".to_string())
                    .parse()
                    .unwrap_or(3004),
            },
            queue: QueueConfig {
                backend: std::env::var("FLOWGATE_QUEUE_BACKEND")
                    .ok()
                    .and_then(|value| QueueBackend::parse(&value))
                    .unwrap_or(QueueBackend::Sqlite),
                database_url: std::env::var("FLOWGATE_QUEUE_URL")
                    .unwrap_or_else(|_| "sqlite://data/jobs.db".to_string()),
                max_connections: env_or("FLOWGATE_QUEUE_MAX_CONNECTIONS", 5),
                poll_interval_ms: env_or("FLOWGATE_POLL_INTERVAL_MS", 1_000),
                lease_timeout_ms: env_or("FLOWGATE_LEASE_TIMEOUT_MS", DEFAULT_LEASE_TIMEOUT_MS),
            },
            retry: RetryConfig {
                max_attempts: env_or("FLOWGATE_RETRY_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS),
                backoff_base_ms: env_or("FLOWGATE_RETRY_BACKOFF_MS", DEFAULT_BACKOFF_BASE_MS),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backend_names() {
        assert_eq!(QueueBackend::parse("SQLite"), Some(QueueBackend::Sqlite));
        assert_eq!(QueueBackend::parse(" memory "), Some(QueueBackend::Memory));
        assert_eq!(QueueBackend::parse("redis"), None);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = Config {
            server: ServerConfig { host: "127.0.0.1".to_string(), port: 8080 },
            queue: QueueConfig {
                backend: QueueBackend::Memory,
                database_url: "sqlite::memory:".to_string(),
                max_connections: 1,
                poll_interval_ms: 250,
                lease_timeout_ms: 60_000,
            },
            retry: RetryConfig { max_attempts: 5, backoff_base_ms: 1_000 },
        };

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["queue"]["backend"], "memory");

        let parsed: Config = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.server.port, 8080);
        assert_eq!(parsed.queue.poll_interval_ms, 250);
        assert_eq!(parsed.retry, config.retry);
    }

    #[test]
    fn retry_config_builds_policy() {
        let defaults = RetryConfig {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
        };
        assert_eq!(defaults.policy(), RetryPolicy::default());

        let never = RetryConfig { max_attempts: 0, backoff_base_ms: 10 };
        assert_eq!(never.policy().max_attempts, 1);
    }

    #[test]
    fn unparsable_env_values_fall_back() {
        std::env::set_var("FLOWGATE_TEST_BOGUS_PORT", "not-a-port");

        assert_eq!(env_or("FLOWGATE_TEST_BOGUS_PORT", 3004u16), 3004);
        assert_eq!(env_or("FLOWGATE_TEST_UNSET_VALUE", 7u32), 7);
    }
}
