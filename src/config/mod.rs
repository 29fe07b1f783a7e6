/// Configuration management for the Flowrelay engine
///
/// Every value has a default and can be overridden with a `FLOWRELAY_*`
/// environment variable, so the same binary runs locally and in containers.

use crate::workflow::types::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub integrations: IntegrationsConfig,
    /// Tracing filter used when `RUST_LOG` is not set (e.g. "info,flowrelay=debug")
    pub log_filter: String,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Holds engine.db (workflows, history, schedules) and data.db (step data)
    pub data_dir: String,
    /// Snapshot finished runs into the engine database
    pub persist_history: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Used by workflows that do not declare their own policy
    pub default_retry: RetryPolicy,
    pub scheduler_poll_secs: u64,
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationsConfig {
    /// Logical service name → base URL for api_call steps
    pub services: HashMap<String, String>,
    /// Registered as the "webhook" notification channel when set
    pub notify_webhook_url: Option<String>,
}

impl EngineConfig {
    pub fn scheduler_poll_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_poll_secs.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        let retry_defaults = RetryPolicy::default();

        Self {
            server: ServerConfig {
                host: std::env::var("FLOWRELAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_parse("FLOWRELAY_PORT", 3004),
            },
            database: DatabaseConfig {
                data_dir: std::env::var("FLOWRELAY_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
                persist_history: env_parse("FLOWRELAY_PERSIST_HISTORY", true),
            },
            engine: EngineConfig {
                default_retry: RetryPolicy {
                    max_attempts: env_parse("FLOWRELAY_RETRY_MAX_ATTEMPTS", retry_defaults.max_attempts),
                    base_delay_ms: env_parse("FLOWRELAY_RETRY_BASE_DELAY_MS", retry_defaults.base_delay_ms),
                    backoff_coefficient: env_parse(
                        "FLOWRELAY_RETRY_BACKOFF",
                        retry_defaults.backoff_coefficient,
                    ),
                },
                scheduler_poll_secs: env_parse("FLOWRELAY_SCHEDULER_POLL_SECS", 15),
                http_timeout_secs: env_parse("FLOWRELAY_HTTP_TIMEOUT_SECS", 30),
            },
            integrations: IntegrationsConfig {
                services: std::env::var("FLOWRELAY_SERVICES")
                    .map(|raw| parse_services(&raw))
                    .unwrap_or_default(),
                notify_webhook_url: std::env::var("FLOWRELAY_NOTIFY_WEBHOOK_URL")
                    .ok()
                    .filter(|url| !url.is_empty()),
            },
            log_filter: std::env::var("FLOWRELAY_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Parse `name=url,name=url`; malformed pairs are ignored
pub fn parse_services(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (name, url) = pair.split_once('=')?;
            let (name, url) = (name.trim(), url.trim());
            (!name.is_empty() && !url.is_empty()).then(|| (name.to_string(), url.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_services() {
        let services = parse_services("crm=http://crm:8080, billing = https://billing.local ,broken");
        assert_eq!(services.len(), 2);
        assert_eq!(services["crm"], "http://crm:8080");
        assert_eq!(services["billing"], "https://billing.local");
    }

    #[test]
    fn test_poll_interval_is_never_zero() {
        let mut config = Config::default();
        config.engine.scheduler_poll_secs = 0;
        assert_eq!(config.engine.scheduler_poll_interval(), Duration::from_secs(1));
    }
}
