//! Process configuration.
//!
//! Read from an optional JSON file; every field has a default so a partial
//! file (or none at all) is fine.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use engine::ExecutorConfig;
use scheduler::SchedulerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub bind: SocketAddr,
    pub executor: ExecutorConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://rusty-automation.db".into(),
            max_connections: 10,
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            executor: ExecutorConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("invalid config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{ "bind": "127.0.0.1:9000", "executor": { "action_timeouts_ms": { "call_webhook": 2500 } } }"#,
        )
        .unwrap();

        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.max_connections, 10);
        assert_eq!(
            config.executor.timeout_for(nodes::ActionType::CallWebhook),
            std::time::Duration::from_millis(2500)
        );
        assert_eq!(config.executor.default_timeout_ms, 30_000);
        assert_eq!(config.scheduler.workers, 8);
    }

    #[test]
    fn no_file_means_defaults() {
        let config = AppConfig::load(None).unwrap();
        assert!(config.database_url.starts_with("sqlite:"));
    }
}
