use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::agent::{AgentConfig, AgentType, LogLevel, DEFAULT_LOG_CAPACITY};
use crate::engine::EngineConfig;
use crate::resources::ResourcePoolConfig;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub pool: ResourcePoolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Ring buffer size of each agent's log history
    #[serde(default = "default_agent_log_capacity")]
    pub agent_log_capacity: usize,
    /// Period of the fleet status log line; 0 disables it
    #[serde(default = "default_status_report_secs")]
    pub status_report_secs: u64,
    /// Agents registered at startup
    #[serde(default)]
    pub agents: Vec<AgentDeclaration>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Also write daily-rotated log files here
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            directory: None,
        }
    }
}

/// An agent declared in the config files
#[derive(Debug, Clone, Deserialize)]
pub struct AgentDeclaration {
    pub id: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    #[serde(default)]
    pub autostart: bool,
    #[serde(default)]
    pub config: Value,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_agent_log_capacity() -> usize {
    DEFAULT_LOG_CAPACITY
}

fn default_status_report_secs() -> u64 {
    60
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            pool: ResourcePoolConfig::default(),
            logging: LoggingConfig::default(),
            agent_log_capacity: default_agent_log_capacity(),
            status_report_secs: default_status_report_secs(),
            agents: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("pool.capacity", 8)?
            .set_default("engine.shutdown_timeout_ms", 10_000)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("FLEET_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (FLEET_POOL__CAPACITY, etc.)
            .add_source(
                Environment::with_prefix("FLEET")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.pool.capacity == 0 {
            errors.push("pool.capacity must be at least 1".to_string());
        }
        if self.pool.acquire_timeout_ms == Some(0) {
            errors.push("pool.acquire_timeout_ms must be positive when set".to_string());
        }
        if self.engine.shutdown_timeout_ms == 0 {
            errors.push("engine.shutdown_timeout_ms must be positive".to_string());
        }
        if self.agent_log_capacity == 0 {
            errors.push("agent_log_capacity must be at least 1".to_string());
        }
        if self.logging.level.parse::<LogLevel>().is_err() && self.logging.level != "trace" {
            errors.push(format!("logging.level '{}' is not a log level", self.logging.level));
        }

        let mut seen = HashSet::new();
        for decl in &self.agents {
            let id = decl.id.trim();
            if id.is_empty() {
                errors.push("agents: every agent needs a non-empty id".to_string());
                continue;
            }
            if !seen.insert(id.to_string()) {
                errors.push(format!("agents: duplicate id '{id}'"));
            }
            if matches!(AgentType::from_name(&decl.agent_type), AgentType::Custom(_)) {
                errors.push(format!(
                    "agents.{id}: '{}' is not a built-in agent type",
                    decl.agent_type
                ));
            }
            match AgentConfig::from_value(decl.config.clone()) {
                Ok(config) => {
                    if let Err(e) = config.validate_reserved() {
                        errors.push(format!("agents.{id}: {e}"));
                    }
                }
                Err(e) => errors.push(format!("agents.{id}: {e}")),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fleet-config-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_from_toml() {
        let dir = temp_dir("load");
        fs::write(
            dir.join("default.toml"),
            r#"
agent_log_capacity = 200

[pool]
capacity = 3
acquire_timeout_ms = 5000

[engine]
starvation_threshold_ms = 15000

[[agents]]
id = "copy-1"
type = "copy_trading"
autostart = true

[agents.config]
tracked_wallets = ["0xabc"]
copy_ratio = 0.5
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&dir).unwrap();
        assert_eq!(config.pool.capacity, 3);
        assert_eq!(config.pool.acquire_timeout_ms, Some(5000));
        assert_eq!(config.engine.starvation_threshold_ms, 15000);
        assert_eq!(config.engine.shutdown_timeout_ms, 10_000);
        assert_eq!(config.agent_log_capacity, 200);
        assert_eq!(config.agents.len(), 1);
        assert!(config.agents[0].autostart);
        assert_eq!(config.agents[0].config["tracked_wallets"], json!(["0xabc"]));
        assert!(config.validate().is_ok());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_directory_uses_defaults() {
        let config = AppConfig::load_from("/nonexistent/fleet/config").unwrap();
        assert_eq!(config.pool.capacity, 8);
        assert_eq!(config.logging.level, "info");
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_validate_collects_all_problems() {
        let mut config = AppConfig::default();
        config.pool.capacity = 0;
        config.agents = vec![
            AgentDeclaration {
                id: "a".into(),
                agent_type: "scanner".into(),
                autostart: false,
                config: json!({"interval_seconds": -5}),
            },
            AgentDeclaration {
                id: "a".into(),
                agent_type: "market_maker".into(),
                autostart: false,
                config: Value::Null,
            },
        ];

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4, "{errors:?}");
    }
}
