//! Application Configuration
//!
//! Layered from a TOML file and `SCHED__`-prefixed environment variables
//! (e.g. `SCHED__SERVER__LISTEN_ADDRESS`).

use crate::executor::StaticResult;
use crate::rate_limit::RateLimitConfig;
use alert_model::{AlertRule, NotificationDef};
use config::{Config, ConfigError, Environment, File, FileFormat};
use scheduler::{RuleError, RuleSet, ScheduleConfig};
use serde::Deserialize;

fn default_listen_address() -> String {
    "0.0.0.0:8070".to_string()
}

fn default_level() -> String {
    "info".to_string()
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Throttle for the action and check routes
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Max level: trace, debug, info, warn or error
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

/// Snapshot persistence settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// SQLite URL (e.g. `sqlite://state.db`); in-memory when unset
    pub url: Option<String>,
}

/// Canned query results served when no backend is attached
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub results: Vec<StaticResult>,
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Alert rules, evaluated in this order
    #[serde(default)]
    pub alerts: Vec<AlertRule>,
    #[serde(default)]
    pub notifications: Vec<NotificationDef>,
}

impl AppConfig {
    /// Load from a TOML file plus environment overrides
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::new(path, FileFormat::Toml))
            .add_source(Environment::with_prefix("SCHED").separator("__"))
            .build()?
            .try_deserialize::<Self>()?
            .validated()
    }

    /// Parse TOML text without environment overrides
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize::<Self>()?
            .validated()
    }

    fn validated(self) -> Result<Self, ConfigError> {
        self.schedule
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        Ok(self)
    }

    /// Validate alerts and notifications into a rule set
    pub fn rule_set(&self) -> Result<RuleSet, RuleError> {
        RuleSet::new(self.alerts.clone(), self.notifications.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alert_model::Expr;
    use std::time::Duration;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.server.listen_address, "0.0.0.0:8070");
        assert!(config.server.rate_limit.enabled);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.schedule.check_frequency, Duration::from_secs(60));
        assert!(config.storage.url.is_none());
        assert!(config.alerts.is_empty());
    }

    #[test]
    fn test_full_config() {
        let text = r#"
            [server]
            listen_address = "127.0.0.1:9000"

            [server.rate_limit]
            enabled = false

            [schedule]
            check_frequency = "30s"
            unknown_threshold = 3

            [storage]
            url = "sqlite://state.db"

            [[executor.results]]
            query = "avg:cpu"
            group = { host = "web01" }
            value = 97.5

            [[alerts]]
            name = "cpu.high"
            crit = { query = "avg:cpu" }
            crit_notification = ["ops"]
            unknown = "10m"
            squelch = [{ host = "test*" }]

            [[alerts]]
            name = "app.down"
            depends = { alert = "cpu.high" }
            run_every = 2

            [[notifications]]
            name = "ops"
            target = "ops@example.com"
            next = "pager"

            [[notifications]]
            name = "pager"
            target = "pagerduty"
            timeout = "15m"
        "#;
        let config = AppConfig::from_toml(text).unwrap();
        assert_eq!(config.server.listen_address, "127.0.0.1:9000");
        assert!(!config.server.rate_limit.enabled);
        assert_eq!(config.schedule.check_frequency, Duration::from_secs(30));
        assert_eq!(config.schedule.unknown_threshold, 3);
        assert_eq!(config.storage.url.as_deref(), Some("sqlite://state.db"));
        assert_eq!(config.executor.results.len(), 1);

        let cpu = &config.alerts[0];
        assert_eq!(cpu.crit, Some(Expr::Query("avg:cpu".to_string())));
        assert_eq!(cpu.unknown, Some(Duration::from_secs(600)));
        assert_eq!(cpu.squelch.0.len(), 1);
        assert_eq!(config.alerts[1].run_every, 2);
        assert_eq!(config.notifications[1].timeout(), Duration::from_secs(900));

        let rules = config.rule_set().unwrap();
        assert_eq!(rules.alerts()[0].name, "cpu.high");
    }

    #[test]
    fn test_invalid_reference_rejected() {
        let text = r#"
            [[alerts]]
            name = "a"
            crit_notification = ["nobody"]
        "#;
        let config = AppConfig::from_toml(text).unwrap();
        assert!(config.rule_set().is_err());
    }

    #[test]
    fn test_zero_check_frequency_rejected() {
        let text = r#"
            [schedule]
            check_frequency = "0s"
        "#;
        let err = AppConfig::from_toml(text).unwrap_err();
        assert!(err.to_string().contains("check_frequency"));
    }

    #[test]
    fn test_successor_without_timeout_rejected() {
        let text = r#"
            [[notifications]]
            name = "ops"
            target = "ops@example.com"
            next = "ops"
        "#;
        let config = AppConfig::from_toml(text).unwrap();
        assert!(matches!(
            config.rule_set(),
            Err(RuleError::ZeroTimeoutNext { .. })
        ));
    }
}
