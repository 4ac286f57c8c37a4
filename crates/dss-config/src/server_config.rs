//! Server configuration
//!
//! Parses the top-level server document:
//!
//! ```yaml
//! log_level: info
//! event_bus:
//!   wait_timeout_ms: 1000
//!   runner_max_sleep_ms: 500
//! triggers:
//!   root: /usr/triggers
//!   rules_file: rules.yaml
//! subscriptions: !include_dir_list subscriptions
//! ```

use dss_core::SubscriptionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::YamlLoader;

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Default tracing filter, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub event_bus: EventBusConfig,

    #[serde(default)]
    pub triggers: TriggersConfig,

    /// Subscriptions installed at startup
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
}

/// Dispatch and scheduler timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// How long one dispatch iteration waits for an event
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    /// Upper bound on one scheduler sleep
    #[serde(default = "default_runner_max_sleep_ms")]
    pub runner_max_sleep_ms: u64,
}

impl EventBusConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn runner_max_sleep(&self) -> Duration {
        Duration::from_millis(self.runner_max_sleep_ms)
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: default_wait_timeout_ms(),
            runner_max_sleep_ms: default_runner_max_sleep_ms(),
        }
    }
}

/// Trigger engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggersConfig {
    /// Store path of the relay entries
    #[serde(default = "default_triggers_root")]
    pub root: String,

    /// YAML file holding the rule tree, relative to the config file
    #[serde(default)]
    pub rules_file: Option<PathBuf>,
}

impl Default for TriggersConfig {
    fn default() -> Self {
        Self {
            root: default_triggers_root(),
            rules_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_wait_timeout_ms() -> u64 {
    1000
}

fn default_runner_max_sleep_ms() -> u64 {
    500
}

fn default_triggers_root() -> String {
    "/usr/triggers".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            event_bus: EventBusConfig::default(),
            triggers: TriggersConfig::default(),
            subscriptions: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load from a YAML file, resolving tags and relative paths
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let value = YamlLoader::new(&base_dir).load_file(path)?;
        let mut config = Self::from_value(value)?;

        if let Some(rules) = config.triggers.rules_file.take() {
            config.triggers.rules_file = Some(if rules.is_absolute() {
                rules
            } else {
                base_dir.join(rules)
            });
        }
        debug!(
            subscriptions = config.subscriptions.len(),
            "Loaded server configuration from {:?}",
            path
        );
        Ok(config)
    }

    /// Build from an already resolved YAML value
    pub fn from_value(value: serde_yaml::Value) -> ConfigResult<Self> {
        let config: Self = if value.is_null() {
            Self::default()
        } else {
            serde_yaml::from_value(value).map_err(ConfigError::Schema)?
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.event_bus.wait_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "event_bus.wait_timeout_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.event_bus.runner_max_sleep_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "event_bus.runner_max_sleep_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if !self.triggers.root.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                key: "triggers.root".to_string(),
                reason: format!("'{}' is not an absolute store path", self.triggers.root),
            });
        }
        Ok(())
    }
}
