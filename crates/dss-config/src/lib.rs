//! Configuration for the dSS event server
//!
//! The server reads one YAML document into a [`ServerConfig`]. The loader
//! understands a few custom tags:
//!
//! - `!include path` - Include another YAML file
//! - `!include_dir_list dir` - Include every YAML file in a directory as a list
//! - `!env_var VAR [default]` - Environment variable substitution
//!
//! # Example
//!
//! ```ignore
//! use dss_config::ServerConfig;
//!
//! let config = ServerConfig::load("/etc/dss/server.yaml")?;
//! println!("dispatch timeout: {:?}", config.event_bus.wait_timeout());
//! ```

mod error;
mod loader;
mod server_config;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};
pub use server_config::{EventBusConfig, ServerConfig, TriggersConfig};

pub use serde_yaml::Value;
