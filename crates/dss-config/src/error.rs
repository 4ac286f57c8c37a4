//! Error types for configuration loading

use std::path::PathBuf;
use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading the server configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file or directory
    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML
    #[error("failed to parse YAML in {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A tag argument that is not a usable path
    #[error("invalid include path '{path}': {reason}")]
    InvalidIncludePath { path: String, reason: String },

    /// Directory given to `!include_dir_list` does not exist
    #[error("directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    /// A file includes itself, directly or indirectly
    #[error("circular include detected: {path}")]
    CircularInclude { path: PathBuf },

    /// `!env_var` names an unset variable and gives no default
    #[error("environment variable '{var}' not set")]
    EnvVarNotFound { var: String },

    /// The document does not match the configuration schema
    #[error("invalid configuration: {0}")]
    Schema(#[source] serde_yaml::Error),

    /// A value that parses but is out of range
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}
