//! Hierarchical store holding trigger rules and their bookkeeping
//!
//! Paths are `/`-separated. Numeric segments index into arrays, every other
//! segment names an object key.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Rule store errors
#[derive(Debug, Error)]
pub enum RuleStoreError {
    #[error("Cannot write below '{path}': '{segment}' is not a container")]
    NotAContainer { path: String, segment: String },

    #[error("Failed to read rules from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse rules: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Result type for rule store operations
pub type RuleStoreResult<T> = Result<T, RuleStoreError>;

/// Read/write access to the rule tree
pub trait RuleStore: Send + Sync {
    /// Value at `path`, if any
    fn get(&self, path: &str) -> Option<Value>;

    /// Replace the value at `path`, creating intermediate objects
    fn set(&self, path: &str, value: Value) -> RuleStoreResult<()>;
}

/// In-memory [`RuleStore`] backed by a JSON tree
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    root: RwLock<Value>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::from_value(Value::Object(Map::new()))
    }

    pub fn from_value(root: Value) -> Self {
        Self {
            root: RwLock::new(root),
        }
    }

    /// Parse a YAML (or JSON) document as the tree root
    pub fn from_yaml_str(content: &str) -> RuleStoreResult<Self> {
        let root: Value = serde_yaml::from_str(content)?;
        Ok(Self::from_value(root))
    }

    /// Load a YAML rules file
    pub fn load_file(path: &Path) -> RuleStoreResult<Self> {
        debug!("Loading trigger rules from {:?}", path);
        let content = std::fs::read_to_string(path).map_err(|source| RuleStoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Copy of the whole tree
    pub fn snapshot(&self) -> Value {
        self.root
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn child<'a>(node: &'a Value, segment: &str) -> Option<&'a Value> {
    match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

impl RuleStore for MemoryRuleStore {
    fn get(&self, path: &str) -> Option<Value> {
        let root = self.root.read().unwrap_or_else(PoisonError::into_inner);
        let mut node = &*root;
        for segment in segments(path) {
            node = child(node, segment)?;
        }
        Some(node.clone())
    }

    fn set(&self, path: &str, value: Value) -> RuleStoreResult<()> {
        let mut root = self.root.write().unwrap_or_else(PoisonError::into_inner);
        let mut node = &mut *root;
        for segment in segments(path) {
            if node.is_null() {
                *node = Value::Object(Map::new());
            }
            node = match node {
                Value::Object(map) => map.entry(segment).or_insert(Value::Null),
                Value::Array(items) => match segment.parse::<usize>() {
                    Ok(i) if i < items.len() => &mut items[i],
                    _ => {
                        return Err(RuleStoreError::NotAContainer {
                            path: path.to_string(),
                            segment: segment.to_string(),
                        })
                    }
                },
                _ => {
                    return Err(RuleStoreError::NotAContainer {
                        path: path.to_string(),
                        segment: segment.to_string(),
                    })
                }
            };
        }
        *node = value;
        Ok(())
    }
}
