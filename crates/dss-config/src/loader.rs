//! YAML loader with custom tag support
//!
//! Tags are resolved while walking the parsed document:
//! - `!include path` - replaced by the parsed content of `path`
//! - `!include_dir_list dir` - a list with one element per YAML file in `dir`
//! - `!env_var VAR [default]` - the value of an environment variable
//!
//! Relative paths resolve against the directory of the file that contains
//! the tag.

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::value::TaggedValue;
use serde_yaml::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Tag-resolving YAML loader
pub struct YamlLoader {
    /// Base directory for top-level relative paths
    base_dir: PathBuf,
    /// Files currently being loaded
    loading: HashSet<PathBuf>,
}

impl YamlLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            loading: HashSet::new(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Load and resolve a YAML file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.resolve(path.as_ref());
        debug!("Loading YAML file: {:?}", path);

        if !self.loading.insert(path.clone()) {
            return Err(ConfigError::CircularInclude { path });
        }
        let result = fs::read_to_string(&path)
            .map_err(|source| ConfigError::ReadFile {
                path: path.clone(),
                source,
            })
            .and_then(|content| self.load_str(&content, &path));
        self.loading.remove(&path);
        result
    }

    /// Parse and resolve YAML text; `origin` anchors relative includes
    pub fn load_str(&mut self, content: &str, origin: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|source| ConfigError::ParseYaml {
            path: origin.to_path_buf(),
            source,
        })?;
        self.resolve_value(value, origin)
    }

    fn resolve_value(&mut self, value: Value, origin: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.resolve_tag(*tagged, origin),
            Value::Mapping(map) => {
                let mut resolved = serde_yaml::Mapping::with_capacity(map.len());
                for (key, value) in map {
                    resolved.insert(key, self.resolve_value(value, origin)?);
                }
                Ok(Value::Mapping(resolved))
            }
            Value::Sequence(items) => items
                .into_iter()
                .map(|item| self.resolve_value(item, origin))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            other => Ok(other),
        }
    }

    fn resolve_tag(&mut self, tagged: TaggedValue, origin: &Path) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!("Resolving tag '{}'", tag);

        match tag.as_str() {
            "!include" => {
                let path = self.tag_path(&tagged.value, origin)?;
                self.load_file(path)
            }
            "!include_dir_list" => {
                let dir = self.tag_path(&tagged.value, origin)?;
                let mut items = Vec::new();
                for file in yaml_files(&dir)? {
                    items.push(self.load_file(&file)?);
                }
                debug!("Included {} files from {:?}", items.len(), dir);
                Ok(Value::Sequence(items))
            }
            "!env_var" => env_var(&tagged.value),
            _ => {
                warn!("Unknown YAML tag '{}', keeping value", tag);
                let value = self.resolve_value(tagged.value, origin)?;
                Ok(Value::Tagged(Box::new(TaggedValue {
                    tag: tagged.tag,
                    value,
                })))
            }
        }
    }

    fn tag_path(&self, value: &Value, origin: &Path) -> ConfigResult<PathBuf> {
        let Value::String(raw) = value else {
            return Err(ConfigError::InvalidIncludePath {
                path: format!("{value:?}"),
                reason: "path must be a string".to_string(),
            });
        };
        let path = Path::new(raw.trim());
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        let dir = origin
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(self.base_dir.as_path());
        Ok(dir.join(path))
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

/// `VAR` or `VAR default`
fn env_var(value: &Value) -> ConfigResult<Value> {
    let Value::String(spec) = value else {
        return Err(ConfigError::InvalidValue {
            key: "!env_var".to_string(),
            reason: "expected a variable name".to_string(),
        });
    };
    let mut parts = spec.trim().splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let default = parts.next().map(str::trim);

    match (std::env::var(name), default) {
        (Ok(found), _) => {
            debug!("Substituted env var: {}", name);
            Ok(Value::String(found))
        }
        (Err(_), Some(default)) => {
            debug!("Env var {} not set, using default", name);
            Ok(serde_yaml::from_str(default).unwrap_or_else(|_| Value::String(default.to_string())))
        }
        (Err(_), None) => Err(ConfigError::EnvVarNotFound {
            var: name.to_string(),
        }),
    }
}

/// YAML files in `dir`, sorted by name
fn yaml_files(dir: &Path) -> ConfigResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ConfigError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|source| ConfigError::ReadFile {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml")
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Load `file` (relative to `base_dir`) with tag resolution
pub fn load_yaml(base_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(base_dir).load_file(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn key<'a>(value: &'a Value, name: &str) -> &'a Value {
        value.get(name).unwrap_or_else(|| panic!("missing key {name}"))
    }

    #[test]
    fn test_include_resolves_relative_to_including_file() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "conf/rules.yaml", "root: /usr/triggers\n");
        write_file(dir.path(), "conf/server.yaml", "triggers: !include rules.yaml\n");

        let value = load_yaml(dir.path(), "conf/server.yaml").unwrap();
        assert_eq!(
            key(key(&value, "triggers"), "root"),
            &Value::String("/usr/triggers".into())
        );
    }

    #[test]
    fn test_include_dir_list_is_sorted() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "subs/b.yaml", "event-name: b\nhandler-name: h\n");
        write_file(dir.path(), "subs/a.yml", "event-name: a\nhandler-name: h\n");
        write_file(dir.path(), "subs/notes.txt", "ignored");
        write_file(dir.path(), "server.yaml", "subscriptions: !include_dir_list subs\n");

        let value = load_yaml(dir.path(), "server.yaml").unwrap();
        let subs = key(&value, "subscriptions").as_sequence().unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(key(&subs[0], "event-name"), &Value::String("a".into()));
    }

    #[test]
    fn test_env_var_with_and_without_default() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("DSS_CONFIG_TEST_LEVEL", "debug");
        write_file(
            dir.path(),
            "server.yaml",
            "log_level: !env_var DSS_CONFIG_TEST_LEVEL\nwait: !env_var DSS_CONFIG_TEST_UNSET 250\n",
        );
        let value = load_yaml(dir.path(), "server.yaml").unwrap();
        assert_eq!(key(&value, "log_level"), &Value::String("debug".into()));
        assert_eq!(key(&value, "wait").as_u64(), Some(250));
        std::env::remove_var("DSS_CONFIG_TEST_LEVEL");

        write_file(dir.path(), "bad.yaml", "x: !env_var DSS_CONFIG_TEST_UNSET\n");
        assert!(matches!(
            load_yaml(dir.path(), "bad.yaml"),
            Err(ConfigError::EnvVarNotFound { .. })
        ));
    }

    #[test]
    fn test_circular_include_detection() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.yaml", "b: !include b.yaml\n");
        write_file(dir.path(), "b.yaml", "a: !include a.yaml\n");

        let result = load_yaml(dir.path(), "a.yaml");
        assert!(matches!(result, Err(ConfigError::CircularInclude { .. })));
    }

    #[test]
    fn test_missing_include_dir() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "server.yaml", "subscriptions: !include_dir_list nope\n");
        assert!(matches!(
            load_yaml(dir.path(), "server.yaml"),
            Err(ConfigError::DirectoryNotFound { .. })
        ));
    }

    #[test]
    fn test_same_file_may_be_included_twice() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "common.yaml", "x: 1\n");
        write_file(
            dir.path(),
            "server.yaml",
            "first: !include common.yaml\nsecond: !include common.yaml\n",
        );
        let value = load_yaml(dir.path(), "server.yaml").unwrap();
        assert_eq!(key(&value, "first"), key(&value, "second"));
    }
}
