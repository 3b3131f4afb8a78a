//! Merged configuration tree with provenance
//!
//! Keys are addressed with dot notation (`lava.server.host`). A segment that
//! parses as an integer indexes an array when the current node is an array.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;

/// Environment variables consulted for keys no layer has set
pub const ENV_PARAMETERS: &[(&str, &str)] = &[
    ("LAVA_USER", "lava.server.user"),
    ("LAVA_TOKEN", "lava.server.token"),
    ("LAVA_STORAGE_FTP_USER", "lava.sftp.user"),
    ("LAVA_STORAGE_FTP_PASS", "lava.sftp.pass"),
];

/// Key fragments whose values are never shown
const SECRET_KEYS: &[&str] = &["pass", "token", "secret", "private_key", "credential"];

const REDACTED: &str = "[REDACTED]";

/// Origin of a configuration layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    User,
    File,
    Cli,
    Env,
}

/// A contributing layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli/env)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 of the raw file bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    /// Keys filled from the environment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
}

impl ConfigSource {
    fn bare(origin: ConfigOrigin) -> Self {
        Self {
            origin,
            path: None,
            digest: None,
            keys: Vec::new(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing configuration parameter {0}")]
    Missing(String),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },

    #[error("cannot address configuration key {0}")]
    Path(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),
}

/// Default location of the user configuration file
pub fn user_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join("lava-ctl")
            .join("config.toml")
    })
}

/// The merged configuration
#[derive(Debug, Clone)]
pub struct Config {
    tree: Value,
    sources: Vec<ConfigSource>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_value(Value::Object(Map::new()))
    }
}

impl Config {
    /// Wrap an already merged tree
    pub fn from_value(tree: Value) -> Self {
        Self {
            tree,
            sources: Vec::new(),
        }
    }

    /// Built-in defaults only
    pub fn builtin() -> Self {
        Self {
            tree: BuiltinDefaults::default().to_value(),
            sources: vec![ConfigSource::bare(ConfigOrigin::Builtin)],
        }
    }

    /// Merge all layers.
    ///
    /// A missing user file is skipped; an explicit file that cannot be read
    /// is an error.
    pub fn load(
        user_path: Option<&Path>,
        explicit_path: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![ConfigSource::bare(ConfigOrigin::Builtin)];

        if let Some(path) = user_path.filter(|p| p.exists()) {
            let (value, digest) = load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                path: Some(path.display().to_string()),
                digest: Some(digest),
                ..ConfigSource::bare(ConfigOrigin::User)
            });
        }

        if let Some(path) = explicit_path {
            let (value, digest) = load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                path: Some(path.display().to_string()),
                digest: Some(digest),
                ..ConfigSource::bare(ConfigOrigin::File)
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource::bare(ConfigOrigin::Cli));
        }

        let config = Self {
            tree: merge_layers(layers),
            sources,
        };
        tracing::debug!(layers = config.sources.len(), "configuration merged");
        Ok(config)
    }

    /// Fill keys left unset by every layer from the environment.
    ///
    /// Values already present are never overridden.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut filled = Vec::new();
        for &(var, key) in ENV_PARAMETERS {
            if self.has(key) {
                continue;
            }
            if let Some(value) = lookup(var) {
                if self.set(key, Value::String(value)).is_ok() {
                    tracing::debug!(key = %key, var = %var, "configuration filled from environment");
                    filled.push(key.to_string());
                }
            }
        }
        if !filled.is_empty() {
            self.sources.push(ConfigSource {
                keys: filled,
                ..ConfigSource::bare(ConfigOrigin::Env)
            });
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        key.split('.').try_fold(&self.tree, |node, segment| match node {
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            Value::Object(map) => map.get(segment),
            _ => None,
        })
    }

    /// Present and not null
    pub fn has(&self, key: &str) -> bool {
        self.get(key).map(|v| !v.is_null()).unwrap_or(false)
    }

    /// Set a value, creating intermediate tables as needed.
    ///
    /// Array elements can be replaced but not appended.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), ConfigError> {
        let segments: Vec<&str> = key.split('.').collect();
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| ConfigError::Path(key.to_string()))?;

        let mut node = &mut self.tree;
        for segment in parents {
            node = child_mut(node, segment, true).ok_or_else(|| ConfigError::Path(key.to_string()))?;
        }

        if node.is_null() {
            *node = Value::Object(Map::new());
        }
        match node {
            Value::Array(items) => {
                let slot = last
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get_mut(i))
                    .ok_or_else(|| ConfigError::Path(key.to_string()))?;
                *slot = value;
            }
            Value::Object(map) => {
                map.insert(last.to_string(), value);
            }
            _ => return Err(ConfigError::Path(key.to_string())),
        }
        Ok(())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// Integer value; numeric strings (from env or CLI) are accepted
    pub fn get_u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| ConfigError::Invalid {
                key: key.to_string(),
                message: format!("expected a non-negative integer, got {}", n),
            }),
            Some(Value::String(s)) => {
                s.trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| ConfigError::Invalid {
                        key: key.to_string(),
                        message: format!("expected a non-negative integer, got {:?}", s),
                    })
            }
            Some(other) => Err(ConfigError::Invalid {
                key: key.to_string(),
                message: format!("expected an integer, got {}", other),
            }),
        }
    }

    /// String value that must be present
    pub fn require_str(&self, key: &str) -> Result<String, ConfigError> {
        match self.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(Value::Null) | None => Err(ConfigError::Missing(key.to_string())),
            Some(Value::String(_)) => Err(ConfigError::Missing(key.to_string())),
            Some(other) => Err(ConfigError::Invalid {
                key: key.to_string(),
                message: format!("expected a string, got {}", other),
            }),
        }
    }

    /// Integer value that must be present
    pub fn require_u64(&self, key: &str) -> Result<u64, ConfigError> {
        self.get_u64(key)?
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    pub fn tree(&self) -> &Value {
        &self.tree
    }

    pub fn sources(&self) -> &[ConfigSource] {
        &self.sources
    }

    /// Copy of the tree with secrets replaced, plus the redacted key paths
    pub fn redacted(&self) -> (Value, Vec<String>) {
        let mut tree = self.tree.clone();
        let mut redactions = Vec::new();
        redact_recursive(&mut tree, String::new(), &mut redactions);
        (tree, redactions)
    }
}

/// Parse a CLI value: integers and booleans are typed, anything else is a string
pub fn parse_scalar(raw: &str) -> Value {
    let raw = raw.trim();
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

/// Set one key in a TOML file, creating the file if needed
pub fn persist_key(path: &Path, key: &str, value: Value) -> Result<(), ConfigError> {
    let tree = if path.exists() {
        load_toml_file(path)?.0
    } else {
        Value::Object(Map::new())
    };
    let mut config = Config::from_value(tree);
    config.set(key, value)?;

    let text = toml::to_string_pretty(config.tree()).map_err(|e| ConfigError::Invalid {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ConfigError::Io(format!("{}: {}", parent.display(), e)))?;
    }
    fs::write(path, text).map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))
}

fn child_mut<'a>(node: &'a mut Value, segment: &str, create: bool) -> Option<&'a mut Value> {
    if node.is_null() && create {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Array(items) => segment.parse::<usize>().ok().and_then(move |i| items.get_mut(i)),
        Value::Object(map) => {
            if create && !map.contains_key(segment) {
                map.insert(segment.to_string(), Value::Object(Map::new()));
            }
            map.get_mut(segment)
        }
        _ => None,
    }
}

/// Load and parse a TOML file, returning the tree and the file digest
fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
    let bytes = fs::read(path).map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hex::encode(hasher.finalize());

    let contents = String::from_utf8(bytes)
        .map_err(|e| ConfigError::Parse(format!("{}: invalid UTF-8: {}", path.display(), e)))?;
    let table: toml::Value = toml::from_str(&contents)
        .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;

    Ok((toml_to_json(table), digest))
}

fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

fn redact_recursive(value: &mut Value, path: String, redactions: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let current = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                let lower = key.to_lowercase();
                let secret = SECRET_KEYS.iter().any(|s| lower.contains(s));

                if secret && !val.is_object() && !val.is_array() {
                    *val = Value::String(REDACTED.to_string());
                    redactions.push(current);
                } else {
                    redact_recursive(val, current, redactions);
                }
            }
        }
        Value::Array(items) => {
            for (i, val) in items.iter_mut().enumerate() {
                redact_recursive(val, format!("{}.{}", path, i), redactions);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_builtin_only() {
        let config = Config::load(None, None, None).unwrap();
        assert_eq!(config.require_u64("lava.server.port").unwrap(), 80);
        assert_eq!(config.get_str("lava.storage.root"), Some("/data/lava-ftp"));
        assert!(!config.has("lava.server.host"));
        assert_eq!(config.sources().len(), 1);
    }

    #[test]
    fn test_missing_user_file_is_skipped() {
        let config = Config::load(Some(Path::new("/nonexistent/lava-ctl.toml")), None, None).unwrap();
        assert_eq!(config.sources().len(), 1);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = Config::load(None, Some(Path::new("/nonexistent/lava-ctl.toml")), None);
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_layers_and_digest() {
        let mut user = NamedTempFile::new().unwrap();
        writeln!(user, "[lava.server]").unwrap();
        writeln!(user, "host = \"lava.example.com\"").unwrap();
        writeln!(user, "port = 2041").unwrap();

        let mut explicit = NamedTempFile::new().unwrap();
        writeln!(explicit, "[lava.server]").unwrap();
        writeln!(explicit, "port = 8080").unwrap();

        let cli = json!({"lava": {"server": {"jobs": {"timeout": 60}}}});
        let config = Config::load(Some(user.path()), Some(explicit.path()), Some(cli)).unwrap();

        assert_eq!(config.get_str("lava.server.host"), Some("lava.example.com"));
        assert_eq!(config.require_u64("lava.server.port").unwrap(), 8080);
        assert_eq!(config.require_u64("lava.server.jobs.timeout").unwrap(), 60);

        let origins: Vec<ConfigOrigin> = config.sources().iter().map(|s| s.origin).collect();
        assert_eq!(
            origins,
            vec![ConfigOrigin::Builtin, ConfigOrigin::User, ConfigOrigin::File, ConfigOrigin::Cli]
        );
        assert_eq!(config.sources()[1].digest.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[lava.server").unwrap();
        assert!(matches!(
            Config::load(None, Some(file.path()), None),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_fills_only_unset_keys() {
        let cli = json!({"lava": {"server": {"user": "explicit"}}});
        let config = Config::load(None, None, Some(cli))
            .unwrap()
            .with_env(env(&[("LAVA_USER", "from-env"), ("LAVA_TOKEN", "t0ken")]));

        assert_eq!(config.get_str("lava.server.user"), Some("explicit"));
        assert_eq!(config.get_str("lava.server.token"), Some("t0ken"));

        let env_source = config.sources().last().unwrap();
        assert_eq!(env_source.origin, ConfigOrigin::Env);
        assert_eq!(env_source.keys, vec!["lava.server.token".to_string()]);
    }

    #[test]
    fn test_env_without_values_adds_no_source() {
        let config = Config::builtin().with_env(env(&[]));
        assert_eq!(config.sources().len(), 1);
    }

    #[test]
    fn test_dotted_access_into_arrays() {
        let config = Config::from_value(json!({"targets": [{"name": "a"}, {"name": "b"}]}));
        assert_eq!(config.get_str("targets.1.name"), Some("b"));
        assert!(config.get("targets.2.name").is_none());
        assert!(config.get("targets.x").is_none());
    }

    #[test]
    fn test_set_creates_tables_and_replaces_elements() {
        let mut config = Config::from_value(json!({"list": [1, 2]}));
        config.set("lava.sftp.user", json!("ftp")).unwrap();
        config.set("list.0", json!(9)).unwrap();

        assert_eq!(config.get_str("lava.sftp.user"), Some("ftp"));
        assert_eq!(config.get("list"), Some(&json!([9, 2])));
        assert!(matches!(config.set("list.5", json!(0)), Err(ConfigError::Path(_))));
        assert!(matches!(config.set("list.0.x", json!(0)), Err(ConfigError::Path(_))));
    }

    #[test]
    fn test_numeric_strings_are_integers() {
        let config = Config::from_value(json!({"port": "2041", "bad": "eighty"}));
        assert_eq!(config.require_u64("port").unwrap(), 2041);
        assert!(matches!(config.get_u64("bad"), Err(ConfigError::Invalid { .. })));
        assert!(matches!(config.require_u64("absent"), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_require_str() {
        let config = Config::from_value(json!({"host": "lava", "empty": "", "nothing": null}));
        assert_eq!(config.require_str("host").unwrap(), "lava");
        assert!(matches!(config.require_str("empty"), Err(ConfigError::Missing(_))));
        assert!(matches!(config.require_str("nothing"), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_redaction() {
        let config = Config::from_value(json!({
            "lava": {
                "server": {"user": "ci", "token": "abc"},
                "sftp": {"user": "ftp", "pass": "hunter2"}
            }
        }));
        let (tree, redactions) = config.redacted();

        assert_eq!(tree["lava"]["server"]["token"], REDACTED);
        assert_eq!(tree["lava"]["sftp"]["pass"], REDACTED);
        assert_eq!(tree["lava"]["server"]["user"], "ci");
        assert_eq!(redactions.len(), 2);
        assert!(redactions.contains(&"lava.sftp.pass".to_string()));
        // Original untouched
        assert_eq!(config.get_str("lava.server.token"), Some("abc"));
    }

    #[test]
    fn test_parse_scalar() {
        assert_eq!(parse_scalar("2041"), json!(2041));
        assert_eq!(parse_scalar("true"), json!(true));
        assert_eq!(parse_scalar(" lava.local "), json!("lava.local"));
    }

    #[test]
    fn test_persist_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        persist_key(&path, "lava.server.host", json!("lava.local")).unwrap();
        persist_key(&path, "lava.server.port", json!(2041)).unwrap();

        let config = Config::load(None, Some(&path), None).unwrap();
        assert_eq!(config.get_str("lava.server.host"), Some("lava.local"));
        assert_eq!(config.require_u64("lava.server.port").unwrap(), 2041);
    }
}
