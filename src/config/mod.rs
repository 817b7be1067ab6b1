//! Hierarchical configuration loading (spec §6.2).
//!
//! Precedence, highest wins: call-site overrides > recognized env vars >
//! local overrides file > project config file > global config file > legacy
//! `key=value` settings > built-in defaults. Each layer is merged into a
//! single JSON object; later layers override matching dotted keys without
//! clobbering sibling keys at the same level.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::constants::RECOGNIZED_ENV_VARS;

/// Project-config file name, consulted inside the project root.
pub const PROJECT_CONFIG_FILE: &str = "codesearch.yaml";

/// Local-overrides file name, consulted inside the project root (typically
/// gitignored; developer-local tweaks).
pub const LOCAL_OVERRIDES_FILE: &str = "codesearch.local.yaml";

/// Global config file name, consulted under the user's config directory.
pub const GLOBAL_CONFIG_FILE: &str = "config.yaml";

/// Legacy settings file, `key=value` per line, consulted for backward
/// compatibility with older installs (spec §6.2 tier 6).
pub const LEGACY_SETTINGS_FILE: &str = "settings.conf";

fn builtin_defaults() -> Value {
    serde_json::json!({
        "embedding": {
            "provider": "local",
            "model": "mxbai-embed-xsmall-v1",
        },
        "batch": {
            "initial_size": crate::constants::DEFAULT_INITIAL_BATCH_SIZE,
            "max_size": crate::constants::DEFAULT_MAX_BATCH_SIZE,
            "min_size": crate::constants::MIN_BATCH_SIZE,
        },
        "watch": {
            "debounce_seconds": crate::constants::DEFAULT_DEBOUNCE_SECONDS,
        },
        "file": {
            "max_size_bytes": crate::constants::DEFAULT_MAX_FILE_SIZE_BYTES,
        },
        "memory": {
            "soft_cap_bytes": crate::constants::DEFAULT_MEMORY_SOFT_CAP_BYTES,
        },
        "collection": "default",
        "debug": false,
        "verbose": false,
    })
}

/// Merge `overlay` into `base`, recursing into nested objects. Scalars and
/// arrays in `overlay` replace the corresponding key in `base` outright.
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_json(existing, value);
                    }
                    _ => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, overlay) => *slot = overlay,
    }
}

/// Split a dotted path (`embedding.model`) and set it in a JSON object,
/// creating intermediate objects as needed.
fn set_dotted(root: &mut Value, path: &str, value: Value) {
    let parts: Vec<&str> = path.split('.').collect();
    let mut cursor = root;
    for (i, part) in parts.iter().enumerate() {
        if !cursor.is_object() {
            *cursor = Value::Object(Map::new());
        }
        let map = cursor.as_object_mut().expect("just coerced to object");
        if i == parts.len() - 1 {
            map.insert(part.to_string(), value);
            return;
        }
        cursor = map.entry(part.to_string()).or_insert_with(|| Value::Object(Map::new()));
    }
}

fn get_dotted<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cursor = root;
    for part in path.split('.') {
        cursor = cursor.as_object()?.get(part)?;
    }
    Some(cursor)
}

/// Parse a legacy `key=value` line into a (dotted_path, value) pair,
/// coercing booleans and numbers the way recognized env vars are coerced
/// (spec §6.2).
fn parse_legacy_line(line: &str) -> Option<(String, Value)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key, raw) = line.split_once('=')?;
    Some((key.trim().to_string(), coerce_string(raw.trim())))
}

fn coerce_string(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}

fn load_yaml_file(path: &Path) -> Option<Value> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_yaml_ng::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Failed to parse config file {}: {}", path.display(), e);
            None
        }
    }
}

fn load_legacy_settings(path: &Path) -> Option<Value> {
    let content = std::fs::read_to_string(path).ok()?;
    let mut map = Map::new();
    for line in content.lines() {
        if let Some((key, value)) = parse_legacy_line(line) {
            map.insert(key, value);
        }
    }
    if map.is_empty() {
        None
    } else {
        let mut root = Value::Object(Map::new());
        for (key, value) in map {
            set_dotted(&mut root, &key, value);
        }
        Some(root)
    }
}

fn env_key_to_dotted(key: &str) -> String {
    match key {
        "OPENAI_API_KEY" => "embedding.openai_api_key".to_string(),
        "VOYAGE_API_KEY" => "embedding.voyage_api_key".to_string(),
        "QDRANT_API_KEY" => "vectordb.qdrant_api_key".to_string(),
        "QDRANT_URL" => "vectordb.qdrant_url".to_string(),
        "EMBEDDING_PROVIDER" => "embedding.provider".to_string(),
        "VOYAGE_MODEL" => "embedding.voyage_model".to_string(),
        "CLAUDE_INDEXER_DEBUG" => "debug".to_string(),
        "CLAUDE_INDEXER_VERBOSE" => "verbose".to_string(),
        "CLAUDE_INDEXER_COLLECTION" => "collection".to_string(),
        other => other.to_lowercase(),
    }
}

fn load_env_overrides() -> Value {
    let mut root = Value::Object(Map::new());
    for key in RECOGNIZED_ENV_VARS {
        if let Ok(raw) = std::env::var(key) {
            let dotted = env_key_to_dotted(key);
            set_dotted(&mut root, &dotted, coerce_string(&raw));
        }
    }
    root
}

/// A fully resolved configuration, queryable by dotted path.
#[derive(Debug, Clone)]
pub struct Config {
    value: Value,
}

impl Config {
    pub fn get(&self, path: &str) -> Option<&Value> {
        get_dotted(&self.value, path)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path)?.as_str()
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path)?.as_bool()
    }

    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.get(path)?.as_i64()
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path)?.as_f64()
    }

    pub fn get_usize(&self, path: &str) -> Option<usize> {
        self.get_i64(path).and_then(|v| usize::try_from(v).ok())
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }
}

/// Locates and merges the configuration layers for a project (spec §6.2).
pub struct ConfigLoader {
    project_root: PathBuf,
    global_dir: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            global_dir: dirs::home_dir().map(|h| h.join(crate::constants::CONFIG_DIR_NAME)),
        }
    }

    fn state_dir(&self) -> PathBuf {
        self.project_root.join(crate::constants::STATE_DIR_NAME)
    }

    /// Load, merging all seven tiers. `overrides` are dotted-path call-site
    /// overrides (tier 1, highest precedence).
    pub fn load(&self, overrides: &[(String, Value)]) -> Config {
        let mut merged = builtin_defaults();

        if let Some(legacy) = load_yaml_or_legacy(&self.state_dir().join(LEGACY_SETTINGS_FILE)) {
            debug!("Merging legacy settings from {:?}", self.state_dir());
            merge_json(&mut merged, legacy);
        }

        if let Some(global_dir) = &self.global_dir {
            if let Some(global) = load_yaml_file(&global_dir.join(GLOBAL_CONFIG_FILE)) {
                debug!("Merging global config from {:?}", global_dir);
                merge_json(&mut merged, global);
            }
        }

        if let Some(project) = load_yaml_file(&self.project_root.join(PROJECT_CONFIG_FILE)) {
            debug!("Merging project config");
            merge_json(&mut merged, project);
        }

        if let Some(local) = load_yaml_file(&self.project_root.join(LOCAL_OVERRIDES_FILE)) {
            debug!("Merging local overrides");
            merge_json(&mut merged, local);
        }

        merge_json(&mut merged, load_env_overrides());

        for (path, value) in overrides {
            set_dotted(&mut merged, path, value.clone());
        }

        Config { value: merged }
    }
}

fn load_yaml_or_legacy(path: &Path) -> Option<Value> {
    load_legacy_settings(path)
}

/// Parses recognized-env-var style boolean/numeric coercion for ad hoc
/// string inputs (exposed for callers building their own overrides).
pub fn coerce_env_value(raw: &str) -> Value {
    coerce_string(raw)
}

/// Convenience map of recognized env vars currently set, dotted-path keyed
/// (used by `doctor` diagnostics).
pub fn active_recognized_env_vars() -> HashMap<String, String> {
    RECOGNIZED_ENV_VARS
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_visible_with_no_files_present() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader {
            project_root: dir.path().to_path_buf(),
            global_dir: None,
        };
        let config = loader.load(&[]);
        assert_eq!(config.get_str("embedding.provider"), Some("local"));
        assert_eq!(config.get_usize("batch.initial_size"), Some(25));
    }

    #[test]
    fn project_config_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PROJECT_CONFIG_FILE),
            "collection: myproj\nembedding:\n  model: custom-model\n",
        )
        .unwrap();
        let loader = ConfigLoader {
            project_root: dir.path().to_path_buf(),
            global_dir: None,
        };
        let config = loader.load(&[]);
        assert_eq!(config.get_str("collection"), Some("myproj"));
        assert_eq!(config.get_str("embedding.model"), Some("custom-model"));
        // Sibling key untouched by the partial override.
        assert_eq!(config.get_str("embedding.provider"), Some("local"));
    }

    #[test]
    fn local_overrides_beat_project_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(PROJECT_CONFIG_FILE), "collection: fromproject\n").unwrap();
        std::fs::write(dir.path().join(LOCAL_OVERRIDES_FILE), "collection: fromlocal\n").unwrap();
        let loader = ConfigLoader {
            project_root: dir.path().to_path_buf(),
            global_dir: None,
        };
        let config = loader.load(&[]);
        assert_eq!(config.get_str("collection"), Some("fromlocal"));
    }

    #[test]
    fn call_site_override_beats_everything() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LOCAL_OVERRIDES_FILE), "collection: fromlocal\n").unwrap();
        let loader = ConfigLoader {
            project_root: dir.path().to_path_buf(),
            global_dir: None,
        };
        let config = loader.load(&[("collection".to_string(), Value::String("fromcli".into()))]);
        assert_eq!(config.get_str("collection"), Some("fromcli"));
    }

    #[test]
    fn legacy_settings_are_lowest_precedence_but_still_applied() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join(crate::constants::STATE_DIR_NAME);
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(state_dir.join(LEGACY_SETTINGS_FILE), "collection=legacyval\ndebug=true\n").unwrap();
        let loader = ConfigLoader {
            project_root: dir.path().to_path_buf(),
            global_dir: None,
        };
        let config = loader.load(&[]);
        assert_eq!(config.get_str("collection"), Some("legacyval"));
        assert_eq!(config.get_bool("debug"), Some(true));
    }

    #[test]
    fn boolean_and_numeric_strings_are_coerced() {
        assert_eq!(coerce_string("true"), Value::Bool(true));
        assert_eq!(coerce_string("false"), Value::Bool(false));
        assert_eq!(coerce_string("42"), Value::Number(42.into()));
        assert!(matches!(coerce_string("3.5"), Value::Number(_)));
        assert_eq!(coerce_string("hello"), Value::String("hello".to_string()));
    }
}
