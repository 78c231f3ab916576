//! Project configuration (`.ctx/config.json`).
//!
//! The config file is pretty-printed JSON. Reads deep-merge the file over the
//! built-in defaults, so missing subtrees pick up default values; writes
//! deep-merge the typed config over the raw file contents, so keys this
//! version does not know about survive round-trips.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};

/// Name of the per-project state directory.
pub const STATE_DIR: &str = ".ctx";
/// Database file name inside the state directory.
pub const DB_FILE: &str = "index.db";
/// Config file name inside the state directory.
pub const CONFIG_FILE: &str = "config.json";

/// Known search strategy names, used to validate config.
pub const STRATEGY_NAMES: &[&str] = &["vector", "fts", "ast", "path", "dependency"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub embedder: EmbedderConfig,
    pub search: SearchConfig,
    pub watch: WatchConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    /// One of `local`, `openai`, `voyage`.
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchConfig {
    pub default_limit: usize,
    /// Strategies enabled when the caller does not specify a set.
    pub strategies: Vec<String>,
    /// Per-strategy base weights for rank fusion.
    pub weights: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchConfig {
    pub debounce_ms: u64,
    /// Extra glob patterns the watcher ignores beyond discovery's rules.
    pub ignored: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// One of `null`, `gemini`, `openai`, `anthropic`.
    pub provider: String,
    pub model: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        let mut weights = BTreeMap::new();
        for name in STRATEGY_NAMES {
            weights.insert(name.to_string(), 1.0);
        }
        Self {
            embedder: EmbedderConfig {
                provider: "local".to_string(),
                model: "all-minilm-l6-v2".to_string(),
                dimensions: 384,
            },
            search: SearchConfig {
                default_limit: 10,
                strategies: vec!["fts".to_string(), "ast".to_string(), "path".to_string()],
                weights,
            },
            watch: WatchConfig {
                debounce_ms: 500,
                ignored: Vec::new(),
            },
            llm: LlmConfig {
                provider: "null".to_string(),
                model: String::new(),
            },
        }
    }
}

impl ProjectConfig {
    /// Base fusion weight for a strategy (1.0 when unset).
    pub fn weight(&self, strategy: &str) -> f64 {
        self.search.weights.get(strategy).copied().unwrap_or(1.0)
    }

    pub fn validate(&self) -> Result<()> {
        match self.embedder.provider.as_str() {
            "local" | "openai" | "voyage" => {}
            other => {
                return Err(CoreError::ConfigInvalid(format!(
                    "unknown embedder.provider '{}' (expected local, openai, or voyage)",
                    other
                )))
            }
        }
        if self.embedder.dimensions == 0 {
            return Err(CoreError::ConfigInvalid(
                "embedder.dimensions must be > 0".to_string(),
            ));
        }
        if self.embedder.model.is_empty() {
            return Err(CoreError::ConfigInvalid(
                "embedder.model must not be empty".to_string(),
            ));
        }
        if self.search.default_limit == 0 {
            return Err(CoreError::ConfigInvalid(
                "search.defaultLimit must be >= 1".to_string(),
            ));
        }
        for name in &self.search.strategies {
            if !STRATEGY_NAMES.contains(&name.as_str()) {
                return Err(CoreError::ConfigInvalid(format!(
                    "unknown strategy '{}' in search.strategies",
                    name
                )));
            }
        }
        for (name, weight) in &self.search.weights {
            if !STRATEGY_NAMES.contains(&name.as_str()) {
                return Err(CoreError::ConfigInvalid(format!(
                    "unknown strategy '{}' in search.weights",
                    name
                )));
            }
            if *weight <= 0.0 || !weight.is_finite() {
                return Err(CoreError::ConfigInvalid(format!(
                    "search.weights.{} must be a positive number",
                    name
                )));
            }
        }
        match self.llm.provider.as_str() {
            "null" | "gemini" | "openai" | "anthropic" => {}
            other => {
                return Err(CoreError::ConfigInvalid(format!(
                    "unknown llm.provider '{}' (expected null, gemini, openai, or anthropic)",
                    other
                )))
            }
        }
        Ok(())
    }
}

/// `${root}/.ctx`
pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

/// `${root}/.ctx/index.db`
pub fn db_path(root: &Path) -> PathBuf {
    state_dir(root).join(DB_FILE)
}

/// `${root}/.ctx/config.json`
pub fn config_path(root: &Path) -> PathBuf {
    state_dir(root).join(CONFIG_FILE)
}

/// Load the project config, merging the file over built-in defaults.
///
/// Fails with [`CoreError::NotInitialized`] when the state directory or the
/// config file is absent, and [`CoreError::ConfigInvalid`] when the file does
/// not parse or a value fails validation.
pub fn load(root: &Path) -> Result<ProjectConfig> {
    let path = config_path(root);
    if !path.exists() {
        return Err(CoreError::NotInitialized(root.to_path_buf()));
    }
    let raw = std::fs::read_to_string(&path)?;
    let file_value: Value = serde_json::from_str(&raw)
        .map_err(|e| CoreError::ConfigInvalid(format!("{}: {}", path.display(), e)))?;

    let defaults =
        serde_json::to_value(ProjectConfig::default()).expect("default config serializes");
    let merged = deep_merge(defaults, file_value);

    let config: ProjectConfig = serde_json::from_value(merged)
        .map_err(|e| CoreError::ConfigInvalid(format!("{}: {}", path.display(), e)))?;
    config.validate()?;
    Ok(config)
}

/// Write the config, preserving keys in the file this version does not model.
pub fn save(root: &Path, config: &ProjectConfig) -> Result<()> {
    config.validate()?;
    let path = config_path(root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let existing: Value = match std::fs::read_to_string(&path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or(Value::Object(Default::default())),
        Err(_) => Value::Object(Default::default()),
    };
    let typed =
        serde_json::to_value(config).map_err(|e| CoreError::ConfigInvalid(e.to_string()))?;
    let merged = deep_merge(existing, typed);

    let pretty =
        serde_json::to_string_pretty(&merged).map_err(|e| CoreError::ConfigInvalid(e.to_string()))?;
    std::fs::write(&path, pretty + "\n")?;
    Ok(())
}

/// Write defaults if no config file exists yet. Returns the effective config.
pub fn ensure(root: &Path) -> Result<ProjectConfig> {
    let path = config_path(root);
    if !path.exists() {
        save(root, &ProjectConfig::default())?;
    }
    load(root)
}

/// Read a single value by dotted key (e.g. `embedder.model`).
pub fn get_value(root: &Path, key: &str) -> Result<Value> {
    let path = config_path(root);
    if !path.exists() {
        return Err(CoreError::NotInitialized(root.to_path_buf()));
    }
    let raw = std::fs::read_to_string(&path)?;
    let value: Value =
        serde_json::from_str(&raw).map_err(|e| CoreError::ConfigInvalid(e.to_string()))?;
    let defaults =
        serde_json::to_value(ProjectConfig::default()).expect("default config serializes");
    let merged = deep_merge(defaults, value);

    let mut cursor = &merged;
    for part in key.split('.') {
        cursor = cursor
            .get(part)
            .ok_or_else(|| CoreError::ConfigInvalid(format!("unknown config key '{}'", key)))?;
    }
    Ok(cursor.clone())
}

/// Set a single value by dotted key. The value string is parsed as JSON when
/// possible, otherwise stored as a string. The result must still validate.
pub fn set_value(root: &Path, key: &str, value: &str) -> Result<()> {
    let path = config_path(root);
    if !path.exists() {
        return Err(CoreError::NotInitialized(root.to_path_buf()));
    }
    let raw = std::fs::read_to_string(&path)?;
    let mut root_value: Value =
        serde_json::from_str(&raw).map_err(|e| CoreError::ConfigInvalid(e.to_string()))?;

    let parsed: Value =
        serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));

    let mut cursor = &mut root_value;
    let parts: Vec<&str> = key.split('.').collect();
    for part in &parts[..parts.len() - 1] {
        if !cursor.is_object() {
            return Err(CoreError::ConfigInvalid(format!(
                "config key '{}' does not name an object",
                part
            )));
        }
        cursor = cursor
            .as_object_mut()
            .unwrap()
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    let last = parts[parts.len() - 1];
    cursor
        .as_object_mut()
        .ok_or_else(|| CoreError::ConfigInvalid(format!("config key '{}' is not settable", key)))?
        .insert(last.to_string(), parsed);

    let pretty = serde_json::to_string_pretty(&root_value)
        .map_err(|e| CoreError::ConfigInvalid(e.to_string()))?;
    std::fs::write(&path, pretty + "\n")?;

    // Re-load so a bad value is rejected before anyone reads it back.
    load(root).map(|_| ())
}

/// Reset the config file to defaults, discarding everything else.
pub fn reset(root: &Path) -> Result<ProjectConfig> {
    let path = config_path(root);
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    ensure(root)
}

/// Recursively merge `overlay` onto `base`; overlay wins on conflicts,
/// objects merge key-by-key.
fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_validate() {
        ProjectConfig::default().validate().unwrap();
    }

    #[test]
    fn test_ensure_writes_defaults_once() {
        let tmp = TempDir::new().unwrap();
        let first = ensure(tmp.path()).unwrap();
        assert_eq!(first.embedder.dimensions, 384);

        // A second ensure must not clobber edits.
        set_value(tmp.path(), "search.defaultLimit", "25").unwrap();
        let second = ensure(tmp.path()).unwrap();
        assert_eq!(second.search.default_limit, 25);
    }

    #[test]
    fn test_load_missing_is_not_initialized() {
        let tmp = TempDir::new().unwrap();
        match load(tmp.path()) {
            Err(CoreError::NotInitialized(_)) => {}
            other => panic!("expected NotInitialized, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_keys_survive_save() {
        let tmp = TempDir::new().unwrap();
        ensure(tmp.path()).unwrap();

        // Simulate a future version writing a key we do not model.
        let path = config_path(tmp.path());
        let mut value: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .insert("experimental".to_string(), serde_json::json!({"flag": true}));
        std::fs::write(&path, serde_json::to_string_pretty(&value).unwrap()).unwrap();

        let config = load(tmp.path()).unwrap();
        save(tmp.path(), &config).unwrap();

        let reread: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reread["experimental"]["flag"], Value::Bool(true));
    }

    #[test]
    fn test_missing_subtree_merges_defaults() {
        let tmp = TempDir::new().unwrap();
        let dir = state_dir(tmp.path());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            config_path(tmp.path()),
            r#"{"embedder": {"provider": "openai", "model": "text-embedding-3-small", "dimensions": 1536}}"#,
        )
        .unwrap();

        let config = load(tmp.path()).unwrap();
        assert_eq!(config.embedder.provider, "openai");
        assert_eq!(config.embedder.dimensions, 1536);
        // search/watch/llm come from defaults
        assert_eq!(config.search.default_limit, 10);
        assert_eq!(config.watch.debounce_ms, 500);
        assert_eq!(config.llm.provider, "null");
    }

    #[test]
    fn test_invalid_provider_rejected() {
        let tmp = TempDir::new().unwrap();
        ensure(tmp.path()).unwrap();
        let err = set_value(tmp.path(), "embedder.provider", "cohere").unwrap_err();
        match err {
            CoreError::ConfigInvalid(msg) => assert!(msg.contains("cohere")),
            other => panic!("expected ConfigInvalid, got {:?}", other),
        }
    }

    #[test]
    fn test_get_value_dotted() {
        let tmp = TempDir::new().unwrap();
        ensure(tmp.path()).unwrap();
        let value = get_value(tmp.path(), "watch.debounceMs").unwrap();
        assert_eq!(value, serde_json::json!(500));
    }
}
