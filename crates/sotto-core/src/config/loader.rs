//! Config loader — reads `~/.sotto/config.json` and merges env vars.
//!
//! Loading precedence:
//! 1. Defaults (`Config::default()`)
//! 2. JSON file
//! 3. Environment variables (`SOTTO_API_KEY`, `SOTTO_API_BASE`,
//!    `SOTTO_MODEL`, `SOTTO_WORKSPACE`)

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::Config;

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration. Falls back to defaults if the file is missing or
/// unparseable; env vars always apply last.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    let config = if config_path.exists() {
        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_json::from_str::<Config>(&content) {
                Ok(c) => {
                    debug!(path = %config_path.display(), "loaded config");
                    c
                }
                Err(e) => {
                    warn!(path = %config_path.display(), error = %e, "invalid config, using defaults");
                    Config::default()
                }
            },
            Err(e) => {
                warn!(path = %config_path.display(), error = %e, "unreadable config, using defaults");
                Config::default()
            }
        }
    } else {
        info!(path = %config_path.display(), "no config file, using defaults");
        Config::default()
    };

    apply_env_overrides(config)
}

/// Save configuration to disk (pretty-printed camelCase JSON).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    std::fs::write(&config_path, json)?;
    debug!(path = %config_path.display(), "config saved");
    Ok(())
}

fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(key) = std::env::var("SOTTO_API_KEY") {
        if !key.is_empty() {
            config.provider.api_key = key;
        }
    }
    if let Ok(base) = std::env::var("SOTTO_API_BASE") {
        if !base.is_empty() {
            config.provider.api_base = Some(base);
        }
    }
    if let Ok(model) = std::env::var("SOTTO_MODEL") {
        if !model.is_empty() {
            config.agent.model = model;
        }
    }
    if let Ok(workspace) = std::env::var("SOTTO_WORKSPACE") {
        if !workspace.is_empty() {
            config.agent.workspace = workspace;
        }
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("nope.json")));
        assert_eq!(config.agent.max_iterations, 20);
    }

    #[test]
    fn test_load_invalid_json_gives_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{broken").unwrap();
        let config = load_config(Some(&path));
        assert_eq!(config.compaction.threshold, 50);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.agent.model = "test-model".to_string();
        config.agent.max_concurrent_subagents = 3;
        save_config(&config, Some(&path)).unwrap();

        let loaded = load_config(Some(&path));
        assert_eq!(loaded.agent.model, "test-model");
        assert_eq!(loaded.agent.max_concurrent_subagents, 3);
    }
}
