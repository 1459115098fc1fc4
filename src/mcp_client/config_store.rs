//! Durable server registry.
//!
//! Launch configurations keyed by server name, persisted as
//! `{"servers": [...]}` with an atomic temp-file + rename on every mutation.
//! A missing or unreadable file yields an empty store, never an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::McpError;
use super::types::ServerConfig;

/// On-disk shape of the store.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ServersFile {
    #[serde(default)]
    servers: Vec<ServerConfig>,
}

/// Name → launch configuration, optionally backed by a JSON file.
#[derive(Debug, Default)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    servers: BTreeMap<String, ServerConfig>,
}

impl ConfigStore {
    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`. Missing or corrupt files start an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut store = Self {
            path: Some(path.clone()),
            servers: BTreeMap::new(),
        };

        if !path.exists() {
            tracing::debug!(path = %path.display(), "no server config file yet");
            return store;
        }

        let file = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<ServersFile>(&content) {
                Ok(file) => file,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to parse server config, starting empty"
                    );
                    return store;
                }
            },
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to read server config, starting empty"
                );
                return store;
            }
        };

        for config in file.servers {
            if let Err(reason) = config.validate() {
                tracing::warn!(reason = %reason, "skipping invalid server entry");
                continue;
            }
            if store.servers.contains_key(&config.name) {
                tracing::warn!(server = %config.name, "duplicate server entry, keeping the first");
                continue;
            }
            store.servers.insert(config.name.clone(), config);
        }

        tracing::info!(
            path = %path.display(),
            servers = store.servers.len(),
            "loaded server config"
        );
        store
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Register `default` if the store holds no servers at all.
    ///
    /// Returns whether the entry was added.
    pub fn bootstrap(&mut self, default: ServerConfig) -> Result<bool, McpError> {
        if !self.servers.is_empty() {
            return Ok(false);
        }
        tracing::info!(server = %default.name, "registering default server");
        self.add(default)?;
        Ok(true)
    }

    /// Add a new configuration and persist.
    pub fn add(&mut self, config: ServerConfig) -> Result<(), McpError> {
        config
            .validate()
            .map_err(|reason| McpError::ConfigError { reason })?;
        if self.servers.contains_key(&config.name) {
            return Err(McpError::DuplicateServer { name: config.name });
        }

        let name = config.name.clone();
        self.servers.insert(name.clone(), config);
        if let Err(e) = self.save() {
            self.servers.remove(&name);
            return Err(e);
        }
        Ok(())
    }

    /// Remove a configuration and persist. `Ok(false)` if it did not exist.
    pub fn remove(&mut self, name: &str) -> Result<bool, McpError> {
        let Some(config) = self.servers.remove(name) else {
            return Ok(false);
        };
        if let Err(e) = self.save() {
            self.servers.insert(name.to_string(), config);
            return Err(e);
        }
        Ok(true)
    }

    pub fn get(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    /// All configurations, sorted by name.
    pub fn list(&self) -> Vec<ServerConfig> {
        self.servers.values().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Write the store to disk (atomic write). No-op for in-memory stores.
    fn save(&self) -> Result<(), McpError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let file = ServersFile {
            servers: self.list(),
        };
        let content = serde_json::to_string_pretty(&file).map_err(|e| McpError::ConfigError {
            reason: format!("failed to serialize server config: {e}"),
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| McpError::ConfigError {
                reason: format!("failed to create {}: {e}", parent.display()),
            })?;
        }
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content).map_err(|e| McpError::ConfigError {
            reason: format!("failed to write {}: {e}", tmp_path.display()),
        })?;
        std::fs::rename(&tmp_path, path).map_err(|e| McpError::ConfigError {
            reason: format!("failed to replace {}: {e}", path.display()),
        })?;

        tracing::debug!(path = %path.display(), servers = self.servers.len(), "saved server config");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_path(dir: &TempDir) -> PathBuf {
        dir.path().join("mcp").join("servers.json")
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::load(store_path(&dir));
        assert!(store.is_empty());
    }

    #[test]
    fn test_round_trip_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);

        let mut store = ConfigStore::load(&path);
        let config = ServerConfig::new("weather", ["python3", "-m", "weather"])
            .with_args(["--units", "metric"])
            .with_env("API_KEY", "abc")
            .with_description("Weather lookups");
        store.add(config.clone()).unwrap();
        store
            .add(ServerConfig::new("calculator", ["orionai-mcp", "serve", "calculator"]))
            .unwrap();

        let reloaded = ConfigStore::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("weather"), Some(&config));
        assert_eq!(reloaded.names(), vec!["calculator", "weather"]);
    }

    #[test]
    fn test_duplicate_and_invalid_rejected() {
        let mut store = ConfigStore::in_memory();
        store.add(ServerConfig::new("a", ["bin"])).unwrap();

        let err = store.add(ServerConfig::new("a", ["other"])).unwrap_err();
        assert!(matches!(err, McpError::DuplicateServer { .. }));

        let err = store.add(ServerConfig::new("bad name", ["bin"])).unwrap_err();
        assert!(matches!(err, McpError::ConfigError { .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_persists() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);
        let mut store = ConfigStore::load(&path);
        store.add(ServerConfig::new("a", ["bin"])).unwrap();

        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
        assert!(ConfigStore::load(&path).is_empty());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let mut store = ConfigStore::load(&path);
        assert!(store.is_empty());

        // the next mutation overwrites the corrupt file
        store.add(ServerConfig::new("a", ["bin"])).unwrap();
        assert_eq!(ConfigStore::load(&path).len(), 1);
    }

    #[test]
    fn test_invalid_entries_skipped_on_load() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{"servers": [
                {"name": "ok", "command": ["bin"]},
                {"name": "", "command": ["bin"]},
                {"name": "ok", "command": ["second"]}
            ]}"#,
        )
        .unwrap();

        let store = ConfigStore::load(&path);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("ok").unwrap().command, vec!["bin"]);
    }

    #[test]
    fn test_bootstrap_only_when_empty() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);
        let default = ServerConfig::new("calculator", ["orionai-mcp", "serve", "calculator"]);

        let mut store = ConfigStore::load(&path);
        assert!(store.bootstrap(default.clone()).unwrap());
        assert!(!store.bootstrap(default.clone()).unwrap());

        let mut reloaded = ConfigStore::load(&path);
        assert!(!reloaded.bootstrap(default).unwrap());
        assert_eq!(reloaded.names(), vec!["calculator"]);
    }

    #[test]
    fn test_write_is_atomic() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);
        let mut store = ConfigStore::load(&path);
        store.add(ServerConfig::new("a", ["bin"])).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
