//! Database configuration, loadable from TOML or JSON files.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Database-wide settings consulted by the collection subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Reject every document mutation when set.
    pub read_only: bool,
    /// Global trigger switch; per-collection flags are ANDed with it.
    pub triggers_enabled: bool,
    /// Base mode for new collections before the subject's umask is applied.
    pub default_collection_mode: u32,
    /// Base mode for new resources before the subject's umask is applied.
    pub default_resource_mode: u32,
    /// Soft limit on the number of collections kept in the arena.
    pub arena_capacity: usize,
    /// Root of the collection configuration tree.
    pub config_collection: String,
    /// Collection holding temporary resources.
    pub temp_collection: String,
    /// Name suffix identifying collection configuration documents.
    pub config_suffix: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            triggers_enabled: true,
            default_collection_mode: 0o777,
            default_resource_mode: 0o666,
            arena_capacity: 1024,
            config_collection: String::from("/db/system/config"),
            temp_collection: String::from("/db/system/temp"),
            config_suffix: String::from(".xconf"),
        }
    }
}

impl DatabaseConfig {
    /// Loads a config from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: DatabaseConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        if config.default_collection_mode > 0o7777 || config.default_resource_mode > 0o7777 {
            anyhow::bail!("default modes must fit in 12 permission bits");
        }
        Ok(config)
    }

    /// Returns true if `name` designates a collection configuration document.
    pub fn is_config_name(&self, name: &str) -> bool {
        name.ends_with(&self.config_suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = DatabaseConfig::default();
        assert!(!config.read_only);
        assert!(config.triggers_enabled);
        assert_eq!(config.default_collection_mode, 0o777);
        assert_eq!(config.default_resource_mode, 0o666);
        assert_eq!(config.config_collection, "/db/system/config");
        assert_eq!(config.temp_collection, "/db/system/temp");
        assert_eq!(config.config_suffix, ".xconf");
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(file, r#"{{"read_only": true, "arena_capacity": 16}}"#).unwrap();

        let config = DatabaseConfig::from_file(file.path()).unwrap();
        assert!(config.read_only);
        assert_eq!(config.arena_capacity, 16);
        assert_eq!(config.default_resource_mode, 0o666);
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "triggers_enabled = false").unwrap();
        writeln!(file, "default_collection_mode = 493").unwrap();

        let config = DatabaseConfig::from_file(file.path()).unwrap();
        assert!(!config.triggers_enabled);
        assert_eq!(config.default_collection_mode, 0o755);
    }

    #[test]
    fn test_from_file_rejects_unknown_extension() {
        let file = NamedTempFile::with_suffix(".ini").unwrap();
        assert!(DatabaseConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_from_file_rejects_oversized_mode() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "default_resource_mode = 65535").unwrap();
        assert!(DatabaseConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_is_config_name() {
        let config = DatabaseConfig::default();
        assert!(config.is_config_name("collection.xconf"));
        assert!(!config.is_config_name("collection.xml"));
    }
}
