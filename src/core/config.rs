//! Application settings loaded from a TOML configuration file.
//!
//! The configuration names the module root directories to scan, the set of
//! modules the operator wants installed, and where the metadata database
//! lives. Everything else is derived from module descriptors at load time.

use crate::core::error::ChassisError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "chassis.toml";
pub const DEFAULT_DB_FILE: &str = "chassis.db";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Directories scanned for module subdirectories, in search order.
    /// A module name found under an earlier root shadows later ones.
    pub module_paths: Vec<PathBuf>,
    /// Modules the operator wants installed (dependencies are pulled in
    /// automatically).
    #[serde(default)]
    pub installed_modules: Vec<String>,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Use the in-memory provider instead of SQLite. Intended for tests
    /// and throwaway runs; nothing survives the process.
    #[serde(default)]
    pub in_memory: bool,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_DB_FILE)
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: default_db_path(),
            in_memory: false,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<AppConfig, ChassisError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ChassisError::Configuration(format!(
                "cannot read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: AppConfig = toml::from_str(&content).map_err(|e| {
            ChassisError::Configuration(format!(
                "invalid config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        if config.module_paths.is_empty() {
            return Err(ChassisError::Configuration(format!(
                "config file '{}' does not declare any module_paths",
                path.display()
            )));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chassis.toml");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "module_paths = [\"mods\"]").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.module_paths, vec![PathBuf::from("mods")]);
        assert!(config.installed_modules.is_empty());
        assert_eq!(config.database.path, PathBuf::from(DEFAULT_DB_FILE));
    }

    #[test]
    fn test_empty_module_paths_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chassis.toml");
        fs::write(&path, "module_paths = []\n").unwrap();

        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, ChassisError::Configuration(_)));
    }

    #[test]
    fn test_missing_config_file_is_fatal() {
        let err = AppConfig::load(Path::new("/nonexistent/chassis.toml")).unwrap_err();
        assert!(matches!(err, ChassisError::Configuration(_)));
    }
}
