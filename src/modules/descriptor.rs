//! Module descriptor discovery.
//!
//! Every module directory must carry a `module.toml` manifest. The manifest
//! is a plain declarative document, never executed code; a strict schema
//! with an explicitly required `depends` key keeps discovery predictable.

use crate::core::error::ChassisError;
use crate::core::fsutil;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DESCRIPTOR_FILE: &str = "module.toml";

/// A module's declarative manifest, re-read on every lifecycle check.
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    /// Unique key: the module's directory name.
    pub module: String,
    /// Human-readable name.
    pub name: String,
    pub description: String,
    pub version: String,
    /// Names of modules this one depends on. Always declared explicitly,
    /// even if empty.
    pub depends: Vec<String>,
    /// Install this module whenever it is discovered, without it being
    /// listed in the operator's installed set.
    pub auto_install: bool,
    /// Asset path patterns; a trailing wildcard segment means "recursively
    /// include all matching files under this path".
    pub javascript: Vec<String>,
    pub css: Vec<String>,
    /// Absolute path of the module directory.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RawDescriptor {
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default = "default_version")]
    version: String,
    /// Required, may be empty. `Option` so its absence can be reported as a
    /// configuration error rather than silently defaulting.
    depends: Option<Vec<String>>,
    #[serde(default)]
    auto_install: bool,
    #[serde(default)]
    javascript: Vec<String>,
    #[serde(default)]
    css: Vec<String>,
}

fn default_version() -> String {
    "0.0.0".to_string()
}

/// Scan the configured module roots and collect every module's metadata.
///
/// Fatal on structural problems: a missing root directory, a module
/// directory without a manifest, or a manifest without a `depends` key.
/// A module name already found under an earlier root shadows later ones
/// (warning only).
pub fn load_descriptors(
    module_paths: &[PathBuf],
) -> Result<BTreeMap<String, ModuleDescriptor>, ChassisError> {
    info!(
        "module paths: {}",
        module_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(",")
    );

    let mut descriptors: BTreeMap<String, ModuleDescriptor> = BTreeMap::new();

    for module_path in module_paths {
        if !module_path.is_dir() {
            return Err(ChassisError::Configuration(format!(
                "module path '{}' is not a directory",
                module_path.display()
            )));
        }

        for module_dir in fsutil::subdirs_sorted(module_path)? {
            let module = module_dir
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();

            if let Some(existing) = descriptors.get(&module) {
                warn!(
                    "module '{}' at '{}' is shadowed by '{}'",
                    module,
                    module_dir.display(),
                    existing.path.display()
                );
                continue;
            }

            descriptors.insert(module.clone(), load_descriptor(&module, &module_dir)?);
        }
    }

    Ok(descriptors)
}

fn load_descriptor(module: &str, module_dir: &Path) -> Result<ModuleDescriptor, ChassisError> {
    let manifest_path = module_dir.join(DESCRIPTOR_FILE);
    if !manifest_path.is_file() {
        return Err(ChassisError::Configuration(format!(
            "module '{}' has no {} file",
            module, DESCRIPTOR_FILE
        )));
    }

    let content = fs::read_to_string(&manifest_path)?;
    let raw: RawDescriptor = toml::from_str(&content).map_err(|e| {
        ChassisError::Configuration(format!(
            "invalid manifest '{}': {}",
            manifest_path.display(),
            e
        ))
    })?;

    let depends = raw.depends.ok_or_else(|| {
        ChassisError::Configuration(format!(
            "module '{}' {} does not contain any dependency information",
            module, DESCRIPTOR_FILE
        ))
    })?;

    Ok(ModuleDescriptor {
        module: module.to_string(),
        name: raw.name.unwrap_or_else(|| module.to_string()),
        description: raw.description,
        version: raw.version,
        depends,
        auto_install: raw.auto_install,
        javascript: raw.javascript,
        css: raw.css,
        path: module_dir.to_path_buf(),
    })
}
