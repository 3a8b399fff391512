//! Frontend asset handling: expansion of the `javascript` and `css`
//! pattern lists and static file resolution across modules.

use crate::core::error::ChassisError;
use crate::core::fsutil::walk_files_sorted;
use crate::modules::descriptor::ModuleDescriptor;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const STATIC_DIR: &str = "static";

/// Expand an asset pattern list for one module. A plain entry is kept as
/// is; an entry ending in `/*` expands to every file under that prefix,
/// recursively and in sorted path order. Entries naming files that do not
/// exist are a configuration error.
pub fn expand_asset_patterns(
    descriptor: &ModuleDescriptor,
    patterns: &[String],
) -> Result<Vec<String>, ChassisError> {
    let mut expanded = Vec::new();
    for pattern in patterns {
        if let Some(prefix) = pattern.strip_suffix("/*") {
            let dir = descriptor.path.join(prefix);
            for file in walk_files_sorted(&dir, "")? {
                let relative = file
                    .strip_prefix(&descriptor.path)
                    .unwrap_or(&file)
                    .to_string_lossy()
                    .replace('\\', "/");
                expanded.push(relative);
            }
        } else {
            if !descriptor.path.join(pattern).is_file() {
                return Err(ChassisError::Configuration(format!(
                    "module '{}' lists asset '{}' which does not exist",
                    descriptor.module, pattern
                )));
            }
            expanded.push(pattern.clone());
        }
    }
    Ok(expanded)
}

/// All script and stylesheet paths for the application, modules in load
/// order, each path prefixed with its module name.
pub fn bundle_assets(
    module_info: &BTreeMap<String, ModuleDescriptor>,
    load_order: &[String],
) -> Result<(Vec<String>, Vec<String>), ChassisError> {
    let mut scripts = Vec::new();
    let mut styles = Vec::new();
    for name in load_order {
        let descriptor = match module_info.get(name) {
            Some(descriptor) => descriptor,
            None => continue,
        };
        for path in expand_asset_patterns(descriptor, &descriptor.javascript)? {
            scripts.push(format!("{}/{}", name, path));
        }
        for path in expand_asset_patterns(descriptor, &descriptor.css)? {
            styles.push(format!("{}/{}", name, path));
        }
    }
    Ok((scripts, styles))
}

/// Resolve a static file path like `base/static/img/logo.png` to the file
/// shipped by the module furthest down the load order, so a dependent
/// module can shadow a file from one of its dependencies.
pub fn resolve_static_file(
    module_info: &BTreeMap<String, ModuleDescriptor>,
    load_order: &[String],
    relative: &str,
) -> Option<PathBuf> {
    // Reject traversal outside the module roots.
    if relative.split('/').any(|part| part == "..") {
        return None;
    }
    for name in load_order.iter().rev() {
        let descriptor = match module_info.get(name) {
            Some(descriptor) => descriptor,
            None => continue,
        };
        let candidate = descriptor.path.join(STATIC_DIR).join(relative);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}
