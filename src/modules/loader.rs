//! The module load pipeline: removal of scheduled-out modules, model
//! registration, data import, and the post-load hooks, all in dependency
//! order.

use crate::core::error::ChassisError;
use crate::core::provider::{CondOp, Criteria, DataProvider, Record, Value};
use crate::core::registry::{ModelRegistry, ModelStorage};
use crate::core::schemas::MODULES_COLLECTION;
use crate::modules::descriptor::ModuleDescriptor;
use crate::modules::lifecycle::ModuleManager;
use crate::modules::plugin::{HookArgs, PluginSet};
use crate::modules::records::{ModuleRecord, ModuleStatus};
use crate::views::xml::parse_document;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

pub const DATA_DIR: &str = "data";

/// Load every active module. During a sync, scheduled removals are torn
/// down first and scheduled installs/updates have their data imported;
/// outside a sync, only memory-storage model data is (re)imported.
///
/// Returns the dependency load order of the modules that were loaded.
pub fn load_modules(
    provider: &dyn DataProvider,
    registry: &mut ModelRegistry,
    module_info: &BTreeMap<String, ModuleDescriptor>,
    plugins: &PluginSet,
    sync: bool,
) -> Result<Vec<String>, ChassisError> {
    let manager = ModuleManager::new(provider);

    if sync {
        // Dependents come off before their dependencies.
        for name in manager.removal_order()? {
            info!(module = name.as_str(), "removing module");
            set_module_values(provider, &name, |values| {
                values.insert(
                    "status".to_string(),
                    Value::from(ModuleStatus::NotInstalled.as_code()),
                );
            })?;
        }
    }

    let load_order = manager.load_order()?;
    let records: BTreeMap<String, ModuleRecord> = manager
        .all_records()?
        .into_iter()
        .map(|record| (record.name.clone(), record))
        .collect();

    // Pass 1: hooks around model registration, dependencies first.
    for name in &load_order {
        let descriptor = descriptor_for(module_info, name)?;
        if let Some(plugin) = plugins.get(name) {
            plugin.before_model_load(&HookArgs {
                descriptor,
                registry,
                provider,
                sync,
            })?;
            for model in plugin.models() {
                registry.register(model)?;
            }
            plugin.after_model_load(&HookArgs {
                descriptor,
                registry,
                provider,
                sync,
            })?;
        }
        debug!(module = name.as_str(), "models loaded");
    }

    // Pass 2: data import. Database-backed records are only written while
    // the module is being installed or updated; memory-backed records are
    // rebuilt on every startup.
    for name in &load_order {
        let descriptor = descriptor_for(module_info, name)?;
        let record = records.get(name);
        let installing = matches!(
            record.map(|r| r.status),
            Some(ModuleStatus::ToInstall) | Some(ModuleStatus::ToUpdate)
        );
        let import_database_records = sync && installing;

        import_module_data(
            provider,
            registry,
            descriptor,
            import_database_records,
            sync,
        )?;

        if import_database_records {
            let hash = module_data_hash(&descriptor.path)?;
            let version = descriptor.version.clone();
            set_module_values(provider, name, |values| {
                values.insert(
                    "status".to_string(),
                    Value::from(ModuleStatus::Installed.as_code()),
                );
                values.insert("db_version".to_string(), Value::from(version.clone()));
                values.insert("data_hash".to_string(), Value::from(hash.clone()));
            })?;
            info!(module = name.as_str(), "module installed");
        }

        if let Some(plugin) = plugins.get(name) {
            plugin.after_data_load(&HookArgs {
                descriptor,
                registry,
                provider,
                sync,
            })?;
        }
    }

    // Pass 3: the whole application is assembled; let modules react.
    for name in &load_order {
        if let Some(plugin) = plugins.get(name) {
            plugin.after_app_load(&HookArgs {
                descriptor: descriptor_for(module_info, name)?,
                registry,
                provider,
                sync,
            })?;
        }
    }

    Ok(load_order)
}

fn descriptor_for<'a>(
    module_info: &'a BTreeMap<String, ModuleDescriptor>,
    name: &str,
) -> Result<&'a ModuleDescriptor, ChassisError> {
    module_info.get(name).ok_or_else(|| {
        ChassisError::Configuration(format!(
            "module '{}' is recorded as active but is not present in any module path",
            name
        ))
    })
}

fn set_module_values(
    provider: &dyn DataProvider,
    name: &str,
    fill: impl FnOnce(&mut Record),
) -> Result<(), ChassisError> {
    let mut values = Record::new();
    fill(&mut values);
    provider.update(
        MODULES_COLLECTION,
        &Criteria::field("name", CondOp::Eq, name),
        values,
        None,
    )?;
    Ok(())
}

/// Import one module's `data/*.xml` files. Each top-level element's tag
/// names the model receiving the record. Elements addressed at models
/// that do not exist or do not import are fatal during a sync and warn
/// and skip otherwise.
fn import_module_data(
    provider: &dyn DataProvider,
    registry: &ModelRegistry,
    descriptor: &ModuleDescriptor,
    import_database_records: bool,
    strict: bool,
) -> Result<(), ChassisError> {
    let data_dir = descriptor.path.join(DATA_DIR);
    for file in crate::core::fsutil::walk_files_sorted(&data_dir, "xml")? {
        let relative = file
            .strip_prefix(&descriptor.path)
            .unwrap_or(&file)
            .to_string_lossy()
            .replace('\\', "/");
        let markup = std::fs::read_to_string(&file)?;
        let root = parse_document(&markup, &relative)?;

        for element in root.child_elements() {
            let model = match registry.get(&element.tag) {
                Some(model) => model,
                None => {
                    let err = ChassisError::XmlImport {
                        file: relative.clone(),
                        line: element.line,
                        message: format!("no model named '{}' is registered", element.tag),
                    };
                    if strict {
                        return Err(err);
                    }
                    warn!("skipping record in {}: {}", descriptor.module, err);
                    continue;
                }
            };
            let importer = match &model.importer {
                Some(importer) => importer,
                None => {
                    let err = ChassisError::XmlImport {
                        file: relative.clone(),
                        line: element.line,
                        message: format!("model '{}' does not accept data imports", model.name),
                    };
                    if strict {
                        return Err(err);
                    }
                    warn!("skipping record in {}: {}", descriptor.module, err);
                    continue;
                }
            };
            if model.storage == ModelStorage::Database && !import_database_records {
                continue;
            }
            let target = registry.provider_for(model, provider);
            importer.import_element(model, target, &descriptor.module, element, &relative)?;
        }
    }
    Ok(())
}

/// Content hash over a module's data directory: file paths and bytes, in
/// sorted path order. Identical directory content always hashes the same.
pub fn module_data_hash(module_path: &Path) -> Result<String, ChassisError> {
    let data_dir = module_path.join(DATA_DIR);
    let mut hasher = Sha256::new();
    for file in crate::core::fsutil::walk_files_sorted(&data_dir, "xml")? {
        let relative = file
            .strip_prefix(module_path)
            .unwrap_or(&file)
            .to_string_lossy()
            .replace('\\', "/");
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update(std::fs::read(&file)?);
        hasher.update([0u8]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Installed modules whose on-disk data no longer matches the hash taken
/// at their last install or update.
pub fn modules_with_changed_data(
    provider: &dyn DataProvider,
    module_info: &BTreeMap<String, ModuleDescriptor>,
) -> Result<Vec<String>, ChassisError> {
    let manager = ModuleManager::new(provider);
    let mut changed = Vec::new();
    for record in manager.all_records()? {
        if record.status != ModuleStatus::Installed {
            continue;
        }
        let descriptor = match module_info.get(&record.name) {
            Some(descriptor) => descriptor,
            None => continue,
        };
        let hash = module_data_hash(&descriptor.path)?;
        if record.data_hash.as_deref() != Some(hash.as_str()) {
            changed.push(record.name.clone());
        }
    }
    Ok(changed)
}
