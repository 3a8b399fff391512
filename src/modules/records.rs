//! Persisted module records and the module status enum.

use crate::core::error::ChassisError;
use crate::core::provider::{Record, Value};
use crate::modules::descriptor::ModuleDescriptor;

/// Lifecycle state of a module, as stored in its database record.
///
/// Invariant maintained by the scheduler: a module's dependencies are never
/// strictly "less installed" than the module itself while it is in
/// `Installed`, `ToInstall` or `ToUpdate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStatus {
    NotInstalled,
    ToInstall,
    Installed,
    ToUpdate,
    ToRemove,
}

impl ModuleStatus {
    pub fn as_code(&self) -> &'static str {
        match self {
            ModuleStatus::NotInstalled => "not_installed",
            ModuleStatus::ToInstall => "to_install",
            ModuleStatus::Installed => "installed",
            ModuleStatus::ToUpdate => "to_update",
            ModuleStatus::ToRemove => "to_remove",
        }
    }

    pub fn parse(code: &str) -> Result<ModuleStatus, ChassisError> {
        match code {
            "not_installed" => Ok(ModuleStatus::NotInstalled),
            "to_install" => Ok(ModuleStatus::ToInstall),
            "installed" => Ok(ModuleStatus::Installed),
            "to_update" => Ok(ModuleStatus::ToUpdate),
            "to_remove" => Ok(ModuleStatus::ToRemove),
            other => Err(ChassisError::Validation(format!(
                "unknown module status '{}'",
                other
            ))),
        }
    }

    /// Statuses of modules that participate in the load order.
    pub fn active_codes() -> Vec<String> {
        vec![
            "installed".to_string(),
            "to_install".to_string(),
            "to_update".to_string(),
        ]
    }

    /// Statuses with a pending scheduled operation.
    pub fn pending_codes() -> Vec<String> {
        vec![
            "to_install".to_string(),
            "to_update".to_string(),
            "to_remove".to_string(),
        ]
    }
}

/// Typed view over a module's database record.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    pub name: String,
    /// Human-readable name from the manifest.
    pub module_name: String,
    pub description: String,
    pub version: String,
    /// Version last synchronized to the database.
    pub db_version: String,
    pub depends: Vec<String>,
    pub auto_install: bool,
    pub status: ModuleStatus,
    /// Content hash of the module's imported data directory.
    pub data_hash: Option<String>,
}

impl ModuleRecord {
    pub fn from_record(record: &Record) -> Result<ModuleRecord, ChassisError> {
        let text = |field: &str| {
            record
                .get(field)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let name = record
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ChassisError::Validation("module record is missing its name".to_string())
            })?
            .to_string();
        let status = ModuleStatus::parse(
            record
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("not_installed"),
        )?;
        let depends = record
            .get("depends")
            .and_then(Value::as_list)
            .unwrap_or_default()
            .to_vec();
        let auto_install = matches!(record.get("auto_install"), Some(Value::Bool(true)));
        let data_hash = record
            .get("data_hash")
            .and_then(Value::as_str)
            .map(|s| s.to_string());

        Ok(ModuleRecord {
            name,
            module_name: text("module_name"),
            description: text("description"),
            version: text("version"),
            db_version: text("db_version"),
            depends,
            auto_install,
            status,
            data_hash,
        })
    }
}

/// The mapped metadata fields taken from a descriptor into its record.
/// Only these are compared by the metadata differ.
pub fn descriptor_values(descriptor: &ModuleDescriptor) -> Record {
    let mut values = Record::new();
    values.insert("name".to_string(), Value::from(descriptor.module.clone()));
    values.insert(
        "module_name".to_string(),
        Value::from(descriptor.name.clone()),
    );
    values.insert(
        "description".to_string(),
        Value::from(descriptor.description.clone()),
    );
    values.insert(
        "version".to_string(),
        Value::from(descriptor.version.clone()),
    );
    values.insert("depends".to_string(), Value::from(descriptor.depends.clone()));
    values.insert(
        "auto_install".to_string(),
        Value::from(descriptor.auto_install),
    );
    values
}
