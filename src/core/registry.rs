//! Model registry: the set of record models contributed by module
//! plugins, plus the XML data importer that feeds them.

use crate::core::error::ChassisError;
use crate::core::memory::MemoryProvider;
use crate::core::provider::{CondOp, Criteria, DataProvider, FindOptions, Record, Value};
use crate::views::xml::Element;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

fn xml_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^[A-Za-z0-9_]+$").unwrap())
}

/// Where a model's records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStorage {
    /// Persisted through the application's data provider.
    Database,
    /// Held in the registry's in-process store and re-imported on every
    /// startup.
    Memory,
}

/// Declarative description of a record model. Plugins return these from
/// `models()`; nothing here is executable.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    /// Model name; also the tag matched in module data files.
    pub name: String,
    /// Collection the records are stored in.
    pub collection: String,
    pub storage: ModelStorage,
    /// Present when the model accepts records from module data files.
    pub importer: Option<XmlImporter>,
}

impl ModelDescriptor {
    pub fn database(name: &str, collection: &str) -> ModelDescriptor {
        ModelDescriptor {
            name: name.to_string(),
            collection: collection.to_string(),
            storage: ModelStorage::Database,
            importer: None,
        }
    }

    pub fn memory(name: &str, collection: &str) -> ModelDescriptor {
        ModelDescriptor {
            name: name.to_string(),
            collection: collection.to_string(),
            storage: ModelStorage::Memory,
            importer: None,
        }
    }

    pub fn with_importer(mut self, importer: XmlImporter) -> ModelDescriptor {
        self.importer = Some(importer);
        self
    }
}

/// XML import rules for a model: element attributes become record fields
/// and, optionally, the element body is serialized into one field.
#[derive(Debug, Clone, Default)]
pub struct XmlImporter {
    /// Field that receives the serialized element body, if any.
    pub content_field: Option<String>,
}

impl XmlImporter {
    pub fn with_content_field(field: &str) -> XmlImporter {
        XmlImporter {
            content_field: Some(field.to_string()),
        }
    }

    /// Import one data element. New records are keyed by
    /// `(xml_module, xml_id)` and upserted; an element carrying a
    /// `modify` attribute updates a record owned by another module
    /// instead of creating one.
    pub fn import_element(
        &self,
        model: &ModelDescriptor,
        provider: &dyn DataProvider,
        module: &str,
        element: &Element,
        file: &str,
    ) -> Result<(), ChassisError> {
        let mut values = Record::new();
        for (attr, value) in &element.attrs {
            if attr == "id" || attr == "modify" {
                continue;
            }
            values.insert(attr.clone(), Value::from(value.clone()));
        }
        if let Some(field) = &self.content_field {
            values.insert(field.clone(), Value::from(element.inner_markup()));
        }

        if let Some(target) = element.attr("modify") {
            let (target_module, target_id) =
                target.split_once('.').ok_or_else(|| ChassisError::XmlImport {
                    file: file.to_string(),
                    line: element.line,
                    message: format!(
                        "modify target '{}' must be of the form 'module.record_id'",
                        target
                    ),
                })?;
            let criteria = Criteria::field("xml_module", CondOp::Eq, target_module)
                .and("xml_id", CondOp::Eq, target_id);
            let matched =
                provider.find(&model.collection, &criteria, &FindOptions::default())?;
            return match matched.len() {
                1 => {
                    provider.update(&model.collection, &criteria, values, None)?;
                    Ok(())
                }
                0 => Err(ChassisError::XmlImport {
                    file: file.to_string(),
                    line: element.line,
                    message: format!("modify target '{}' does not exist", target),
                }),
                n => Err(ChassisError::XmlImport {
                    file: file.to_string(),
                    line: element.line,
                    message: format!("modify target '{}' matches {} records", target, n),
                }),
            };
        }

        let id = element.attr("id").ok_or_else(|| ChassisError::XmlImport {
            file: file.to_string(),
            line: element.line,
            message: format!("<{}> element is missing an 'id' attribute", element.tag),
        })?;
        if !xml_id_pattern().is_match(id) {
            return Err(ChassisError::XmlImport {
                file: file.to_string(),
                line: element.line,
                message: format!(
                    "record id '{}' is invalid; only letters, digits and underscores are allowed",
                    id
                ),
            });
        }
        values.insert("xml_module".to_string(), Value::from(module));
        values.insert("xml_id".to_string(), Value::from(id));

        let criteria = Criteria::field("xml_module", CondOp::Eq, module)
            .and("xml_id", CondOp::Eq, id);
        let existing = provider.find(&model.collection, &criteria, &FindOptions::default())?;
        match existing.len() {
            0 => {
                provider.create(&model.collection, values)?;
                Ok(())
            }
            1 => {
                provider.update(&model.collection, &criteria, values, None)?;
                Ok(())
            }
            n => Err(ChassisError::XmlImport {
                file: file.to_string(),
                line: element.line,
                message: format!(
                    "record '{}.{}' matches {} stored records; the store is inconsistent",
                    module, id, n
                ),
            }),
        }
    }
}

/// Registry of all models contributed by loaded plugins. Each model name
/// may be registered exactly once; it also owns the in-process store
/// backing memory-storage models.
#[derive(Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelDescriptor>,
    memory: MemoryProvider,
}

impl ModelRegistry {
    pub fn new() -> ModelRegistry {
        ModelRegistry::default()
    }

    pub fn register(&mut self, model: ModelDescriptor) -> Result<(), ChassisError> {
        if self.models.contains_key(&model.name) {
            return Err(ChassisError::Validation(format!(
                "model '{}' is already registered",
                model.name
            )));
        }
        debug!(model = model.name.as_str(), collection = model.collection.as_str(), "registered model");
        self.models.insert(model.name.clone(), model);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ModelDescriptor> {
        self.models.get(name)
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.values()
    }

    pub fn memory_store(&self) -> &MemoryProvider {
        &self.memory
    }

    /// The store a given model reads and writes.
    pub fn provider_for<'a>(
        &'a self,
        model: &ModelDescriptor,
        database: &'a dyn DataProvider,
    ) -> &'a dyn DataProvider {
        match model.storage {
            ModelStorage::Database => database,
            ModelStorage::Memory => &self.memory,
        }
    }
}
