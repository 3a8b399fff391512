//! Metadata differ: on-disk descriptors vs persisted module records.
//!
//! The diff is pure; callers decide whether to persist it. Only the fixed
//! set of mapped metadata fields is compared, never arbitrary keys.

use crate::core::provider::Record;
use crate::modules::descriptor::ModuleDescriptor;
use crate::modules::records::descriptor_values;
use std::collections::BTreeMap;

pub const MODULE_META_FIELDS: &[&str] = &[
    "name",
    "module_name",
    "description",
    "version",
    "depends",
    "auto_install",
];

#[derive(Debug, Default, PartialEq)]
pub struct MetadataDiff {
    /// Modules on disk with no database record.
    pub new: Vec<String>,
    /// Module name to the list of changed metadata fields.
    pub changed: BTreeMap<String, Vec<String>>,
    /// Database modules with no on-disk descriptor.
    pub removed: Vec<String>,
}

impl MetadataDiff {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Operator-facing description of the pending differences.
    pub fn describe(&self) -> String {
        let mut out = String::from(
            "The following module metadata differences were detected between \
             this installation and the database:",
        );
        if !self.new.is_empty() {
            out.push_str("\nNEW MODULES: ");
            out.push_str(&self.new.join(", "));
        }
        if !self.removed.is_empty() {
            out.push_str("\nREMOVED MODULES: ");
            out.push_str(&self.removed.join(", "));
        }
        if !self.changed.is_empty() {
            out.push_str("\nCHANGED MODULES:");
            for (module, fields) in &self.changed {
                out.push_str(&format!("\n  MODULE: {}", module));
                out.push_str(&format!("\n    UPDATED KEYS: {}", fields.join(", ")));
            }
        }
        out
    }
}

pub fn diff_metadata(
    descriptors: &BTreeMap<String, ModuleDescriptor>,
    db_records: &[Record],
) -> MetadataDiff {
    let mut diff = MetadataDiff::default();

    let by_name: BTreeMap<&str, &Record> = db_records
        .iter()
        .filter_map(|record| {
            record
                .get("name")
                .and_then(crate::core::provider::Value::as_str)
                .map(|name| (name, record))
        })
        .collect();

    for (name, descriptor) in descriptors {
        match by_name.get(name.as_str()) {
            None => diff.new.push(name.clone()),
            Some(db_record) => {
                let disk_values = descriptor_values(descriptor);
                let mut changed_fields = Vec::new();
                for field in MODULE_META_FIELDS {
                    let disk = disk_values.get(*field);
                    let db = db_record.get(*field);
                    if disk != db {
                        changed_fields.push(field.to_string());
                    }
                }
                if !changed_fields.is_empty() {
                    diff.changed.insert(name.clone(), changed_fields);
                }
            }
        }
    }

    for name in by_name.keys() {
        if !descriptors.contains_key(*name) {
            diff.removed.push(name.to_string());
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::provider::Value;
    use std::path::PathBuf;

    fn descriptor(name: &str, version: &str, depends: &[&str]) -> ModuleDescriptor {
        ModuleDescriptor {
            module: name.to_string(),
            name: name.to_string(),
            description: String::new(),
            version: version.to_string(),
            depends: depends.iter().map(|d| d.to_string()).collect(),
            auto_install: false,
            javascript: vec![],
            css: vec![],
            path: PathBuf::from(name),
        }
    }

    fn record_for(descriptor: &ModuleDescriptor) -> Record {
        descriptor_values(descriptor)
    }

    #[test]
    fn test_new_module_detected() {
        let mut descriptors = BTreeMap::new();
        descriptors.insert("base".to_string(), descriptor("base", "1.0", &[]));

        let diff = diff_metadata(&descriptors, &[]);
        assert_eq!(diff.new, vec!["base".to_string()]);
        assert!(diff.changed.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn test_changed_fields_reported_per_field() {
        let old = descriptor("base", "1.0", &[]);
        let mut descriptors = BTreeMap::new();
        descriptors.insert("base".to_string(), descriptor("base", "2.0", &["other"]));

        let diff = diff_metadata(&descriptors, &[record_for(&old)]);
        assert_eq!(
            diff.changed["base"],
            vec!["version".to_string(), "depends".to_string()]
        );
    }

    #[test]
    fn test_human_name_change_detected() {
        let old = descriptor("base", "1.0", &[]);
        let mut renamed = descriptor("base", "1.0", &[]);
        renamed.name = "Fancy Base".to_string();
        let mut descriptors = BTreeMap::new();
        descriptors.insert("base".to_string(), renamed);

        let diff = diff_metadata(&descriptors, &[record_for(&old)]);
        assert_eq!(diff.changed["base"], vec!["module_name".to_string()]);
    }

    #[test]
    fn test_removed_module_detected() {
        let gone = descriptor("gone", "1.0", &[]);
        let diff = diff_metadata(&BTreeMap::new(), &[record_for(&gone)]);
        assert_eq!(diff.removed, vec!["gone".to_string()]);
    }

    #[test]
    fn test_unmapped_fields_ignored() {
        let base = descriptor("base", "1.0", &[]);
        let mut record = record_for(&base);
        record.insert("db_version".to_string(), Value::from("0.9"));
        record.insert("status".to_string(), Value::from("installed"));

        let mut descriptors = BTreeMap::new();
        descriptors.insert("base".to_string(), base);

        let diff = diff_metadata(&descriptors, &[record]);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_diff_is_idempotent() {
        let base = descriptor("base", "1.0", &[]);
        let records = vec![record_for(&base)];
        let mut descriptors = BTreeMap::new();
        descriptors.insert("base".to_string(), base);

        let first = diff_metadata(&descriptors, &records);
        let second = diff_metadata(&descriptors, &records);
        assert!(first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn test_describe_lists_sections() {
        let mut diff = MetadataDiff::default();
        diff.new.push("fresh".to_string());
        diff.changed
            .insert("base".to_string(), vec!["version".to_string()]);
        diff.removed.push("gone".to_string());

        let text = diff.describe();
        assert!(text.contains("NEW MODULES: fresh"));
        assert!(text.contains("REMOVED MODULES: gone"));
        assert!(text.contains("UPDATED KEYS: version"));
    }
}
