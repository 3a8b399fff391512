//! In-memory [`DataProvider`] used by tests and transient model data.

use crate::core::error::ChassisError;
use crate::core::provider::{
    shape_results, Criteria, DataProvider, FindOptions, Record, Value,
};
use rustc_hash::FxHashMap;
use std::sync::Mutex;
use ulid::Ulid;

#[derive(Default)]
pub struct MemoryProvider {
    // Insertion order is preserved per collection so that unordered queries
    // stay deterministic.
    collections: Mutex<FxHashMap<String, Vec<(String, Record)>>>,
}

impl MemoryProvider {
    pub fn new() -> MemoryProvider {
        MemoryProvider::default()
    }
}

impl DataProvider for MemoryProvider {
    fn find(
        &self,
        collection: &str,
        criteria: &Criteria,
        options: &FindOptions,
    ) -> Result<Vec<Record>, ChassisError> {
        let collections = self.collections.lock().unwrap();
        let records = collections
            .get(collection)
            .map(|records| {
                records
                    .iter()
                    .map(|(id, record)| {
                        let mut full = record.clone();
                        full.insert("id".to_string(), Value::Text(id.clone()));
                        full
                    })
                    .filter(|record| criteria.matches(record))
                    .collect()
            })
            .unwrap_or_default();
        Ok(shape_results(records, options))
    }

    fn create(&self, collection: &str, mut values: Record) -> Result<String, ChassisError> {
        let mut collections = self.collections.lock().unwrap();
        let id = Ulid::new().to_string();
        values.remove("id");
        collections
            .entry(collection.to_string())
            .or_default()
            .push((id.clone(), values));
        Ok(id)
    }

    fn update(
        &self,
        collection: &str,
        criteria: &Criteria,
        values: Record,
        limit: Option<usize>,
    ) -> Result<bool, ChassisError> {
        let mut collections = self.collections.lock().unwrap();
        let mut updated = false;
        let mut remaining = limit.unwrap_or(usize::MAX);
        if let Some(records) = collections.get_mut(collection) {
            for (id, record) in records.iter_mut() {
                if remaining == 0 {
                    break;
                }
                let mut full = record.clone();
                full.insert("id".to_string(), Value::Text(id.clone()));
                if !criteria.matches(&full) {
                    continue;
                }
                for (field, value) in &values {
                    if field != "id" {
                        record.insert(field.clone(), value.clone());
                    }
                }
                updated = true;
                remaining -= 1;
            }
        }
        Ok(updated)
    }

    fn delete(
        &self,
        collection: &str,
        criteria: &Criteria,
        limit: Option<usize>,
    ) -> Result<bool, ChassisError> {
        let mut collections = self.collections.lock().unwrap();
        let mut deleted = false;
        let mut remaining = limit.unwrap_or(usize::MAX);
        if let Some(records) = collections.get_mut(collection) {
            records.retain(|(id, record)| {
                if remaining == 0 {
                    return true;
                }
                let mut full = record.clone();
                full.insert("id".to_string(), Value::Text(id.clone()));
                if criteria.matches(&full) {
                    deleted = true;
                    remaining -= 1;
                    false
                } else {
                    true
                }
            });
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::provider::CondOp;

    #[test]
    fn test_create_find_update_delete_cycle() {
        let provider = MemoryProvider::new();
        let mut rec = Record::new();
        rec.insert("name".to_string(), Value::from("base"));
        provider.create("modules", rec).unwrap();

        let criteria = Criteria::field("name", CondOp::Eq, "base");
        assert_eq!(
            provider
                .find("modules", &criteria, &FindOptions::default())
                .unwrap()
                .len(),
            1
        );

        let mut change = Record::new();
        change.insert("status".to_string(), Value::from("installed"));
        assert!(provider.update("modules", &criteria, change, None).unwrap());

        assert!(provider.delete("modules", &criteria, None).unwrap());
        assert!(provider
            .find("modules", &Criteria::all(), &FindOptions::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_find_missing_collection_is_empty() {
        let provider = MemoryProvider::new();
        let found = provider
            .find("ghosts", &Criteria::all(), &FindOptions::default())
            .unwrap();
        assert!(found.is_empty());
    }
}
