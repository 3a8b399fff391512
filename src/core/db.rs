//! SQLite-backed [`DataProvider`].
//!
//! Records are stored as JSON documents keyed by `(collection, id)`; criteria
//! are evaluated in-process after fetching the collection. Module metadata is
//! small (one record per module), so no per-field indexing is needed.

use crate::core::error::ChassisError;
use crate::core::provider::{
    shape_results, Criteria, DataProvider, FindOptions, Record, Value,
};
use crate::core::schemas;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use ulid::Ulid;

pub fn db_connect(db_path: &str) -> Result<Connection, ChassisError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(ChassisError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(ChassisError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(ChassisError::RusqliteError)?;
    Ok(conn)
}

pub struct SqliteProvider {
    conn: Mutex<Connection>,
}

impl SqliteProvider {
    pub fn open(db_path: &Path) -> Result<SqliteProvider, ChassisError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(ChassisError::IoError)?;
            }
        }
        let conn = db_connect(&db_path.to_string_lossy())?;
        conn.execute(schemas::RECORDS_SCHEMA, [])?;
        conn.execute(schemas::RECORDS_COLLECTION_INDEX, [])?;
        Ok(SqliteProvider {
            conn: Mutex::new(conn),
        })
    }

    fn load_collection(
        conn: &Connection,
        collection: &str,
    ) -> Result<Vec<(String, Record)>, ChassisError> {
        let mut stmt =
            conn.prepare("SELECT id, data FROM records WHERE collection = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, data) = row?;
            let mut record: Record = serde_json::from_str(&data).map_err(|e| {
                ChassisError::Validation(format!(
                    "corrupt record '{}' in collection '{}': {}",
                    id, collection, e
                ))
            })?;
            record.insert("id".to_string(), Value::Text(id.clone()));
            records.push((id, record));
        }
        Ok(records)
    }

    fn store_record(
        conn: &Connection,
        collection: &str,
        id: &str,
        record: &Record,
    ) -> Result<(), ChassisError> {
        let mut data = record.clone();
        data.remove("id");
        let json = serde_json::to_string(&data)
            .map_err(|e| ChassisError::Validation(format!("unserializable record: {}", e)))?;
        conn.execute(
            "INSERT INTO records (collection, id, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(collection, id) DO UPDATE SET data = excluded.data",
            params![collection, id, json],
        )?;
        Ok(())
    }
}

impl DataProvider for SqliteProvider {
    fn find(
        &self,
        collection: &str,
        criteria: &Criteria,
        options: &FindOptions,
    ) -> Result<Vec<Record>, ChassisError> {
        let conn = self.conn.lock().unwrap();
        let records = Self::load_collection(&conn, collection)?
            .into_iter()
            .map(|(_, record)| record)
            .filter(|record| criteria.matches(record))
            .collect();
        Ok(shape_results(records, options))
    }

    fn create(&self, collection: &str, mut values: Record) -> Result<String, ChassisError> {
        let conn = self.conn.lock().unwrap();
        let id = Ulid::new().to_string();
        values.remove("id");
        Self::store_record(&conn, collection, &id, &values)?;
        Ok(id)
    }

    fn update(
        &self,
        collection: &str,
        criteria: &Criteria,
        values: Record,
        limit: Option<usize>,
    ) -> Result<bool, ChassisError> {
        let conn = self.conn.lock().unwrap();
        let mut updated = false;
        let mut remaining = limit.unwrap_or(usize::MAX);
        for (id, mut record) in Self::load_collection(&conn, collection)? {
            if remaining == 0 {
                break;
            }
            if !criteria.matches(&record) {
                continue;
            }
            for (field, value) in &values {
                record.insert(field.clone(), value.clone());
            }
            Self::store_record(&conn, collection, &id, &record)?;
            updated = true;
            remaining -= 1;
        }
        Ok(updated)
    }

    fn delete(
        &self,
        collection: &str,
        criteria: &Criteria,
        limit: Option<usize>,
    ) -> Result<bool, ChassisError> {
        let conn = self.conn.lock().unwrap();
        let mut deleted = false;
        let mut remaining = limit.unwrap_or(usize::MAX);
        for (id, record) in Self::load_collection(&conn, collection)? {
            if remaining == 0 {
                break;
            }
            if !criteria.matches(&record) {
                continue;
            }
            conn.execute(
                "DELETE FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )?;
            deleted = true;
            remaining -= 1;
        }
        Ok(deleted)
    }
}
