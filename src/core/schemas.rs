//! Database schema definitions for the chassis metadata store.

pub const RECORDS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS records (
        collection TEXT NOT NULL,
        id TEXT NOT NULL,
        data TEXT NOT NULL,
        PRIMARY KEY (collection, id)
    )
";

pub const RECORDS_COLLECTION_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection)";

/// Collection holding one record per known module.
pub const MODULES_COLLECTION: &str = "modules";
