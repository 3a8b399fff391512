//! Database provider contract.
//!
//! The lifecycle manager and model registry never talk to a storage engine
//! directly; they go through [`DataProvider`], which only requires equality
//! and inclusion criteria over typed fields. Two implementations ship with
//! the crate: [`SqliteProvider`](crate::core::db::SqliteProvider) and the
//! in-memory provider used by tests and transient models.

use crate::core::error::ChassisError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Int(i64),
    Bool(bool),
    List(Vec<String>),
    Null,
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::List(items)
    }
}

/// A stored record: field name to value. BTreeMap keeps field iteration
/// deterministic, which matters for diffing and test output.
pub type Record = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum CondOp {
    Eq,
    Ne,
    /// Field value is one of the given strings.
    In,
    /// Field value is none of the given strings.
    NotIn,
    /// List field contains the given string.
    Contains,
}

#[derive(Debug, Clone)]
pub struct Cond {
    pub field: String,
    pub op: CondOp,
    pub value: Value,
}

/// Conjunction of field conditions. An empty criteria matches everything.
#[derive(Debug, Clone, Default)]
pub struct Criteria {
    pub conds: Vec<Cond>,
}

impl Criteria {
    pub fn all() -> Criteria {
        Criteria::default()
    }

    pub fn field(field: &str, op: CondOp, value: impl Into<Value>) -> Criteria {
        Criteria::all().and(field, op, value)
    }

    pub fn and(mut self, field: &str, op: CondOp, value: impl Into<Value>) -> Criteria {
        self.conds.push(Cond {
            field: field.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.conds.iter().all(|cond| {
            let field_value = record.get(&cond.field).unwrap_or(&Value::Null);
            match cond.op {
                CondOp::Eq => *field_value == cond.value,
                CondOp::Ne => *field_value != cond.value,
                CondOp::In => match (&cond.value, field_value) {
                    (Value::List(options), Value::Text(s)) => options.contains(s),
                    _ => false,
                },
                CondOp::NotIn => match (&cond.value, field_value) {
                    (Value::List(options), Value::Text(s)) => !options.contains(s),
                    // A missing field is trivially not in any set.
                    (Value::List(_), Value::Null) => true,
                    _ => false,
                },
                CondOp::Contains => match (field_value, &cond.value) {
                    (Value::List(items), Value::Text(s)) => items.contains(s),
                    _ => false,
                },
            }
        })
    }
}

/// Query options for [`DataProvider::find`].
#[derive(Debug, Clone, Default)]
pub struct FindOptions<'a> {
    /// Field projection; `None` reads all fields.
    pub fields: Option<&'a [&'a str]>,
    /// Ascending sort on a single field.
    pub order_by: Option<&'a str>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Minimal storage contract consumed by the core.
///
/// Implementations must be usable from `&self`; the lifecycle pipeline is
/// single-threaded but the provider handle is shared through the context.
pub trait DataProvider: Send + Sync {
    fn find(
        &self,
        collection: &str,
        criteria: &Criteria,
        options: &FindOptions,
    ) -> Result<Vec<Record>, ChassisError>;

    fn create(&self, collection: &str, values: Record) -> Result<String, ChassisError>;

    fn update(
        &self,
        collection: &str,
        criteria: &Criteria,
        values: Record,
        limit: Option<usize>,
    ) -> Result<bool, ChassisError>;

    fn delete(
        &self,
        collection: &str,
        criteria: &Criteria,
        limit: Option<usize>,
    ) -> Result<bool, ChassisError>;
}

/// Apply projection, ordering, limit and offset to an already-filtered
/// result set. Shared by both providers.
pub(crate) fn shape_results(mut records: Vec<Record>, options: &FindOptions) -> Vec<Record> {
    if let Some(order_field) = options.order_by {
        records.sort_by(|a, b| {
            let av = a.get(order_field).and_then(Value::as_str).unwrap_or("");
            let bv = b.get(order_field).and_then(Value::as_str).unwrap_or("");
            av.cmp(bv)
        });
    }
    let offset = options.offset.unwrap_or(0);
    let mut shaped: Vec<Record> = records.into_iter().skip(offset).collect();
    if let Some(limit) = options.limit {
        shaped.truncate(limit);
    }
    if let Some(fields) = options.fields {
        for record in &mut shaped {
            record.retain(|k, _| k == "id" || fields.contains(&k.as_str()));
        }
    }
    shaped
}
