//! Storage layer for Cadence
//!
//! The engine and coordinator persist through the `Storage` trait: typed
//! CRUD over named collections with field filters. The shipped backend is
//! JSONL (one file per collection) with an in-memory cache.

mod jsonl;

use serde::{Serialize, de::DeserializeOwned};

use crate::error::Result;

pub use jsonl::JsonlStore;

/// Collection names used by the engine and coordinator.
pub mod collections {
    pub const EXECUTIONS: &str = "executions";
    pub const RESERVATIONS: &str = "reservations";
    pub const MERGE_REQUESTS: &str = "merge_requests";
    pub const EVENTS: &str = "events";
}

/// Filter operations for querying records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// Field equals value
    Eq,
    /// Field does not equal value
    Ne,
    /// Field contains value (string/array)
    Contains,
}

/// A filter for querying records by field.
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: serde_json::Value,
}

impl Filter {
    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Serialize) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Create a not-equal filter.
    pub fn ne(field: impl Into<String>, value: impl Serialize) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Ne,
            value: serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Create a contains filter.
    pub fn contains(field: impl Into<String>, value: impl Serialize) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Contains,
            value: serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Check if a record matches this filter.
    pub fn matches(&self, record: &serde_json::Value) -> bool {
        let field_value = record.get(&self.field);

        match self.op {
            FilterOp::Eq => match field_value {
                Some(v) => *v == self.value,
                None => self.value.is_null(),
            },
            FilterOp::Ne => match field_value {
                Some(v) => *v != self.value,
                None => !self.value.is_null(),
            },
            FilterOp::Contains => match field_value {
                Some(serde_json::Value::String(s)) => {
                    if let serde_json::Value::String(needle) = &self.value {
                        s.contains(needle.as_str())
                    } else {
                        false
                    }
                }
                Some(serde_json::Value::Array(arr)) => arr.contains(&self.value),
                _ => false,
            },
        }
    }
}

/// Trait for records addressable by a unique id.
pub trait Keyed {
    /// The record's unique identifier.
    fn key(&self) -> &str;
}

/// Storage trait for CRUD operations over named collections.
pub trait Storage: Send + Sync {
    /// Create a new record.
    fn create<T: Serialize + Keyed>(&self, collection: &str, record: &T) -> Result<()>;

    /// Get a record by id.
    fn get<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Result<Option<T>>;

    /// Replace an existing record.
    fn update<T: Serialize + Keyed>(&self, collection: &str, record: &T) -> Result<()>;

    /// Delete a record by id. Errors if the record does not exist.
    fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// Query records matching every filter.
    fn query<T: DeserializeOwned>(&self, collection: &str, filters: &[Filter]) -> Result<Vec<T>>;

    /// List all records in a collection.
    fn list<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        self.query(collection, &[])
    }
}

impl Keyed for crate::domain::Execution {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for crate::domain::Reservation {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for crate::domain::MergeRequest {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for crate::domain::EventRecord {
    fn key(&self) -> &str {
        &self.id
    }
}
