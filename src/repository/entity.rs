//! Read-side accessor for one stored record.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::codec::{ComputeRegistry, Record};
use crate::ir::{builtin, Model};

/// A record read back from the store.
///
/// Virtual computed fields are not part of the stored record; [`get`]
/// resolves them through the compute registry each time they are read.
///
/// [`get`]: Entity::get
#[derive(Debug, Clone)]
pub struct Entity {
    model: Arc<Model>,
    record: Record,
    computes: ComputeRegistry,
}

impl Entity {
    pub fn new(model: Arc<Model>, record: Record, computes: ComputeRegistry) -> Self {
        Self {
            model,
            record,
            computes,
        }
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Opaque, globally unique id.
    pub fn id(&self) -> &str {
        self.record
            .get(builtin::ID)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn version(&self) -> i64 {
        self.record
            .get(builtin::VERSION)
            .and_then(Value::as_i64)
            .unwrap_or_default()
    }

    /// Stored fields only.
    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn into_record(self) -> Record {
        self.record
    }

    /// Value of any field, computing virtual ones on demand.
    pub fn get(&self, field_name: &str) -> Option<Value> {
        let field = self.model.field(field_name)?;
        match &field.compute_function {
            Some(compute) if compute.is_virtual => self
                .computes
                .get(&compute.name)
                .map(|function| function(&self.record)),
            _ => self.record.get(field_name).cloned(),
        }
    }

    pub fn get_str(&self, field_name: &str) -> Option<String> {
        self.get(field_name)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn get_bool(&self, field_name: &str) -> Option<bool> {
        self.get(field_name).and_then(|v| v.as_bool())
    }

    pub fn get_i64(&self, field_name: &str) -> Option<i64> {
        self.get(field_name).and_then(|v| v.as_i64())
    }

    /// Stored fields plus every virtual field.
    pub fn materialize(&self) -> Record {
        let mut record = self.record.clone();
        for field in self.model.virtual_fields() {
            if let Some(value) = self.get(&field.field_name) {
                record.insert(field.field_name.clone(), value);
            }
        }
        record
    }

    /// Deserialize the materialized record into a domain type.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.materialize()))
    }
}
