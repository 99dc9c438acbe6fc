//! Marshalling between records and stored items.
//!
//! A [`Codec`] interprets one [`Model`]: [`Codec::marshall`] turns an input
//! record into the item's primary key plus an update expression, and
//! [`Codec::unmarshall`] reads an item back into a record. Records are plain
//! JSON objects keyed by field name.
//!
//! Absent and null are different on write: an absent optional field is left
//! out of the expression, an explicit null is written.

mod compute;
mod error;

use std::sync::Arc;

use base64::prelude::*;
use serde_json::{Number, Value};

pub use compute::{ComputeFn, ComputeRegistry};
pub use error::{CodecError, Result};

use crate::ir::{
    builtin, Field, Model, CREATED_AT_COLUMN, ENTITY_TYPE_COLUMN, PARTITION_KEY_COLUMN,
    SORT_KEY_COLUMN, UPDATED_AT_COLUMN, VERSION_COLUMN,
};
use crate::key::{self, EncodeContext, EncodeMode};
use crate::storage::{AttributeValue, Item, UpdateExpression};

/// A domain record: field name to JSON value.
pub type Record = serde_json::Map<String, Value>;

/// Which write protocol the expression is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Update,
    Blind,
}

impl WriteMode {
    pub fn key_mode(self) -> EncodeMode {
        match self {
            Self::Create => EncodeMode::Create,
            Self::Update => EncodeMode::Read,
            Self::Blind => EncodeMode::Blind,
        }
    }
}

/// Output of [`Codec::marshall`].
#[derive(Debug, Clone, PartialEq)]
pub struct Marshalled {
    pub key: Item,
    pub update: UpdateExpression,
}

impl Marshalled {
    /// The item this write produces when applied to nothing.
    pub fn into_item(self) -> std::result::Result<Item, crate::storage::StoreError> {
        let mut item = self.key;
        self.update.apply(&mut item)?;
        Ok(item)
    }
}

#[derive(Debug, Clone)]
pub struct Codec {
    model: Arc<Model>,
    computes: ComputeRegistry,
}

impl Codec {
    pub fn new(model: Arc<Model>, computes: ComputeRegistry) -> Self {
        Self { model, computes }
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn computes(&self) -> &ComputeRegistry {
        &self.computes
    }

    /// Every compute function the model needs is registered.
    pub fn check_computes(&self) -> Result<()> {
        for field in &self.model.fields {
            if let Some(compute) = &field.compute_function {
                if !self.computes.contains(&compute.name) {
                    return Err(CodecError::MissingComputeFunction {
                        model: self.model.type_name.clone(),
                        field: field.field_name.clone(),
                        function: compute.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// `pk` (and `sk` for composite keys) of the item `input` identifies.
    pub fn primary_key(&self, input: &Record, mode: EncodeMode, ctx: &EncodeContext) -> Result<Item> {
        let mut item = Item::new();
        let pk = key::encode(&self.model, self.model.primary_key.partition(), mode, input, ctx)?;
        item.insert(PARTITION_KEY_COLUMN.to_string(), AttributeValue::S(pk));
        if let Some(sort) = self.model.primary_key.sort() {
            let sk = key::encode(&self.model, sort, mode, input, ctx)?;
            item.insert(SORT_KEY_COLUMN.to_string(), AttributeValue::S(sk));
        }
        Ok(item)
    }

    pub fn marshall(&self, input: &Record, mode: WriteMode, ctx: &EncodeContext) -> Result<Marshalled> {
        let key = self.primary_key(input, mode.key_mode(), ctx)?;
        let mut update = UpdateExpression::new();
        let now = ctx.now_string();

        update.set(
            ENTITY_TYPE_COLUMN,
            AttributeValue::string(&self.model.type_name),
        );

        for field in self.model.fields.iter().filter(|f| f.is_persisted() && !f.is_builtin) {
            if self.is_ttl_field(field) {
                self.marshall_ttl(field, input, ctx, &mut update)?;
                continue;
            }
            let value = match &field.compute_function {
                Some(compute) => {
                    let function = self.computes.get(&compute.name).ok_or_else(|| {
                        CodecError::MissingComputeFunction {
                            model: self.model.type_name.clone(),
                            field: field.field_name.clone(),
                            function: compute.name.clone(),
                        }
                    })?;
                    Some(function(input))
                }
                None => input.get(&field.field_name).cloned(),
            };

            match value {
                None if field.is_required => return Err(self.missing(field)),
                None => {}
                Some(Value::Null) if field.is_required => return Err(self.missing(field)),
                Some(value) => {
                    update.set(field.column_name.clone(), self.encode_value(field, &value)?);
                }
            }
        }

        let created_at = input
            .get(builtin::CREATED_AT)
            .filter(|v| !v.is_null())
            .map(|v| self.encode_date(builtin::CREATED_AT, v))
            .transpose()?;
        match mode {
            WriteMode::Create => update.set(CREATED_AT_COLUMN, AttributeValue::string(&now)),
            WriteMode::Blind => update.set_if_not_exists(
                CREATED_AT_COLUMN,
                created_at.unwrap_or_else(|| AttributeValue::string(&now)),
            ),
            WriteMode::Update => {}
        }
        update.set(UPDATED_AT_COLUMN, AttributeValue::string(&now));

        match (mode, read_version(input)) {
            (WriteMode::Create, _) => update.set(VERSION_COLUMN, AttributeValue::number(1)),
            (WriteMode::Update, Some(version)) => {
                update.set(VERSION_COLUMN, AttributeValue::number(version + 1))
            }
            (WriteMode::Update, None) | (WriteMode::Blind, _) => update.increment(VERSION_COLUMN, 1),
        }

        if self.model.is_public {
            match mode {
                WriteMode::Create => {
                    update.set(builtin::PUBLIC_ID, AttributeValue::string(&ctx.public_id))
                }
                WriteMode::Blind => {
                    update.set_if_not_exists(builtin::PUBLIC_ID, AttributeValue::string(&ctx.public_id))
                }
                WriteMode::Update => {}
            }
        }

        self.marshall_index_attributes(input, mode, ctx, &mut update)?;

        Ok(Marshalled { key, update })
    }

    fn marshall_index_attributes(
        &self,
        input: &Record,
        mode: WriteMode,
        ctx: &EncodeContext,
        update: &mut UpdateExpression,
    ) -> Result<()> {
        let key_mode = mode.key_mode();
        for index in &self.model.secondary_indexes {
            for (spec, attribute) in index.own_attributes() {
                if !attribute.is_synthetic() {
                    continue;
                }
                let user_fields: Vec<&String> = spec
                    .fields
                    .iter()
                    .filter(|f| self.model.field(f).is_some_and(|f| !f.is_builtin))
                    .collect();
                let relevant = if user_fields.is_empty() {
                    key::can_encode(spec, key_mode, input)
                } else {
                    user_fields
                        .iter()
                        .any(|f| input.get(f.as_str()).is_some_and(|v| !v.is_null()))
                };
                if !relevant {
                    continue;
                }

                let value = AttributeValue::S(key::encode(&self.model, spec, key_mode, input, ctx)?);
                let depends_on_new_public_id = mode == WriteMode::Blind
                    && spec.contains(builtin::PUBLIC_ID)
                    && input.get(builtin::PUBLIC_ID).is_none();
                if depends_on_new_public_id {
                    update.set_if_not_exists(attribute.name.clone(), value);
                } else {
                    update.set(attribute.name.clone(), value);
                }
            }
        }
        Ok(())
    }

    fn is_ttl_field(&self, field: &Field) -> bool {
        self.model
            .ttl
            .as_ref()
            .is_some_and(|ttl| ttl.field_name == field.field_name)
    }

    fn marshall_ttl(
        &self,
        field: &Field,
        input: &Record,
        ctx: &EncodeContext,
        update: &mut UpdateExpression,
    ) -> Result<()> {
        let Some(ttl) = &self.model.ttl else {
            return Ok(());
        };
        match input.get(&field.field_name) {
            Some(_) if !ttl.argument_allowed => Err(CodecError::TtlOverrideNotAllowed {
                model: self.model.type_name.clone(),
                field: field.field_name.clone(),
            }),
            Some(Value::Null) => {
                update.set(field.column_name.clone(), AttributeValue::null());
                Ok(())
            }
            Some(value) => {
                let ts = self.parse_date(&field.field_name, value)?;
                update.set(field.column_name.clone(), AttributeValue::number(ts.timestamp()));
                Ok(())
            }
            None if ttl.argument_required => Err(CodecError::TtlOverrideRequired {
                model: self.model.type_name.clone(),
                field: field.field_name.clone(),
            }),
            None => {
                if let Some(duration_ms) = ttl.duration_ms {
                    let expires_ms = i64::try_from(duration_ms)
                        .ok()
                        .and_then(|ms| ctx.now.timestamp_millis().checked_add(ms))
                        .ok_or_else(|| CodecError::TtlOutOfRange {
                            model: self.model.type_name.clone(),
                            field: field.field_name.clone(),
                        })?;
                    update.set(
                        field.column_name.clone(),
                        AttributeValue::number(expires_ms.div_euclid(1000)),
                    );
                }
                Ok(())
            }
        }
    }

    /// Encode one field value for storage.
    pub fn encode_value(&self, field: &Field, value: &Value) -> Result<AttributeValue> {
        if value.is_null() {
            return Ok(AttributeValue::null());
        }
        if field.is_date_type {
            return self.encode_date(&field.field_name, value);
        }
        let valid = match field.type_name.as_str() {
            "Int" => value.is_i64() || value.is_u64(),
            "Float" => value.is_number(),
            "Boolean" => value.is_boolean(),
            "ID" | "String" => value.is_string(),
            _ if field.is_scalar_type => value.is_string(),
            _ => true,
        };
        if !valid {
            return Err(CodecError::InvalidValue {
                model: self.model.type_name.clone(),
                field: field.field_name.clone(),
                reason: format!("expected {}, got {}", field.type_name, value),
            });
        }
        Ok(AttributeValue::from_json(value))
    }

    fn encode_date(&self, field: &str, value: &Value) -> Result<AttributeValue> {
        let ts = self.parse_date(field, value)?;
        Ok(AttributeValue::S(key::format_timestamp(ts)))
    }

    fn parse_date(&self, field: &str, value: &Value) -> Result<chrono::DateTime<chrono::Utc>> {
        value
            .as_str()
            .and_then(key::parse_timestamp)
            .ok_or_else(|| CodecError::InvalidValue {
                model: self.model.type_name.clone(),
                field: field.to_string(),
                reason: format!("expected an RFC 3339 timestamp, got {}", value),
            })
    }

    fn missing(&self, field: &Field) -> CodecError {
        CodecError::MissingField {
            model: self.model.type_name.clone(),
            field: field.field_name.clone(),
        }
    }

    /// Read an item back into a record. Virtual fields are not included.
    pub fn unmarshall(&self, item: &Item) -> Result<Record> {
        let actual = item.get(ENTITY_TYPE_COLUMN).and_then(AttributeValue::as_str);
        if actual != Some(self.model.type_name.as_str()) {
            return Err(CodecError::TypeMismatch {
                expected: self.model.type_name.clone(),
                actual: actual.map(str::to_string),
            });
        }

        let mut record = Record::new();
        record.insert(builtin::ID.to_string(), Value::String(self.entity_id(item)));

        for field in self.model.fields.iter().filter(|f| f.is_persisted()) {
            let stored = field
                .column_names_for_read
                .iter()
                .find_map(|column| item.get(column));
            let Some(stored) = stored else {
                if field.is_required && !field.is_builtin {
                    return Err(self.missing(field));
                }
                continue;
            };

            let value = if self.is_ttl_field(field) {
                match stored.as_i64().and_then(|secs| chrono::DateTime::from_timestamp(secs, 0)) {
                    Some(ts) => Value::String(key::format_timestamp(ts)),
                    None => Value::Null,
                }
            } else if field.field_name == builtin::VERSION {
                stored
                    .as_i64()
                    .map(|v| Value::Number(Number::from(v)))
                    .unwrap_or(Value::Null)
            } else {
                stored.to_json()
            };
            record.insert(field.field_name.clone(), value);
        }

        Ok(record)
    }

    /// Opaque, globally unique id: `base64(type ":" pk ["#:#" sk])`.
    pub fn entity_id(&self, item: &Item) -> String {
        let pk = item
            .get(PARTITION_KEY_COLUMN)
            .and_then(AttributeValue::as_str)
            .unwrap_or_default();
        let raw = match item.get(SORT_KEY_COLUMN).and_then(AttributeValue::as_str) {
            Some(sk) => format!("{}:{}#:#{}", self.model.type_name, pk, sk),
            None => format!("{}:{}", self.model.type_name, pk),
        };
        BASE64_STANDARD.encode(raw)
    }
}

/// Caller-supplied version, defaulting to none.
pub fn read_version(input: &Record) -> Option<i64> {
    input.get(builtin::VERSION).and_then(Value::as_i64)
}

/// Decode an opaque id for debugging; never used to derive keys.
pub fn decode_entity_id(id: &str) -> Option<String> {
    BASE64_STANDARD
        .decode(id)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}
