//! Key-encoding engine.
//!
//! One function derives every key: primary partition and sort keys and each
//! secondary index's attributes. Tokens are the key fields' scalar values in
//! declaration order, joined by [`KEY_DELIMITER`], with the literal prefix (if
//! any) as the first token. The same (prefix, fields, input, context) always
//! produces the same string.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::ir::{builtin, KeySpec, Model};

/// Separator between key tokens.
pub const KEY_DELIMITER: &str = "#";

pub type Result<T> = std::result::Result<T, KeyError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("Key field '{0}' is missing from the input")]
    MissingField(String),

    #[error("Key field '{field}' has a value that cannot be encoded: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Model '{model}' has no field '{field}'")]
    UnknownField { model: String, field: String },
}

/// How `createdAt` and `publicId` are sourced while encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeMode {
    /// `createdAt` is now; `publicId` is freshly generated.
    Create,
    /// Both come from the caller.
    Read,
    /// `createdAt` comes from the caller when present, otherwise now.
    Blind,
}

/// Inputs that are not part of the record but feed the encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeContext {
    pub now: DateTime<Utc>,
    /// Used for `publicId` in `Create` mode.
    pub public_id: String,
}

impl EncodeContext {
    pub fn new(now: DateTime<Utc>, public_id: impl Into<String>) -> Self {
        Self {
            now,
            public_id: public_id.into(),
        }
    }

    /// Current time and a new public id.
    pub fn fresh() -> Self {
        Self::new(Utc::now(), generate_public_id())
    }

    pub fn now_string(&self) -> String {
        format_timestamp(self.now)
    }
}

/// An externally meaningless identifier.
pub fn generate_public_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Canonical date representation: RFC 3339, UTC, millisecond precision.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Encode every field of `spec`.
pub fn encode(
    model: &Model,
    spec: &KeySpec,
    mode: EncodeMode,
    input: &serde_json::Map<String, Value>,
    ctx: &EncodeContext,
) -> Result<String> {
    let mut tokens = Vec::with_capacity(spec.fields.len() + 1);
    if let Some(prefix) = &spec.prefix {
        tokens.push(prefix.clone());
    }
    for field in &spec.fields {
        tokens.push(field_token(model, field, mode, input, ctx)?);
    }
    Ok(tokens.join(KEY_DELIMITER))
}

/// A key built from the leading fields present in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialKey {
    pub value: String,
    /// Every field of the key spec was present.
    pub complete: bool,
}

/// Encode the longest run of leading fields present in `input`.
///
/// An incomplete key ends with the delimiter so that a `begins_with` match
/// stops at token boundaries.
pub fn encode_partial(
    model: &Model,
    spec: &KeySpec,
    input: &serde_json::Map<String, Value>,
    ctx: &EncodeContext,
) -> Result<PartialKey> {
    let mut tokens = Vec::new();
    if let Some(prefix) = &spec.prefix {
        tokens.push(prefix.clone());
    }
    let mut complete = true;
    for field in &spec.fields {
        if is_absent(input.get(field)) {
            complete = false;
            break;
        }
        tokens.push(field_token(model, field, EncodeMode::Read, input, ctx)?);
    }

    let mut value = tokens.join(KEY_DELIMITER);
    if !complete && !tokens.is_empty() {
        value.push_str(KEY_DELIMITER);
    }
    Ok(PartialKey { value, complete })
}

/// Whether every field of `spec` can be taken from `input` in `mode`.
pub fn can_encode(spec: &KeySpec, mode: EncodeMode, input: &serde_json::Map<String, Value>) -> bool {
    spec.fields.iter().all(|field| match field.as_str() {
        builtin::UPDATED_AT => true,
        builtin::CREATED_AT => mode != EncodeMode::Read || !is_absent(input.get(field)),
        builtin::PUBLIC_ID => mode == EncodeMode::Create || !is_absent(input.get(field)),
        _ => !is_absent(input.get(field)),
    })
}

fn field_token(
    model: &Model,
    name: &str,
    mode: EncodeMode,
    input: &serde_json::Map<String, Value>,
    ctx: &EncodeContext,
) -> Result<String> {
    let field = model.field(name).ok_or_else(|| KeyError::UnknownField {
        model: model.type_name.clone(),
        field: name.to_string(),
    })?;
    let supplied = input.get(name).filter(|v| !v.is_null());

    match (name, mode) {
        (builtin::UPDATED_AT, _) => return Ok(ctx.now_string()),
        (builtin::CREATED_AT, EncodeMode::Create) => return Ok(ctx.now_string()),
        (builtin::CREATED_AT, EncodeMode::Blind) if supplied.is_none() => {
            return Ok(ctx.now_string())
        }
        (builtin::PUBLIC_ID, EncodeMode::Create) => return Ok(ctx.public_id.clone()),
        _ => {}
    }

    let value = supplied.ok_or_else(|| KeyError::MissingField(name.to_string()))?;
    scalar_token(name, value, field.is_date_type)
}

/// Token for one scalar value.
pub fn scalar_token(field: &str, value: &Value, is_date: bool) -> Result<String> {
    match value {
        Value::String(s) if is_date => parse_timestamp(s)
            .map(format_timestamp)
            .ok_or_else(|| KeyError::InvalidValue {
                field: field.to_string(),
                reason: format!("'{}' is not an RFC 3339 timestamp", s),
            }),
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Err(KeyError::MissingField(field.to_string())),
        Value::Array(_) | Value::Object(_) => Err(KeyError::InvalidValue {
            field: field.to_string(),
            reason: "only scalar values can be key tokens".to_string(),
        }),
    }
}

fn is_absent(value: Option<&Value>) -> bool {
    value.map(Value::is_null).unwrap_or(true)
}

#[cfg(test)]
mod tests;
