//! Schema document: the type graph the compiler reads.
//!
//! A document is a list of types, each with fields and directive
//! annotations. Directives form a closed vocabulary (see [`TypeDirective`]
//! and [`FieldDirective`]), so an unknown directive is a parse error rather
//! than something silently ignored.
//!
//! ```yaml
//! types:
//!   - name: Account
//!     directives:
//!       - composite_key:
//!           partition: { prefix: ACCOUNT, fields: [externalId] }
//!           sort: { prefix: SUMMARY, fields: [] }
//!     fields:
//!       - { name: externalId, type: String, required: true }
//! ```

mod directive;
mod duration;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use directive::{
    Casing, CdcEvent, EnrichDecl, FieldDirective, GsiDecl, KeyDecl, LsiDecl, Projection,
    PublicDecl, ReactDecl, ReduceDecl, SimpleIndexDecl, TableDecl, TtlDecl, TtlOverride,
    TypeDirective,
};
pub use duration::DurationMs;

/// Result type for schema loading.
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Errors raised while reading a schema document.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Failed to read schema file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid YAML schema: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid JSON schema: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported schema file extension: {0}")]
    UnsupportedFormat(String),
}

/// A complete schema: every type the compiler may reach.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDocument {
    /// Enumerations usable as scalar field types.
    #[serde(default)]
    pub enums: Vec<EnumDef>,
    /// Object types.
    #[serde(default)]
    pub types: Vec<TypeDef>,
}

/// An enumeration; values are stored as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// One object type with its directives and fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: String,
    #[serde(default)]
    pub directives: Vec<TypeDirective>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

/// One field declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub directives: Vec<FieldDirective>,
}

impl SchemaDocument {
    /// Parse a YAML document.
    ///
    /// Directives are written as single-key maps (`- table: { name: ... }`)
    /// or bare names (`- ledger`), not YAML `!tags`.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let deserializer = serde_yaml::Deserializer::from_str(text);
        Ok(serde_yaml::with::singleton_map_recursive::deserialize(
            deserializer,
        )?)
    }

    /// Parse a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a document from disk, choosing the format by extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&text),
            Some("json") => Self::from_json(&text),
            other => Err(SchemaError::UnsupportedFormat(
                other.unwrap_or_default().to_string(),
            )),
        }
    }

    /// Look up a type by name.
    pub fn type_def(&self, name: &str) -> Option<&TypeDef> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Look up an enum by name.
    pub fn enum_def(&self, name: &str) -> Option<&EnumDef> {
        self.enums.iter().find(|e| e.name == name)
    }
}

impl TypeDef {
    /// Look up a declared field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}
