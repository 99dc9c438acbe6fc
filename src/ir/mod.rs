//! Intermediate representation produced by the compiler.
//!
//! IR values are built once per compilation from an immutable schema
//! document and are read-only afterwards. Every downstream consumer (codec,
//! repositories, change-capture runtime) shares them behind `Arc`.

mod cdc;
mod key;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

pub use crate::schema::{Casing, CdcEvent, Projection};
pub use cdc::{CdcKind, ChangeDataCaptureConfig};
pub use key::{GlobalIndex, IndexAttribute, IndexType, KeySpec, LocalIndex, PrimaryKey, SecondaryIndex};

/// Discriminator column naming the logical type of an item.
pub const ENTITY_TYPE_COLUMN: &str = "_et";
/// Creation timestamp column.
pub const CREATED_AT_COLUMN: &str = "_ct";
/// Last-modified timestamp column.
pub const UPDATED_AT_COLUMN: &str = "_md";
/// Optimistic-locking version column.
pub const VERSION_COLUMN: &str = "_v";
/// Primary partition key attribute.
pub const PARTITION_KEY_COLUMN: &str = "pk";
/// Primary sort key attribute.
pub const SORT_KEY_COLUMN: &str = "sk";

/// Columns no user field may claim.
pub const RESERVED_COLUMNS: [&str; 6] = [
    PARTITION_KEY_COLUMN,
    SORT_KEY_COLUMN,
    ENTITY_TYPE_COLUMN,
    CREATED_AT_COLUMN,
    UPDATED_AT_COLUMN,
    VERSION_COLUMN,
];

/// Field names with built-in semantics.
pub mod builtin {
    pub const ID: &str = "id";
    pub const CREATED_AT: &str = "createdAt";
    pub const UPDATED_AT: &str = "updatedAt";
    pub const VERSION: &str = "version";
    pub const PUBLIC_ID: &str = "publicId";
}

/// Whether and how a field's value comes from a function instead of input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComputeFunction {
    /// Name the host registers the function under.
    pub name: String,
    /// Never persisted; resolved on every read.
    pub is_virtual: bool,
}

/// One field of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub field_name: String,
    /// Attribute the field is written to.
    pub column_name: String,
    /// Attributes tried on read, newest first. Always starts with `column_name`.
    pub column_names_for_read: Vec<String>,
    pub type_name: String,
    pub is_required: bool,
    pub is_scalar_type: bool,
    pub is_date_type: bool,
    pub compute_function: Option<ComputeFunction>,
    /// Supplied by the compiler rather than declared (`createdAt`, `version`, ...).
    pub is_builtin: bool,
}

impl Field {
    /// Whether the field occupies a column at all.
    pub fn is_persisted(&self) -> bool {
        !self.is_virtual() && self.field_name != builtin::ID
    }

    pub fn is_virtual(&self) -> bool {
        self.compute_function
            .as_ref()
            .map(|c| c.is_virtual)
            .unwrap_or(false)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.type_name.as_str(), "Int" | "Float")
    }
}

/// Expiry configuration of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TtlConfig {
    pub field_name: String,
    pub column_name: String,
    /// Callers may supply their own expiry.
    pub argument_allowed: bool,
    /// Callers must supply their own expiry.
    pub argument_required: bool,
    /// Added to "now" when no caller value is supplied.
    pub duration_ms: Option<u64>,
}

/// One schema type resolved against its table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Model {
    pub type_name: String,
    /// Logical table name; physical names are resolved at runtime.
    pub table_name: String,
    pub fields: Vec<Field>,
    pub primary_key: PrimaryKey,
    pub secondary_indexes: Vec<SecondaryIndex>,
    pub ttl: Option<TtlConfig>,
    pub is_ledger: bool,
    pub is_public: bool,
    /// Primary-key reads and queries use strongly consistent reads.
    pub consistent: bool,
    pub casing: Casing,
    pub change_data_capture: Vec<ChangeDataCaptureConfig>,
}

impl Model {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.field_name == name)
    }

    pub fn index(&self, name: &str) -> Option<&SecondaryIndex> {
        self.secondary_indexes.iter().find(|i| i.name() == name)
    }

    /// User and built-in fields that occupy a column.
    pub fn persisted_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_persisted())
    }

    pub fn virtual_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_virtual())
    }

    /// Whether `update`, `blind_write`, and `delete` exist for this model.
    pub fn is_mutable(&self) -> bool {
        !self.is_ledger
    }
}

/// A physical store grouping one or more models.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    pub name: String,
    /// Type names of the co-located models, in declaration order.
    pub models: Vec<String>,
    pub is_composite: bool,
    pub consistent: bool,
    pub has_ttl: bool,
    /// Expiry column shared by every model with a TTL.
    pub ttl_column: Option<String>,
    pub has_public_model: bool,
    /// At least one co-located model is a change-capture source.
    pub has_cdc: bool,
    /// Union of the co-located models' indexes, one entry per name.
    pub secondary_indexes: Vec<SecondaryIndex>,
}

/// Output of one compilation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Ir {
    pub models: BTreeMap<String, Arc<Model>>,
    pub tables: BTreeMap<String, Arc<Table>>,
}

impl Ir {
    pub fn model(&self, type_name: &str) -> Option<&Arc<Model>> {
        self.models.get(type_name)
    }

    pub fn table(&self, name: &str) -> Option<&Arc<Table>> {
        self.tables.get(name)
    }

    pub fn table_for_model(&self, type_name: &str) -> Option<&Arc<Table>> {
        self.model(type_name)
            .and_then(|m| self.tables.get(&m.table_name))
    }

    /// Every change-capture configuration, in model order.
    pub fn change_data_capture(&self) -> impl Iterator<Item = &ChangeDataCaptureConfig> {
        self.models
            .values()
            .flat_map(|m| m.change_data_capture.iter())
    }
}
