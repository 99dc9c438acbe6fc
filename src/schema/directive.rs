//! Directive vocabulary.
//!
//! Type-level and field-level annotations are tagged enums matched
//! exhaustively by the compiler. Adding a directive kind means adding a
//! variant here, and every extractor that matches on it stops compiling
//! until it handles the new case.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::DurationMs;

/// Annotation attached to a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeDirective {
    /// Simple primary key: partition key only.
    PartitionKey(KeyDecl),
    /// Composite primary key: partition key plus sort key.
    CompositeKey { partition: KeyDecl, sort: KeyDecl },
    /// Global secondary index with its own partition (and optional sort) key.
    Gsi(GsiDecl),
    /// Local secondary index sharing the table's partition key.
    Lsi(LsiDecl),
    /// Single-field shorthand for a GSI.
    SimpleIndex(SimpleIndexDecl),
    /// Physical table overrides.
    Table(TableDecl),
    /// Append-only model; no update, blind write, or delete.
    Ledger,
    /// Model gets an externally meaningful `publicId` and its index.
    Public(PublicDecl),
    /// Change capture: keep one related target record in sync.
    Enriches(EnrichDecl),
    /// Change capture: recompute an aggregate target from all sources.
    Reduces(ReduceDecl),
    /// Change capture: arbitrary side effects, no declared target.
    Reacts(ReactDecl),
}

impl TypeDirective {
    /// Directive name as written in the schema.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PartitionKey(_) => "partition_key",
            Self::CompositeKey { .. } => "composite_key",
            Self::Gsi(_) => "gsi",
            Self::Lsi(_) => "lsi",
            Self::SimpleIndex(_) => "simple_index",
            Self::Table(_) => "table",
            Self::Ledger => "ledger",
            Self::Public(_) => "public",
            Self::Enriches(_) => "enriches",
            Self::Reduces(_) => "reduces",
            Self::Reacts(_) => "reacts",
        }
    }
}

/// Annotation attached to a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldDirective {
    /// Physical column override and legacy names still accepted on read.
    Column {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        read_aliases: Vec<String>,
    },
    /// Value produced by an external pure function.
    Computed {
        function: String,
        #[serde(default, rename = "virtual")]
        is_virtual: bool,
    },
    /// Field is the table's expiry attribute.
    Ttl(TtlDecl),
}

/// Ordered field list with an optional literal prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDecl {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Attribute projection of a secondary index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    #[default]
    All,
    KeysOnly,
    Include(Vec<String>),
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "ALL"),
            Self::KeysOnly => write!(f, "KEYS_ONLY"),
            Self::Include(attrs) => write!(f, "INCLUDE({})", attrs.join(",")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GsiDecl {
    #[serde(default)]
    pub name: Option<String>,
    pub partition: KeyDecl,
    #[serde(default)]
    pub sort: Option<KeyDecl>,
    #[serde(default)]
    pub projection: Option<Projection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LsiDecl {
    #[serde(default)]
    pub name: Option<String>,
    pub sort: KeyDecl,
    #[serde(default)]
    pub projection: Option<Projection>,
}

/// `simple_index: { field: email }` indexes `email` under an index named
/// `email`, reusing the field's own column as the index key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleIndexDecl {
    pub field: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub projection: Option<Projection>,
}

/// Column naming policy for user fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Casing {
    #[default]
    Camel,
    Snake,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDecl {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub casing: Option<Casing>,
    /// Force strongly consistent reads on primary-key lookups and queries.
    #[serde(default)]
    pub consistent: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicDecl {
    #[serde(default)]
    pub projection: Option<Projection>,
}

/// Stream event a change-capture handler subscribes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CdcEvent {
    Insert,
    Modify,
    Remove,
    #[default]
    Upsert,
}

impl fmt::Display for CdcEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Insert => "INSERT",
            Self::Modify => "MODIFY",
            Self::Remove => "REMOVE",
            Self::Upsert => "UPSERT",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichDecl {
    pub handler: String,
    pub target: String,
    #[serde(default)]
    pub event: CdcEvent,
    #[serde(default)]
    pub readables: Vec<String>,
    #[serde(default)]
    pub writables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceDecl {
    pub handler: String,
    pub target: String,
    #[serde(default)]
    pub event: CdcEvent,
    /// The source's grouping key may change, so two buckets are recomputed.
    #[serde(default)]
    pub multi: bool,
    #[serde(default)]
    pub readables: Vec<String>,
    #[serde(default)]
    pub writables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactDecl {
    pub handler: String,
    #[serde(default)]
    pub event: CdcEvent,
    #[serde(default)]
    pub readables: Vec<String>,
    #[serde(default)]
    pub writables: Vec<String>,
}

/// Who may set the expiry attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlOverride {
    /// Always `now + duration`.
    #[default]
    Never,
    /// Callers may supply a value; otherwise `now + duration`.
    Allowed,
    /// Callers must supply a value.
    Required,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlDecl {
    #[serde(default)]
    pub duration: Option<DurationMs>,
    #[serde(default, rename = "override")]
    pub override_policy: TtlOverride,
}
