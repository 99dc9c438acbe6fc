//! Primary key and secondary index descriptors.

use serde::Serialize;

use super::{Projection, PARTITION_KEY_COLUMN};

/// Ordered field list with an optional literal prefix token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeySpec {
    pub prefix: Option<String>,
    pub fields: Vec<String>,
}

impl KeySpec {
    pub fn new(prefix: Option<&str>, fields: &[&str]) -> Self {
        Self {
            prefix: prefix.map(str::to_string),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn is_single_field(&self) -> bool {
        self.fields.len() == 1
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }
}

/// Primary key of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PrimaryKey {
    Simple { partition: KeySpec },
    Composite { partition: KeySpec, sort: KeySpec },
}

impl PrimaryKey {
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Composite { .. })
    }

    /// Exactly one field is declared across partition and sort keys.
    pub fn is_single_field(&self) -> bool {
        self.fields().count() == 1
    }

    pub fn partition(&self) -> &KeySpec {
        match self {
            Self::Simple { partition } | Self::Composite { partition, .. } => partition,
        }
    }

    pub fn sort(&self) -> Option<&KeySpec> {
        match self {
            Self::Simple { .. } => None,
            Self::Composite { sort, .. } => Some(sort),
        }
    }

    /// Every declared key field, partition first.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.partition()
            .fields
            .iter()
            .chain(self.sort().into_iter().flat_map(|s| s.fields.iter()))
            .map(String::as_str)
    }
}

/// Attribute holding one half of an index key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexAttribute {
    pub name: String,
    /// The attribute is the named field's own column, written as the raw
    /// field value rather than an encoded key.
    pub reuses_field: Option<String>,
}

impl IndexAttribute {
    pub fn synthetic(name: String) -> Self {
        Self {
            name,
            reuses_field: None,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.reuses_field.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    Gsi,
    Lsi,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalIndex {
    pub name: String,
    pub partition: KeySpec,
    pub sort: Option<KeySpec>,
    pub projection: Projection,
    pub partition_attribute: IndexAttribute,
    pub sort_attribute: Option<IndexAttribute>,
}

impl GlobalIndex {
    pub fn is_composite(&self) -> bool {
        self.sort.is_some()
    }
}

/// Shares the table partition key; adds a sort key only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalIndex {
    pub name: String,
    pub sort: KeySpec,
    pub projection: Projection,
    pub sort_attribute: IndexAttribute,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecondaryIndex {
    Gsi(GlobalIndex),
    Lsi(LocalIndex),
}

impl SecondaryIndex {
    pub fn name(&self) -> &str {
        match self {
            Self::Gsi(g) => &g.name,
            Self::Lsi(l) => &l.name,
        }
    }

    pub fn index_type(&self) -> IndexType {
        match self {
            Self::Gsi(_) => IndexType::Gsi,
            Self::Lsi(_) => IndexType::Lsi,
        }
    }

    pub fn projection(&self) -> &Projection {
        match self {
            Self::Gsi(g) => &g.projection,
            Self::Lsi(l) => &l.projection,
        }
    }

    /// Partition key spec, `None` for an LSI (it uses the table's).
    pub fn partition(&self) -> Option<&KeySpec> {
        match self {
            Self::Gsi(g) => Some(&g.partition),
            Self::Lsi(_) => None,
        }
    }

    pub fn sort(&self) -> Option<&KeySpec> {
        match self {
            Self::Gsi(g) => g.sort.as_ref(),
            Self::Lsi(l) => Some(&l.sort),
        }
    }

    pub fn partition_attribute_name(&self) -> &str {
        match self {
            Self::Gsi(g) => &g.partition_attribute.name,
            Self::Lsi(_) => PARTITION_KEY_COLUMN,
        }
    }

    /// Attributes this index adds to every item (excludes the shared `pk`).
    pub fn own_attributes(&self) -> Vec<(&KeySpec, &IndexAttribute)> {
        match self {
            Self::Gsi(g) => {
                let mut attrs = vec![(&g.partition, &g.partition_attribute)];
                if let (Some(spec), Some(attr)) = (&g.sort, &g.sort_attribute) {
                    attrs.push((spec, attr));
                }
                attrs
            }
            Self::Lsi(l) => vec![(&l.sort, &l.sort_attribute)],
        }
    }

    pub fn sort_attribute(&self) -> Option<&IndexAttribute> {
        match self {
            Self::Gsi(g) => g.sort_attribute.as_ref(),
            Self::Lsi(l) => Some(&l.sort_attribute),
        }
    }

    /// Same type and projection: the shape co-located models must agree on.
    pub fn has_same_shape(&self, other: &Self) -> bool {
        self.index_type() == other.index_type() && self.projection() == other.projection()
    }
}
