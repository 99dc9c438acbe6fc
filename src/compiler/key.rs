//! Primary key and secondary index extraction.

use std::collections::HashSet;

use super::{CompileError, Result};
use crate::ir::{
    builtin, Field, GlobalIndex, IndexAttribute, KeySpec, LocalIndex, PrimaryKey, SecondaryIndex,
};
use crate::schema::{KeyDecl, Projection, PublicDecl, TypeDef, TypeDirective};

/// Name of the index every public model receives.
pub const PUBLIC_ID_INDEX: &str = "publicId";

pub(super) fn extract_primary_key(def: &TypeDef, fields: &[Field]) -> Result<PrimaryKey> {
    let mut keys = def.directives.iter().filter_map(|d| match d {
        TypeDirective::PartitionKey(partition) => Some(PrimaryKey::Simple {
            partition: key_spec(partition),
        }),
        TypeDirective::CompositeKey { partition, sort } => Some(PrimaryKey::Composite {
            partition: key_spec(partition),
            sort: key_spec(sort),
        }),
        _ => None,
    });

    let key = keys.next().ok_or_else(|| CompileError::MissingPrimaryKey {
        type_name: def.name.clone(),
    })?;
    if keys.next().is_some() {
        return Err(CompileError::DuplicatePrimaryKey {
            type_name: def.name.clone(),
        });
    }

    if key.partition().fields.is_empty() {
        return Err(CompileError::EmptyPartitionKey {
            type_name: def.name.clone(),
            context: "primary key".to_string(),
        });
    }
    check_key_fields(def, fields, key.partition(), "primary key")?;
    if let Some(sort) = key.sort() {
        check_key_fields(def, fields, sort, "primary key")?;
    }

    Ok(key)
}

pub(super) fn extract_indexes(
    def: &TypeDef,
    fields: &[Field],
    primary_key: &PrimaryKey,
    public: Option<&PublicDecl>,
) -> Result<Vec<SecondaryIndex>> {
    let mut indexes = Vec::new();

    for directive in &def.directives {
        let index = match directive {
            TypeDirective::Gsi(gsi) => {
                let name = index_name(def, gsi.name.as_deref(), "gsi")?;
                let partition = key_spec(&gsi.partition);
                if partition.fields.is_empty() && partition.prefix.is_none() {
                    return Err(CompileError::EmptyPartitionKey {
                        type_name: def.name.clone(),
                        context: format!("gsi '{}'", name),
                    });
                }
                let context = format!("gsi '{}'", name);
                check_key_fields(def, fields, &partition, &context)?;
                let sort = gsi.sort.as_ref().map(key_spec);
                if let Some(sort) = &sort {
                    check_key_fields(def, fields, sort, &context)?;
                }
                SecondaryIndex::Gsi(GlobalIndex {
                    partition_attribute: index_attribute(&name, &partition, fields, "pk"),
                    sort_attribute: sort
                        .as_ref()
                        .map(|s| index_attribute(&name, s, fields, "sk")),
                    name,
                    partition,
                    sort,
                    projection: gsi.projection.clone().unwrap_or_default(),
                })
            }
            TypeDirective::Lsi(lsi) => {
                let name = index_name(def, lsi.name.as_deref(), "lsi")?;
                if !primary_key.is_composite() {
                    return Err(CompileError::LsiRequiresCompositeKey {
                        type_name: def.name.clone(),
                        index: name,
                    });
                }
                let sort = key_spec(&lsi.sort);
                check_key_fields(def, fields, &sort, &format!("lsi '{}'", name))?;
                SecondaryIndex::Lsi(LocalIndex {
                    sort_attribute: index_attribute(&name, &sort, fields, "sk"),
                    name,
                    sort,
                    projection: lsi.projection.clone().unwrap_or_default(),
                })
            }
            TypeDirective::SimpleIndex(simple) => {
                let name = simple.name.clone().unwrap_or_else(|| simple.field.clone());
                let partition = KeySpec {
                    prefix: None,
                    fields: vec![simple.field.clone()],
                };
                check_key_fields(def, fields, &partition, &format!("simple_index '{}'", name))?;
                SecondaryIndex::Gsi(GlobalIndex {
                    partition_attribute: index_attribute(&name, &partition, fields, "pk"),
                    sort_attribute: None,
                    name,
                    partition,
                    sort: None,
                    projection: simple.projection.clone().unwrap_or_default(),
                })
            }
            _ => continue,
        };
        indexes.push(index);
    }

    if let Some(public) = public {
        let partition = KeySpec {
            prefix: None,
            fields: vec![builtin::PUBLIC_ID.to_string()],
        };
        indexes.push(SecondaryIndex::Gsi(GlobalIndex {
            name: PUBLIC_ID_INDEX.to_string(),
            partition_attribute: index_attribute(PUBLIC_ID_INDEX, &partition, fields, "pk"),
            partition,
            sort: None,
            sort_attribute: None,
            projection: public.projection.clone().unwrap_or(Projection::All),
        }));
    }

    let mut names = HashSet::new();
    for index in &indexes {
        if !names.insert(index.name()) {
            return Err(CompileError::DuplicateIndex {
                type_name: def.name.clone(),
                index: index.name().to_string(),
            });
        }
    }

    Ok(indexes)
}

fn key_spec(decl: &KeyDecl) -> KeySpec {
    KeySpec {
        prefix: decl.prefix.clone(),
        fields: decl.fields.clone(),
    }
}

fn index_name(def: &TypeDef, name: Option<&str>, kind: &str) -> Result<String> {
    match name {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(CompileError::MissingIndexName {
            type_name: def.name.clone(),
            kind: kind.to_string(),
        }),
    }
}

/// An index named after its single unprefixed key field reads that field's
/// column directly; anything else gets a synthetic `<index><suffix>` attribute.
fn index_attribute(index: &str, spec: &KeySpec, fields: &[Field], suffix: &str) -> IndexAttribute {
    if let [only] = spec.fields.as_slice() {
        if only == index && spec.prefix.is_none() {
            if let Some(field) = fields.iter().find(|f| &f.field_name == only) {
                return IndexAttribute {
                    name: field.column_name.clone(),
                    reuses_field: Some(field.field_name.clone()),
                };
            }
        }
    }
    IndexAttribute::synthetic(format!("{}{}", index, suffix))
}

fn check_key_fields(def: &TypeDef, fields: &[Field], spec: &KeySpec, context: &str) -> Result<()> {
    for name in &spec.fields {
        let field = fields
            .iter()
            .find(|f| &f.field_name == name)
            .ok_or_else(|| CompileError::UnknownField {
                type_name: def.name.clone(),
                field: name.clone(),
                context: context.to_string(),
            })?;

        let reason = if !field.is_scalar_type {
            Some("only scalar fields can be key fields")
        } else if field.is_virtual() {
            Some("virtual fields are never persisted")
        } else if field.field_name == builtin::ID {
            Some("the id is derived from the key")
        } else {
            None
        };

        if let Some(reason) = reason {
            return Err(CompileError::InvalidKeyField {
                type_name: def.name.clone(),
                field: name.clone(),
                context: context.to_string(),
                reason: reason.to_string(),
            });
        }
    }
    Ok(())
}
