//! Table assembly: merge co-located models into physical tables.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::{CompileError, Result};
use crate::ir::{IndexType, Model, Table};

/// Per-table limit on global secondary indexes.
pub const MAX_GSIS: usize = 20;
/// Per-table limit on local secondary indexes.
pub const MAX_LSIS: usize = 5;

pub(super) fn assemble_tables(
    models: &BTreeMap<String, Arc<Model>>,
    order: &[String],
) -> Result<BTreeMap<String, Arc<Table>>> {
    let mut tables: BTreeMap<String, Table> = BTreeMap::new();
    // (table, index) -> model that first declared it
    let mut index_owners: HashMap<(String, String), String> = HashMap::new();

    let ordered = order
        .iter()
        .filter_map(|name| models.get(name))
        .chain(models.values().filter(|m| !order.contains(&m.type_name)));

    for model in ordered {
        let table = tables
            .entry(model.table_name.clone())
            .or_insert_with(|| Table {
                name: model.table_name.clone(),
                models: Vec::new(),
                is_composite: model.primary_key.is_composite(),
                consistent: false,
                has_ttl: false,
                ttl_column: None,
                has_public_model: false,
                has_cdc: false,
                secondary_indexes: Vec::new(),
            });
        merge_model(table, model, &mut index_owners)?;
    }

    for table in tables.values() {
        check_limits(table)?;
    }

    Ok(tables
        .into_iter()
        .map(|(name, table)| (name, Arc::new(table)))
        .collect())
}

fn merge_model(
    table: &mut Table,
    model: &Model,
    index_owners: &mut HashMap<(String, String), String>,
) -> Result<()> {
    if let Some(first) = table.models.first() {
        if table.is_composite != model.primary_key.is_composite() {
            return Err(CompileError::TableKeyShapeMismatch {
                table: table.name.clone(),
                first: first.clone(),
                second: model.type_name.clone(),
            });
        }
    }

    if let Some(ttl) = &model.ttl {
        if let Some(column) = &table.ttl_column {
            if column != &ttl.column_name {
                return Err(CompileError::TtlColumnMismatch {
                    table: table.name.clone(),
                    first: table.models.first().cloned().unwrap_or_default(),
                    second: model.type_name.clone(),
                });
            }
        }
        table.ttl_column = Some(ttl.column_name.clone());
        table.has_ttl = true;
    }

    for index in &model.secondary_indexes {
        let owner_key = (table.name.clone(), index.name().to_string());
        let existing = table
            .secondary_indexes
            .iter()
            .position(|existing| existing.name() == index.name());
        match existing {
            Some(position) => {
                if !table.secondary_indexes[position].has_same_shape(index) {
                    return Err(CompileError::IndexShapeMismatch {
                        table: table.name.clone(),
                        index: index.name().to_string(),
                        first: index_owners.get(&owner_key).cloned().unwrap_or_default(),
                        second: model.type_name.clone(),
                    });
                }
            }
            None => {
                table.secondary_indexes.push(index.clone());
                index_owners.insert(owner_key, model.type_name.clone());
            }
        }
    }

    table.consistent |= model.consistent;
    table.has_public_model |= model.is_public;
    table.has_cdc |= !model.change_data_capture.is_empty();
    table.models.push(model.type_name.clone());
    Ok(())
}

fn check_limits(table: &Table) -> Result<()> {
    for (kind, limit) in [(IndexType::Gsi, MAX_GSIS), (IndexType::Lsi, MAX_LSIS)] {
        let count = table
            .secondary_indexes
            .iter()
            .filter(|i| i.index_type() == kind)
            .count();
        if count > limit {
            return Err(CompileError::TooManyIndexes {
                table: table.name.clone(),
                kind: match kind {
                    IndexType::Gsi => "global",
                    IndexType::Lsi => "local",
                }
                .to_string(),
                count,
                limit,
            });
        }
    }
    Ok(())
}
