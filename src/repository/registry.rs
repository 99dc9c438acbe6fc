//! One repository per compiled model, sharing a store.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::{Repository, RepositoryError, Result};
use crate::codec::ComputeRegistry;
use crate::config::normalize_tables;
use crate::ir::{Ir, ENTITY_TYPE_COLUMN};
use crate::storage::{Item, Store};

/// Repositories for every model of an [`Ir`], keyed by type name.
#[derive(Clone)]
pub struct RepositoryRegistry {
    ir: Arc<Ir>,
    store: Arc<dyn Store>,
    tables: HashMap<String, String>,
    repositories: HashMap<String, Arc<Repository>>,
}

impl RepositoryRegistry {
    /// Build repositories for every model.
    ///
    /// `tables` maps logical table names to physical ones, matched
    /// case-insensitively; unlisted tables keep their logical name. Fails when a computed field's function is
    /// not registered.
    pub fn new(
        ir: Arc<Ir>,
        store: Arc<dyn Store>,
        tables: &HashMap<String, String>,
        computes: ComputeRegistry,
    ) -> Result<Self> {
        let tables = normalize_tables(tables);
        let mut repositories = HashMap::new();
        for (name, model) in &ir.models {
            let physical = tables
                .get(&model.table_name.to_lowercase())
                .cloned()
                .unwrap_or_else(|| model.table_name.clone());
            let repository = Repository::new(
                Arc::clone(model),
                physical,
                Arc::clone(&store),
                computes.clone(),
            );
            repository.codec().check_computes()?;
            repositories.insert(name.clone(), Arc::new(repository));
        }

        info!(
            models = repositories.len(),
            tables = ir.tables.len(),
            "Repository registry initialized"
        );

        Ok(Self {
            ir,
            store,
            tables,
            repositories,
        })
    }

    pub fn ir(&self) -> &Arc<Ir> {
        &self.ir
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Repository of a type.
    pub fn get(&self, type_name: &str) -> Result<Arc<Repository>> {
        self.repositories
            .get(type_name)
            .cloned()
            .ok_or_else(|| RepositoryError::Unexpected(format!("no model named '{}'", type_name)))
    }

    /// Physical name of a logical table.
    pub fn physical_table(&self, logical: &str) -> String {
        self.tables
            .get(&logical.to_lowercase())
            .cloned()
            .unwrap_or_else(|| logical.to_string())
    }

    /// Repository owning an item found in a physical table, resolved by
    /// the item's discriminator column.
    pub fn repository_for_item(&self, table: &str, item: &Item) -> Option<Arc<Repository>> {
        let type_name = item.get(ENTITY_TYPE_COLUMN)?.as_str()?;
        self.repositories
            .get(type_name)
            .filter(|repository| repository.table() == table)
            .cloned()
    }
}
