//! Schema-to-storage compiler.
//!
//! Turns a [`SchemaDocument`] into an [`Ir`]: one [`Model`] per annotated
//! type and one [`Table`] per physical store. Extraction is memoized per
//! type inside a single [`Compiler`], so a type reached from several
//! directives is built once and every caller gets the same `Arc`.
//!
//! Types with no directives at all are embedded value types and do not
//! become models.

mod cdc;
mod error;
mod field;
mod key;
mod table;
mod ttl;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

pub use error::{CompileError, Result};
pub use field::{column_name_for, JSON_TYPE, SCALAR_TYPES};
pub use key::PUBLIC_ID_INDEX;

use crate::ir::{Ir, Model, SecondaryIndex};
use crate::schema::{SchemaDocument, TableDecl, TypeDef, TypeDirective};

/// Compile a whole document.
pub fn compile(document: &SchemaDocument) -> Result<Ir> {
    Compiler::new(document).compile()
}

/// One compilation pass over a document.
///
/// The model cache lives and dies with the compiler; nothing leaks between
/// compilations.
pub struct Compiler<'a> {
    document: &'a SchemaDocument,
    models: HashMap<String, Arc<Model>>,
    building: HashSet<String>,
}

impl<'a> Compiler<'a> {
    pub fn new(document: &'a SchemaDocument) -> Self {
        Self {
            document,
            models: HashMap::new(),
            building: HashSet::new(),
        }
    }

    /// Extract (or return the cached) model for a type.
    pub fn model(&mut self, type_name: &str) -> Result<Arc<Model>> {
        if let Some(model) = self.models.get(type_name) {
            return Ok(Arc::clone(model));
        }

        let document = self.document;
        let def = document
            .type_def(type_name)
            .ok_or_else(|| CompileError::UnknownType(type_name.to_string()))?;

        self.building.insert(type_name.to_string());
        let built = self.build_model(def);
        self.building.remove(type_name);

        let model = Arc::new(built?);
        self.models
            .insert(type_name.to_string(), Arc::clone(&model));
        Ok(model)
    }

    /// Compile every annotated type and assemble tables.
    pub fn compile(mut self) -> Result<Ir> {
        let document = self.document;
        let mut order = Vec::new();
        for def in document.types.iter().filter(|d| is_model_type(d)) {
            self.model(&def.name)?;
            order.push(def.name.clone());
        }

        let models: BTreeMap<String, Arc<Model>> = self.models.into_iter().collect();
        let tables = table::assemble_tables(&models, &order)?;

        info!(
            models = models.len(),
            tables = tables.len(),
            "Compiled schema"
        );
        Ok(Ir { models, tables })
    }

    /// Build a target model reached through a directive, unless it is
    /// already being built further up the stack (mutual references).
    fn model_if_idle(&mut self, type_name: &str) -> Result<()> {
        if self.building.contains(type_name) {
            return Ok(());
        }
        self.model(type_name).map(|_| ())
    }

    /// Logical table of a type, read straight from its directives.
    fn table_name_of(&self, type_name: &str) -> Result<String> {
        let def = self
            .document
            .type_def(type_name)
            .ok_or_else(|| CompileError::UnknownType(type_name.to_string()))?;
        Ok(table_decl(def)?
            .and_then(|t| t.name.clone())
            .unwrap_or_else(|| def.name.clone()))
    }

    fn build_model(&mut self, def: &'a TypeDef) -> Result<Model> {
        let table = table_decl(def)?;
        let table_name = table
            .and_then(|t| t.name.clone())
            .unwrap_or_else(|| def.name.clone());
        let casing = table.and_then(|t| t.casing).unwrap_or_default();
        let consistent = table.and_then(|t| t.consistent).unwrap_or(false);

        let public = def.directives.iter().find_map(|d| match d {
            TypeDirective::Public(p) => Some(p),
            _ => None,
        });
        let is_ledger = def
            .directives
            .iter()
            .any(|d| matches!(d, TypeDirective::Ledger));

        let fields = field::extract_fields(self.document, def, casing, public.is_some())?;
        let primary_key = key::extract_primary_key(def, &fields)?;
        let secondary_indexes = key::extract_indexes(def, &fields, &primary_key, public)?;
        check_index_columns(def, &fields, &secondary_indexes)?;
        let ttl = ttl::extract_ttl(def, &fields)?;
        let change_data_capture = cdc::extract_cdc(self, def)?;

        debug!(
            model = %def.name,
            table = %table_name,
            fields = fields.len(),
            indexes = secondary_indexes.len(),
            cdc = change_data_capture.len(),
            "Extracted model"
        );

        Ok(Model {
            type_name: def.name.clone(),
            table_name,
            fields,
            primary_key,
            secondary_indexes,
            ttl,
            is_ledger,
            is_public: public.is_some(),
            consistent,
            casing,
            change_data_capture,
        })
    }
}

fn is_model_type(def: &TypeDef) -> bool {
    !def.directives.is_empty()
}

fn table_decl(def: &TypeDef) -> Result<Option<&TableDecl>> {
    let mut tables = def.directives.iter().filter_map(|d| match d {
        TypeDirective::Table(t) => Some(t),
        _ => None,
    });
    let first = tables.next();
    if tables.next().is_some() {
        return Err(CompileError::DuplicateTableDirective {
            type_name: def.name.clone(),
        });
    }
    Ok(first)
}

/// Synthetic index attributes must not shadow field columns.
fn check_index_columns(
    def: &TypeDef,
    fields: &[crate::ir::Field],
    indexes: &[SecondaryIndex],
) -> Result<()> {
    let mut seen: HashSet<&str> = fields
        .iter()
        .filter(|f| f.is_persisted())
        .map(|f| f.column_name.as_str())
        .collect();
    for index in indexes {
        for (_, attribute) in index.own_attributes() {
            if attribute.is_synthetic() && !seen.insert(attribute.name.as_str()) {
                return Err(CompileError::DuplicateColumn {
                    type_name: def.name.clone(),
                    column: attribute.name.clone(),
                });
            }
        }
    }
    Ok(())
}
