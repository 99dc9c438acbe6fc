//! TTL extraction.

use super::{CompileError, Result};
use crate::ir::{Field, TtlConfig};
use crate::schema::{FieldDirective, TtlOverride, TypeDef};

pub(super) fn extract_ttl(def: &TypeDef, fields: &[Field]) -> Result<Option<TtlConfig>> {
    let mut ttl = None;

    for field_def in &def.fields {
        for directive in &field_def.directives {
            let FieldDirective::Ttl(decl) = directive else {
                continue;
            };
            if ttl.is_some() {
                return Err(CompileError::DuplicateTtl {
                    type_name: def.name.clone(),
                });
            }

            let field = fields
                .iter()
                .find(|f| f.field_name == field_def.name)
                .ok_or_else(|| CompileError::UnknownField {
                    type_name: def.name.clone(),
                    field: field_def.name.clone(),
                    context: "ttl".to_string(),
                })?;
            if !field.is_date_type {
                return Err(CompileError::TtlNotDate {
                    type_name: def.name.clone(),
                    field: field.field_name.clone(),
                });
            }

            let (argument_allowed, argument_required) = match decl.override_policy {
                TtlOverride::Never => (false, false),
                TtlOverride::Allowed => (true, false),
                TtlOverride::Required => (true, true),
            };
            let duration_ms = decl.duration.map(u64::from);
            if duration_ms.is_none() && !argument_allowed {
                return Err(CompileError::TtlWithoutSource {
                    type_name: def.name.clone(),
                    field: field.field_name.clone(),
                });
            }

            ttl = Some(TtlConfig {
                field_name: field.field_name.clone(),
                column_name: field.column_name.clone(),
                argument_allowed,
                argument_required,
                duration_ms,
            });
        }
    }

    Ok(ttl)
}
