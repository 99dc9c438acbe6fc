//! Change-capture extraction.

use std::collections::HashSet;

use tracing::debug;

use super::{Compiler, CompileError, Result};
use crate::ir::{CdcKind, ChangeDataCaptureConfig};
use crate::schema::{CdcEvent, TypeDef, TypeDirective};

pub(super) fn extract_cdc(
    compiler: &mut Compiler<'_>,
    def: &TypeDef,
) -> Result<Vec<ChangeDataCaptureConfig>> {
    let mut configs = Vec::new();
    let mut handlers = HashSet::new();

    for directive in &def.directives {
        let (handler, event, target, kind, readables, writables) = match directive {
            TypeDirective::Enriches(decl) => {
                if decl.event == CdcEvent::Remove {
                    return Err(CompileError::InvalidCdcEvent {
                        type_name: def.name.clone(),
                        handler: decl.handler.clone(),
                        kind: "ENRICHER".to_string(),
                        event: decl.event.to_string(),
                    });
                }
                (
                    &decl.handler,
                    decl.event,
                    Some(&decl.target),
                    CdcKind::Enricher {
                        target_model_name: decl.target.clone(),
                    },
                    &decl.readables,
                    &decl.writables,
                )
            }
            TypeDirective::Reduces(decl) => (
                &decl.handler,
                decl.event,
                Some(&decl.target),
                CdcKind::Reducer {
                    target_model_name: decl.target.clone(),
                    multi: decl.multi,
                },
                &decl.readables,
                &decl.writables,
            ),
            TypeDirective::Reacts(decl) => (
                &decl.handler,
                decl.event,
                None,
                CdcKind::Trigger,
                &decl.readables,
                &decl.writables,
            ),
            _ => continue,
        };

        if !handlers.insert(handler.as_str()) {
            return Err(CompileError::DuplicateHandler {
                type_name: def.name.clone(),
                handler: handler.clone(),
            });
        }

        let mut readable_tables = Vec::new();
        let mut writable_tables = Vec::new();

        if let Some(target) = target {
            let target_table = compiler
                .table_name_of(target)
                .map_err(|_| CompileError::UnknownCdcTarget {
                    type_name: def.name.clone(),
                    handler: handler.clone(),
                    target: target.clone(),
                })?;
            // Materialize the target so its key shape is validated even when
            // it is reachable only through this directive.
            compiler.model_if_idle(target)?;
            readable_tables.push(target_table.clone());
            writable_tables.push(target_table);
        }
        for name in readables {
            push_unique(&mut readable_tables, compiler.table_name_of(name)?);
        }
        for name in writables {
            push_unique(&mut writable_tables, compiler.table_name_of(name)?);
        }

        let config = ChangeDataCaptureConfig {
            source_model_name: def.name.clone(),
            event,
            handler: handler.clone(),
            readable_tables,
            writable_tables,
            kind,
        };
        debug!(
            source = %config.source_model_name,
            handler = %config.handler,
            kind = config.kind_name(),
            event = %config.event,
            "Extracted change capture"
        );
        configs.push(config);
    }

    Ok(configs)
}

fn push_unique(tables: &mut Vec<String>, table: String) {
    if !tables.contains(&table) {
        tables.push(table);
    }
}
