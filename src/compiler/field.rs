//! Field and field-directive extraction.

use std::collections::HashSet;

use convert_case::{Case, Casing as _};

use super::{CompileError, Result};
use crate::ir::{
    builtin, Casing, ComputeFunction, Field, CREATED_AT_COLUMN, RESERVED_COLUMNS,
    UPDATED_AT_COLUMN, VERSION_COLUMN,
};
use crate::schema::{FieldDef, FieldDirective, SchemaDocument, TypeDef};

/// Scalar type names understood without declaration.
pub const SCALAR_TYPES: [&str; 6] = ["ID", "String", "Int", "Float", "Boolean", "Date"];

/// Free-form embedded value stored as a map.
pub const JSON_TYPE: &str = "JSON";

const BUILTIN_NAMES: [&str; 5] = [
    builtin::ID,
    builtin::CREATED_AT,
    builtin::UPDATED_AT,
    builtin::VERSION,
    builtin::PUBLIC_ID,
];

/// Resolve a type's declared fields into column metadata and append the
/// built-in fields every model carries.
pub(super) fn extract_fields(
    document: &SchemaDocument,
    def: &TypeDef,
    casing: Casing,
    is_public: bool,
) -> Result<Vec<Field>> {
    let mut fields = vec![builtin_field(builtin::ID, "ID", builtin::ID)];

    for field_def in &def.fields {
        if BUILTIN_NAMES.contains(&field_def.name.as_str()) {
            continue;
        }
        fields.push(extract_field(document, def, field_def, casing)?);
    }

    fields.push(builtin_field(builtin::CREATED_AT, "Date", CREATED_AT_COLUMN));
    fields.push(builtin_field(builtin::UPDATED_AT, "Date", UPDATED_AT_COLUMN));
    fields.push(builtin_field(builtin::VERSION, "Int", VERSION_COLUMN));
    if is_public {
        fields.push(builtin_field(
            builtin::PUBLIC_ID,
            "String",
            builtin::PUBLIC_ID,
        ));
    }

    check_columns(def, &fields)?;
    Ok(fields)
}

fn builtin_field(name: &str, type_name: &str, column: &str) -> Field {
    Field {
        field_name: name.to_string(),
        column_name: column.to_string(),
        column_names_for_read: vec![column.to_string()],
        type_name: type_name.to_string(),
        is_required: true,
        is_scalar_type: true,
        is_date_type: type_name == "Date",
        compute_function: None,
        is_builtin: true,
    }
}

fn extract_field(
    document: &SchemaDocument,
    def: &TypeDef,
    field_def: &FieldDef,
    casing: Casing,
) -> Result<Field> {
    let type_name = field_def.type_name.as_str();
    let is_scalar_type = if SCALAR_TYPES.contains(&type_name) || document.enum_def(type_name).is_some() {
        true
    } else if type_name == JSON_TYPE || document.type_def(type_name).is_some() {
        false
    } else {
        return Err(CompileError::UnknownFieldType {
            type_name: def.name.clone(),
            field: field_def.name.clone(),
            field_type: type_name.to_string(),
        });
    };

    let mut column: Option<(Option<String>, Vec<String>)> = None;
    let mut compute_function = None;

    for directive in &field_def.directives {
        match directive {
            FieldDirective::Column { name, read_aliases } => {
                if column.is_some() {
                    return Err(duplicate_directive(def, field_def, "column"));
                }
                column = Some((name.clone(), read_aliases.clone()));
            }
            FieldDirective::Computed {
                function,
                is_virtual,
            } => {
                if compute_function.is_some() {
                    return Err(duplicate_directive(def, field_def, "computed"));
                }
                compute_function = Some(ComputeFunction {
                    name: function.clone(),
                    is_virtual: *is_virtual,
                });
            }
            // Handled by the TTL extractor.
            FieldDirective::Ttl(_) => {}
        }
    }

    let (column_override, read_aliases) = column.unwrap_or_default();
    let column_name = column_override.unwrap_or_else(|| column_name_for(&field_def.name, casing));

    let mut column_names_for_read = vec![column_name.clone()];
    for alias in read_aliases {
        if !column_names_for_read.contains(&alias) {
            column_names_for_read.push(alias);
        }
    }

    Ok(Field {
        field_name: field_def.name.clone(),
        column_name,
        column_names_for_read,
        type_name: type_name.to_string(),
        is_required: field_def.required,
        is_scalar_type,
        is_date_type: type_name == "Date",
        compute_function,
        is_builtin: false,
    })
}

/// Physical column for a field under a table's casing policy.
pub fn column_name_for(field_name: &str, casing: Casing) -> String {
    match casing {
        Casing::Camel => field_name.to_string(),
        Casing::Snake => field_name.to_case(Case::Snake),
    }
}

fn duplicate_directive(def: &TypeDef, field_def: &FieldDef, directive: &str) -> CompileError {
    CompileError::DuplicateFieldDirective {
        type_name: def.name.clone(),
        field: field_def.name.clone(),
        directive: directive.to_string(),
    }
}

fn check_columns(def: &TypeDef, fields: &[Field]) -> Result<()> {
    let mut seen = HashSet::new();
    for field in fields.iter().filter(|f| f.is_persisted()) {
        if !field.is_builtin {
            for column in &field.column_names_for_read {
                if RESERVED_COLUMNS.contains(&column.as_str()) {
                    return Err(CompileError::ReservedColumn {
                        type_name: def.name.clone(),
                        field: field.field_name.clone(),
                        column: column.clone(),
                    });
                }
            }
        }
        if !seen.insert(field.column_name.as_str()) {
            return Err(CompileError::DuplicateColumn {
                type_name: def.name.clone(),
                column: field.column_name.clone(),
            });
        }
    }
    Ok(())
}
