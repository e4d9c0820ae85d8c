//! Assemble a result row into one application value.

use tracing::trace;

use super::dispatch::{MappingResult, TypeDispatchTable};
use super::types::{TypeDescriptor, Value};
use super::wire::InData;
use crate::error::MappingError;

/// A named cell of a result row.
#[derive(Debug, Clone, Copy)]
pub struct RowCell<'a> {
    pub name: &'a str,
    pub data: InData<'a>,
}

/// Decode `cells` as one value of type `ty`.
///
/// - collection: one item per column, in column order
/// - object: columns matched to fields by name; a column with no field is an
///   error, a field with no column stays null
/// - fields map or `Any`: name/value pairs in column order
/// - anything else: the row must have exactly one column
pub fn assemble_row(
    table: &TypeDispatchTable,
    cells: &[RowCell<'_>],
    ty: &TypeDescriptor,
) -> MappingResult<Value> {
    let ts = table.type_system();
    trace!(ty = %ty, columns = cells.len(), "assemble row");

    match ty {
        TypeDescriptor::Collection(_) => {
            let item = ts
                .item_type(ty)
                .ok_or_else(|| MappingError::Unsupported(ty.to_string()))?;
            let items = cells
                .iter()
                .map(|cell| table.deserialize_value(cell.data, item))
                .collect::<MappingResult<Vec<_>>>()?;
            Ok(Value::Collection(items))
        }
        TypeDescriptor::Object(desc) => {
            let mut fields: Vec<(String, Value)> = desc
                .fields
                .iter()
                .map(|f| (f.name.clone(), Value::Null))
                .collect();
            for cell in cells {
                let idx = desc
                    .fields
                    .iter()
                    .position(|f| f.name == cell.name)
                    .ok_or_else(|| MappingError::NoSuchField {
                        type_name: desc.name.clone(),
                        column: cell.name.to_string(),
                    })?;
                fields[idx].1 = table.deserialize_value(cell.data, &desc.fields[idx].ty)?;
            }
            Ok(Value::Object(fields))
        }
        TypeDescriptor::Fields(value_ty) => named_cells(table, cells, value_ty),
        TypeDescriptor::Any => named_cells(table, cells, &TypeDescriptor::Any),
        _ => match cells {
            [cell] => table.deserialize_value(cell.data, ty),
            _ => Err(MappingError::Unsupported(format!(
                "{} row with {} columns",
                ty,
                cells.len()
            ))),
        },
    }
}

fn named_cells(
    table: &TypeDispatchTable,
    cells: &[RowCell<'_>],
    value_ty: &TypeDescriptor,
) -> MappingResult<Value> {
    let pairs = cells
        .iter()
        .map(|cell| Ok((cell.name.to_string(), table.deserialize_value(cell.data, value_ty)?)))
        .collect::<MappingResult<Vec<_>>>()?;
    Ok(Value::Object(pairs))
}
