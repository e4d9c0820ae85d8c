//! Enums travel as their interpretation type (text or int4).

use super::dispatch::{Codec, MappingResult, OidResolver, TypeDispatchTable};
use super::types::{ClassId, EnumDescriptor, TypeDescriptor, Value};
use super::wire::{InData, WireValue};
use super::Oid;
use crate::error::MappingError;

fn descriptor(ty: &TypeDescriptor) -> MappingResult<&EnumDescriptor> {
    match ty {
        TypeDescriptor::Enum(desc) => Ok(desc),
        other => Err(MappingError::Unsupported(other.to_string())),
    }
}

fn interpretation(table: &TypeDispatchTable, ty: &TypeDescriptor) -> MappingResult<TypeDescriptor> {
    Ok(table.type_system().interpretation_type(descriptor(ty)?))
}

fn serialize_enum(
    table: &TypeDispatchTable,
    value: &Value,
    ty: &TypeDescriptor,
) -> MappingResult<WireValue> {
    let desc = descriptor(ty)?;
    let ts = table.type_system();
    let inter_ty = ts.interpretation_type(desc);
    let inter_value = ts.to_interpretation(desc, value)?;
    table.serialize_value(&inter_value, &inter_ty)
}

fn deserialize_enum(
    table: &TypeDispatchTable,
    data: InData<'_>,
    ty: &TypeDescriptor,
) -> MappingResult<Value> {
    let desc = descriptor(ty)?;
    let ts = table.type_system();
    let raw = table.deserialize_value(data, &ts.interpretation_type(desc))?;
    Ok(ts.from_interpretation(desc, raw)?)
}

fn enum_oid(table: &TypeDispatchTable, ty: &TypeDescriptor) -> MappingResult<Oid> {
    table.oid_for(&interpretation(table, ty)?)
}

fn enum_array_oid(table: &TypeDispatchTable, ty: &TypeDescriptor) -> MappingResult<Oid> {
    table.array_oid_for(&interpretation(table, ty)?)
}

pub fn register(table: &mut TypeDispatchTable) {
    table.register(
        ClassId::ENUM,
        Codec {
            serialize: serialize_enum,
            deserialize: deserialize_enum,
            oid: OidResolver::Dynamic {
                oid: enum_oid,
                array: enum_array_oid,
            },
        },
    );
}
