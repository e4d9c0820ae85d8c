//! Decoding into untyped (`Any`) targets.
//!
//! The column OID picks the type. Array OIDs decode into nested
//! collections as deep as the array header says.

use super::array::{decode_array_body, ArrayHeader};
use super::dispatch::{Codec, MappingResult, OidResolver, TypeDispatchTable};
use super::types::{ClassId, TypeDescriptor, Value};
use super::wire::{InData, WireValue};
use super::Oid;
use crate::error::{MappingError, WireFormatError};

/// Type a column of this scalar OID decodes into.
pub fn guess_type(oid: Oid) -> Option<TypeDescriptor> {
    let ty = match oid {
        _ if oid.is_text_like() => TypeDescriptor::Text,
        Oid::INT2 => TypeDescriptor::Int16,
        Oid::INT4 => TypeDescriptor::Int32,
        Oid::INT8 => TypeDescriptor::Int64,
        Oid::FLOAT4 => TypeDescriptor::Float32,
        Oid::FLOAT8 => TypeDescriptor::Float64,
        Oid::BOOL => TypeDescriptor::Bool,
        Oid::BYTEA => TypeDescriptor::Bytes,
        Oid::UUID => TypeDescriptor::Uuid,
        Oid::TIMESTAMP => TypeDescriptor::Timestamp,
        _ => return None,
    };
    Some(ty)
}

fn deserialize_any(
    table: &TypeDispatchTable,
    data: InData<'_>,
    _: &TypeDescriptor,
) -> MappingResult<Value> {
    let Some(mut bytes) = data.data else {
        return Ok(Value::Null);
    };

    if data.oid.is_array() {
        let header = ArrayHeader::read(&mut bytes)?;
        let leaf = guess_type(header.element_oid)
            .ok_or(WireFormatError::UnknownOid(header.element_oid))?;
        let ty = TypeDescriptor::nested_collection(leaf, header.dimension_count().max(1));
        return decode_array_body(table, bytes, &header, &ty);
    }

    let ty = guess_type(data.oid).ok_or(WireFormatError::UnknownOid(data.oid))?;
    table.deserialize_value(data, &ty)
}

fn serialize_any(_: &TypeDispatchTable, _: &Value, ty: &TypeDescriptor) -> MappingResult<WireValue> {
    Err(MappingError::Unsupported(ty.to_string()))
}

fn any_oid(_: &TypeDispatchTable, ty: &TypeDescriptor) -> MappingResult<Oid> {
    Err(MappingError::NoOid(ty.to_string()))
}

pub fn register(table: &mut TypeDispatchTable) {
    table.register(
        ClassId::ANY,
        Codec {
            serialize: serialize_any,
            deserialize: deserialize_any,
            oid: OidResolver::Dynamic {
                oid: any_oid,
                array: any_oid,
            },
        },
    );
}
