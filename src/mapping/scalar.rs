//! Binary codecs for scalar types.
//!
//! Reference: https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES
//!
//! Integers are big-endian two's complement. Floats travel as their IEEE-754
//! bit pattern pushed through the integer codec of the same width. Text and
//! bytea are raw bytes with the length carried out of band.

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime};
use uuid::Uuid;

use super::dispatch::{Codec, MappingResult, OidResolver, TypeDispatchTable};
use super::types::{ClassId, TypeDescriptor, Value};
use super::wire::{InData, WireValue};
use super::{unexpected_oid, value_mismatch, Oid};
use crate::error::{MappingError, WireFormatError};

/// 2000-01-01 00:00:00 as microseconds since the Unix epoch.
const PG_EPOCH_UNIX_MICROS: i64 = 946_684_800_000_000;

// ============================================================================
// Integer primitives
// ============================================================================

fn fixed<const N: usize>(oid: Oid, bytes: &[u8]) -> Result<[u8; N], WireFormatError> {
    <[u8; N]>::try_from(bytes).map_err(|_| WireFormatError::InvalidWireLength {
        oid,
        expected: N,
        actual: bytes.len(),
    })
}

#[inline]
pub(crate) fn put_int2(v: i16) -> Bytes {
    Bytes::copy_from_slice(&v.to_be_bytes())
}

#[inline]
pub(crate) fn put_int4(v: i32) -> Bytes {
    Bytes::copy_from_slice(&v.to_be_bytes())
}

#[inline]
pub(crate) fn put_int8(v: i64) -> Bytes {
    Bytes::copy_from_slice(&v.to_be_bytes())
}

pub(crate) fn read_int2(oid: Oid, bytes: &[u8]) -> Result<i16, WireFormatError> {
    Ok(i16::from_be_bytes(fixed(oid, bytes)?))
}

pub(crate) fn read_int4(oid: Oid, bytes: &[u8]) -> Result<i32, WireFormatError> {
    Ok(i32::from_be_bytes(fixed(oid, bytes)?))
}

pub(crate) fn read_int8(oid: Oid, bytes: &[u8]) -> Result<i64, WireFormatError> {
    Ok(i64::from_be_bytes(fixed(oid, bytes)?))
}

/// Read any integer column, widened to i64.
fn read_any_integer(data: InData<'_>, bytes: &[u8], ty: &TypeDescriptor) -> MappingResult<i64> {
    let value = match data.oid {
        Oid::INT2 => i64::from(read_int2(data.oid, bytes)?),
        Oid::INT4 => i64::from(read_int4(data.oid, bytes)?),
        Oid::INT8 => read_int8(data.oid, bytes)?,
        other => return Err(unexpected_oid(ty, other)),
    };
    Ok(value)
}

fn integer_of(value: &Value) -> Option<i128> {
    match *value {
        Value::Int8(v) => Some(i128::from(v)),
        Value::UInt8(v) => Some(i128::from(v)),
        Value::Int16(v) => Some(i128::from(v)),
        Value::UInt16(v) => Some(i128::from(v)),
        Value::Int32(v) => Some(i128::from(v)),
        Value::UInt32(v) => Some(i128::from(v)),
        Value::Int64(v) => Some(i128::from(v)),
        Value::UInt64(v) => Some(i128::from(v)),
        _ => None,
    }
}

fn out_of_range(ty: &TypeDescriptor, value: impl ToString) -> MappingError {
    WireFormatError::OutOfRange {
        type_name: ty.to_string(),
        value: value.to_string(),
    }
    .into()
}

// ============================================================================
// Integers
// ============================================================================

fn serialize_integer(
    table: &TypeDispatchTable,
    value: &Value,
    ty: &TypeDescriptor,
) -> MappingResult<WireValue> {
    let oid = table.oid_for(ty)?;
    if value.is_null() {
        return Ok(WireValue::null(oid));
    }
    let raw = integer_of(value).ok_or_else(|| value_mismatch(ty, value))?;

    let wide = match ty {
        TypeDescriptor::Int8 => i8::try_from(raw).map(i64::from),
        TypeDescriptor::UInt8 => u8::try_from(raw).map(i64::from),
        TypeDescriptor::Int16 => i16::try_from(raw).map(i64::from),
        TypeDescriptor::UInt16 => u16::try_from(raw).map(i64::from),
        TypeDescriptor::Int32 => i32::try_from(raw).map(i64::from),
        TypeDescriptor::UInt32 => u32::try_from(raw).map(i64::from),
        TypeDescriptor::Int64 => i64::try_from(raw),
        other => return Err(MappingError::Unsupported(other.to_string())),
    }
    .map_err(|_| out_of_range(ty, raw))?;

    let data = match oid {
        Oid::INT2 => put_int2(i16::try_from(wide).map_err(|_| out_of_range(ty, wide))?),
        Oid::INT4 => put_int4(i32::try_from(wide).map_err(|_| out_of_range(ty, wide))?),
        _ => put_int8(wide),
    };
    Ok(WireValue::new(oid, data))
}

fn deserialize_integer(
    _: &TypeDispatchTable,
    data: InData<'_>,
    ty: &TypeDescriptor,
) -> MappingResult<Value> {
    let Some(bytes) = data.data else {
        return Ok(Value::Null);
    };
    let raw = read_any_integer(data, bytes, ty)?;
    let range = |_| out_of_range(ty, raw);

    let value = match ty {
        TypeDescriptor::Int8 => Value::Int8(i8::try_from(raw).map_err(range)?),
        TypeDescriptor::UInt8 => Value::UInt8(u8::try_from(raw).map_err(range)?),
        TypeDescriptor::Int16 => Value::Int16(i16::try_from(raw).map_err(range)?),
        TypeDescriptor::UInt16 => Value::UInt16(u16::try_from(raw).map_err(range)?),
        TypeDescriptor::Int32 => Value::Int32(i32::try_from(raw).map_err(range)?),
        TypeDescriptor::UInt32 => Value::UInt32(u32::try_from(raw).map_err(range)?),
        TypeDescriptor::Int64 => Value::Int64(raw),
        TypeDescriptor::UInt64 => Value::UInt64(u64::try_from(raw).map_err(range)?),
        other => return Err(MappingError::Unsupported(other.to_string())),
    };
    Ok(value)
}

fn no_wire_oid(_: &TypeDispatchTable, ty: &TypeDescriptor) -> MappingResult<Oid> {
    Err(MappingError::Unsupported(ty.to_string()))
}

// ============================================================================
// Floats
// ============================================================================

fn serialize_float(
    table: &TypeDispatchTable,
    value: &Value,
    ty: &TypeDescriptor,
) -> MappingResult<WireValue> {
    let oid = table.oid_for(ty)?;
    let data = match (ty, value) {
        (_, Value::Null) => return Ok(WireValue::null(oid)),
        (TypeDescriptor::Float32, Value::Float32(v)) => put_int4(v.to_bits() as i32),
        (TypeDescriptor::Float64, Value::Float32(v)) => put_int8(f64::from(*v).to_bits() as i64),
        (TypeDescriptor::Float64, Value::Float64(v)) => put_int8(v.to_bits() as i64),
        _ => return Err(value_mismatch(ty, value)),
    };
    Ok(WireValue::new(oid, data))
}

fn deserialize_float(
    _: &TypeDispatchTable,
    data: InData<'_>,
    ty: &TypeDescriptor,
) -> MappingResult<Value> {
    let Some(bytes) = data.data else {
        return Ok(Value::Null);
    };
    let wide = match data.oid {
        Oid::FLOAT4 => f64::from(f32::from_bits(read_int4(data.oid, bytes)? as u32)),
        Oid::FLOAT8 => f64::from_bits(read_int8(data.oid, bytes)? as u64),
        other => return Err(unexpected_oid(ty, other)),
    };
    let value = match (ty, data.oid) {
        // Keep the exact bits when no conversion happens.
        (TypeDescriptor::Float32, Oid::FLOAT4) => {
            Value::Float32(f32::from_bits(read_int4(data.oid, bytes)? as u32))
        }
        (TypeDescriptor::Float32, _) => Value::Float32(wide as f32),
        (TypeDescriptor::Float64, _) => Value::Float64(wide),
        (other, _) => return Err(MappingError::Unsupported(other.to_string())),
    };
    Ok(value)
}

// ============================================================================
// Boolean
// ============================================================================

fn serialize_bool(
    table: &TypeDispatchTable,
    value: &Value,
    ty: &TypeDescriptor,
) -> MappingResult<WireValue> {
    let oid = table.oid_for(ty)?;
    match value {
        Value::Null => Ok(WireValue::null(oid)),
        Value::Bool(v) => Ok(WireValue::new(oid, Bytes::copy_from_slice(&[u8::from(*v)]))),
        other => Err(value_mismatch(ty, other)),
    }
}

fn deserialize_bool(
    _: &TypeDispatchTable,
    data: InData<'_>,
    ty: &TypeDescriptor,
) -> MappingResult<Value> {
    let Some(bytes) = data.data else {
        return Ok(Value::Null);
    };
    if data.oid == Oid::BOOL {
        let [b] = fixed::<1>(data.oid, bytes)?;
        return Ok(Value::Bool(b != 0));
    }
    Ok(Value::Bool(read_any_integer(data, bytes, ty)? != 0))
}

// ============================================================================
// Text and bytea
// ============================================================================

fn serialize_text(
    table: &TypeDispatchTable,
    value: &Value,
    ty: &TypeDescriptor,
) -> MappingResult<WireValue> {
    let oid = table.oid_for(ty)?;
    match value {
        Value::Null => Ok(WireValue::null(oid)),
        Value::Text(s) => Ok(WireValue::new(oid, Bytes::copy_from_slice(s.as_bytes()))),
        other => Err(value_mismatch(ty, other)),
    }
}

fn deserialize_text(
    _: &TypeDispatchTable,
    data: InData<'_>,
    ty: &TypeDescriptor,
) -> MappingResult<Value> {
    let Some(bytes) = data.data else {
        return Ok(Value::Null);
    };
    if !data.oid.is_text_like() {
        return Err(unexpected_oid(ty, data.oid));
    }
    let text = std::str::from_utf8(bytes)
        .map_err(|e| WireFormatError::InvalidUtf8(e.to_string()))?;
    Ok(Value::Text(text.to_string()))
}

fn serialize_bytes(
    table: &TypeDispatchTable,
    value: &Value,
    ty: &TypeDescriptor,
) -> MappingResult<WireValue> {
    let oid = table.oid_for(ty)?;
    match value {
        Value::Null => Ok(WireValue::null(oid)),
        Value::Bytes(b) => Ok(WireValue::new(oid, Bytes::copy_from_slice(b))),
        other => Err(value_mismatch(ty, other)),
    }
}

fn deserialize_bytes(
    _: &TypeDispatchTable,
    data: InData<'_>,
    ty: &TypeDescriptor,
) -> MappingResult<Value> {
    match data.data {
        None => Ok(Value::Null),
        Some(bytes) if data.oid == Oid::BYTEA => Ok(Value::Bytes(bytes.to_vec())),
        Some(_) => Err(unexpected_oid(ty, data.oid)),
    }
}

// ============================================================================
// UUID and timestamp
// ============================================================================

fn serialize_uuid(
    table: &TypeDispatchTable,
    value: &Value,
    ty: &TypeDescriptor,
) -> MappingResult<WireValue> {
    let oid = table.oid_for(ty)?;
    match value {
        Value::Null => Ok(WireValue::null(oid)),
        Value::Uuid(u) => Ok(WireValue::new(oid, Bytes::copy_from_slice(u.as_bytes()))),
        other => Err(value_mismatch(ty, other)),
    }
}

fn deserialize_uuid(
    _: &TypeDispatchTable,
    data: InData<'_>,
    ty: &TypeDescriptor,
) -> MappingResult<Value> {
    let Some(bytes) = data.data else {
        return Ok(Value::Null);
    };
    if data.oid != Oid::UUID {
        return Err(unexpected_oid(ty, data.oid));
    }
    Ok(Value::Uuid(Uuid::from_bytes(fixed::<16>(data.oid, bytes)?)))
}

/// Microseconds since 2000-01-01.
pub(crate) fn timestamp_to_pg(ts: &NaiveDateTime) -> Option<i64> {
    ts.and_utc().timestamp_micros().checked_sub(PG_EPOCH_UNIX_MICROS)
}

pub(crate) fn timestamp_from_pg(micros: i64) -> Option<NaiveDateTime> {
    let unix = micros.checked_add(PG_EPOCH_UNIX_MICROS)?;
    DateTime::from_timestamp_micros(unix).map(|dt| dt.naive_utc())
}

fn serialize_timestamp(
    table: &TypeDispatchTable,
    value: &Value,
    ty: &TypeDescriptor,
) -> MappingResult<WireValue> {
    let oid = table.oid_for(ty)?;
    match value {
        Value::Null => Ok(WireValue::null(oid)),
        Value::Timestamp(ts) => {
            let micros = timestamp_to_pg(ts).ok_or_else(|| out_of_range(ty, ts))?;
            Ok(WireValue::new(oid, put_int8(micros)))
        }
        other => Err(value_mismatch(ty, other)),
    }
}

fn deserialize_timestamp(
    _: &TypeDispatchTable,
    data: InData<'_>,
    ty: &TypeDescriptor,
) -> MappingResult<Value> {
    let Some(bytes) = data.data else {
        return Ok(Value::Null);
    };
    if data.oid != Oid::TIMESTAMP {
        return Err(unexpected_oid(ty, data.oid));
    }
    let micros = read_int8(data.oid, bytes)?;
    let ts = timestamp_from_pg(micros).ok_or_else(|| out_of_range(ty, micros))?;
    Ok(Value::Timestamp(ts))
}

// ============================================================================
// Registration
// ============================================================================

fn fixed_codec(
    serialize: super::dispatch::SerializeFn,
    deserialize: super::dispatch::DeserializeFn,
    oid: Oid,
    array: Oid,
) -> Codec {
    Codec {
        serialize,
        deserialize,
        oid: OidResolver::Fixed {
            oid,
            array: Some(array),
        },
    }
}

/// Register every scalar codec.
pub fn register(table: &mut TypeDispatchTable) {
    // Unsigned types widen so every value fits the signed wire type.
    let integers = [
        (ClassId::INT8, Oid::INT2, Oid::INT2_ARRAY),
        (ClassId::UINT8, Oid::INT2, Oid::INT2_ARRAY),
        (ClassId::INT16, Oid::INT2, Oid::INT2_ARRAY),
        (ClassId::UINT16, Oid::INT4, Oid::INT4_ARRAY),
        (ClassId::INT32, Oid::INT4, Oid::INT4_ARRAY),
        (ClassId::UINT32, Oid::INT8, Oid::INT8_ARRAY),
        (ClassId::INT64, Oid::INT8, Oid::INT8_ARRAY),
    ];
    for (class_id, oid, array) in integers {
        table.register(
            class_id,
            fixed_codec(serialize_integer, deserialize_integer, oid, array),
        );
    }

    // No signed wire type holds every u64; decoding int8 is still allowed.
    table.register(
        ClassId::UINT64,
        Codec {
            serialize: serialize_integer,
            deserialize: deserialize_integer,
            oid: OidResolver::Dynamic {
                oid: no_wire_oid,
                array: no_wire_oid,
            },
        },
    );

    table.register(
        ClassId::FLOAT32,
        fixed_codec(serialize_float, deserialize_float, Oid::FLOAT4, Oid::FLOAT4_ARRAY),
    );
    table.register(
        ClassId::FLOAT64,
        fixed_codec(serialize_float, deserialize_float, Oid::FLOAT8, Oid::FLOAT8_ARRAY),
    );
    table.register(
        ClassId::BOOL,
        fixed_codec(serialize_bool, deserialize_bool, Oid::BOOL, Oid::BOOL_ARRAY),
    );
    table.register(
        ClassId::TEXT,
        fixed_codec(serialize_text, deserialize_text, Oid::TEXT, Oid::TEXT_ARRAY),
    );
    table.register(
        ClassId::BYTES,
        fixed_codec(serialize_bytes, deserialize_bytes, Oid::BYTEA, Oid::BYTEA_ARRAY),
    );
    table.register(
        ClassId::UUID,
        fixed_codec(serialize_uuid, deserialize_uuid, Oid::UUID, Oid::UUID_ARRAY),
    );
    table.register(
        ClassId::TIMESTAMP,
        fixed_codec(
            serialize_timestamp,
            deserialize_timestamp,
            Oid::TIMESTAMP,
            Oid::TIMESTAMP_ARRAY,
        ),
    );
}
