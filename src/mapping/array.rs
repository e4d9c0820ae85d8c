//! Binary codec for (possibly nested) arrays.
//!
//! Wire layout:
//!
//! ```text
//! i32 ndim | i32 flags (0) | i32 element oid | ndim * (i32 extent, i32 lower bound = 1)
//! then, depth-first, per element: i32 length (-1 = NULL) | bytes
//! ```
//!
//! An empty array is sent with `ndim = 0` and no dimension entries.

use bytes::{Buf, BufMut, BytesMut};
use tracing::trace;

use super::dispatch::{Codec, MappingResult, OidResolver, TypeDispatchTable};
use super::types::{ClassId, TypeDescriptor, TypeSystem, Value};
use super::wire::{InData, WireValue};
use super::{value_mismatch, Oid};
use crate::error::{MappingError, WireFormatError};

const LOWER_BOUND: i32 = 1;

/// Array header: dimension extents and element type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayHeader {
    pub element_oid: Oid,
    pub extents: Vec<i32>,
}

impl ArrayHeader {
    pub fn dimension_count(&self) -> usize {
        self.extents.len()
    }

    /// Total number of leaf elements, or `None` if it overflows `usize`.
    pub fn element_count(&self) -> Option<usize> {
        if self.extents.is_empty() {
            return Some(0);
        }
        self.extents.iter().try_fold(1usize, |total, &e| {
            total.checked_mul(usize::try_from(e).ok()?)
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_i32(self.extents.len() as i32);
        buf.put_i32(0);
        buf.put_i32(self.element_oid.as_i32());
        for &extent in &self.extents {
            buf.put_i32(extent);
            buf.put_i32(LOWER_BOUND);
        }
    }

    /// Read a header, advancing `buf` past it.
    pub fn read(buf: &mut &[u8]) -> Result<Self, WireFormatError> {
        let ndim = take_i32(buf, "array dimension count")?;
        let _flags = take_i32(buf, "array flags")?;
        let element_oid = Oid(take_i32(buf, "array element oid")?);

        let ndim = usize::try_from(ndim)
            .map_err(|_| WireFormatError::InvalidArray(format!("negative dimension count {}", ndim)))?;
        // Each dimension entry is two i32 words.
        if ndim > buf.remaining() / 8 {
            return Err(WireFormatError::Truncated("array dimensions"));
        }
        let mut extents = Vec::with_capacity(ndim);
        for _ in 0..ndim {
            let extent = take_i32(buf, "array extent")?;
            let _lower_bound = take_i32(buf, "array lower bound")?;
            // Empty arrays are sent with ndim = 0, never a zero extent.
            if extent <= 0 {
                return Err(WireFormatError::InvalidArray(format!(
                    "invalid extent {}",
                    extent
                )));
            }
            extents.push(extent);
        }
        Ok(Self {
            element_oid,
            extents,
        })
    }
}

pub(crate) fn take_i32(buf: &mut &[u8], what: &'static str) -> Result<i32, WireFormatError> {
    if buf.remaining() < 4 {
        return Err(WireFormatError::Truncated(what));
    }
    Ok(buf.get_i32())
}

/// Innermost non-collection type.
pub(crate) fn leaf_type<'t>(ts: &dyn TypeSystem, ty: &'t TypeDescriptor) -> &'t TypeDescriptor {
    let mut current = ty;
    while let Some(item) = ts.item_type(current) {
        current = item;
    }
    current
}

fn collection_oid(table: &TypeDispatchTable, ty: &TypeDescriptor) -> MappingResult<Oid> {
    // Multi-dimensional arrays share the element's array OID.
    table.array_oid_for(leaf_type(table.type_system(), ty))
}

// ============================================================================
// Encoding
// ============================================================================

/// Pass 1: walk the first element of each level to learn the extents.
fn discover_extents<'t>(
    ts: &dyn TypeSystem,
    value: &Value,
    ty: &'t TypeDescriptor,
) -> MappingResult<(Vec<usize>, &'t TypeDescriptor)> {
    let mut extents = Vec::new();
    let mut current = Some(value);
    let mut current_ty = ty;

    while let Some(item_ty) = ts.item_type(current_ty) {
        match current {
            Some(Value::Collection(items)) => {
                extents.push(items.len());
                current = items.first();
            }
            Some(Value::Null) => return Err(WireFormatError::NullNestedArray.into()),
            Some(other) => return Err(value_mismatch(current_ty, other)),
            // An empty level above; keep descending the type only.
            None => {}
        }
        current_ty = item_ty;
    }
    Ok((extents, current_ty))
}

/// Pass 2: emit elements depth-first, checking every sub-array against the extents.
fn write_level(
    table: &TypeDispatchTable,
    buf: &mut BytesMut,
    value: &Value,
    ty: &TypeDescriptor,
    extents: &[usize],
    level: usize,
) -> MappingResult<()> {
    let items = match value {
        Value::Collection(items) => items,
        Value::Null => return Err(WireFormatError::NullNestedArray.into()),
        other => return Err(value_mismatch(ty, other)),
    };
    if items.len() != extents[level] {
        return Err(WireFormatError::NonUniformArray.into());
    }
    let item_ty = table
        .type_system()
        .item_type(ty)
        .ok_or_else(|| MappingError::Unsupported(ty.to_string()))?;

    if level + 1 < extents.len() {
        for item in items {
            write_level(table, buf, item, item_ty, extents, level + 1)?;
        }
    } else {
        for item in items {
            let wire = table.serialize_value(item, item_ty)?;
            buf.put_i32(wire.length());
            buf.put_slice(wire.bytes());
        }
    }
    Ok(())
}

fn serialize_collection(
    table: &TypeDispatchTable,
    value: &Value,
    ty: &TypeDescriptor,
) -> MappingResult<WireValue> {
    let oid = table.oid_for(ty)?;
    if value.is_null() {
        return Ok(WireValue::null(oid));
    }

    let ts = table.type_system();
    let (extents, leaf) = discover_extents(ts, value, ty)?;
    if extents.is_empty() {
        return Err(MappingError::Unsupported(ty.to_string()));
    }
    let element_oid = table.oid_for(leaf)?;

    // Sub-arrays are checked even when a zero extent makes the array empty.
    let mut body = BytesMut::new();
    write_level(table, &mut body, value, ty, &extents, 0)?;

    let header = if extents.contains(&0) {
        ArrayHeader {
            element_oid,
            extents: Vec::new(),
        }
    } else {
        ArrayHeader {
            element_oid,
            extents: extents
                .iter()
                .map(|&e| i32::try_from(e))
                .collect::<Result<_, _>>()
                .map_err(|_| WireFormatError::InvalidArray("array too large".to_string()))?,
        }
    };
    trace!(?header, "serialize array");

    let mut buf = BytesMut::with_capacity(12 + header.extents.len() * 8 + body.len());
    header.write(&mut buf);
    buf.extend_from_slice(&body);
    Ok(WireValue::new(oid, buf.freeze()))
}

// ============================================================================
// Decoding
// ============================================================================

fn read_level(
    table: &TypeDispatchTable,
    buf: &mut &[u8],
    header: &ArrayHeader,
    leaf: &TypeDescriptor,
    level: usize,
) -> MappingResult<Value> {
    let extent = header.extents[level] as usize;
    let mut items = Vec::with_capacity(extent.min(buf.remaining() / 4));

    if level + 1 < header.extents.len() {
        for _ in 0..extent {
            items.push(read_level(table, buf, header, leaf, level + 1)?);
        }
    } else {
        for _ in 0..extent {
            let len = take_i32(buf, "array element length")?;
            if len < 0 {
                items.push(table.deserialize_value(InData::null(header.element_oid), leaf)?);
                continue;
            }
            let len = len as usize;
            if buf.remaining() < len {
                return Err(WireFormatError::Truncated("array element").into());
            }
            let (bytes, rest) = buf.split_at(len);
            *buf = rest;
            items.push(table.deserialize_value(InData::new(header.element_oid, bytes), leaf)?);
        }
    }
    Ok(Value::Collection(items))
}

/// Decode array bytes whose header has already been read into `header`.
pub(crate) fn decode_array_body(
    table: &TypeDispatchTable,
    mut buf: &[u8],
    header: &ArrayHeader,
    ty: &TypeDescriptor,
) -> MappingResult<Value> {
    if header.dimension_count() == 0 {
        return Ok(Value::Collection(Vec::new()));
    }

    // Walk one collection level per dimension.
    let ts = table.type_system();
    let mut leaf = ty;
    for _ in 0..header.dimension_count() {
        leaf = ts.item_type(leaf).ok_or_else(|| {
            WireFormatError::InvalidArray(format!(
                "{}-dimensional array doesn't fit type '{}'",
                header.dimension_count(),
                ty
            ))
        })?;
    }
    if ts.item_type(leaf).is_some() {
        return Err(WireFormatError::InvalidArray(format!(
            "{}-dimensional array doesn't fit type '{}'",
            header.dimension_count(),
            ty
        ))
        .into());
    }

    if header.extents.iter().any(|&e| e <= 0) {
        return Err(WireFormatError::InvalidArray(format!(
            "invalid extents {:?}",
            header.extents
        ))
        .into());
    }
    let count = header.element_count().ok_or_else(|| {
        WireFormatError::InvalidArray(format!("too many elements {:?}", header.extents))
    })?;
    // Every element carries at least its length word.
    if count.saturating_mul(4) > buf.remaining() {
        return Err(WireFormatError::Truncated("array elements").into());
    }

    let value = read_level(table, &mut buf, header, leaf, 0)?;
    if buf.has_remaining() {
        return Err(WireFormatError::InvalidArray(format!(
            "{} trailing bytes",
            buf.remaining()
        ))
        .into());
    }
    Ok(value)
}

fn deserialize_collection(
    table: &TypeDispatchTable,
    data: InData<'_>,
    ty: &TypeDescriptor,
) -> MappingResult<Value> {
    let Some(mut bytes) = data.data else {
        return Ok(Value::Null);
    };
    let header = ArrayHeader::read(&mut bytes)?;
    trace!(?header, oid = %data.oid, "deserialize array");
    decode_array_body(table, bytes, &header, ty)
}

pub fn register(table: &mut TypeDispatchTable) {
    table.register(
        ClassId::COLLECTION,
        Codec {
            serialize: serialize_collection,
            deserialize: deserialize_collection,
            oid: OidResolver::Dynamic {
                oid: collection_oid,
                array: collection_oid,
            },
        },
    );
}
