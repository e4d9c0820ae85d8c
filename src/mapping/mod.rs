//! Conversion between application values and PostgreSQL binary wire data.
//!
//! - `types`: type descriptors, values and the `TypeSystem` seam
//! - `dispatch`: codec-per-kind table keyed by class id
//! - `scalar`, `array`, `enums`, `any`: the built-in codecs
//! - `row`: whole-row assembly for result fetching

pub mod any;
pub mod array;
pub mod dispatch;
pub mod enums;
pub mod oid;
pub mod row;
pub mod scalar;
pub mod types;
pub mod wire;

pub use array::ArrayHeader;
pub use dispatch::{Codec, MappingResult, OidResolver, TypeDispatchTable};
pub use oid::Oid;
pub use row::{assemble_row, RowCell};
pub use types::{
    ClassId, EnumDescriptor, EnumInterpretation, ObjectDescriptor, StandardTypeSystem,
    TypeDescriptor, TypeSystem, Value, ValueHandle,
};
pub use wire::{Format, InData, WireValue};

use crate::error::{MappingError, WireFormatError};

pub(crate) fn value_mismatch(ty: &TypeDescriptor, value: &Value) -> MappingError {
    MappingError::ValueMismatch {
        expected: ty.to_string(),
        found: value.kind_name(),
    }
}

pub(crate) fn unexpected_oid(ty: &TypeDescriptor, oid: Oid) -> MappingError {
    MappingError::Wire(WireFormatError::UnexpectedOid {
        type_name: ty.to_string(),
        oid,
    })
}
