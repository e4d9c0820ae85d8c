//! Codec registry keyed by type class id.
//!
//! Each kind of type has one [`Codec`] record bundling its serializer,
//! deserializer and OID resolution. Collections and enums are registered
//! once and re-dispatch to their item or interpretation type, so nested
//! collections of any depth need no extra registration.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use super::types::{ClassId, StandardTypeSystem, TypeDescriptor, TypeSystem, Value, ValueHandle};
use super::wire::{InData, WireValue};
use super::Oid;
use crate::error::{MappingError, WireFormatError};

pub type MappingResult<T> = std::result::Result<T, MappingError>;

/// Encode a value of the given type.
pub type SerializeFn =
    fn(&TypeDispatchTable, &Value, &TypeDescriptor) -> MappingResult<WireValue>;

/// Decode a cell into a value of the given type.
pub type DeserializeFn =
    fn(&TypeDispatchTable, InData<'_>, &TypeDescriptor) -> MappingResult<Value>;

/// Resolve an OID from a type.
pub type OidFn = fn(&TypeDispatchTable, &TypeDescriptor) -> MappingResult<Oid>;

/// How a codec reports its OIDs.
#[derive(Clone, Copy)]
pub enum OidResolver {
    /// Scalar with a fixed OID and, if it can be an array element, its array OID.
    Fixed { oid: Oid, array: Option<Oid> },
    /// Computed from the type (collections, enums).
    Dynamic { oid: OidFn, array: OidFn },
}

/// Serializer, deserializer and OID resolution for one kind of type.
#[derive(Clone, Copy)]
pub struct Codec {
    pub serialize: SerializeFn,
    pub deserialize: DeserializeFn,
    pub oid: OidResolver,
}

pub struct TypeDispatchTable {
    type_system: Arc<dyn TypeSystem>,
    codecs: Vec<Option<Codec>>,
}

impl TypeDispatchTable {
    /// Empty table. Every lookup fails until codecs are registered.
    pub fn new(type_system: Arc<dyn TypeSystem>) -> Self {
        Self {
            type_system,
            codecs: Vec::with_capacity(ClassId::BUILTIN_COUNT),
        }
    }

    /// Table with every built-in codec registered.
    pub fn with_defaults(type_system: Arc<dyn TypeSystem>) -> Self {
        let mut table = Self::new(type_system);
        super::scalar::register(&mut table);
        super::array::register(&mut table);
        super::enums::register(&mut table);
        super::any::register(&mut table);
        table
    }

    /// Built-in codecs over [`StandardTypeSystem`].
    pub fn standard() -> Self {
        Self::with_defaults(Arc::new(StandardTypeSystem))
    }

    pub fn type_system(&self) -> &dyn TypeSystem {
        self.type_system.as_ref()
    }

    /// Register (or replace) the codec for a class id, growing the table as needed.
    pub fn register(&mut self, class_id: ClassId, codec: Codec) {
        let index = class_id.index();
        if index >= self.codecs.len() {
            self.codecs.resize(index + 1, None);
        }
        self.codecs[index] = Some(codec);
    }

    pub fn is_registered(&self, class_id: ClassId) -> bool {
        matches!(self.codecs.get(class_id.index()), Some(Some(_)))
    }

    fn codec(&self, ty: &TypeDescriptor) -> MappingResult<&Codec> {
        let class_id = self.type_system.class_id(ty);
        match self.codecs.get(class_id.index()) {
            Some(Some(codec)) => Ok(codec),
            _ => Err(MappingError::NoCodec {
                type_name: ty.to_string(),
                class_id: class_id.0,
            }),
        }
    }

    /// Serialize a typed value.
    pub fn serialize(&self, handle: &ValueHandle) -> MappingResult<WireValue> {
        self.serialize_value(&handle.value, &handle.ty)
    }

    pub fn serialize_value(&self, value: &Value, ty: &TypeDescriptor) -> MappingResult<WireValue> {
        trace!(ty = %ty, "serialize");
        let codec = self.codec(ty)?;
        let wire = (codec.serialize)(self, value, ty)?;
        check_wire_len(wire.bytes().len())?;
        Ok(wire)
    }

    /// Deserialize a cell into the target type.
    pub fn deserialize(&self, data: InData<'_>, ty: &TypeDescriptor) -> MappingResult<ValueHandle> {
        let value = self.deserialize_value(data, ty)?;
        Ok(ValueHandle::new(value, ty.clone()))
    }

    pub fn deserialize_value(&self, data: InData<'_>, ty: &TypeDescriptor) -> MappingResult<Value> {
        trace!(ty = %ty, oid = %data.oid, "deserialize");
        let codec = self.codec(ty)?;
        (codec.deserialize)(self, data, ty)
    }

    /// Wire OID for values of this type.
    pub fn oid_for(&self, ty: &TypeDescriptor) -> MappingResult<Oid> {
        match self.codec(ty)?.oid {
            OidResolver::Fixed { oid, .. } => Ok(oid),
            OidResolver::Dynamic { oid, .. } => oid(self, ty),
        }
    }

    /// Wire OID of an array whose elements are of this type.
    pub fn array_oid_for(&self, ty: &TypeDescriptor) -> MappingResult<Oid> {
        match self.codec(ty)?.oid {
            OidResolver::Fixed { array, .. } => {
                array.ok_or_else(|| MappingError::NoOid(format!("{}[]", ty)))
            }
            OidResolver::Dynamic { array, .. } => array(self, ty),
        }
    }
}

/// Values are framed by an i32 length word.
pub(crate) fn check_wire_len(len: usize) -> Result<(), WireFormatError> {
    if i32::try_from(len).is_err() {
        return Err(WireFormatError::ValueTooLarge(len));
    }
    Ok(())
}

impl Default for TypeDispatchTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for TypeDispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDispatchTable")
            .field("registered", &self.codecs.iter().filter(|c| c.is_some()).count())
            .field("capacity", &self.codecs.len())
            .finish()
    }
}
