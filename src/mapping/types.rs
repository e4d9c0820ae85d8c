//! Application-side type descriptions and dynamically-typed values.
//!
//! The codecs never inspect Rust types directly. Every value crosses the
//! mapping layer as a [`Value`] paired with a [`TypeDescriptor`], and every
//! question about a type's shape goes through the [`TypeSystem`] trait.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Class ids
// ============================================================================

/// Dense small-integer identifier for a kind of type.
///
/// Codec tables are indexed directly by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

impl ClassId {
    pub const BOOL: ClassId = ClassId(0);
    pub const INT8: ClassId = ClassId(1);
    pub const UINT8: ClassId = ClassId(2);
    pub const INT16: ClassId = ClassId(3);
    pub const UINT16: ClassId = ClassId(4);
    pub const INT32: ClassId = ClassId(5);
    pub const UINT32: ClassId = ClassId(6);
    pub const INT64: ClassId = ClassId(7);
    pub const UINT64: ClassId = ClassId(8);
    pub const FLOAT32: ClassId = ClassId(9);
    pub const FLOAT64: ClassId = ClassId(10);
    pub const TEXT: ClassId = ClassId(11);
    pub const BYTES: ClassId = ClassId(12);
    pub const UUID: ClassId = ClassId(13);
    pub const TIMESTAMP: ClassId = ClassId(14);
    pub const ANY: ClassId = ClassId(15);
    pub const COLLECTION: ClassId = ClassId(16);
    pub const ENUM: ClassId = ClassId(17);
    pub const OBJECT: ClassId = ClassId(18);
    pub const FIELDS: ClassId = ClassId(19);

    /// Number of built-in class ids.
    pub const BUILTIN_COUNT: usize = 20;

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ============================================================================
// Type descriptors
// ============================================================================

/// Shape of an application value.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDescriptor {
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Text,
    Bytes,
    Uuid,
    Timestamp,
    /// Untyped target; the decoder picks a type from the wire OID.
    Any,
    /// Homogeneous collection of the item type.
    Collection(Box<TypeDescriptor>),
    Enum(Arc<EnumDescriptor>),
    Object(Arc<ObjectDescriptor>),
    /// String-keyed map with a single value type.
    Fields(Box<TypeDescriptor>),
}

impl TypeDescriptor {
    /// Collection of `item`.
    pub fn collection_of(item: TypeDescriptor) -> Self {
        TypeDescriptor::Collection(Box::new(item))
    }

    /// Collection nested `depth` times around `leaf`.
    pub fn nested_collection(leaf: TypeDescriptor, depth: usize) -> Self {
        (0..depth).fold(leaf, |ty, _| TypeDescriptor::collection_of(ty))
    }

    /// String-keyed map of `value`.
    pub fn fields_of(value: TypeDescriptor) -> Self {
        TypeDescriptor::Fields(Box::new(value))
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Bool => write!(f, "Boolean"),
            TypeDescriptor::Int8 => write!(f, "Int8"),
            TypeDescriptor::UInt8 => write!(f, "UInt8"),
            TypeDescriptor::Int16 => write!(f, "Int16"),
            TypeDescriptor::UInt16 => write!(f, "UInt16"),
            TypeDescriptor::Int32 => write!(f, "Int32"),
            TypeDescriptor::UInt32 => write!(f, "UInt32"),
            TypeDescriptor::Int64 => write!(f, "Int64"),
            TypeDescriptor::UInt64 => write!(f, "UInt64"),
            TypeDescriptor::Float32 => write!(f, "Float32"),
            TypeDescriptor::Float64 => write!(f, "Float64"),
            TypeDescriptor::Text => write!(f, "String"),
            TypeDescriptor::Bytes => write!(f, "ByteArray"),
            TypeDescriptor::Uuid => write!(f, "Uuid"),
            TypeDescriptor::Timestamp => write!(f, "Timestamp"),
            TypeDescriptor::Any => write!(f, "Any"),
            TypeDescriptor::Collection(item) => write!(f, "Collection<{}>", item),
            TypeDescriptor::Enum(e) => write!(f, "Enum<{}>", e.name),
            TypeDescriptor::Object(o) => write!(f, "Object<{}>", o.name),
            TypeDescriptor::Fields(value) => write!(f, "Fields<{}>", value),
        }
    }
}

/// How an enum travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumInterpretation {
    /// Variant text, sent as `text`.
    AsString,
    /// Variant number, sent as `int4`.
    AsNumber,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumVariant {
    pub name: String,
    pub number: i32,
    pub text: String,
}

/// Enum type: variants plus the interpretation used on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumDescriptor {
    pub name: String,
    pub variants: Vec<EnumVariant>,
    pub interpretation: EnumInterpretation,
    /// Reject null values in both directions.
    pub not_null: bool,
}

impl EnumDescriptor {
    pub fn new(name: &str, interpretation: EnumInterpretation) -> Self {
        Self {
            name: name.to_string(),
            variants: Vec::new(),
            interpretation,
            not_null: false,
        }
    }

    /// Add a variant.
    pub fn variant(mut self, name: &str, number: i32, text: &str) -> Self {
        self.variants.push(EnumVariant {
            name: name.to_string(),
            number,
            text: text.to_string(),
        });
        self
    }

    /// Set the not-null constraint.
    pub fn not_null(mut self, not_null: bool) -> Self {
        self.not_null = not_null;
        self
    }

    pub fn by_name(&self, name: &str) -> Option<&EnumVariant> {
        self.variants.iter().find(|v| v.name == name)
    }

    pub fn by_text(&self, text: &str) -> Option<&EnumVariant> {
        self.variants.iter().find(|v| v.text == text)
    }

    pub fn by_number(&self, number: i32) -> Option<&EnumVariant> {
        self.variants.iter().find(|v| v.number == number)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub ty: TypeDescriptor,
}

/// Structured object with named fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDescriptor {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl ObjectDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
        }
    }

    /// Add a field.
    pub fn field(mut self, name: &str, ty: TypeDescriptor) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.to_string(),
            ty,
        });
        self
    }

    pub fn find_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

// ============================================================================
// Values
// ============================================================================

/// A dynamically-typed application value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Timestamp(NaiveDateTime),
    Collection(Vec<Value>),
    /// Enum variant, by name.
    Enum(String),
    /// Object or fields map, in field order.
    Object(Vec<(String, Value)>),
}

static NULL_VALUE: Value = Value::Null;

impl Value {
    /// Check if this value is NULL
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_collection(&self) -> Option<&[Value]> {
        match self {
            Value::Collection(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a field of an object value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Short name of the variant, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Boolean",
            Value::Int8(_) => "Int8",
            Value::UInt8(_) => "UInt8",
            Value::Int16(_) => "Int16",
            Value::UInt16(_) => "UInt16",
            Value::Int32(_) => "Int32",
            Value::UInt32(_) => "UInt32",
            Value::Int64(_) => "Int64",
            Value::UInt64(_) => "UInt64",
            Value::Float32(_) => "Float32",
            Value::Float64(_) => "Float64",
            Value::Text(_) => "String",
            Value::Bytes(_) => "ByteArray",
            Value::Uuid(_) => "Uuid",
            Value::Timestamp(_) => "Timestamp",
            Value::Collection(_) => "Collection",
            Value::Enum(_) => "Enum",
            Value::Object(_) => "Object",
        }
    }
}

/// A value paired with its type.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueHandle {
    pub value: Value,
    pub ty: TypeDescriptor,
}

impl ValueHandle {
    pub fn new(value: Value, ty: TypeDescriptor) -> Self {
        Self { value, ty }
    }

    pub fn null(ty: TypeDescriptor) -> Self {
        Self {
            value: Value::Null,
            ty,
        }
    }
}

// ============================================================================
// Type system
// ============================================================================

/// Failure to map an enum to or from its interpretation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnumError {
    #[error("Enum constraint violated - 'NotNull'")]
    ConstraintNotNull,

    #[error("Enum '{enum_name}' has no entry for {entry}")]
    EntryNotFound { enum_name: String, entry: String },

    #[error("Enum '{enum_name}' can't interpret a {found} value")]
    TypeMismatch { enum_name: String, found: &'static str },
}

/// Failure to walk a property path.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PropertyError {
    #[error("type '{type_name}' has no field '{field}'")]
    NoSuchField { type_name: String, field: String },

    #[error("type '{type_name}' has no fields, can't access '{field}'")]
    NotAnObject { type_name: String, field: String },
}

/// Reflection over application types.
///
/// Every method has a default that follows the shape of [`TypeDescriptor`];
/// implementations override what they need, typically `class_id` to route
/// types to custom codecs.
pub trait TypeSystem: Send + Sync {
    /// Class id used to pick a codec.
    fn class_id(&self, ty: &TypeDescriptor) -> ClassId {
        match ty {
            TypeDescriptor::Bool => ClassId::BOOL,
            TypeDescriptor::Int8 => ClassId::INT8,
            TypeDescriptor::UInt8 => ClassId::UINT8,
            TypeDescriptor::Int16 => ClassId::INT16,
            TypeDescriptor::UInt16 => ClassId::UINT16,
            TypeDescriptor::Int32 => ClassId::INT32,
            TypeDescriptor::UInt32 => ClassId::UINT32,
            TypeDescriptor::Int64 => ClassId::INT64,
            TypeDescriptor::UInt64 => ClassId::UINT64,
            TypeDescriptor::Float32 => ClassId::FLOAT32,
            TypeDescriptor::Float64 => ClassId::FLOAT64,
            TypeDescriptor::Text => ClassId::TEXT,
            TypeDescriptor::Bytes => ClassId::BYTES,
            TypeDescriptor::Uuid => ClassId::UUID,
            TypeDescriptor::Timestamp => ClassId::TIMESTAMP,
            TypeDescriptor::Any => ClassId::ANY,
            TypeDescriptor::Collection(_) => ClassId::COLLECTION,
            TypeDescriptor::Enum(_) => ClassId::ENUM,
            TypeDescriptor::Object(_) => ClassId::OBJECT,
            TypeDescriptor::Fields(_) => ClassId::FIELDS,
        }
    }

    /// Item type if `ty` is a collection.
    fn item_type<'t>(&self, ty: &'t TypeDescriptor) -> Option<&'t TypeDescriptor> {
        match ty {
            TypeDescriptor::Collection(item) => Some(item),
            _ => None,
        }
    }

    /// Type the enum is sent as.
    fn interpretation_type(&self, ty: &EnumDescriptor) -> TypeDescriptor {
        match ty.interpretation {
            EnumInterpretation::AsString => TypeDescriptor::Text,
            EnumInterpretation::AsNumber => TypeDescriptor::Int32,
        }
    }

    /// Map an enum value to its interpretation value.
    fn to_interpretation(&self, ty: &EnumDescriptor, value: &Value) -> Result<Value, EnumError> {
        match value {
            Value::Null if ty.not_null => Err(EnumError::ConstraintNotNull),
            Value::Null => Ok(Value::Null),
            Value::Enum(name) => {
                let variant = ty.by_name(name).ok_or_else(|| EnumError::EntryNotFound {
                    enum_name: ty.name.clone(),
                    entry: format!("name '{}'", name),
                })?;
                Ok(match ty.interpretation {
                    EnumInterpretation::AsString => Value::Text(variant.text.clone()),
                    EnumInterpretation::AsNumber => Value::Int32(variant.number),
                })
            }
            other => Err(EnumError::TypeMismatch {
                enum_name: ty.name.clone(),
                found: other.kind_name(),
            }),
        }
    }

    /// Map an interpretation value back to an enum value.
    fn from_interpretation(&self, ty: &EnumDescriptor, value: Value) -> Result<Value, EnumError> {
        let variant = match (&value, ty.interpretation) {
            (Value::Null, _) if ty.not_null => return Err(EnumError::ConstraintNotNull),
            (Value::Null, _) => return Ok(Value::Null),
            (Value::Text(text), EnumInterpretation::AsString) => ty.by_text(text),
            (Value::Int32(number), EnumInterpretation::AsNumber) => ty.by_number(*number),
            (other, _) => {
                return Err(EnumError::TypeMismatch {
                    enum_name: ty.name.clone(),
                    found: other.kind_name(),
                })
            }
        };
        variant
            .map(|v| Value::Enum(v.name.clone()))
            .ok_or_else(|| EnumError::EntryNotFound {
                enum_name: ty.name.clone(),
                entry: format!("{:?}", value),
            })
    }

    /// Walk `path` through nested object types.
    fn resolve_nested_type<'t>(
        &self,
        ty: &'t TypeDescriptor,
        path: &[&str],
    ) -> Result<&'t TypeDescriptor, PropertyError> {
        let mut current = ty;
        for segment in path {
            current = field_type(current, segment)?;
        }
        Ok(current)
    }

    /// Walk `path` through a nested object value.
    ///
    /// A null object along the way resolves to a null of the leaf type.
    fn resolve_nested_property<'v>(
        &self,
        value: &'v Value,
        ty: &'v TypeDescriptor,
        path: &[&str],
    ) -> Result<(&'v Value, &'v TypeDescriptor), PropertyError> {
        let mut current = value;
        let mut current_ty = ty;
        for segment in path {
            let next_ty = field_type(current_ty, segment)?;
            current = if current.is_null() {
                &NULL_VALUE
            } else {
                match current {
                    Value::Object(_) => current.field(segment).unwrap_or(&NULL_VALUE),
                    _ => {
                        return Err(PropertyError::NotAnObject {
                            type_name: current.kind_name().to_string(),
                            field: segment.to_string(),
                        })
                    }
                }
            };
            current_ty = next_ty;
        }
        Ok((current, current_ty))
    }
}

fn field_type<'t>(ty: &'t TypeDescriptor, field: &str) -> Result<&'t TypeDescriptor, PropertyError> {
    match ty {
        TypeDescriptor::Object(object) => object
            .find_field(field)
            .map(|f| &f.ty)
            .ok_or_else(|| PropertyError::NoSuchField {
                type_name: object.name.clone(),
                field: field.to_string(),
            }),
        TypeDescriptor::Fields(value_ty) => Ok(value_ty),
        other => Err(PropertyError::NotAnObject {
            type_name: other.to_string(),
            field: field.to_string(),
        }),
    }
}

/// The [`TypeSystem`] with every default behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardTypeSystem;

impl TypeSystem for StandardTypeSystem {}

#[cfg(test)]
mod tests {
    use super::*;

    fn animal(interpretation: EnumInterpretation) -> EnumDescriptor {
        EnumDescriptor::new("Animal", interpretation)
            .variant("DOG", 0, "dog")
            .variant("CAT", 1, "cat")
    }

    fn address_row() -> (Value, TypeDescriptor) {
        let address = ObjectDescriptor::new("Address").field("city", TypeDescriptor::Text);
        let row = ObjectDescriptor::new("Row")
            .field("id", TypeDescriptor::Int64)
            .field("address", TypeDescriptor::Object(Arc::new(address)));
        let value = Value::Object(vec![
            ("id".to_string(), Value::Int64(7)),
            (
                "address".to_string(),
                Value::Object(vec![("city".to_string(), Value::Text("Lviv".to_string()))]),
            ),
        ]);
        (value, TypeDescriptor::Object(Arc::new(row)))
    }

    #[test]
    fn test_default_class_ids_are_dense() {
        let ts = StandardTypeSystem;
        assert_eq!(ts.class_id(&TypeDescriptor::Bool), ClassId::BOOL);
        assert_eq!(
            ts.class_id(&TypeDescriptor::collection_of(TypeDescriptor::Int32)),
            ClassId::COLLECTION
        );
        assert!(ClassId::FIELDS.index() < ClassId::BUILTIN_COUNT);
    }

    #[test]
    fn test_enum_interpretation_roundtrip() {
        let ts = StandardTypeSystem;
        let as_string = animal(EnumInterpretation::AsString);
        let as_number = animal(EnumInterpretation::AsNumber);
        let cat = Value::Enum("CAT".to_string());

        let text = ts.to_interpretation(&as_string, &cat).unwrap();
        assert_eq!(text, Value::Text("cat".to_string()));
        assert_eq!(ts.from_interpretation(&as_string, text).unwrap(), cat);

        let number = ts.to_interpretation(&as_number, &cat).unwrap();
        assert_eq!(number, Value::Int32(1));
        assert_eq!(ts.from_interpretation(&as_number, number).unwrap(), cat);
    }

    #[test]
    fn test_enum_not_null_constraint() {
        let ts = StandardTypeSystem;
        let strict = animal(EnumInterpretation::AsString).not_null(true);
        assert_eq!(
            ts.to_interpretation(&strict, &Value::Null),
            Err(EnumError::ConstraintNotNull)
        );
        assert_eq!(
            ts.from_interpretation(&strict, Value::Null),
            Err(EnumError::ConstraintNotNull)
        );

        let lenient = animal(EnumInterpretation::AsString);
        assert_eq!(ts.to_interpretation(&lenient, &Value::Null), Ok(Value::Null));
    }

    #[test]
    fn test_enum_unknown_entry() {
        let ts = StandardTypeSystem;
        let ty = animal(EnumInterpretation::AsString);
        let err = ts
            .from_interpretation(&ty, Value::Text("horse".to_string()))
            .unwrap_err();
        assert!(matches!(err, EnumError::EntryNotFound { .. }));
    }

    #[test]
    fn test_resolve_nested_property() {
        let ts = StandardTypeSystem;
        let (value, ty) = address_row();
        let (city, city_ty) = ts
            .resolve_nested_property(&value, &ty, &["address", "city"])
            .unwrap();
        assert_eq!(city, &Value::Text("Lviv".to_string()));
        assert_eq!(city_ty, &TypeDescriptor::Text);
    }

    #[test]
    fn test_resolve_missing_field() {
        let ts = StandardTypeSystem;
        let (value, ty) = address_row();
        let err = ts
            .resolve_nested_property(&value, &ty, &["address", "zip"])
            .unwrap_err();
        assert_eq!(
            err,
            PropertyError::NoSuchField {
                type_name: "Address".to_string(),
                field: "zip".to_string(),
            }
        );
    }

    #[test]
    fn test_resolve_through_null_object() {
        let ts = StandardTypeSystem;
        let (_, ty) = address_row();
        let value = Value::Object(vec![("address".to_string(), Value::Null)]);
        let (city, city_ty) = ts
            .resolve_nested_property(&value, &ty, &["address", "city"])
            .unwrap();
        assert!(city.is_null());
        assert_eq!(city_ty, &TypeDescriptor::Text);
    }

    #[test]
    fn test_type_display() {
        let ty = TypeDescriptor::nested_collection(TypeDescriptor::Int32, 2);
        assert_eq!(ty.to_string(), "Collection<Collection<Int32>>");
    }
}
