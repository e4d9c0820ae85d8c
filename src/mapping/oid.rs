//! PostgreSQL type object identifiers.
//!
//! Only the types the codecs actually produce or accept are listed here.
//! Reference: `pg_type.dat` in the PostgreSQL source tree.

use std::fmt;

/// PostgreSQL type object identifier (OID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid(pub i32);

impl Oid {
    /// Unspecified type; lets the server infer the parameter type.
    pub const UNSPECIFIED: Oid = Oid(0);

    // Boolean types
    pub const BOOL: Oid = Oid(16);

    // Binary data
    pub const BYTEA: Oid = Oid(17);

    // Character types
    pub const CHAR: Oid = Oid(18);
    pub const NAME: Oid = Oid(19);

    // Integer types
    pub const INT8: Oid = Oid(20);
    pub const INT2: Oid = Oid(21);
    pub const INT4: Oid = Oid(23);

    // Text types
    pub const TEXT: Oid = Oid(25);
    pub const BPCHAR: Oid = Oid(1042);
    pub const VARCHAR: Oid = Oid(1043);

    // Floating point types
    pub const FLOAT4: Oid = Oid(700);
    pub const FLOAT8: Oid = Oid(701);

    // Date/time types
    pub const TIMESTAMP: Oid = Oid(1114);

    // UUID
    pub const UUID: Oid = Oid(2950);

    // Array types
    pub const BOOL_ARRAY: Oid = Oid(1000);
    pub const BYTEA_ARRAY: Oid = Oid(1001);
    pub const INT2_ARRAY: Oid = Oid(1005);
    pub const INT4_ARRAY: Oid = Oid(1007);
    pub const TEXT_ARRAY: Oid = Oid(1009);
    pub const VARCHAR_ARRAY: Oid = Oid(1015);
    pub const INT8_ARRAY: Oid = Oid(1016);
    pub const FLOAT4_ARRAY: Oid = Oid(1021);
    pub const FLOAT8_ARRAY: Oid = Oid(1022);
    pub const TIMESTAMP_ARRAY: Oid = Oid(1115);
    pub const UUID_ARRAY: Oid = Oid(2951);

    /// Create from raw i32 value
    #[inline]
    pub fn from_i32(oid: i32) -> Self {
        Oid(oid)
    }

    /// Get the raw i32 value
    #[inline]
    pub fn as_i32(self) -> i32 {
        self.0
    }

    /// Check if this is a text-like type
    pub fn is_text_like(self) -> bool {
        matches!(
            self,
            Oid::TEXT | Oid::VARCHAR | Oid::BPCHAR | Oid::CHAR | Oid::NAME
        )
    }

    /// Check if this is an integer type
    pub fn is_integer(self) -> bool {
        matches!(self, Oid::INT2 | Oid::INT4 | Oid::INT8)
    }

    /// Check if this is a floating point type
    pub fn is_float(self) -> bool {
        matches!(self, Oid::FLOAT4 | Oid::FLOAT8)
    }

    /// Element OID for one of the array OIDs above.
    pub fn array_element(self) -> Option<Oid> {
        let element = match self {
            Oid::BOOL_ARRAY => Oid::BOOL,
            Oid::BYTEA_ARRAY => Oid::BYTEA,
            Oid::INT2_ARRAY => Oid::INT2,
            Oid::INT4_ARRAY => Oid::INT4,
            Oid::TEXT_ARRAY => Oid::TEXT,
            Oid::VARCHAR_ARRAY => Oid::VARCHAR,
            Oid::INT8_ARRAY => Oid::INT8,
            Oid::FLOAT4_ARRAY => Oid::FLOAT4,
            Oid::FLOAT8_ARRAY => Oid::FLOAT8,
            Oid::TIMESTAMP_ARRAY => Oid::TIMESTAMP,
            Oid::UUID_ARRAY => Oid::UUID,
            _ => return None,
        };
        Some(element)
    }

    /// Check if this is one of the array OIDs above.
    pub fn is_array(self) -> bool {
        self.array_element().is_some()
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
