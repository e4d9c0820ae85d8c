//! Wire-level values: what the codecs produce and consume.

use bytes::Bytes;

use super::Oid;

/// Format code for parameters and result columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i16)]
pub enum Format {
    Text = 0,
    #[default]
    Binary = 1,
}

impl Format {
    #[inline]
    pub fn code(self) -> i16 {
        self as i16
    }
}

/// A serialized parameter. `data == None` is SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireValue {
    pub oid: Oid,
    pub data: Option<Bytes>,
    pub format: Format,
}

impl WireValue {
    pub fn new(oid: Oid, data: impl Into<Bytes>) -> Self {
        Self {
            oid,
            data: Some(data.into()),
            format: Format::Binary,
        }
    }

    pub fn null(oid: Oid) -> Self {
        Self {
            oid,
            data: None,
            format: Format::Binary,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.data.is_none()
    }

    /// Length as sent on the wire, -1 for NULL.
    ///
    /// `TypeDispatchTable` never produces a value longer than `i32::MAX`.
    pub fn length(&self) -> i32 {
        match &self.data {
            Some(data) => i32::try_from(data.len()).unwrap_or(i32::MAX),
            None => -1,
        }
    }

    /// Payload bytes, empty for NULL.
    pub fn bytes(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Borrow as decoder input.
    pub fn as_in_data(&self) -> InData<'_> {
        InData {
            oid: self.oid,
            data: self.data.as_deref(),
        }
    }
}

/// A received cell, borrowed from the result buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InData<'a> {
    pub oid: Oid,
    pub data: Option<&'a [u8]>,
}

impl<'a> InData<'a> {
    pub fn new(oid: Oid, data: &'a [u8]) -> Self {
        Self {
            oid,
            data: Some(data),
        }
    }

    pub fn null(oid: Oid) -> Self {
        Self { oid, data: None }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.data.is_none()
    }

    /// Same bytes read as a different OID.
    pub fn with_oid(self, oid: Oid) -> Self {
        Self { oid, ..self }
    }
}
