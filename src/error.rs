//! Error types for the ormkit PostgreSQL core.
//!
//! Failures that never reached the server (template parsing, parameter
//! binding, value mapping) are returned as [`Error`]. Failures the server
//! reports come back as a [`QueryResult`](crate::QueryResult) whose outcome
//! is an error, never through this type.

use thiserror::Error;

use crate::mapping::types::{EnumError, PropertyError};
use crate::mapping::Oid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Template parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Parameter bind error: {0}")]
    Bind(#[from] BindError),

    #[error("Type mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Malformed SQL template. Positions are byte offsets into the template text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unterminated quoted string starting at position {position}")]
    UnterminatedQuotedString { position: usize },

    #[error("unterminated dollar-quoted string '${tag}$' starting at position {position}")]
    UnterminatedDollarQuote { position: usize, tag: String },

    #[error("unterminated quoted identifier starting at position {position}")]
    UnterminatedQuotedIdentifier { position: usize },

    #[error("unterminated block comment starting at position {position}")]
    UnterminatedComment { position: usize },
}

impl ParseError {
    /// Byte offset where the offending token starts.
    pub fn position(&self) -> usize {
        match self {
            ParseError::UnterminatedQuotedString { position }
            | ParseError::UnterminatedDollarQuote { position, .. }
            | ParseError::UnterminatedQuotedIdentifier { position }
            | ParseError::UnterminatedComment { position } => *position,
        }
    }
}

/// A template variable could not be turned into a wire parameter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindError {
    #[error("query '{query}': parameter '{parameter}' not found")]
    MissingParameter { query: String, parameter: String },

    #[error("query '{query}': can't resolve parameter '{parameter}': {source}")]
    UnresolvedPath {
        query: String,
        parameter: String,
        #[source]
        source: PropertyError,
    },

    #[error("query '{query}': unknown type of parameter '{parameter}'")]
    UnknownParameterType { query: String, parameter: String },

    #[error("query '{query}': parameter '{parameter}': {source}")]
    Mapping {
        query: String,
        parameter: String,
        #[source]
        source: MappingError,
    },

    #[error("query '{query}': {count} parameters, at most {max} allowed")]
    TooManyParameters {
        query: String,
        count: usize,
        max: usize,
    },
}

/// Codec-level failure for a single value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MappingError {
    #[error("no codec for type '{type_name}' (class id {class_id})")]
    NoCodec { type_name: String, class_id: u32 },

    #[error("type '{0}' has no wire OID")]
    NoOid(String),

    #[error("type '{0}' has no wire encoding")]
    Unsupported(String),

    #[error("value of kind {found} doesn't match type '{expected}'")]
    ValueMismatch { expected: String, found: &'static str },

    #[error(transparent)]
    Enum(#[from] EnumError),

    #[error(transparent)]
    Wire(#[from] WireFormatError),

    #[error("type '{type_name}' has no field for column '{column}'")]
    NoSuchField { type_name: String, column: String },
}

/// Bytes on the wire don't match what the codec expects.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireFormatError {
    #[error("Invalid length for OID {oid}: expected {expected} bytes, got {actual}")]
    InvalidWireLength {
        oid: Oid,
        expected: usize,
        actual: usize,
    },

    #[error("nested arrays must be of uniform size")]
    NonUniformArray,

    #[error("null nested array inside a non-null array")]
    NullNestedArray,

    #[error("can't read OID {oid} into type '{type_name}'")]
    UnexpectedOid { type_name: String, oid: Oid },

    #[error("unknown OID {0}, can't guess a type")]
    UnknownOid(Oid),

    #[error("unexpected end of data reading {0}")]
    Truncated(&'static str),

    #[error("Invalid UTF-8 in text value: {0}")]
    InvalidUtf8(String),

    #[error("value {value} is out of range for type '{type_name}'")]
    OutOfRange { type_name: String, value: String },

    #[error("malformed array: {0}")]
    InvalidArray(String),

    #[error("value of {0} bytes doesn't fit a wire length")]
    ValueTooLarge(usize),
}

/// Lets `ConnectionProvider::acquire` implementations propagate driver
/// errors with `?`.
impl From<crate::pg::PgError> for Error {
    fn from(err: crate::pg::PgError) -> Self {
        match err {
            crate::pg::PgError::Protocol(msg) => Error::Protocol(msg),
            other => Error::Connection(other.to_string()),
        }
    }
}
