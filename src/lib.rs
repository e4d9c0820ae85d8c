//! PostgreSQL data-mapping and query-execution core for ormkit.
//!
//! - `mapping`: application values to and from binary wire data
//! - `template`: named-parameter SQL templates and parameter binding
//! - `pg`: protocol codec, connections and the prepared statement cache
//! - `executor` / `result`: running templates and reading their rows

pub mod error;
pub mod executor;
pub mod mapping;
pub mod pg;
pub mod result;
pub mod template;

#[cfg(test)]
mod testing;

pub use error::{BindError, Error, MappingError, ParseError, Result, WireFormatError};
pub use executor::{Executor, ExecutorConfig};
pub use mapping::{
    EnumDescriptor, EnumInterpretation, ObjectDescriptor, Oid, StandardTypeSystem,
    TypeDescriptor, TypeDispatchTable, TypeSystem, Value, ValueHandle, WireValue,
};
pub use pg::{Connection, ConnectionProvider, ServerError, SharedConnection, Transport};
pub use result::{Outcome, QueryResult, ResultCursor, RowView};
pub use template::{ParamTypes, Params, QueryTemplate, TemplateParser, TemplateVariable};
