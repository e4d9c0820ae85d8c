//! PostgreSQL wire protocol plumbing.
//!
//! Architecture:
//! - `protocol`: Low-level wire protocol encoding/decoding
//! - `connection`: Transport and ConnectionProvider seams, raw results
//! - `transport`: blocking Transport over an established session
//! - `statement`: Prepared statement cache
//! - `error`: server-reported errors

pub mod connection;
pub mod error;
pub mod protocol;
pub mod statement;
pub mod transport;


pub use connection::{
    ColumnDescription, Connection, ConnectionProvider, ExecStatus, RawResult, RawRow,
    SharedConnection, Transport,
};
pub use error::{PgError, PgResult, ServerError};
pub use statement::{PreparedStatement, PreparedStatementCache};
pub use transport::WireTransport;
