//! Connection-facing seams of the driver.
//!
//! This module provides:
//! - `Transport`: the server round-trips a connection can perform
//! - `RawResult`: the undecoded response to one round-trip
//! - `Connection`: a transport plus its prepared statement cache
//! - `ConnectionProvider`: hands out connections and takes back broken ones

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use smallvec::SmallVec;

use super::error::ServerError;
use super::protocol::FieldDescription;
use super::statement::{PreparedStatement, PreparedStatementCache};
use crate::error::Result;
use crate::mapping::{Oid, WireValue};

// ============================================================================
// Raw results
// ============================================================================

/// How the server completed a round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// Rows were described (possibly zero of them).
    TuplesOk,
    /// A command without a result set.
    CommandOk,
    /// The query string was empty.
    EmptyQuery,
    /// The server reported an error; the session is still usable.
    NonFatalError,
    /// The session is gone (FATAL/PANIC, or the stream failed).
    FatalError,
}

impl ExecStatus {
    pub fn is_error(self) -> bool {
        matches!(self, ExecStatus::NonFatalError | ExecStatus::FatalError)
    }
}

/// Column metadata from a RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescription {
    pub name: String,
    pub type_oid: Oid,
    /// Fixed width in bytes, or negative for variable-length types.
    pub type_size: i16,
}

impl ColumnDescription {
    pub fn new(name: &str, type_oid: Oid, type_size: i16) -> Self {
        Self {
            name: name.to_string(),
            type_oid,
            type_size,
        }
    }
}

impl From<FieldDescription> for ColumnDescription {
    fn from(field: FieldDescription) -> Self {
        Self {
            name: field.name,
            type_oid: field.type_oid,
            type_size: field.type_size,
        }
    }
}

/// One data row, cells still in binary wire form.
pub type RawRow = SmallVec<[Option<Bytes>; 8]>;

/// Undecoded response to a single round-trip.
#[derive(Debug, Clone)]
pub struct RawResult {
    pub status: ExecStatus,
    pub columns: Vec<ColumnDescription>,
    pub rows: Vec<RawRow>,
    /// Command tag (e.g., "SELECT 5" or "INSERT 0 1")
    pub command_tag: String,
    pub error: Option<ServerError>,
}

impl RawResult {
    pub fn command(tag: &str) -> Self {
        Self {
            status: ExecStatus::CommandOk,
            columns: Vec::new(),
            rows: Vec::new(),
            command_tag: tag.to_string(),
            error: None,
        }
    }

    pub fn tuples(columns: Vec<ColumnDescription>, rows: Vec<RawRow>, tag: &str) -> Self {
        Self {
            status: ExecStatus::TuplesOk,
            columns,
            rows,
            command_tag: tag.to_string(),
            error: None,
        }
    }

    /// Error result; the status follows the error's severity.
    pub fn server_error(error: ServerError) -> Self {
        let status = if error.is_fatal() {
            ExecStatus::FatalError
        } else {
            ExecStatus::NonFatalError
        };
        Self {
            status,
            columns: Vec::new(),
            rows: Vec::new(),
            command_tag: String::new(),
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        !self.status.is_error()
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Blocking round-trips against one server session.
///
/// Failures are reported in the returned `RawResult`, never as panics or
/// `Err`; a broken stream comes back as `ExecStatus::FatalError`.
pub trait Transport: Send {
    /// Parse `sql` under `name` with the given parameter OIDs.
    fn prepare(&mut self, name: &str, sql: &str, param_types: &[Oid]) -> RawResult;

    /// Bind and run a statement previously prepared under `name`.
    fn execute_prepared(&mut self, name: &str, params: &[WireValue]) -> RawResult;

    /// One-shot execution through the unnamed statement, OIDs taken from `params`.
    fn execute_with_params(&mut self, sql: &str, params: &[WireValue]) -> RawResult;

    /// Run `sql` with no parameters.
    fn execute_plain(&mut self, sql: &str) -> RawResult;
}

// ============================================================================
// Connection
// ============================================================================

/// A server session and the statements prepared on it.
pub struct Connection {
    transport: Box<dyn Transport>,
    statements: PreparedStatementCache,
    invalidated: bool,
}

impl Connection {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            statements: PreparedStatementCache::new(),
            invalidated: false,
        }
    }

    pub fn transport(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    /// Get a reference to the statement cache.
    pub fn statements(&self) -> &PreparedStatementCache {
        &self.statements
    }

    pub fn is_prepared(&self, name: &str) -> bool {
        self.statements.contains(name)
    }

    /// Prepare `name` unless already done. Only a successful prepare is cached.
    ///
    /// Returns `None` when the statement is ready, or the failing result.
    pub fn prepare_if_needed(
        &mut self,
        name: &str,
        sql: &str,
        param_types: &[Oid],
    ) -> Option<RawResult> {
        if self.statements.contains(name) {
            return None;
        }
        let raw = self.transport.prepare(name, sql, param_types);
        if !raw.is_ok() {
            return Some(raw);
        }
        self.statements
            .insert(PreparedStatement::new(name, sql, param_types));
        None
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Flag the session as unusable. Returns true only on the first call.
    pub fn mark_invalidated(&mut self) -> bool {
        !std::mem::replace(&mut self.invalidated, true)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("statements", &self.statements.len())
            .field("invalidated", &self.invalidated)
            .finish_non_exhaustive()
    }
}

/// A connection handed out by a provider.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Lifecycle manager the executor borrows connections from.
pub trait ConnectionProvider: Send + Sync {
    /// Get a usable connection.
    ///
    /// Failures to connect are reported as `Error::Connection`, or
    /// `Error::Protocol` for a broken handshake. A `PgError` converts into
    /// the right one with `?`.
    fn acquire(&self) -> Result<SharedConnection>;

    /// Report that `conn` suffered a fatal error and must not be reused.
    fn invalidate(&self, conn: &SharedConnection);
}
