//! Query results and the row cursor.
//!
//! Server failures do not surface as `Err`. A `QueryResult` always comes
//! back from execution and carries an [`Outcome`]; rows are decoded lazily
//! through a [`ResultCursor`] when the caller fetches them.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::error::Result;
use crate::mapping::{
    assemble_row, InData, MappingResult, Oid, RowCell, TypeDescriptor, TypeDispatchTable, Value,
};
use crate::pg::{
    ColumnDescription, ConnectionProvider, ExecStatus, RawResult, RawRow, ServerError,
    SharedConnection,
};

/// Classification of a server response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Rows available (possibly zero).
    Tuples,
    /// Completed without a result set.
    Command,
    /// The server reported an error.
    Error,
}

impl From<ExecStatus> for Outcome {
    fn from(status: ExecStatus) -> Self {
        match status {
            ExecStatus::TuplesOk => Outcome::Tuples,
            ExecStatus::CommandOk | ExecStatus::EmptyQuery => Outcome::Command,
            ExecStatus::NonFatalError | ExecStatus::FatalError => Outcome::Error,
        }
    }
}

// ============================================================================
// Cursor
// ============================================================================

/// Read position over the rows of one result.
#[derive(Debug, Clone)]
pub struct ResultCursor {
    columns: Arc<Vec<ColumnDescription>>,
    rows: Vec<RawRow>,
    position: usize,
}

impl ResultCursor {
    pub fn new(columns: Vec<ColumnDescription>, rows: Vec<RawRow>) -> Self {
        Self {
            columns: Arc::new(columns),
            rows,
            position: 0,
        }
    }

    pub fn columns(&self) -> &[ColumnDescription] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_oid(&self, column: usize) -> Option<Oid> {
        self.columns.get(column).map(|c| c.type_oid)
    }

    pub fn column_size(&self, column: usize) -> Option<i16> {
        self.columns.get(column).map(|c| c.type_size)
    }

    /// Total rows in the result.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Rows already fetched.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.rows.len() - self.position
    }

    pub fn has_more(&self) -> bool {
        self.position < self.rows.len()
    }

    /// Row by absolute index, whether fetched or not.
    pub fn row(&self, index: usize) -> Option<RowView<'_>> {
        self.rows.get(index).map(|cells| RowView {
            columns: &self.columns,
            cells,
        })
    }

    /// Rows the next fetch of `count` would return (all remaining for `None`).
    fn next_range(&self, count: Option<usize>) -> Range<usize> {
        let take = count.map_or(self.remaining(), |n| n.min(self.remaining()));
        self.position..self.position + take
    }

    /// Advance without decoding. Returns views of the skipped rows.
    pub fn fetch_raw(&mut self, count: Option<usize>) -> Vec<RowView<'_>> {
        let range = self.next_range(count);
        self.position = range.end;
        self.rows[range]
            .iter()
            .map(|cells| RowView {
                columns: &self.columns,
                cells,
            })
            .collect()
    }

    /// Decode up to `count` unread rows as `ty` and advance past them.
    ///
    /// Asking for more than remain returns what remains. At the end every
    /// call returns an empty batch. The cursor does not move if a row fails
    /// to decode.
    pub fn fetch(
        &mut self,
        table: &TypeDispatchTable,
        ty: &TypeDescriptor,
        count: Option<usize>,
    ) -> MappingResult<Vec<Value>> {
        let range = self.next_range(count);
        let values = self.rows[range.clone()]
            .iter()
            .map(|cells| {
                RowView {
                    columns: &self.columns,
                    cells,
                }
                .decode(table, ty)
            })
            .collect::<MappingResult<Vec<_>>>()?;
        self.position = range.end;
        Ok(values)
    }
}

/// One row with its column metadata.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    columns: &'a [ColumnDescription],
    cells: &'a RawRow,
}

impl<'a> RowView<'a> {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn name(&self, column: usize) -> Option<&'a str> {
        self.columns.get(column).map(|c| c.name.as_str())
    }

    pub fn oid(&self, column: usize) -> Option<Oid> {
        self.columns.get(column).map(|c| c.type_oid)
    }

    pub fn size(&self, column: usize) -> Option<i16> {
        self.columns.get(column).map(|c| c.type_size)
    }

    /// Cell as decoder input; `data` is `None` for SQL NULL.
    pub fn value(&self, column: usize) -> Option<InData<'a>> {
        let oid = self.oid(column)?;
        let cell = self.cells.get(column)?;
        Some(match cell {
            Some(bytes) => InData::new(oid, bytes),
            None => InData::null(oid),
        })
    }

    pub fn cells(&self) -> SmallVec<[RowCell<'a>; 8]> {
        (0..self.cells.len().min(self.columns.len()))
            .filter_map(|i| {
                Some(RowCell {
                    name: self.name(i)?,
                    data: self.value(i)?,
                })
            })
            .collect()
    }

    pub fn decode(&self, table: &TypeDispatchTable, ty: &TypeDescriptor) -> MappingResult<Value> {
        assemble_row(table, &self.cells(), ty)
    }
}

// ============================================================================
// Query Result
// ============================================================================

/// Result of one execution.
pub struct QueryResult {
    outcome: Outcome,
    cursor: ResultCursor,
    /// Command tag (e.g., "SELECT 5" or "INSERT 0 1")
    command_tag: String,
    error: Option<ServerError>,
    connection: SharedConnection,
    table: Arc<TypeDispatchTable>,
}

impl QueryResult {
    /// Wrap a raw response.
    ///
    /// A fatal error marks the connection invalid and reports it to the
    /// provider, once per connection, before the result is handed back.
    pub(crate) fn new(
        raw: RawResult,
        connection: SharedConnection,
        provider: &dyn ConnectionProvider,
        table: Arc<TypeDispatchTable>,
    ) -> Self {
        if raw.status == ExecStatus::FatalError {
            let first = connection.lock().mark_invalidated();
            if first {
                warn!(
                    error = ?raw.error.as_ref().map(ToString::to_string),
                    "fatal server error, invalidating connection"
                );
                provider.invalidate(&connection);
            }
        }

        let outcome = Outcome::from(raw.status);
        debug!(?outcome, rows = raw.rows.len(), tag = %raw.command_tag, "query result");

        Self {
            outcome,
            cursor: ResultCursor::new(raw.columns, raw.rows),
            command_tag: raw.command_tag,
            error: raw.error,
            connection,
            table,
        }
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn is_success(&self) -> bool {
        self.outcome != Outcome::Error
    }

    pub fn server_error(&self) -> Option<&ServerError> {
        self.error.as_ref()
    }

    /// Full server error text, if the execution failed.
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }

    pub fn command_tag(&self) -> &str {
        &self.command_tag
    }

    /// Rows affected, parsed from the command tag.
    pub fn rows_affected(&self) -> u64 {
        parse_rows_affected(&self.command_tag)
    }

    /// Rows already fetched.
    pub fn position(&self) -> usize {
        self.cursor.position()
    }

    /// Total rows received.
    pub fn known_count(&self) -> usize {
        self.cursor.row_count()
    }

    pub fn has_more_to_fetch(&self) -> bool {
        self.cursor.has_more()
    }

    /// Decode up to `count` unread rows (all remaining for `None`).
    pub fn fetch(&mut self, ty: &TypeDescriptor, count: Option<usize>) -> Result<Vec<Value>> {
        Ok(self.cursor.fetch(&self.table, ty, count)?)
    }

    pub fn cursor(&self) -> &ResultCursor {
        &self.cursor
    }

    pub fn cursor_mut(&mut self) -> &mut ResultCursor {
        &mut self.cursor
    }

    /// Connection the statement ran on, e.g. to continue a transaction.
    pub fn connection(&self) -> &SharedConnection {
        &self.connection
    }
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("outcome", &self.outcome)
            .field("command_tag", &self.command_tag)
            .field("rows", &self.cursor.row_count())
            .field("position", &self.cursor.position())
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Parse rows affected from a command tag.
fn parse_rows_affected(tag: &str) -> u64 {
    // Common formats:
    // - "INSERT 0 5" -> 5 rows
    // - "UPDATE 3" -> 3 rows
    // - "DELETE 2" -> 2 rows
    // - "SELECT 10" -> 10 rows
    let parts: Vec<&str> = tag.split_whitespace().collect();
    match parts.as_slice() {
        ["INSERT", _, n]
        | ["UPDATE", n]
        | ["DELETE", n]
        | ["SELECT", n]
        | ["MERGE", n]
        | ["COPY", n] => n.parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    fn int4(v: i32) -> Option<Bytes> {
        Some(Bytes::copy_from_slice(&v.to_be_bytes()))
    }

    fn cursor(n: i32) -> ResultCursor {
        let columns = vec![
            ColumnDescription::new("id", Oid::INT4, 4),
            ColumnDescription::new("note", Oid::TEXT, -1),
        ];
        let rows = (1..=n)
            .map(|i| RawRow::from_vec(vec![int4(i), None]))
            .collect();
        ResultCursor::new(columns, rows)
    }

    #[test]
    fn test_parse_rows_affected() {
        assert_eq!(parse_rows_affected("INSERT 0 5"), 5);
        assert_eq!(parse_rows_affected("UPDATE 3"), 3);
        assert_eq!(parse_rows_affected("DELETE 2"), 2);
        assert_eq!(parse_rows_affected("SELECT 10"), 10);
        assert_eq!(parse_rows_affected("BEGIN"), 0);
    }

    #[test]
    fn test_column_metadata() {
        let cur = cursor(1);
        assert_eq!(cur.column_count(), 2);
        assert_eq!(cur.column_names(), vec!["id", "note"]);
        assert_eq!(cur.column_oid(1), Some(Oid::TEXT));
        assert_eq!(cur.column_size(0), Some(4));
        assert_eq!(cur.column_oid(2), None);

        let row = cur.row(0).unwrap();
        assert_eq!(row.value(0), Some(InData::new(Oid::INT4, &1i32.to_be_bytes())));
        assert!(row.value(1).unwrap().is_null());
    }

    #[test]
    fn test_fetch_more_than_remaining() {
        let table = TypeDispatchTable::standard();
        let ty = TypeDescriptor::collection_of(TypeDescriptor::Any);
        let mut cur = cursor(3);

        let first = cur.fetch(&table, &ty, Some(2)).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(cur.position(), 2);

        let rest = cur.fetch(&table, &ty, Some(10)).unwrap();
        assert_eq!(
            rest,
            vec![Value::Collection(vec![Value::Int32(3), Value::Null])]
        );
        assert!(!cur.has_more());
        assert_eq!(cur.position(), 3);
    }

    #[test]
    fn test_fetch_at_end_is_empty() {
        let table = TypeDispatchTable::standard();
        let mut cur = cursor(2);
        assert_eq!(cur.fetch(&table, &TypeDescriptor::Any, None).unwrap().len(), 2);
        for _ in 0..3 {
            assert!(cur.fetch(&table, &TypeDescriptor::Any, Some(0)).unwrap().is_empty());
            assert!(cur.fetch(&table, &TypeDescriptor::Any, None).unwrap().is_empty());
        }
        assert_eq!(cur.position(), 2);
    }

    #[test]
    fn test_failed_fetch_keeps_position() {
        let table = TypeDispatchTable::standard();
        let mut cur = cursor(2);
        // Two columns can't become one scalar.
        assert!(cur.fetch(&table, &TypeDescriptor::Int32, None).is_err());
        assert_eq!(cur.position(), 0);
        assert_eq!(cur.fetch_raw(Some(1)).len(), 1);
        assert_eq!(cur.remaining(), 1);
    }
}
