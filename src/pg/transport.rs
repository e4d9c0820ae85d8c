//! Blocking `Transport` over an established PostgreSQL session.
//!
//! The stream must already be past startup and authentication. Every
//! round-trip ends with Sync, so the session is back at ReadyForQuery
//! whenever a call returns, whatever the outcome.

use std::collections::HashMap;
use std::io::{Read, Write};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use super::connection::{ExecStatus, RawResult, RawRow, Transport};
use super::error::{PgError, PgResult, ServerError};
use super::protocol::*;
use crate::mapping::{Oid, WireValue};

/// SQLSTATE connection_failure
const CONNECTION_FAILURE: &str = "08006";

/// SQLSTATE program_limit_exceeded
const PROGRAM_LIMIT_EXCEEDED: &str = "54000";

pub struct WireTransport<S> {
    stream: S,
    /// Read buffer for incoming messages
    read_buffer: BytesMut,
    /// Outgoing messages for the current round-trip
    write_buffer: BytesMut,
    transaction_status: TransactionStatus,
    /// Server parameters (e.g., server_version, client_encoding)
    parameters: HashMap<String, String>,
    closed: bool,
}

impl<S: Read + Write + Send> WireTransport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buffer: BytesMut::with_capacity(32768),
            write_buffer: BytesMut::with_capacity(1024),
            transaction_status: TransactionStatus::Idle,
            parameters: HashMap::new(),
            closed: false,
        }
    }

    /// Get the current transaction status.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Get a server parameter.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(|s| s.as_str())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the connection.
    pub fn close(&mut self) -> PgResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream.write_all(&TerminateMessage.encode())?;
        self.stream.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    // ========================================================================
    // Private helpers
    // ========================================================================

    /// Buffer a frontend message without flushing.
    #[inline]
    fn buffer_message<M: FrontendMessage>(&mut self, msg: &M) {
        self.write_buffer.extend_from_slice(&msg.encode());
    }

    fn buffer_bind_execute(&mut self, statement: &str, params: &[WireValue]) {
        self.buffer_message(&BindMessage {
            portal: String::new(),
            statement: statement.to_string(),
            params,
            result_formats: vec![Format::Binary],
        });
        self.buffer_message(&DescribeMessage {
            kind: b'P',
            name: String::new(),
        });
        self.buffer_message(&ExecuteMessage {
            portal: String::new(),
            max_rows: 0, // No limit
        });
    }

    /// Send the buffered messages plus Sync and collect the response.
    fn round_trip(&mut self) -> RawResult {
        self.buffer_message(&SyncMessage);
        let out = self.write_buffer.split();

        if self.closed {
            return broken(PgError::ConnectionClosed);
        }
        match self.send_and_collect(&out) {
            Ok(raw) => {
                if raw.status == ExecStatus::FatalError {
                    self.closed = true;
                }
                raw
            }
            Err(e) => {
                self.closed = true;
                broken(e)
            }
        }
    }

    fn send_and_collect(&mut self, out: &[u8]) -> PgResult<RawResult> {
        self.stream.write_all(out)?;
        self.stream.flush()?;

        let mut result = RawResult::command("");
        let mut error = None;

        loop {
            match self.receive_message()? {
                BackendMessage::RowDescription { fields } => {
                    result.status = ExecStatus::TuplesOk;
                    result.columns = fields.into_iter().map(Into::into).collect();
                }
                BackendMessage::DataRow { values } => {
                    result.rows.push(RawRow::from_vec(values));
                }
                BackendMessage::CommandComplete { tag } => {
                    result.command_tag = tag;
                }
                BackendMessage::EmptyQueryResponse => {
                    result.status = ExecStatus::EmptyQuery;
                }
                BackendMessage::ErrorResponse { fields } => {
                    let err = ServerError::from_fields(&fields);
                    if err.is_fatal() {
                        // Server closes the socket after a fatal error.
                        return Ok(RawResult::server_error(err));
                    }
                    error = Some(err);
                }
                BackendMessage::NoticeResponse { fields } => {
                    debug!(notice = ?fields.get(&b'M'), "server notice");
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                BackendMessage::ReadyForQuery { status } => {
                    self.transaction_status = status;
                    break;
                }
                other => trace!(message = ?other, "ignored"),
            }
        }

        Ok(match error {
            Some(err) => RawResult::server_error(err),
            None => result,
        })
    }

    /// Receive a backend message.
    fn receive_message(&mut self) -> PgResult<BackendMessage> {
        loop {
            if let Some(total_len) = complete_message_len(&self.read_buffer)? {
                let msg_bytes = self.read_buffer.split_to(total_len);
                return BackendMessage::decode(&mut Bytes::from(msg_bytes));
            }

            // Need more data
            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf)?;
            if n == 0 {
                return Err(PgError::ConnectionClosed);
            }
            self.read_buffer.extend_from_slice(&buf[..n]);
        }
    }
}

fn broken(err: PgError) -> RawResult {
    RawResult::server_error(ServerError::new(
        "FATAL",
        CONNECTION_FAILURE,
        &err.to_string(),
    ))
}

fn parse_body_len(name: &str, sql: &str, count: usize) -> usize {
    (name.len() + sql.len() + 4).saturating_add(count.saturating_mul(4))
}

fn bind_body_len(statement: &str, params: &[WireValue]) -> usize {
    params.iter().fold(statement.len() + 10, |len, p| {
        len.saturating_add(p.bytes().len()).saturating_add(6)
    })
}

/// Refuse a round-trip whose messages can't be framed. Nothing is sent,
/// so the session stays usable.
fn exceeds_limits(count: usize, bodies: &[usize]) -> Option<RawResult> {
    let message = if count > MAX_PARAMETERS {
        format!("{} parameters, at most {} allowed", count, MAX_PARAMETERS)
    } else if let Some(len) = bodies.iter().find(|&&len| len > MAX_MESSAGE_BODY) {
        format!("message of {} bytes exceeds the protocol limit", len)
    } else {
        return None;
    };
    warn!(%message, "request not sent");
    Some(RawResult::server_error(ServerError::new(
        "ERROR",
        PROGRAM_LIMIT_EXCEEDED,
        &message,
    )))
}

impl<S: Read + Write + Send> Transport for WireTransport<S> {
    fn prepare(&mut self, name: &str, sql: &str, param_types: &[Oid]) -> RawResult {
        let count = param_types.len();
        if let Some(refused) = exceeds_limits(count, &[parse_body_len(name, sql, count)]) {
            return refused;
        }
        debug!(statement = name, "parse");
        self.buffer_message(&ParseMessage {
            name: name.to_string(),
            query: sql.to_string(),
            param_types: param_types.to_vec(),
        });
        self.round_trip()
    }

    fn execute_prepared(&mut self, name: &str, params: &[WireValue]) -> RawResult {
        if let Some(refused) = exceeds_limits(params.len(), &[bind_body_len(name, params)]) {
            return refused;
        }
        self.buffer_bind_execute(name, params);
        self.round_trip()
    }

    fn execute_with_params(&mut self, sql: &str, params: &[WireValue]) -> RawResult {
        let bodies = [
            parse_body_len("", sql, params.len()),
            bind_body_len("", params),
        ];
        if let Some(refused) = exceeds_limits(params.len(), &bodies) {
            return refused;
        }
        self.buffer_message(&ParseMessage {
            name: String::new(),
            query: sql.to_string(),
            param_types: params.iter().map(|p| p.oid).collect(),
        });
        self.buffer_bind_execute("", params);
        self.round_trip()
    }

    fn execute_plain(&mut self, sql: &str) -> RawResult {
        self.execute_with_params(sql, &[])
    }
}
