//! PostgreSQL wire protocol message encoding and decoding.
//!
//! Only the extended query subset used after startup is implemented.
//! Reference: https://www.postgresql.org/docs/current/protocol-message-formats.html

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use super::error::{PgError, PgResult};
pub use crate::mapping::Format;
use crate::mapping::{Oid, WireValue};

/// Parameter counts travel as an unsigned 16-bit word.
pub const MAX_PARAMETERS: usize = u16::MAX as usize;

/// Largest message body the i32 length word can frame.
pub const MAX_MESSAGE_BODY: usize = i32::MAX as usize - 4;

/// Transaction status indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    /// Idle (not in a transaction block)
    #[default]
    Idle,
    /// In a transaction block
    InTransaction,
    /// In a failed transaction block
    Failed,
}

impl From<u8> for TransactionStatus {
    fn from(b: u8) -> Self {
        match b {
            b'I' => TransactionStatus::Idle,
            b'T' => TransactionStatus::InTransaction,
            b'E' => TransactionStatus::Failed,
            _ => TransactionStatus::Idle,
        }
    }
}

// ============================================================================
// Frontend (Client -> Server) Messages
// ============================================================================

/// Trait for encoding frontend messages
pub trait FrontendMessage {
    fn encode(&self) -> BytesMut;
}

/// Wrap a message body with its type byte and length.
fn frame(tag: u8, body: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(body.len() + 5);
    buf.put_u8(tag);
    buf.put_i32(body.len() as i32 + 4);
    buf.put_slice(body);
    buf
}

/// Parse message ('P') - Creates a prepared statement
#[derive(Debug, Clone)]
pub struct ParseMessage {
    pub name: String,
    pub query: String,
    pub param_types: Vec<Oid>,
}

impl FrontendMessage for ParseMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();

        // Statement name (null-terminated)
        body.put_slice(self.name.as_bytes());
        body.put_u8(0);

        // Query string (null-terminated)
        body.put_slice(self.query.as_bytes());
        body.put_u8(0);

        body.put_u16(self.param_types.len() as u16);
        for oid in &self.param_types {
            body.put_i32(oid.as_i32());
        }

        frame(b'P', &body)
    }
}

/// Bind message ('B') - Binds parameters to a prepared statement
#[derive(Debug, Clone)]
pub struct BindMessage<'a> {
    pub portal: String,
    pub statement: String,
    pub params: &'a [WireValue],
    pub result_formats: Vec<Format>,
}

impl FrontendMessage for BindMessage<'_> {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();

        body.put_slice(self.portal.as_bytes());
        body.put_u8(0);
        body.put_slice(self.statement.as_bytes());
        body.put_u8(0);

        // One format code per parameter
        body.put_u16(self.params.len() as u16);
        for param in self.params {
            body.put_i16(param.format.code());
        }

        body.put_u16(self.params.len() as u16);
        for param in self.params {
            body.put_i32(param.length());
            body.put_slice(param.bytes());
        }

        body.put_i16(self.result_formats.len() as i16);
        for fmt in &self.result_formats {
            body.put_i16(fmt.code());
        }

        frame(b'B', &body)
    }
}

/// Execute message ('E') - Executes a bound portal
#[derive(Debug, Clone)]
pub struct ExecuteMessage {
    pub portal: String,
    pub max_rows: i32,
}

impl FrontendMessage for ExecuteMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        body.put_slice(self.portal.as_bytes());
        body.put_u8(0);
        // Max rows (0 = no limit)
        body.put_i32(self.max_rows);
        frame(b'E', &body)
    }
}

/// Describe message ('D') - Request description of statement or portal
#[derive(Debug, Clone)]
pub struct DescribeMessage {
    /// 'S' for statement, 'P' for portal
    pub kind: u8,
    pub name: String,
}

impl FrontendMessage for DescribeMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        body.put_u8(self.kind);
        body.put_slice(self.name.as_bytes());
        body.put_u8(0);
        frame(b'D', &body)
    }
}

/// Sync message ('S') - Marks end of an extended query
#[derive(Debug, Clone, Copy)]
pub struct SyncMessage;

impl FrontendMessage for SyncMessage {
    fn encode(&self) -> BytesMut {
        frame(b'S', &[])
    }
}

/// Terminate message ('X') - Close the connection
#[derive(Debug, Clone, Copy)]
pub struct TerminateMessage;

impl FrontendMessage for TerminateMessage {
    fn encode(&self) -> BytesMut {
        frame(b'X', &[])
    }
}

// ============================================================================
// Backend (Server -> Client) Messages
// ============================================================================

/// Field description in a RowDescription message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: i32,
    pub column_attr: i16,
    pub type_oid: Oid,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: Format,
}

/// Backend message types
#[derive(Debug, Clone)]
pub enum BackendMessage {
    // Query responses
    RowDescription { fields: Vec<FieldDescription> },
    DataRow { values: Vec<Option<Bytes>> },
    CommandComplete { tag: String },
    EmptyQueryResponse,

    // Extended query protocol
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    PortalSuspended,
    ParameterDescription { type_oids: Vec<Oid> },

    // Status
    ReadyForQuery { status: TransactionStatus },
    ParameterStatus { name: String, value: String },

    // Errors and notices
    ErrorResponse { fields: HashMap<u8, String> },
    NoticeResponse { fields: HashMap<u8, String> },

    // Other
    NotificationResponse {
        process_id: i32,
        channel: String,
        payload: String,
    },
}

/// Length of the first complete message in `buf`, if one is buffered.
pub fn complete_message_len(buf: &[u8]) -> PgResult<Option<usize>> {
    if buf.len() < 5 {
        return Ok(None);
    }
    let length = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
    if length < 4 {
        return Err(PgError::Protocol(format!("Invalid message length: {}", length)));
    }
    // type byte + length field value (includes length field itself)
    let total = 1 + length as usize;
    Ok((buf.len() >= total).then_some(total))
}

fn need(body: &Bytes, n: usize, what: &str) -> PgResult<()> {
    if body.remaining() < n {
        return Err(PgError::Protocol(format!("Truncated {} message", what)));
    }
    Ok(())
}

impl BackendMessage {
    /// Decode a backend message from bytes.
    ///
    /// The input buffer should start with the message type byte.
    pub fn decode(buf: &mut Bytes) -> PgResult<Self> {
        if buf.remaining() < 5 {
            return Err(PgError::Protocol("Incomplete message header".to_string()));
        }

        let msg_type = buf.get_u8();
        let len = buf.get_i32();
        if len < 4 {
            return Err(PgError::Protocol(format!("Invalid message length: {}", len)));
        }
        let len = len as usize - 4;

        if buf.remaining() < len {
            return Err(PgError::Protocol("Incomplete message body".to_string()));
        }

        let body = buf.split_to(len);

        match msg_type {
            b'T' => Self::decode_row_description(body),
            b'D' => Self::decode_data_row(body),
            b'C' => Self::decode_command_complete(body),
            b'Z' => Self::decode_ready_for_query(body),
            b'E' => Ok(BackendMessage::ErrorResponse {
                fields: read_error_fields(body)?,
            }),
            b'N' => Ok(BackendMessage::NoticeResponse {
                fields: read_error_fields(body)?,
            }),
            b'S' => Self::decode_parameter_status(body),
            b'1' => Ok(BackendMessage::ParseComplete),
            b'2' => Ok(BackendMessage::BindComplete),
            b'3' => Ok(BackendMessage::CloseComplete),
            b'I' => Ok(BackendMessage::EmptyQueryResponse),
            b'n' => Ok(BackendMessage::NoData),
            b's' => Ok(BackendMessage::PortalSuspended),
            b't' => Self::decode_parameter_description(body),
            b'A' => Self::decode_notification_response(body),
            _ => Err(PgError::Protocol(format!(
                "Unknown message type: {}",
                msg_type as char
            ))),
        }
    }

    fn decode_row_description(mut body: Bytes) -> PgResult<Self> {
        need(&body, 2, "RowDescription")?;
        let num_fields = body.get_i16().max(0) as usize;
        let mut fields = Vec::with_capacity(num_fields);

        for _ in 0..num_fields {
            let name = read_cstring(&mut body)?;
            need(&body, 18, "RowDescription")?;
            let table_oid = body.get_i32();
            let column_attr = body.get_i16();
            let type_oid = Oid::from_i32(body.get_i32());
            let type_size = body.get_i16();
            let type_modifier = body.get_i32();
            let format = if body.get_i16() == 0 {
                Format::Text
            } else {
                Format::Binary
            };

            fields.push(FieldDescription {
                name,
                table_oid,
                column_attr,
                type_oid,
                type_size,
                type_modifier,
                format,
            });
        }

        Ok(BackendMessage::RowDescription { fields })
    }

    fn decode_data_row(mut body: Bytes) -> PgResult<Self> {
        need(&body, 2, "DataRow")?;
        let num_cols = body.get_i16().max(0) as usize;
        let mut values = Vec::with_capacity(num_cols);

        for _ in 0..num_cols {
            need(&body, 4, "DataRow")?;
            let len = body.get_i32();
            if len < 0 {
                values.push(None);
            } else {
                need(&body, len as usize, "DataRow")?;
                values.push(Some(body.split_to(len as usize)));
            }
        }

        Ok(BackendMessage::DataRow { values })
    }

    fn decode_command_complete(mut body: Bytes) -> PgResult<Self> {
        let tag = read_cstring(&mut body)?;
        Ok(BackendMessage::CommandComplete { tag })
    }

    fn decode_ready_for_query(mut body: Bytes) -> PgResult<Self> {
        need(&body, 1, "ReadyForQuery")?;
        let status = TransactionStatus::from(body.get_u8());
        Ok(BackendMessage::ReadyForQuery { status })
    }

    fn decode_parameter_status(mut body: Bytes) -> PgResult<Self> {
        let name = read_cstring(&mut body)?;
        let value = read_cstring(&mut body)?;
        Ok(BackendMessage::ParameterStatus { name, value })
    }

    fn decode_parameter_description(mut body: Bytes) -> PgResult<Self> {
        need(&body, 2, "ParameterDescription")?;
        let num_params = body.get_i16().max(0) as usize;
        need(&body, num_params * 4, "ParameterDescription")?;
        let type_oids = (0..num_params)
            .map(|_| Oid::from_i32(body.get_i32()))
            .collect();
        Ok(BackendMessage::ParameterDescription { type_oids })
    }

    fn decode_notification_response(mut body: Bytes) -> PgResult<Self> {
        need(&body, 4, "NotificationResponse")?;
        let process_id = body.get_i32();
        let channel = read_cstring(&mut body)?;
        let payload = read_cstring(&mut body)?;

        Ok(BackendMessage::NotificationResponse {
            process_id,
            channel,
            payload,
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Read a null-terminated string from the buffer.
fn read_cstring(buf: &mut Bytes) -> PgResult<String> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| PgError::Protocol("Missing null terminator in string".to_string()))?;

    let s = String::from_utf8_lossy(&buf[..end]).into_owned();
    buf.advance(end + 1); // Skip the null terminator
    Ok(s)
}

/// Read error/notice response fields
fn read_error_fields(mut body: Bytes) -> PgResult<HashMap<u8, String>> {
    let mut fields = HashMap::new();

    while body.remaining() > 0 {
        let field_type = body.get_u8();
        if field_type == 0 {
            break;
        }
        let value = read_cstring(&mut body)?;
        fields.insert(field_type, value);
    }

    Ok(fields)
}
