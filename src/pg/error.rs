//! Error types for the PostgreSQL protocol layer.

use std::collections::HashMap;
use std::fmt;
use std::io;

/// Result type for protocol operations.
pub type PgResult<T> = Result<T, PgError>;

/// An error reported by the server in an ErrorResponse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub severity: String,
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl ServerError {
    pub fn new(severity: &str, code: &str, message: &str) -> Self {
        Self {
            severity: severity.to_string(),
            code: code.to_string(),
            message: message.to_string(),
            detail: None,
            hint: None,
        }
    }

    /// Build from ErrorResponse fields (S/V, C, M, D, H).
    pub fn from_fields(fields: &HashMap<u8, String>) -> Self {
        // 'V' is the non-localized severity, present since 9.6.
        let severity = fields
            .get(&b'V')
            .or_else(|| fields.get(&b'S'))
            .cloned()
            .unwrap_or_default();
        Self {
            severity,
            code: fields.get(&b'C').cloned().unwrap_or_default(),
            message: fields.get(&b'M').cloned().unwrap_or_default(),
            detail: fields.get(&b'D').cloned(),
            hint: fields.get(&b'H').cloned(),
        }
    }

    /// FATAL and PANIC end the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self.severity.as_str(), "FATAL" | "PANIC")
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.severity, self.message, self.code)?;
        if let Some(d) = &self.detail {
            write!(f, "\nDetail: {}", d)?;
        }
        if let Some(h) = &self.hint {
            write!(f, "\nHint: {}", h)?;
        }
        Ok(())
    }
}

impl std::error::Error for ServerError {}

/// Failures talking to the server, below the level of a query result.
#[derive(Debug)]
pub enum PgError {
    /// I/O error during communication.
    Io(io::Error),

    /// Protocol error (unexpected message, invalid format, etc.).
    Protocol(String),

    /// Connection is closed or in invalid state.
    ConnectionClosed,
}

impl fmt::Display for PgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PgError::Io(e) => write!(f, "I/O error: {}", e),
            PgError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            PgError::ConnectionClosed => write!(f, "Connection is closed"),
        }
    }
}

impl std::error::Error for PgError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PgError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PgError {
    fn from(e: io::Error) -> Self {
        PgError::Io(e)
    }
}
