//! Prepared statement bookkeeping.
//!
//! This module provides:
//! - `PreparedStatement`: a statement the server has parsed under a name
//! - `PreparedStatementCache`: per-connection record of prepared names
//! - `statement_name`: stable server-side names for query templates

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::mapping::Oid;

// ============================================================================
// Prepared Statement
// ============================================================================

/// A statement prepared on the server via Parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    /// Server-side name (e.g., "__ormkit_findUser_1a2b3c4d")
    pub name: String,
    /// The SQL query text, with `$n` placeholders
    pub query: String,
    /// Parameter type OIDs sent with Parse
    pub param_types: Vec<Oid>,
}

impl PreparedStatement {
    pub fn new(name: &str, query: &str, param_types: &[Oid]) -> Self {
        Self {
            name: name.to_string(),
            query: query.to_string(),
            param_types: param_types.to_vec(),
        }
    }
}

// ============================================================================
// Statement Cache
// ============================================================================

/// Statements already prepared on one connection, keyed by name.
///
/// Entries live as long as the connection. Nothing is evicted, so a name
/// found here is always valid on the server.
#[derive(Debug, Default)]
pub struct PreparedStatementCache {
    statements: HashMap<String, PreparedStatement>,
}

impl PreparedStatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a statement name is prepared on this connection.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.statements.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&PreparedStatement> {
        self.statements.get(name)
    }

    /// Record a successful prepare. Returns false if the name was already present.
    pub fn insert(&mut self, statement: PreparedStatement) -> bool {
        if self.statements.contains_key(&statement.name) {
            return false;
        }
        self.statements.insert(statement.name.clone(), statement);
        true
    }

    /// Get the number of prepared statements.
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// All prepared statement names.
    pub fn statement_names(&self) -> Vec<&str> {
        self.statements.keys().map(String::as_str).collect()
    }
}

// ============================================================================
// Statement names
// ============================================================================

/// Server-side name for a template.
///
/// Always ends with a short SHA-256 digest of the SQL, so two templates
/// registered under the same name but with different text never collide.
pub fn statement_name(prefix: &str, name: Option<&str>, sql: &str) -> String {
    let digest = Sha256::digest(sql.as_bytes());
    let hash: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
    match name {
        Some(name) => format!("{}{}_{}", prefix, name, hash),
        None => format!("{}{}", prefix, hash),
    }
}
