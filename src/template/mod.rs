//! SQL templates with named parameters.
//!
//! A [`QueryTemplate`] is built once per distinct SQL string and shared
//! across executions. It carries the rewritten `$n` text, the server-side
//! statement name and the declared OID of every parameter.

pub mod binder;
pub mod parser;

use std::collections::HashMap;

use tracing::debug;

pub use binder::bind;
pub use parser::{ParsedTemplate, TemplateParser, TemplateVariable};

use crate::error::{BindError, Result};
use crate::mapping::{Oid, TypeDescriptor, TypeDispatchTable, ValueHandle};
use crate::pg::protocol::MAX_PARAMETERS;
use crate::pg::statement::statement_name;

/// Declared parameter types, keyed by top-level name.
pub type ParamTypes = HashMap<String, TypeDescriptor>;

/// Arguments for one execution, keyed by top-level name.
pub type Params = HashMap<String, ValueHandle>;

#[derive(Debug, Clone)]
pub struct QueryTemplate {
    name: Option<String>,
    statement_name: String,
    text: String,
    rewritten: String,
    variables: Vec<TemplateVariable>,
    param_types: Vec<TypeDescriptor>,
    param_oids: Vec<Oid>,
    prepare: bool,
}

impl QueryTemplate {
    /// Parse `text` and resolve the type of every variable.
    ///
    /// Fails with a parse error for malformed SQL, or a bind error when a
    /// variable's type can't be determined from `types`.
    pub fn new(
        table: &TypeDispatchTable,
        name: Option<&str>,
        text: &str,
        types: &ParamTypes,
        prepare: bool,
        statement_prefix: &str,
    ) -> Result<Self> {
        let ParsedTemplate {
            variables,
            rewritten,
        } = TemplateParser::parse(text)?;

        let display = name.unwrap_or(text);
        if variables.len() > MAX_PARAMETERS {
            return Err(BindError::TooManyParameters {
                query: display.to_string(),
                count: variables.len(),
                max: MAX_PARAMETERS,
            }
            .into());
        }
        let (param_types, param_oids) =
            binder::resolve_param_types(table, display, &variables, types)?;
        let stmt_name = statement_name(statement_prefix, name, text);

        debug!(
            statement = %stmt_name,
            params = variables.len(),
            prepare,
            "created query template"
        );

        Ok(Self {
            name: name.map(str::to_string),
            statement_name: stmt_name,
            text: text.to_string(),
            rewritten,
            variables,
            param_types,
            param_oids,
            prepare,
        })
    }

    /// Name given at registration, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name used in error messages: the registered name, else the SQL text.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.text)
    }

    pub fn statement_name(&self) -> &str {
        &self.statement_name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// SQL with `$n` placeholders.
    pub fn rewritten(&self) -> &str {
        &self.rewritten
    }

    pub fn variables(&self) -> &[TemplateVariable] {
        &self.variables
    }

    pub fn param_types(&self) -> &[TypeDescriptor] {
        &self.param_types
    }

    pub fn param_oids(&self) -> &[Oid] {
        &self.param_oids
    }

    pub fn prepare(&self) -> bool {
        self.prepare
    }
}
