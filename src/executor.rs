//! Statement execution.
//!
//! The executor binds arguments, borrows a connection from the
//! [`ConnectionProvider`], prepares the statement on that connection when
//! the template asks for it and wraps the server's answer in a
//! [`QueryResult`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::mapping::TypeDispatchTable;
use crate::pg::{ConnectionProvider, RawResult, SharedConnection};
use crate::result::QueryResult;
use crate::template::{bind, ParamTypes, Params, QueryTemplate};

// ============================================================================
// Executor Configuration
// ============================================================================

/// Executor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Prefix for server-side statement names
    pub statement_name_prefix: String,
    /// Whether templates are prepared when the caller doesn't say
    pub prepare_by_default: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            statement_name_prefix: "__ormkit_".to_string(),
            prepare_by_default: false,
        }
    }
}

impl ExecutorConfig {
    /// Create a new executor configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the statement name prefix.
    pub fn statement_name_prefix(mut self, prefix: &str) -> Self {
        self.statement_name_prefix = prefix.to_string();
        self
    }

    /// Set the default preparation flag.
    pub fn prepare_by_default(mut self, prepare: bool) -> Self {
        self.prepare_by_default = prepare;
        self
    }
}

// ============================================================================
// Executor
// ============================================================================

pub struct Executor {
    provider: Arc<dyn ConnectionProvider>,
    table: Arc<TypeDispatchTable>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(provider: Arc<dyn ConnectionProvider>, table: Arc<TypeDispatchTable>) -> Self {
        Self::with_config(provider, table, ExecutorConfig::default())
    }

    pub fn with_config(
        provider: Arc<dyn ConnectionProvider>,
        table: Arc<TypeDispatchTable>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            provider,
            table,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn table(&self) -> &Arc<TypeDispatchTable> {
        &self.table
    }

    /// Build a template. `prepare: None` uses the configured default.
    pub fn parse_query_template(
        &self,
        name: Option<&str>,
        text: &str,
        types: &ParamTypes,
        prepare: Option<bool>,
    ) -> Result<QueryTemplate> {
        QueryTemplate::new(
            &self.table,
            name,
            text,
            types,
            prepare.unwrap_or(self.config.prepare_by_default),
            &self.config.statement_name_prefix,
        )
    }

    /// Get a connection from the provider.
    pub fn get_connection(&self) -> Result<SharedConnection> {
        self.provider.acquire()
    }

    /// Execute `template` with `params`.
    ///
    /// Parameters are bound before any connection is touched, so a bind
    /// error never reaches the server. Server failures, including a failed
    /// prepare, come back as an unsuccessful `QueryResult`.
    pub fn execute(
        &self,
        template: &QueryTemplate,
        params: &Params,
        connection: Option<&SharedConnection>,
    ) -> Result<QueryResult> {
        let values = bind(&self.table, template, params)?;
        let conn = self.connection_or_acquire(connection)?;

        let raw = {
            let mut guard = conn.lock();
            if template.prepare() {
                let name = template.statement_name();
                if !guard.is_prepared(name) {
                    debug!(statement = name, "preparing");
                }
                match guard.prepare_if_needed(name, template.rewritten(), template.param_oids()) {
                    Some(failed) => {
                        debug!(statement = name, "prepare failed");
                        failed
                    }
                    None => {
                        debug!(statement = name, params = values.len(), "execute prepared");
                        guard.transport().execute_prepared(name, &values)
                    }
                }
            } else {
                debug!(query = template.display_name(), params = values.len(), "execute");
                guard
                    .transport()
                    .execute_with_params(template.rewritten(), &values)
            }
        };

        Ok(self.wrap(raw, conn))
    }

    /// Start a transaction. Pass the returned result's connection to later calls.
    pub fn begin(&self, connection: Option<&SharedConnection>) -> Result<QueryResult> {
        self.execute_plain("BEGIN", connection)
    }

    pub fn commit(&self, connection: &SharedConnection) -> Result<QueryResult> {
        self.execute_plain("COMMIT", Some(connection))
    }

    pub fn rollback(&self, connection: &SharedConnection) -> Result<QueryResult> {
        self.execute_plain("ROLLBACK", Some(connection))
    }

    fn execute_plain(&self, sql: &str, connection: Option<&SharedConnection>) -> Result<QueryResult> {
        let conn = self.connection_or_acquire(connection)?;
        debug!(query = sql, "execute plain");
        let raw = conn.lock().transport().execute_plain(sql);
        Ok(self.wrap(raw, conn))
    }

    fn connection_or_acquire(&self, connection: Option<&SharedConnection>) -> Result<SharedConnection> {
        match connection {
            Some(conn) => Ok(Arc::clone(conn)),
            None => self.provider.acquire(),
        }
    }

    fn wrap(&self, raw: RawResult, conn: SharedConnection) -> QueryResult {
        QueryResult::new(raw, conn, self.provider.as_ref(), Arc::clone(&self.table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BindError, Error};
    use crate::mapping::{Oid, TypeDescriptor, Value, ValueHandle};
    use crate::pg::{ColumnDescription, RawRow, ServerError};
    use crate::result::Outcome;
    use crate::testing::{init_tracing, Call, CountingProvider, ScriptedTransport};
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    fn setup() -> (Executor, Arc<CountingProvider>, ScriptedTransport) {
        init_tracing();
        let transport = ScriptedTransport::new();
        let provider = Arc::new(CountingProvider::new(transport.clone()));
        let executor = Executor::new(provider.clone(), Arc::new(TypeDispatchTable::standard()));
        (executor, provider, transport)
    }

    fn find_user(executor: &Executor, prepare: bool) -> QueryTemplate {
        let mut types = ParamTypes::new();
        types.insert("id".to_string(), TypeDescriptor::Int32);
        executor
            .parse_query_template(
                Some("findUser"),
                "SELECT id, name FROM users WHERE id = :id",
                &types,
                Some(prepare),
            )
            .unwrap()
    }

    fn id_param(id: i32) -> Params {
        let mut params = Params::new();
        params.insert(
            "id".to_string(),
            ValueHandle::new(Value::Int32(id), TypeDescriptor::Int32),
        );
        params
    }

    fn user_rows() -> RawResult {
        RawResult::tuples(
            vec![
                ColumnDescription::new("id", Oid::INT4, 4),
                ColumnDescription::new("name", Oid::TEXT, -1),
            ],
            vec![RawRow::from_vec(vec![
                Some(Bytes::copy_from_slice(&7i32.to_be_bytes())),
                Some(Bytes::from_static(b"ada")),
            ])],
            "SELECT 1",
        )
    }

    #[test]
    fn test_config_defaults_and_builder() {
        let config = ExecutorConfig::new();
        assert_eq!(config.statement_name_prefix, "__ormkit_");
        assert!(!config.prepare_by_default);

        let config = ExecutorConfig::new()
            .statement_name_prefix("app_")
            .prepare_by_default(true);
        assert_eq!(config.statement_name_prefix, "app_");
        assert!(config.prepare_by_default);
    }

    #[test]
    fn test_config_deserialize_with_defaults() {
        let config: ExecutorConfig =
            serde_json::from_str(r#"{"prepare_by_default": true}"#).unwrap();
        assert_eq!(
            config,
            ExecutorConfig::new().prepare_by_default(true)
        );
    }

    #[test]
    fn test_default_prepare_flag_from_config() {
        let transport = ScriptedTransport::new();
        let provider = Arc::new(CountingProvider::new(transport));
        let executor = Executor::with_config(
            provider,
            Arc::new(TypeDispatchTable::standard()),
            ExecutorConfig::new().prepare_by_default(true),
        );
        let tpl = executor
            .parse_query_template(None, "SELECT 1", &ParamTypes::new(), None)
            .unwrap();
        assert!(tpl.prepare());
    }

    #[test]
    fn test_prepare_once_execute_twice() {
        let (executor, _provider, transport) = setup();
        let tpl = find_user(&executor, true);
        let conn = executor.get_connection().unwrap();

        let first = executor.execute(&tpl, &id_param(7), Some(&conn)).unwrap();
        let second = executor.execute(&tpl, &id_param(8), Some(&conn)).unwrap();
        assert!(first.is_success());
        assert!(second.is_success());

        assert_eq!(transport.prepare_count(), 1);
        assert_eq!(transport.execute_count(), 2);
        assert!(conn.lock().is_prepared(tpl.statement_name()));

        match &transport.calls()[0] {
            Call::Prepare { name, sql, param_types } => {
                assert_eq!(name, tpl.statement_name());
                assert_eq!(sql, "SELECT id, name FROM users WHERE id = $1");
                assert_eq!(param_types, &vec![Oid::INT4]);
            }
            other => panic!("expected prepare, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_prepare_is_retried() {
        let (executor, _provider, transport) = setup();
        let tpl = find_user(&executor, true);
        let conn = executor.get_connection().unwrap();

        transport.push_result(RawResult::server_error(ServerError::new(
            "ERROR",
            "42P01",
            "relation \"users\" does not exist",
        )));
        let failed = executor.execute(&tpl, &id_param(7), Some(&conn)).unwrap();
        assert!(!failed.is_success());
        assert_eq!(failed.outcome(), Outcome::Error);
        assert_eq!(failed.server_error().map(|e| e.code.as_str()), Some("42P01"));
        assert!(!conn.lock().is_prepared(tpl.statement_name()));
        assert_eq!(transport.execute_count(), 0);

        let retried = executor.execute(&tpl, &id_param(7), Some(&conn)).unwrap();
        assert!(retried.is_success());
        assert_eq!(transport.prepare_count(), 2);
        assert_eq!(transport.execute_count(), 1);
    }

    #[test]
    fn test_unprepared_executes_inline() {
        let (executor, _provider, transport) = setup();
        let tpl = find_user(&executor, false);

        transport.push_result(user_rows());
        let mut result = executor.execute(&tpl, &id_param(7), None).unwrap();
        assert_eq!(transport.prepare_count(), 0);

        match &transport.calls()[0] {
            Call::ExecuteWithParams { sql, params } => {
                assert_eq!(sql, "SELECT id, name FROM users WHERE id = $1");
                assert_eq!(params[0].oid, Oid::INT4);
                assert_eq!(params[0].bytes(), &7i32.to_be_bytes());
            }
            other => panic!("expected inline execution, got {:?}", other),
        }

        assert_eq!(result.outcome(), Outcome::Tuples);
        assert_eq!(result.known_count(), 1);
        let rows = result.fetch(&TypeDescriptor::Any, None).unwrap();
        assert_eq!(
            rows,
            vec![Value::Object(vec![
                ("id".to_string(), Value::Int32(7)),
                ("name".to_string(), Value::Text("ada".to_string())),
            ])]
        );
        assert!(!result.has_more_to_fetch());
    }

    #[test]
    fn test_fatal_error_invalidates_once() {
        let (executor, provider, transport) = setup();
        let tpl = find_user(&executor, false);
        let conn = executor.get_connection().unwrap();

        for _ in 0..2 {
            transport.push_result(RawResult::server_error(ServerError::new(
                "FATAL",
                "57P01",
                "terminating connection due to administrator command",
            )));
        }

        let result = executor.execute(&tpl, &id_param(1), Some(&conn)).unwrap();
        assert!(!result.is_success());
        assert!(result.error_message().unwrap().contains("57P01"));
        assert!(conn.lock().is_invalidated());
        assert_eq!(provider.invalidate_count(), 1);

        executor.execute(&tpl, &id_param(1), Some(&conn)).unwrap();
        assert_eq!(provider.invalidate_count(), 1);
    }

    #[test]
    fn test_non_fatal_error_keeps_connection() {
        let (executor, provider, transport) = setup();
        let tpl = find_user(&executor, true);
        let conn = executor.get_connection().unwrap();

        executor.execute(&tpl, &id_param(1), Some(&conn)).unwrap();
        assert_eq!(conn.lock().statements().len(), 1);

        transport.push_result(RawResult::server_error(ServerError::new(
            "ERROR",
            "23505",
            "duplicate key value violates unique constraint",
        )));
        let result = executor.execute(&tpl, &id_param(1), Some(&conn)).unwrap();
        assert!(!result.is_success());
        assert!(!conn.lock().is_invalidated());
        assert_eq!(provider.invalidate_count(), 0);
        assert!(conn.lock().is_prepared(tpl.statement_name()));
        assert_eq!(conn.lock().statements().len(), 1);
        assert_eq!(transport.prepare_count(), 1);
    }

    #[test]
    fn test_bind_error_never_reaches_server() {
        let (executor, provider, transport) = setup();
        let tpl = find_user(&executor, true);

        let err = executor.execute(&tpl, &Params::new(), None).unwrap_err();
        assert!(matches!(err, Error::Bind(BindError::MissingParameter { .. })));
        assert!(transport.calls().is_empty());
        assert_eq!(provider.acquire_count(), 0);
    }

    #[test]
    fn test_argument_of_wrong_type_is_rejected() {
        let (executor, provider, transport) = setup();
        let mut types = ParamTypes::new();
        types.insert("price".to_string(), TypeDescriptor::Float64);
        let tpl = executor
            .parse_query_template(None, "UPDATE t SET p = :price", &types, Some(true))
            .unwrap();
        assert_eq!(tpl.param_oids(), &[Oid::FLOAT8]);

        let mut params = Params::new();
        params.insert(
            "price".to_string(),
            ValueHandle::new(Value::Int64(1), TypeDescriptor::Int64),
        );
        let err = executor.execute(&tpl, &params, None).unwrap_err();
        assert!(matches!(
            err,
            Error::Bind(BindError::Mapping {
                source: crate::error::MappingError::ValueMismatch { .. },
                ..
            })
        ));
        assert!(transport.calls().is_empty());
        assert_eq!(provider.acquire_count(), 0);
    }

    #[test]
    fn test_arguments_sent_with_prepared_oids() {
        let (executor, _provider, transport) = setup();
        let tpl = find_user(&executor, true);
        let mut params = Params::new();
        params.insert(
            "id".to_string(),
            ValueHandle::new(Value::Int16(7), TypeDescriptor::Int16),
        );

        executor.execute(&tpl, &params, None).unwrap();
        match &transport.calls()[1] {
            Call::ExecutePrepared { params, .. } => {
                assert_eq!(params[0].oid, Oid::INT4);
                assert_eq!(params[0].bytes(), &7i32.to_be_bytes());
            }
            other => panic!("expected prepared execution, got {:?}", other),
        }
    }

    /// Provider whose server is gone.
    struct UnreachableProvider;

    impl ConnectionProvider for UnreachableProvider {
        fn acquire(&self) -> Result<SharedConnection> {
            Err(crate::pg::PgError::ConnectionClosed.into())
        }

        fn invalidate(&self, _: &SharedConnection) {}
    }

    #[test]
    fn test_acquire_failure_is_connection_error() {
        let executor = Executor::new(
            Arc::new(UnreachableProvider),
            Arc::new(TypeDispatchTable::standard()),
        );
        let tpl = find_user(&executor, false);

        let err = executor.execute(&tpl, &id_param(1), None).unwrap_err();
        assert!(matches!(err, Error::Connection(msg) if msg.contains("closed")));
    }

    #[test]
    fn test_transaction_helpers() {
        let (executor, _provider, transport) = setup();
        let begin = executor.begin(None).unwrap();
        let conn = begin.connection().clone();
        executor.commit(&conn).unwrap();
        executor.rollback(&conn).unwrap();

        let sql: Vec<String> = transport
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::ExecutePlain { sql } => Some(sql),
                _ => None,
            })
            .collect();
        assert_eq!(sql, vec!["BEGIN", "COMMIT", "ROLLBACK"]);
    }

    #[test]
    fn test_rows_affected() {
        let (executor, _provider, transport) = setup();
        let mut types = ParamTypes::new();
        types.insert("name".to_string(), TypeDescriptor::Text);
        let tpl = executor
            .parse_query_template(None, "INSERT INTO users (name) VALUES (:name)", &types, None)
            .unwrap();
        let mut params = Params::new();
        params.insert(
            "name".to_string(),
            ValueHandle::new(Value::Text("ada".to_string()), TypeDescriptor::Text),
        );

        transport.push_result(RawResult::command("INSERT 0 1"));
        let result = executor.execute(&tpl, &params, None).unwrap();
        assert_eq!(result.outcome(), Outcome::Command);
        assert_eq!(result.rows_affected(), 1);
        assert_eq!(result.known_count(), 0);
    }
}
