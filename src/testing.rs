//! In-memory stand-ins for the server side, used by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use crate::error::Result;
use crate::mapping::{Oid, WireValue};
use crate::pg::{Connection, ConnectionProvider, RawResult, SharedConnection, Transport};

/// Route `tracing` output to the test harness. Set `RUST_LOG` to see it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A recorded transport call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Prepare {
        name: String,
        sql: String,
        param_types: Vec<Oid>,
    },
    ExecutePrepared {
        name: String,
        params: Vec<WireValue>,
    },
    ExecuteWithParams {
        sql: String,
        params: Vec<WireValue>,
    },
    ExecutePlain {
        sql: String,
    },
}

#[derive(Default)]
struct Script {
    calls: Vec<Call>,
    results: VecDeque<RawResult>,
}

/// Transport that answers from a queue and records every call.
///
/// Clones share the same script. With the queue empty, every call
/// succeeds as a command.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the answer for the next call, whatever kind it is.
    pub fn push_result(&self, raw: RawResult) {
        self.script.lock().results.push_back(raw);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().calls.clone()
    }

    pub fn prepare_count(&self) -> usize {
        self.count(|c| matches!(c, Call::Prepare { .. }))
    }

    /// Executions of prepared or inline statements.
    pub fn execute_count(&self) -> usize {
        self.count(|c| matches!(c, Call::ExecutePrepared { .. } | Call::ExecuteWithParams { .. }))
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.script.lock().calls.iter().filter(|c| pred(c)).count()
    }

    fn answer(&mut self, call: Call, default_tag: &str) -> RawResult {
        let mut script = self.script.lock();
        script.calls.push(call);
        script
            .results
            .pop_front()
            .unwrap_or_else(|| RawResult::command(default_tag))
    }
}

impl Transport for ScriptedTransport {
    fn prepare(&mut self, name: &str, sql: &str, param_types: &[Oid]) -> RawResult {
        let call = Call::Prepare {
            name: name.to_string(),
            sql: sql.to_string(),
            param_types: param_types.to_vec(),
        };
        self.answer(call, "")
    }

    fn execute_prepared(&mut self, name: &str, params: &[WireValue]) -> RawResult {
        let call = Call::ExecutePrepared {
            name: name.to_string(),
            params: params.to_vec(),
        };
        self.answer(call, "SELECT 0")
    }

    fn execute_with_params(&mut self, sql: &str, params: &[WireValue]) -> RawResult {
        let call = Call::ExecuteWithParams {
            sql: sql.to_string(),
            params: params.to_vec(),
        };
        self.answer(call, "SELECT 0")
    }

    fn execute_plain(&mut self, sql: &str) -> RawResult {
        let tag = sql.split_whitespace().next().unwrap_or("").to_string();
        self.answer(Call::ExecutePlain { sql: sql.to_string() }, &tag)
    }
}

/// Provider with a single connection that counts what is asked of it.
pub struct CountingProvider {
    connection: SharedConnection,
    acquired: AtomicUsize,
    invalidated: AtomicUsize,
}

impl CountingProvider {
    pub fn new(transport: ScriptedTransport) -> Self {
        Self {
            connection: Arc::new(Mutex::new(Connection::new(Box::new(transport)))),
            acquired: AtomicUsize::new(0),
            invalidated: AtomicUsize::new(0),
        }
    }

    pub fn acquire_count(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn invalidate_count(&self) -> usize {
        self.invalidated.load(Ordering::SeqCst)
    }
}

impl ConnectionProvider for CountingProvider {
    fn acquire(&self) -> Result<SharedConnection> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.connection))
    }

    fn invalidate(&self, conn: &SharedConnection) {
        assert!(Arc::ptr_eq(conn, &self.connection));
        self.invalidated.fetch_add(1, Ordering::SeqCst);
    }
}
