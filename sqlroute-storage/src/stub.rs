//! In-memory driver that records statements and answers from a closure.
//!
//! Useful for exercising routing, pooling and transactions without a server.

use async_trait::async_trait;
use sqlroute_core::{Connection, Connector, HostAddress, QueryError, QueryOutcome};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// One statement as seen by a stub connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubCall {
    pub host: HostAddress,
    pub connection_id: u64,
    pub sql: String,
}

type Responder = dyn Fn(&StubCall) -> Result<QueryOutcome, QueryError> + Send + Sync;

struct StubState {
    responder: RwLock<Arc<Responder>>,
    calls: Mutex<Vec<StubCall>>,
    next_id: AtomicU64,
    connects: AtomicU64,
    closes: AtomicU64,
    fail_connections: AtomicBool,
}

/// Connector handing out [`StubConnection`]s that share one call log.
#[derive(Clone)]
pub struct StubConnector {
    state: Arc<StubState>,
}

impl Default for StubConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl StubConnector {
    /// Every statement succeeds with an empty outcome.
    pub fn new() -> Self {
        Self::with_responder(|_| Ok(QueryOutcome::default()))
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&StubCall) -> Result<QueryOutcome, QueryError> + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(StubState {
                responder: RwLock::new(Arc::new(responder)),
                calls: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                connects: AtomicU64::new(0),
                closes: AtomicU64::new(0),
                fail_connections: AtomicBool::new(false),
            }),
        }
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&StubCall) -> Result<QueryOutcome, QueryError> + Send + Sync + 'static,
    {
        let mut slot = self
            .state
            .responder
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Arc::new(responder);
    }

    /// While set, `connect` fails with a connection error.
    pub fn fail_connections(&self, fail: bool) {
        self.state.fail_connections.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<StubCall> {
        self.state
            .calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.sql).collect()
    }

    pub fn hosts(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.host.host).collect()
    }

    pub fn clear_calls(&self) {
        self.state
            .calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    pub fn connect_count(&self) -> u64 {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u64 {
        self.state.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for StubConnector {
    type Connection = StubConnection;

    async fn connect(&self, address: &HostAddress) -> Result<StubConnection, QueryError> {
        if self.state.fail_connections.load(Ordering::SeqCst) {
            return Err(QueryError::connection(format!(
                "connect ECONNREFUSED {address}"
            )));
        }

        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(StubConnection {
            id: self.state.next_id.fetch_add(1, Ordering::SeqCst),
            host: address.clone(),
            state: self.state.clone(),
            broken: false,
        })
    }
}

pub struct StubConnection {
    id: u64,
    host: HostAddress,
    state: Arc<StubState>,
    broken: bool,
}

impl StubConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn host(&self) -> &HostAddress {
        &self.host
    }
}

#[async_trait]
impl Connection for StubConnection {
    async fn execute(&mut self, sql: &str) -> Result<QueryOutcome, QueryError> {
        let call = StubCall {
            host: self.host.clone(),
            connection_id: self.id,
            sql: sql.to_string(),
        };
        self.state
            .calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call.clone());

        let responder = self
            .state
            .responder
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        let result = responder(&call);
        if let Err(e) = &result {
            if e.is_connection() {
                self.broken = true;
            }
        }
        result
    }

    fn is_broken(&self) -> bool {
        self.broken
    }

    async fn close(&mut self) -> Result<(), QueryError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
