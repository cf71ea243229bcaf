//! Multi-statement transactions pinned to one write connection.
//!
//! A transaction moves `Idle -> Active -> Ended`. While active it owns one
//! write connection, which no other caller can borrow. `Ended` is terminal.

use crate::client::ReplicaClient;
use crate::pool::PooledConnection;
use crate::router::Role;
use sqlroute_core::{Connection, Connector, Params, QueryOutcome, Result, RouteError, Row};
use std::fmt;
use uuid::Uuid;

/// Lifecycle of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Active,
    Ended,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Idle => write!(f, "idle"),
            TransactionState::Active => write!(f, "active"),
            TransactionState::Ended => write!(f, "ended"),
        }
    }
}

enum TxState<C: Connector> {
    Idle,
    Active(PooledConnection<C>),
    Ended,
}

/// How the pinned connection leaves the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Release {
    /// Back to its pool for reuse.
    Return,
    /// Dropped; its session state is unknown.
    Discard,
}

pub struct Transaction<C: Connector> {
    id: Uuid,
    client: ReplicaClient<C>,
    end_on_error: bool,
    state: TxState<C>,
}

impl<C: Connector> Transaction<C> {
    pub(crate) fn new(client: ReplicaClient<C>, end_on_error: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            client,
            end_on_error,
            state: TxState::Idle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn end_on_error(&self) -> bool {
        self.end_on_error
    }

    pub fn state(&self) -> TransactionState {
        match self.state {
            TxState::Idle => TransactionState::Idle,
            TxState::Active(_) => TransactionState::Active,
            TxState::Ended => TransactionState::Ended,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, TxState::Active(_))
    }

    pub fn is_ended(&self) -> bool {
        matches!(self.state, TxState::Ended)
    }

    fn misuse(&self) -> RouteError {
        match self.state {
            TxState::Idle => RouteError::transaction("transaction has not been started"),
            TxState::Active(_) => RouteError::transaction("transaction has already been started"),
            TxState::Ended => RouteError::transaction("transaction has already been ended"),
        }
    }

    /// Borrows a write connection, sets autocommit and starts the transaction.
    ///
    /// # Errors
    ///
    /// `RouteError::Transaction` unless the transaction is idle. If either
    /// setup statement fails the connection is discarded and the transaction
    /// ends when `end_on_error` is set, or goes back to idle otherwise.
    pub async fn begin(&mut self, auto_commit: bool) -> Result<()> {
        if !matches!(self.state, TxState::Idle) {
            return Err(self.misuse());
        }

        let mut conn = self.client.borrow(Role::Write).await?;
        let executor = self.client.executor();

        let started = async {
            executor
                .execute(
                    &mut conn,
                    "SET autocommit = :auto_commit",
                    &Params::named([("auto_commit", auto_commit)]),
                )
                .await?;
            executor
                .execute(&mut conn, "START TRANSACTION", &Params::None)
                .await
        }
        .await;

        match started {
            Ok(_) => {
                tracing::info!(
                    transaction_id = %self.id,
                    host = %conn.address(),
                    auto_commit,
                    "Transaction started"
                );
                self.state = TxState::Active(conn);
                Ok(())
            }
            Err(e) => {
                conn.discard();
                if self.end_on_error {
                    self.state = TxState::Ended;
                }
                tracing::warn!(transaction_id = %self.id, error = %e, "Failed to start transaction");
                Err(e)
            }
        }
    }

    /// Ends an active transaction whose client has been closed.
    fn check_open(&mut self) -> Result<()> {
        if let Err(e) = self.client.ensure_open() {
            if let TxState::Active(conn) = std::mem::replace(&mut self.state, TxState::Ended) {
                tracing::warn!(
                    transaction_id = %self.id,
                    host = %conn.address(),
                    "Client closed under an active transaction, discarding its connection"
                );
                conn.discard();
            }
            return Err(e);
        }
        Ok(())
    }

    async fn try_exec(&mut self, query: &str, params: &Params) -> Result<QueryOutcome> {
        if self.is_active() {
            self.check_open()?;
        }
        let conn = match &mut self.state {
            TxState::Active(conn) => conn,
            _ => return Err(self.misuse()),
        };

        let result = self.client.executor().execute(conn, query, params).await;
        if let Err(e) = &result {
            tracing::warn!(transaction_id = %self.id, error = %e, "Transaction statement failed");
            if self.end_on_error {
                self.abandon().await;
            }
        }
        result
    }

    /// Rolls back what it can and ends after a failed statement.
    async fn abandon(&mut self) {
        let TxState::Active(mut conn) = std::mem::replace(&mut self.state, TxState::Ended) else {
            return;
        };
        if conn.is_broken() {
            return;
        }

        let release = match self
            .client
            .executor()
            .execute(&mut conn, "ROLLBACK", &Params::None)
            .await
        {
            Ok(_) => Release::Return,
            Err(_) => Release::Discard,
        };
        Self::release(conn, release);
        tracing::info!(transaction_id = %self.id, "Transaction ended after error");
    }

    fn release(conn: PooledConnection<C>, release: Release) {
        match release {
            Release::Return => drop(conn),
            Release::Discard => conn.discard(),
        }
    }

    /// Runs `COMMIT` or `ROLLBACK` and ends the transaction either way.
    async fn finish(&mut self, statement: &'static str) -> Result<()> {
        if self.is_active() {
            self.check_open()?;
        }
        let mut conn = match std::mem::replace(&mut self.state, TxState::Ended) {
            TxState::Active(conn) => conn,
            other => {
                self.state = other;
                return Err(self.misuse());
            }
        };

        let result = self
            .client
            .executor()
            .execute(&mut conn, statement, &Params::None)
            .await;

        match &result {
            Ok(_) => {
                Self::release(conn, Release::Return);
                tracing::info!(transaction_id = %self.id, statement, "Transaction ended");
            }
            Err(e) => {
                Self::release(conn, Release::Discard);
                tracing::warn!(transaction_id = %self.id, statement, error = %e, "Transaction ended with error");
            }
        }
        result.map(|_| ())
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.finish("COMMIT").await
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.finish("ROLLBACK").await
    }

    pub async fn exec(&mut self, query: &str, params: &Params) -> Result<QueryOutcome> {
        self.try_exec(query, params).await
    }

    pub async fn get_rows(&mut self, query: &str, params: &Params) -> Result<Vec<Row>> {
        Ok(self.try_exec(query, params).await?.rows)
    }

    pub async fn get_row(&mut self, query: &str, params: &Params) -> Result<Option<Row>> {
        Ok(self.try_exec(query, params).await?.rows.into_iter().next())
    }
}

impl<C: Connector> Drop for Transaction<C> {
    fn drop(&mut self) {
        if let TxState::Active(conn) = std::mem::replace(&mut self.state, TxState::Ended) {
            tracing::warn!(
                transaction_id = %self.id,
                host = %conn.address(),
                "Active transaction dropped, discarding its connection"
            );
            conn.discard();
        }
    }
}

impl<C: Connector> fmt::Debug for Transaction<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("end_on_error", &self.end_on_error)
            .finish()
    }
}
