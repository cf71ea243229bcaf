//! Bounded per-host connection pools.
//!
//! A [`HostPool`] lends at most `connection_limit` connections at once and
//! keeps returned connections idle for reuse. Borrowing suspends while the
//! pool is saturated; that wait is the only backpressure in the system.
//!
//! # Examples
//!
//! ```no_run
//! use sqlroute_core::{Connection, HostAddress};
//! use sqlroute_storage::{pool::HostPool, stub::StubConnector};
//! use std::sync::Arc;
//!
//! # async fn run() -> sqlroute_core::Result<()> {
//! let pool = HostPool::new(HostAddress::new("db1", 3306), Arc::new(StubConnector::new()), 10)?;
//!
//! let mut conn = pool.acquire().await?;
//! conn.execute("SELECT 1").await?;
//! // Returned to the pool when dropped.
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use sqlroute_core::{Connection, Connector, HostAddress, Result, RouteError};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

struct HostPoolInner<C: Connector> {
    address: HostAddress,
    connector: Arc<C>,
    limit: usize,
    idle: Mutex<Vec<C::Connection>>,
    semaphore: Arc<Semaphore>,
    closed: AtomicBool,
    total_created: AtomicU64,
    total_discarded: AtomicU64,
}

impl<C: Connector> HostPoolInner<C> {
    fn idle(&self) -> MutexGuard<'_, Vec<C::Connection>> {
        // The idle list holds no invariant a panicking holder could break.
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, conn: C::Connection, discard: bool) {
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!(host = %self.address, "Dropping connection returned after close");
            return;
        }
        if discard || conn.is_broken() {
            self.total_discarded.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(host = %self.address, "Discarding connection instead of reusing it");
            return;
        }
        self.idle().push(conn);
    }
}

/// A connection pool for one host.
pub struct HostPool<C: Connector> {
    inner: Arc<HostPoolInner<C>>,
}

impl<C: Connector> Clone for HostPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Connector> HostPool<C> {
    /// Creates an empty pool. Connections are opened lazily on borrow.
    ///
    /// # Errors
    ///
    /// Returns `RouteError::Configuration` if `limit` is zero.
    pub fn new(address: HostAddress, connector: Arc<C>, limit: usize) -> Result<Self> {
        if limit == 0 {
            return Err(RouteError::configuration(
                "connection_limit must be greater than 0",
            ));
        }

        Ok(Self {
            inner: Arc::new(HostPoolInner {
                address,
                connector,
                limit,
                idle: Mutex::new(Vec::with_capacity(limit)),
                semaphore: Arc::new(Semaphore::new(limit)),
                closed: AtomicBool::new(false),
                total_created: AtomicU64::new(0),
                total_discarded: AtomicU64::new(0),
            }),
        })
    }

    pub fn address(&self) -> &HostAddress {
        &self.inner.address
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn closed_error(&self) -> RouteError {
        RouteError::PoolClosed(self.inner.address.to_string())
    }

    /// Borrows a connection, waiting while all of them are lent out.
    ///
    /// # Errors
    ///
    /// `RouteError::PoolClosed` if the pool is closed before or during the
    /// wait, `RouteError::Query` if a new connection cannot be opened.
    pub async fn acquire(&self) -> Result<PooledConnection<C>> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| self.closed_error())?;

        let reused = self.inner.idle().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                let conn = self.inner.connector.connect(&self.inner.address).await?;
                self.inner.total_created.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(host = %self.inner.address, "Opened new connection");
                conn
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: self.inner.clone(),
            discard: false,
            _permit: permit,
        })
    }

    /// Closes the pool and every idle connection.
    ///
    /// Waiting and future borrows fail with `PoolClosed`. Connections still
    /// lent out are dropped when they come back.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.semaphore.close();

        let idle: Vec<_> = self.inner.idle().drain(..).collect();
        let count = idle.len();
        for mut conn in idle {
            if let Err(e) = conn.close().await {
                tracing::warn!(host = %self.inner.address, error = %e, "Failed to close connection");
            }
        }

        tracing::info!(host = %self.inner.address, closed = count, "Connection pool closed");
    }

    pub fn status(&self) -> PoolStatus {
        let available = self.inner.semaphore.available_permits();
        PoolStatus {
            address: self.inner.address.clone(),
            idle: self.inner.idle().len(),
            in_use: self.inner.limit.saturating_sub(available),
            limit: self.inner.limit,
            total_created: self.inner.total_created.load(Ordering::Relaxed),
            total_discarded: self.inner.total_discarded.load(Ordering::Relaxed),
            closed: self.is_closed(),
        }
    }
}

impl<C: Connector> fmt::Debug for HostPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostPool")
            .field("address", &self.inner.address)
            .field("limit", &self.inner.limit)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A borrowed connection that goes back to its pool when dropped.
pub struct PooledConnection<C: Connector> {
    conn: Option<C::Connection>,
    pool: Arc<HostPoolInner<C>>,
    discard: bool,
    // Released after the connection is back on the idle list.
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> PooledConnection<C> {
    pub fn address(&self) -> &HostAddress {
        &self.pool.address
    }

    /// Drops the physical connection instead of recycling it.
    pub fn discard(mut self) {
        self.discard = true;
    }

    // The connection is only taken in `Drop`.
    fn conn(&self) -> &C::Connection {
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }

    fn conn_mut(&mut self) -> &mut C::Connection {
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn()
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn_mut()
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, self.discard);
        }
    }
}

impl<C: Connector> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("address", &self.pool.address)
            .field("discard", &self.discard)
            .finish()
    }
}

/// Point-in-time view of one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub address: HostAddress,
    pub idle: usize,
    pub in_use: usize,
    pub limit: usize,
    pub total_created: u64,
    pub total_discarded: u64,
    pub closed: bool,
}

impl PoolStatus {
    pub fn utilization_percent(&self) -> f64 {
        if self.limit == 0 {
            0.0
        } else {
            (self.in_use as f64 / self.limit as f64) * 100.0
        }
    }

    pub fn is_saturated(&self) -> bool {
        self.in_use >= self.limit
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pool({}, limit: {}, in_use: {}, idle: {}{})",
            self.address,
            self.limit,
            self.in_use,
            self.idle,
            if self.closed { ", closed" } else { "" }
        )
    }
}
