//! Write/read pool groups and round-robin selection.

use crate::pool::{HostPool, PoolStatus, PooledConnection};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sqlroute_core::{Connector, HostAddress, Result, RouteError};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Which group a statement is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Write,
    Read,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Write => write!(f, "write"),
            Role::Read => write!(f, "read"),
        }
    }
}

/// Ordered pools for one role plus a selection counter.
///
/// The counter only grows; the pool used is `counter mod size` after the
/// increment, so sequential borrows cycle through the pools in order.
pub struct PoolGroup<C: Connector> {
    role: Role,
    pools: Vec<HostPool<C>>,
    counter: AtomicU64,
}

impl<C: Connector> PoolGroup<C> {
    pub fn new(role: Role, hosts: &[HostAddress], connector: Arc<C>, limit: usize) -> Result<Self> {
        if hosts.is_empty() {
            return Err(RouteError::configuration(format!("no {role} host found")));
        }

        let pools = hosts
            .iter()
            .map(|host| HostPool::new(host.clone(), connector.clone(), limit))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            role,
            pools,
            counter: AtomicU64::new(0),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn pools(&self) -> &[HostPool<C>] {
        &self.pools
    }

    /// Number of selections made so far.
    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    pub fn next_index(&self) -> usize {
        let n = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        (n % self.pools.len() as u64) as usize
    }

    /// Selects the next pool and borrows a connection from it.
    pub async fn borrow(&self) -> Result<PooledConnection<C>> {
        let index = self.next_index();
        let pool = &self.pools[index];
        tracing::trace!(role = %self.role, index, host = %pool.address(), "Routing to pool");
        pool.acquire().await
    }

    pub async fn close(&self) {
        join_all(self.pools.iter().map(|pool| pool.close())).await;
    }

    pub fn status(&self) -> Vec<PoolStatus> {
        self.pools.iter().map(HostPool::status).collect()
    }
}

/// The write group and the read group, built once per client.
pub struct PoolSet<C: Connector> {
    write: PoolGroup<C>,
    read: PoolGroup<C>,
    closed: AtomicBool,
}

impl<C: Connector> PoolSet<C> {
    /// Builds one pool per address in each list.
    ///
    /// # Errors
    ///
    /// `RouteError::Configuration` if either list is empty or `limit` is zero.
    pub fn new(
        write_hosts: &[HostAddress],
        read_hosts: &[HostAddress],
        connector: Arc<C>,
        limit: usize,
    ) -> Result<Self> {
        let write = PoolGroup::new(Role::Write, write_hosts, connector.clone(), limit)?;
        let read = PoolGroup::new(Role::Read, read_hosts, connector, limit)?;

        tracing::info!(
            write_pools = write.len(),
            read_pools = read.len(),
            limit,
            "Pool set created"
        );

        Ok(Self {
            write,
            read,
            closed: AtomicBool::new(false),
        })
    }

    pub fn group(&self, role: Role) -> &PoolGroup<C> {
        match role {
            Role::Write => &self.write,
            Role::Read => &self.read,
        }
    }

    pub async fn borrow(&self, role: Role) -> Result<PooledConnection<C>> {
        self.group(role).borrow().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes every pool in both groups.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        futures::join!(self.write.close(), self.read.close());
    }

    pub fn status(&self) -> PoolSetStatus {
        PoolSetStatus {
            write: self.write.status(),
            read: self.read.status(),
        }
    }
}

/// Status of every pool, grouped by role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSetStatus {
    pub write: Vec<PoolStatus>,
    pub read: Vec<PoolStatus>,
}

impl PoolSetStatus {
    pub fn in_use(&self) -> usize {
        self.write.iter().chain(&self.read).map(|p| p.in_use).sum()
    }
}

impl fmt::Display for PoolSetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for status in &self.write {
            writeln!(f, "write {status}")?;
        }
        for status in &self.read {
            writeln!(f, "read {status}")?;
        }
        Ok(())
    }
}
