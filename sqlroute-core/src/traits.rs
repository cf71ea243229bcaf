use crate::error::QueryError;
use crate::host::HostAddress;
use crate::value::QueryOutcome;
use async_trait::async_trait;

/// A single live session with one database server.
///
/// Statements arrive fully rendered; a connection never sees parameters.
#[async_trait]
pub trait Connection: Send + 'static {
    async fn execute(&mut self, sql: &str) -> std::result::Result<QueryOutcome, QueryError>;

    /// A broken connection is dropped instead of going back to its pool.
    fn is_broken(&self) -> bool {
        false
    }

    async fn close(&mut self) -> std::result::Result<(), QueryError>;
}

/// Opens connections to a host. One connector serves every pool in a set.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    async fn connect(
        &self,
        address: &HostAddress,
    ) -> std::result::Result<Self::Connection, QueryError>;
}
