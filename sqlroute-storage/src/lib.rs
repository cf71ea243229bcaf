pub mod cache;
pub mod client;
pub mod config;
pub mod executor;
pub mod mysql;
pub mod pool;
pub mod router;
pub mod stub;
pub mod transaction;

pub use cache::{CacheConfig, CacheKey, CacheStatistics, ResultCache};
pub use client::{ClientBuilder, ReplicaClient};
pub use config::ClientConfig;
pub use executor::{benchmark_fn, BenchmarkHandler, QueryExecutor, QueryTiming};
pub use mysql::{MySqlConn, MySqlConnector};
pub use pool::{HostPool, PoolStatus, PooledConnection};
pub use router::{PoolGroup, PoolSet, PoolSetStatus, Role};
pub use transaction::{Transaction, TransactionState};
