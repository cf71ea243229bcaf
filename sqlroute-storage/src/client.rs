//! The public entry point: routed reads and writes, caching, transactions.

use crate::cache::{CacheKey, CacheStatistics, ResultCache};
use crate::config::ClientConfig;
use crate::executor::{BenchmarkHandler, QueryExecutor};
use crate::mysql::MySqlConnector;
use crate::pool::PooledConnection;
use crate::router::{PoolSet, PoolSetStatus, Role};
use crate::transaction::Transaction;
use serde_json::Value;
use sqlroute_core::{
    Connector, MySqlFormatter, Params, QueryFormatter, QueryOutcome, Result, RouteError, Row,
    SqlValue,
};
use std::fmt;
use std::sync::Arc;

struct ClientInner<C: Connector> {
    pools: PoolSet<C>,
    executor: QueryExecutor,
    cache: Option<ResultCache<QueryOutcome>>,
}

/// A handle to a replicated database.
///
/// Writes go to the write group, reads to the read group, each chosen round
/// robin. Cloning is cheap and clones share pools and cache.
pub struct ReplicaClient<C: Connector> {
    inner: Arc<ClientInner<C>>,
}

impl<C: Connector> Clone for ReplicaClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Builder for [`ReplicaClient`].
pub struct ClientBuilder {
    config: ClientConfig,
    formatter: Option<Arc<dyn QueryFormatter>>,
    benchmark: Option<Arc<dyn BenchmarkHandler>>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            formatter: None,
            benchmark: None,
        }
    }

    /// Replaces the default MySQL escaping rules.
    pub fn formatter(mut self, formatter: Arc<dyn QueryFormatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    pub fn benchmark_handler(mut self, handler: Arc<dyn BenchmarkHandler>) -> Self {
        self.benchmark = Some(handler);
        self
    }

    /// Validates the configuration and creates every pool.
    ///
    /// # Errors
    ///
    /// `RouteError::Configuration` for empty host lists, unparsable
    /// addresses, a zero connection limit or an invalid cache section.
    pub fn build<C: Connector>(self, connector: C) -> Result<ReplicaClient<C>> {
        self.config.validate()?;
        let (write_hosts, read_hosts) = self.config.resolve_hosts()?;

        let pools = PoolSet::new(
            &write_hosts,
            &read_hosts,
            Arc::new(connector),
            self.config.connection_limit,
        )?;

        let formatter = self
            .formatter
            .unwrap_or_else(|| Arc::new(MySqlFormatter::new()));
        let mut executor = QueryExecutor::new(formatter);
        if let Some(handler) = self.benchmark {
            executor = executor.with_benchmark(handler);
        }

        let cache = if self.config.disable_cache {
            None
        } else {
            Some(ResultCache::new(self.config.cache.clone()))
        };

        tracing::info!(
            write_hosts = write_hosts.len(),
            read_hosts = read_hosts.len(),
            cache = cache.is_some(),
            "Replica client ready"
        );

        Ok(ReplicaClient {
            inner: Arc::new(ClientInner {
                pools,
                executor,
                cache,
            }),
        })
    }
}

impl<C: Connector> ReplicaClient<C> {
    pub fn new(config: ClientConfig, connector: C) -> Result<Self> {
        ClientBuilder::new(config).build(connector)
    }

    pub(crate) fn executor(&self) -> &QueryExecutor {
        &self.inner.executor
    }

    pub(crate) async fn borrow(&self, role: Role) -> Result<PooledConnection<C>> {
        self.inner.pools.borrow(role).await
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.inner.pools.is_closed() {
            return Err(RouteError::PoolClosed("client has been closed".to_string()));
        }
        Ok(())
    }

    async fn run(&self, role: Role, query: &str, params: &Params) -> Result<QueryOutcome> {
        let conn = self.borrow(role).await?;
        self.inner.executor.execute_and_release(conn, query, params).await
    }

    /// Runs a statement on a read host, through the cache when enabled.
    pub async fn query_read(&self, query: &str, params: &Params) -> Result<QueryOutcome> {
        self.ensure_open()?;
        match &self.inner.cache {
            Some(cache) => {
                let key = CacheKey::compute(query, params);
                cache
                    .get_or_compute(&key, || self.run(Role::Read, query, params))
                    .await
            }
            None => self.run(Role::Read, query, params).await,
        }
    }

    /// Runs a statement on a write host. Never touches the cache.
    pub async fn query_write(&self, query: &str, params: &Params) -> Result<QueryOutcome> {
        self.ensure_open()?;
        self.run(Role::Write, query, params).await
    }

    pub async fn get_rows(&self, query: &str, params: &Params) -> Result<Vec<Row>> {
        Ok(self.query_read(query, params).await?.rows)
    }

    /// First row of the result, if any.
    pub async fn get_row(&self, query: &str, params: &Params) -> Result<Option<Row>> {
        Ok(self.query_read(query, params).await?.rows.into_iter().next())
    }

    pub async fn exec(&self, query: &str, params: &Params) -> Result<QueryOutcome> {
        self.query_write(query, params).await
    }

    /// Whether `query` returns at least one row.
    ///
    /// Anything from the first `;` on is dropped before wrapping the query
    /// in `SELECT EXISTS(...) AS exist`.
    pub async fn exists(&self, query: &str, params: &Params) -> Result<bool> {
        let wrapped = exists_query(query);
        let row = self.get_row(&wrapped, params).await?;
        Ok(row
            .as_ref()
            .and_then(|row| row.get("exist"))
            .map(is_truthy)
            .unwrap_or(false))
    }

    pub fn escape(&self, value: &SqlValue) -> String {
        self.inner.executor.formatter().escape(value)
    }

    pub fn escape_id(&self, identifier: &str) -> String {
        self.inner.executor.formatter().escape_id(identifier)
    }

    /// Renders `query` the way it would be sent to the server.
    pub fn format(&self, query: &str, params: &Params) -> String {
        self.inner.executor.formatter().format(query, params)
    }

    /// Creates an idle transaction. Call [`Transaction::begin`] to start it.
    pub fn transaction(&self, end_on_error: bool) -> Transaction<C> {
        Transaction::new(self.clone(), end_on_error)
    }

    pub fn cache_key(&self, query: &str, params: &Params) -> CacheKey {
        CacheKey::compute(query, params)
    }

    /// Drops a cached result, returning it if it was present.
    pub fn invalidate(&self, key: &CacheKey) -> Option<QueryOutcome> {
        self.inner.cache.as_ref().and_then(|cache| cache.invalidate(key))
    }

    pub fn cache(&self) -> Option<&ResultCache<QueryOutcome>> {
        self.inner.cache.as_ref()
    }

    pub fn cache_statistics(&self) -> Option<CacheStatistics> {
        self.inner.cache.as_ref().map(ResultCache::statistics)
    }

    pub fn pool_status(&self) -> PoolSetStatus {
        self.inner.pools.status()
    }

    /// Closes every pool. Later operations fail with `PoolClosed`.
    pub async fn close(&self) {
        self.inner.pools.close().await;
        if let Some(cache) = &self.inner.cache {
            cache.clear();
        }
        tracing::info!("Replica client closed");
    }
}

impl ReplicaClient<MySqlConnector> {
    /// A client backed by the sqlx MySQL driver.
    pub fn mysql(config: ClientConfig) -> Result<Self> {
        let connector = MySqlConnector::from_config(&config);
        Self::new(config, connector)
    }

    /// A MySQL client configured from `MYSQL_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::mysql(ClientConfig::from_env()?)
    }
}

impl<C: Connector> fmt::Debug for ReplicaClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicaClient")
            .field("write_pools", &self.inner.pools.group(Role::Write).len())
            .field("read_pools", &self.inner.pools.group(Role::Read).len())
            .field("executor", &self.inner.executor)
            .field("cache", &self.inner.cache)
            .finish()
    }
}

fn exists_query(query: &str) -> String {
    let inner = query.split(';').next().unwrap_or_default().trim();
    format!("SELECT EXISTS({inner}) AS exist")
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}
