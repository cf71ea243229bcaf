//! Statement execution: render, run, time, report, release.

use crate::pool::PooledConnection;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlroute_core::{Connection, Connector, Params, QueryFormatter, QueryOutcome, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Timing of one executed statement, handed to the benchmark handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryTiming {
    /// Statement text before parameter substitution.
    pub query: String,
    pub params: Params,
    pub elapsed_ms: u64,
    pub started_at: DateTime<Utc>,
    pub succeeded: bool,
}

/// Receives a [`QueryTiming`] after every executed statement.
///
/// Errors are logged and otherwise ignored; they never change the result of
/// the statement that was measured.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BenchmarkHandler: Send + Sync {
    async fn record(&self, timing: &QueryTiming) -> anyhow::Result<()>;
}

/// Adapts a plain closure into a [`BenchmarkHandler`].
pub struct FnBenchmark<F>(F);

#[async_trait]
impl<F> BenchmarkHandler for FnBenchmark<F>
where
    F: Fn(&QueryTiming) -> anyhow::Result<()> + Send + Sync,
{
    async fn record(&self, timing: &QueryTiming) -> anyhow::Result<()> {
        (self.0)(timing)
    }
}

pub fn benchmark_fn<F>(f: F) -> Arc<dyn BenchmarkHandler>
where
    F: Fn(&QueryTiming) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnBenchmark(f))
}

/// Renders parameters, runs the statement and reports its timing.
#[derive(Clone)]
pub struct QueryExecutor {
    formatter: Arc<dyn QueryFormatter>,
    benchmark: Option<Arc<dyn BenchmarkHandler>>,
}

impl QueryExecutor {
    pub fn new(formatter: Arc<dyn QueryFormatter>) -> Self {
        Self {
            formatter,
            benchmark: None,
        }
    }

    pub fn with_benchmark(mut self, handler: Arc<dyn BenchmarkHandler>) -> Self {
        self.benchmark = Some(handler);
        self
    }

    pub fn formatter(&self) -> &dyn QueryFormatter {
        self.formatter.as_ref()
    }

    async fn run<C: Connector>(
        &self,
        conn: &mut PooledConnection<C>,
        query: &str,
        params: &Params,
    ) -> (Result<QueryOutcome>, QueryTiming) {
        let sql = self.formatter.format(query, params);
        tracing::trace!(host = %conn.address(), sql = %sql, "Executing statement");

        let started_at = Utc::now();
        let start = Instant::now();
        let result = conn.execute(&sql).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(outcome) => tracing::debug!(
                host = %conn.address(),
                elapsed_ms,
                rows = outcome.rows.len(),
                rows_affected = outcome.rows_affected,
                "Statement completed"
            ),
            Err(e) => tracing::debug!(
                host = %conn.address(),
                elapsed_ms,
                error = %e,
                "Statement failed"
            ),
        }

        let timing = QueryTiming {
            query: query.to_string(),
            params: params.clone(),
            elapsed_ms,
            started_at,
            succeeded: result.is_ok(),
        };
        (result.map_err(Into::into), timing)
    }

    async fn report(&self, timing: &QueryTiming) {
        if let Some(handler) = &self.benchmark {
            if let Err(e) = handler.record(timing).await {
                tracing::warn!(error = %e, query = %timing.query, "Benchmark handler failed");
            }
        }
    }

    /// Runs a statement on a connection the caller keeps afterwards.
    pub async fn execute<C: Connector>(
        &self,
        conn: &mut PooledConnection<C>,
        query: &str,
        params: &Params,
    ) -> Result<QueryOutcome> {
        let (result, timing) = self.run(conn, query, params).await;
        self.report(&timing).await;
        result
    }

    /// Runs a statement and returns the connection to its pool, whether the
    /// statement succeeded or not. The pool gets it back before the
    /// benchmark handler runs.
    pub async fn execute_and_release<C: Connector>(
        &self,
        mut conn: PooledConnection<C>,
        query: &str,
        params: &Params,
    ) -> Result<QueryOutcome> {
        let (result, timing) = self.run(&mut conn, query, params).await;
        drop(conn);
        self.report(&timing).await;
        result
    }
}

impl fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("benchmark", &self.benchmark.is_some())
            .finish()
    }
}
