//! MySQL driver built on sqlx.
//!
//! Statements arrive already rendered, so they go over the text protocol via
//! `sqlx::raw_sql`. Rows are decoded into JSON column maps.

use crate::config::ClientConfig;
use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::{Number, Value};
use sqlroute_core::{Connection, Connector, HostAddress, QueryError, QueryOutcome, Row};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError, MySqlRow};
use sqlx::{Column, ConnectOptions, Connection as _, Either, Row as _, TypeInfo, ValueRef};
use std::fmt;

/// Opens sqlx MySQL connections with shared credentials.
#[derive(Clone, Default)]
pub struct MySqlConnector {
    user: Option<String>,
    password: Option<String>,
    database: Option<String>,
}

impl MySqlConnector {
    pub fn new(user: Option<String>, password: Option<String>, database: Option<String>) -> Self {
        Self {
            user,
            password,
            database,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.user.clone(),
            config.password.clone(),
            config.database.clone(),
        )
    }

    fn options(&self, address: &HostAddress) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&address.host)
            .port(address.port);
        if let Some(user) = &self.user {
            options = options.username(user);
        }
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        if let Some(database) = &self.database {
            options = options.database(database);
        }
        // Statements are already logged by the executor.
        options.disable_statement_logging()
    }
}

impl fmt::Debug for MySqlConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySqlConnector")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("database", &self.database)
            .finish()
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    type Connection = MySqlConn;

    async fn connect(&self, address: &HostAddress) -> Result<MySqlConn, QueryError> {
        let conn = self
            .options(address)
            .connect()
            .await
            .map_err(map_error)?;

        Ok(MySqlConn {
            inner: Some(conn),
            broken: false,
        })
    }
}

/// One sqlx MySQL session.
pub struct MySqlConn {
    inner: Option<MySqlConnection>,
    broken: bool,
}

#[async_trait]
impl Connection for MySqlConn {
    async fn execute(&mut self, sql: &str) -> Result<QueryOutcome, QueryError> {
        let Some(conn) = self.inner.as_mut() else {
            return Err(QueryError::connection("connection already closed"));
        };

        let mut outcome = QueryOutcome::default();
        let mut stream = sqlx::raw_sql(sql).fetch_many(&mut *conn);

        loop {
            match stream.try_next().await {
                Ok(Some(Either::Left(done))) => {
                    outcome.rows_affected += done.rows_affected();
                    if done.last_insert_id() > 0 {
                        outcome.last_insert_id = Some(done.last_insert_id());
                    }
                }
                Ok(Some(Either::Right(row))) => outcome.rows.push(row_to_map(&row)),
                Ok(None) => break,
                Err(e) => {
                    let err = map_error(e);
                    if err.is_connection() {
                        self.broken = true;
                    }
                    return Err(err);
                }
            }
        }

        Ok(outcome)
    }

    fn is_broken(&self) -> bool {
        self.broken
    }

    async fn close(&mut self) -> Result<(), QueryError> {
        match self.inner.take() {
            Some(conn) => conn.close().await.map_err(map_error),
            None => Ok(()),
        }
    }
}

fn map_error(err: sqlx::Error) -> QueryError {
    match err {
        sqlx::Error::Database(db) => {
            let mut error = QueryError::statement(db.message());
            if let Some(code) = db.code() {
                error = error.with_sql_state(code.into_owned());
            }
            if let Some(mysql) = db.try_downcast_ref::<MySqlDatabaseError>() {
                error = error.with_number(mysql.number());
            }
            error
        }
        err @ (sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed) => QueryError::connection(err.to_string()),
        err => QueryError::statement(err.to_string()),
    }
}

fn row_to_map(row: &MySqlRow) -> Row {
    let mut map = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        map.insert(
            column.name().to_string(),
            column_value(row, i, column.type_info().name()),
        );
    }
    map
}

const BINARY_TYPES: &[&str] = &[
    "BINARY",
    "VARBINARY",
    "TINYBLOB",
    "BLOB",
    "MEDIUMBLOB",
    "LONGBLOB",
    "BIT",
    "GEOMETRY",
];

fn column_value(row: &MySqlRow, index: usize, type_name: &str) -> Value {
    match row.try_get_raw(index) {
        Ok(raw) if !raw.is_null() => {}
        _ => return Value::Null,
    }

    let typed = match type_name {
        "BOOLEAN" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<i64, _>(index).ok().map(Value::from)
        }
        name if name.ends_with("UNSIGNED") => row.try_get::<u64, _>(index).ok().map(Value::from),
        "FLOAT" | "DOUBLE" => row
            .try_get::<f64, _>(index)
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        "JSON" => row.try_get::<Value, _>(index).ok(),
        name if BINARY_TYPES.contains(&name) => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .ok()
            .map(|bytes| Value::String(String::from_utf8_lossy(&bytes).into_owned())),
        _ => None,
    };

    // Text protocol: everything else (DECIMAL, DATETIME, ...) arrives as the
    // server's own text rendering.
    typed
        .or_else(|| {
            row.try_get_unchecked::<String, _>(index)
                .ok()
                .map(Value::String)
        })
        .unwrap_or(Value::Null)
}
