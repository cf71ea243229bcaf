use thiserror::Error;

/// Whether a statement failed inside the database or on the way to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// The server rejected the statement (syntax, constraint, signal, ...).
    Statement,
    /// The connection could not be established or broke mid-statement.
    Connection,
}

/// A failure reported by the database driver.
///
/// The message is the driver's own text so callers see the original cause.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
    /// SQLSTATE reported by the server, when there is one.
    pub sql_state: Option<String>,
    /// Vendor error number (e.g. MySQL `ER_PARSE_ERROR` = 1064).
    pub number: Option<u16>,
}

impl QueryError {
    pub fn statement(message: impl Into<String>) -> Self {
        Self {
            kind: QueryErrorKind::Statement,
            message: message.into(),
            sql_state: None,
            number: None,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: QueryErrorKind::Connection,
            message: message.into(),
            sql_state: None,
            number: None,
        }
    }

    pub fn with_sql_state(mut self, sql_state: impl Into<String>) -> Self {
        self.sql_state = Some(sql_state.into());
        self
    }

    pub fn with_number(mut self, number: u16) -> Self {
        self.number = Some(number);
        self
    }

    pub fn is_connection(&self) -> bool {
        self.kind == QueryErrorKind::Connection
    }
}

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Pool closed: {0}")]
    PoolClosed(String),
}

impl RouteError {
    pub fn configuration(message: impl Into<String>) -> Self {
        RouteError::Configuration(message.into())
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        RouteError::Transaction(message.into())
    }

    /// Only connection-level query failures are worth another attempt;
    /// misuse and shutdown errors will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RouteError::Query(err) if err.is_connection())
    }

    pub fn as_query_error(&self) -> Option<&QueryError> {
        match self {
            RouteError::Query(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RouteError>;
