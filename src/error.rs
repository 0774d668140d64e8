use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::results::BatchResults;

#[derive(Debug, Error)]
pub enum SqlMiddlewareDbError {
    #[cfg(feature = "mssql")]
    #[error(transparent)]
    MssqlError(#[from] tiberius::error::Error),

    #[error(transparent)]
    Statement(#[from] StatementError),

    #[error("{0} is closed")]
    Closed(ResourceKind),

    #[error("query was cancelled")]
    Cancelled,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("pool queue is full ({0} requests pending)")]
    QueueFull(usize),

    #[error("{}", .0.error)]
    Batch(Box<BatchFailure>),

    #[error("Pool error: {0}")]
    PoolError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),
}

impl SqlMiddlewareDbError {
    /// Results aggregated before a batch failed, if this error came out of an aggregation.
    #[must_use]
    pub fn partial_results(&self) -> Option<&BatchResults> {
        match self {
            Self::Batch(failure) => Some(&failure.results),
            _ => None,
        }
    }

    /// The server-reported statement error, looking through batch wrappers.
    #[must_use]
    pub fn statement_error(&self) -> Option<&StatementError> {
        match self {
            Self::Statement(err) => Some(err),
            Self::Batch(failure) => failure.error.statement_error(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        match self {
            Self::Closed(_) => true,
            Self::Batch(failure) => failure.error.is_closed(),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Batch(failure) => failure.error.is_cancelled(),
            _ => false,
        }
    }

    pub(crate) fn with_partial(error: SqlMiddlewareDbError, results: BatchResults) -> Self {
        Self::Batch(Box::new(BatchFailure { error, results }))
    }
}

/// A batch that failed part way; `results` holds what had been aggregated by then.
#[derive(Debug)]
pub struct BatchFailure {
    pub error: SqlMiddlewareDbError,
    pub results: BatchResults,
}

/// Resources that reject work once closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Connection,
    Pool,
    PreparedStatement,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Connection => f.write_str("connection"),
            ResourceKind::Pool => f.write_str("pool"),
            ResourceKind::PreparedStatement => f.write_str("prepared statement"),
        }
    }
}

/// Error raised by the server for a statement in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StatementError {
    pub message: String,
    /// Server error number (e.g. 208 for an invalid object name).
    pub code: i32,
    /// SQLSTATE derived from the error number (e.g. `42S02`).
    pub sqlstate: String,
    pub severity: u8,
    /// State byte reported alongside the error number.
    pub state: u8,
    pub procedure: Option<String>,
    pub line: u32,
}

impl StatementError {
    #[must_use]
    pub fn new(code: i32, severity: u8, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            sqlstate: sqlstate_for(code).to_string(),
            severity,
            state: 1,
            procedure: None,
            line: 1,
        }
    }
}

/// SQLSTATE for well-known server error numbers.
#[must_use]
pub fn sqlstate_for(code: i32) -> &'static str {
    match code {
        208 => "42S02",
        207 => "42S22",
        102 | 156 | 170 | 50000 => "42000",
        515 | 547 | 2601 | 2627 => "23000",
        1205 => "40001",
        _ => "HY000",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_object_maps_to_42s02() {
        let err = StatementError::new(208, 16, "Invalid object name 'invalidTable'.");
        assert_eq!(err.sqlstate, "42S02");
        assert_eq!(err.to_string(), "Invalid object name 'invalidTable'.");
    }

    #[test]
    fn closed_message_mentions_closed() {
        let err = SqlMiddlewareDbError::Closed(ResourceKind::Pool);
        assert_eq!(err.to_string(), "pool is closed");
        assert!(err.is_closed());
    }

    #[test]
    fn batch_failure_displays_inner_error() {
        let inner = SqlMiddlewareDbError::Statement(StatementError::new(207, 16, "Invalid column name 'x'."));
        let err = SqlMiddlewareDbError::with_partial(inner, BatchResults::default());
        assert_eq!(err.to_string(), "Invalid column name 'x'.");
        assert_eq!(err.statement_error().map(|e| e.code), Some(207));
        assert!(err.partial_results().is_some());
    }
}
