use std::sync::Arc;

use crate::error::{SqlMiddlewareDbError, StatementError, sqlstate_for};
use crate::results::ColumnMeta;
use crate::types::RowValues;

/// One step in the life of a submitted batch.
#[derive(Debug)]
pub enum QueryEvent {
    /// The batch reached its session and started executing.
    Submitted(QueryDescription),
    /// Column metadata opening a new rowset.
    Metadata(Arc<Vec<ColumnMeta>>),
    /// One row of the current rowset, values in column order.
    Row(Vec<RowValues>),
    /// Rows affected by a data-modification statement.
    RowCount(i64),
    /// An informational server message (PRINT, RAISERROR below the error threshold).
    Info(ServerMessage),
    /// `more == true` marks a statement boundary; `more == false` is completion.
    Done { more: bool },
    /// Terminal failure.
    Error(SqlMiddlewareDbError),
    /// Terminal: the query was cancelled.
    Cancelled,
}

impl QueryEvent {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryEvent::Done { more: false } | QueryEvent::Error(_) | QueryEvent::Cancelled
        )
    }
}

/// Identity of a submitted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDescription {
    pub id: u64,
    pub sql: String,
    pub param_count: usize,
}

/// A message raised by the server while running a batch.
///
/// Whether it is informational or an error depends only on `severity` relative to the
/// connection's configured threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    pub message: String,
    pub code: i32,
    pub severity: u8,
    pub state: u8,
    pub procedure: Option<String>,
    pub line: u32,
}

impl ServerMessage {
    #[must_use]
    pub fn new(code: i32, severity: u8, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            severity,
            state: 1,
            procedure: None,
            line: 1,
        }
    }

    /// A PRINT-style message.
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(0, 0, message)
    }

    #[must_use]
    pub fn into_statement_error(self) -> StatementError {
        StatementError {
            sqlstate: sqlstate_for(self.code).to_string(),
            message: self.message,
            code: self.code,
            severity: self.severity,
            state: self.state,
            procedure: self.procedure,
            line: self.line,
        }
    }
}
