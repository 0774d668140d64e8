//! The seam between connections and the native client that talks to the server.

use async_trait::async_trait;

use crate::error::SqlMiddlewareDbError;
use crate::query::EventSink;
use crate::types::RowValues;

/// A batch ready for a session: placeholders already translated.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub sql: String,
    pub params: Vec<RowValues>,
}

impl BatchRequest {
    #[must_use]
    pub fn new(sql: impl Into<String>, params: Vec<RowValues>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// One open server session.
///
/// A session runs at most one batch at a time; the owning connection serializes calls.
#[async_trait]
pub trait Session: Send {
    /// Run a batch, reporting its progress through `sink`.
    ///
    /// Server-raised messages go to [`EventSink::message`], which decides whether they end the
    /// batch. Whenever a sink call returns [`Flow::Stop`](crate::query::Flow::Stop) the session
    /// stops reading and returns.
    ///
    /// # Errors
    /// Transport or protocol failures that leave the batch without a result.
    async fn run_batch(
        &mut self,
        request: &BatchRequest,
        sink: &mut EventSink,
    ) -> Result<(), SqlMiddlewareDbError>;

    /// Server-side session id (`@@SPID`) captured when the session opened.
    fn process_id(&self) -> Option<i32>;

    fn is_healthy(&self) -> bool {
        true
    }

    /// # Errors
    /// Returns an error when the session could not be shut down cleanly.
    async fn close(&mut self) -> Result<(), SqlMiddlewareDbError>;
}

/// Opens sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// # Errors
    /// Returns `SqlMiddlewareDbError::ConnectionError` when no session could be established.
    async fn connect(&self) -> Result<Box<dyn Session>, SqlMiddlewareDbError>;

    /// Short human-readable description of the target, for logs.
    fn describe(&self) -> String;
}
