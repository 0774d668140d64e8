//! A single server session driven by a background worker.

mod prepared;
mod transaction;
mod worker;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::oneshot;

pub use prepared::PreparedStatement;
pub use transaction::{IsolationLevel, Tx};

use crate::config::ConnectionOptions;
use crate::error::{ResourceKind, SqlMiddlewareDbError};
use crate::procedure::{CallArgs, ProcedureCache, ProcedureManager, ProcedureResult};
use crate::query::{EventSink, QueryDescription, QueryHandle, new_query};
use crate::results::{BatchResults, RawResults};
use crate::session::{BatchRequest, Connector};
use crate::table::BulkTable;
use crate::translation::{QueryOptions, count_placeholders, split_go_batches, translate_placeholders};
use crate::types::RowValues;

use worker::Worker;

/// An open connection.
///
/// Cloning is cheap and every clone drives the same session; statements from all clones run one
/// at a time in submission order.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    worker: Worker,
    options: ConnectionOptions,
    use_utc: Arc<AtomicBool>,
    process_id: Option<i32>,
    closed: AtomicBool,
    target: String,
    procedures: ProcedureCache,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.inner.target)
            .field("process_id", &self.inner.process_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Open a session through `connector`.
    ///
    /// # Errors
    /// Returns `SqlMiddlewareDbError::ConnectionError` when the session cannot be established.
    pub async fn open(
        connector: Arc<dyn Connector>,
        options: ConnectionOptions,
    ) -> Result<Self, SqlMiddlewareDbError> {
        let use_utc = Arc::new(AtomicBool::new(options.use_utc));
        Self::open_shared(connector.as_ref(), options, use_utc).await
    }

    /// Open a SQL Server session from `options.connection_string`.
    ///
    /// # Errors
    /// Returns `SqlMiddlewareDbError::ConnectionError` for a malformed connection string or an
    /// unreachable server.
    #[cfg(feature = "mssql")]
    pub async fn connect(options: ConnectionOptions) -> Result<Self, SqlMiddlewareDbError> {
        let connector = crate::mssql::TiberiusConnector::new(&options.connection_string)?;
        Self::open(Arc::new(connector), options).await
    }

    /// Open a session whose UTC flag is shared with its owner (a pool).
    pub(crate) async fn open_shared(
        connector: &dyn Connector,
        options: ConnectionOptions,
        use_utc: Arc<AtomicBool>,
    ) -> Result<Self, SqlMiddlewareDbError> {
        let target = connector.describe();
        let session = connector.connect().await.map_err(|err| match err {
            SqlMiddlewareDbError::ConnectionError(_) => err,
            other => SqlMiddlewareDbError::ConnectionError(format!("{target}: {other}")),
        })?;
        let process_id = session.process_id();
        tracing::debug!(%target, ?process_id, "connection opened");
        let label = match process_id {
            Some(spid) => format!("{target} spid={spid}"),
            None => target.clone(),
        };
        let worker = Worker::spawn(session, options.query_timeout, label);
        Ok(Self {
            inner: Arc::new(ConnectionInner {
                worker,
                options,
                use_utc,
                process_id,
                closed: AtomicBool::new(false),
                target,
                procedures: ProcedureCache::default(),
            }),
        })
    }

    #[must_use]
    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    /// Server session id captured when the connection opened.
    #[must_use]
    pub fn process_id(&self) -> Option<i32> {
        self.inner.process_id
    }

    /// Switch timestamp materialization between UTC and local time. Applies to rows delivered
    /// after the call, including rows of queries already running.
    pub fn set_use_utc(&self, use_utc: bool) {
        self.inner.use_utc.store(use_utc, Ordering::Relaxed);
    }

    #[must_use]
    pub fn use_utc(&self) -> bool {
        self.inner.use_utc.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub(crate) fn is_healthy(&self) -> bool {
        !self.is_closed() && self.inner.worker.is_healthy()
    }

    /// Submit a statement or compound batch. Events stream on the returned handle.
    ///
    /// # Errors
    /// Returns `SqlMiddlewareDbError::Closed` once the connection is closed and
    /// `SqlMiddlewareDbError::ParameterError` when `params` does not match the placeholders.
    pub fn query(&self, sql: &str, params: &[RowValues]) -> Result<QueryHandle, SqlMiddlewareDbError> {
        self.query_with(sql, params, QueryOptions::default())
    }

    /// [`query`](Self::query) with per-call options.
    ///
    /// # Errors
    /// See [`query`](Self::query).
    pub fn query_with(
        &self,
        sql: &str,
        params: &[RowValues],
        options: QueryOptions,
    ) -> Result<QueryHandle, SqlMiddlewareDbError> {
        self.ensure_open()?;
        let translate = options.translation.resolve(self.inner.options.translate_placeholders);
        let request = build_request(sql, params, translate)?;
        let (handle, sink) = self.new_query(&request.sql);
        self.dispatch(request, sink, None);
        Ok(handle)
    }

    /// Submit a batch and aggregate everything it produces.
    ///
    /// # Errors
    /// Returns the batch's error wrapped in `SqlMiddlewareDbError::Batch` with the results
    /// aggregated before the failure.
    pub async fn query_aggregate(
        &self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<BatchResults, SqlMiddlewareDbError> {
        self.query(sql, params)?.aggregate().await
    }

    /// Submit a batch and return its rowsets as positional values.
    ///
    /// # Errors
    /// See [`query_aggregate`](Self::query_aggregate).
    pub async fn query_raw(
        &self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<RawResults, SqlMiddlewareDbError> {
        self.query_aggregate(sql, params).await.map(RawResults::from)
    }

    /// Run a data-modification batch and return the row count of each statement.
    ///
    /// # Errors
    /// See [`query_aggregate`](Self::query_aggregate).
    pub async fn execute(
        &self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<Vec<i64>, SqlMiddlewareDbError> {
        Ok(self.query_aggregate(sql, params).await?.counts)
    }

    /// Run a script made of `GO`-separated batches, one after another.
    ///
    /// # Errors
    /// Stops at the first failing batch and returns its error.
    pub async fn run_script(&self, script: &str) -> Result<Vec<BatchResults>, SqlMiddlewareDbError> {
        let mut outcomes = Vec::new();
        for batch in split_go_batches(script) {
            outcomes.push(self.query_aggregate(&batch, &[]).await?);
        }
        Ok(outcomes)
    }

    /// Prepare a statement for repeated execution.
    ///
    /// # Errors
    /// Returns the server error when the statement cannot be described.
    pub async fn prepare(&self, sql: &str) -> Result<PreparedStatement, SqlMiddlewareDbError> {
        PreparedStatement::prepare(self.clone(), sql).await
    }

    /// Start a transaction.
    ///
    /// # Errors
    /// Returns the server error when `BEGIN TRANSACTION` fails.
    pub async fn begin_transaction(&self) -> Result<Tx<'_>, SqlMiddlewareDbError> {
        Tx::begin(self, None).await
    }

    /// Start a transaction after setting the session's isolation level.
    ///
    /// # Errors
    /// Returns the server error when the isolation level or `BEGIN TRANSACTION` fails.
    pub async fn begin_transaction_with(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Tx<'_>, SqlMiddlewareDbError> {
        Tx::begin(self, Some(isolation)).await
    }

    #[must_use]
    pub fn procedures(&self) -> ProcedureManager {
        ProcedureManager::new(self.clone(), Arc::clone(&self.inner.procedures))
    }

    /// Resolve and call a stored procedure in one step.
    ///
    /// # Errors
    /// Returns `SqlMiddlewareDbError::ConfigError` when the procedure does not exist, otherwise
    /// see [`ProcedureHandle::call`](crate::procedure::ProcedureHandle::call).
    pub async fn call_proc(
        &self,
        name: &str,
        args: CallArgs,
    ) -> Result<ProcedureResult, SqlMiddlewareDbError> {
        self.procedures().call(name, args).await
    }

    /// Bind a table for row-shaped insert, select, update and delete.
    ///
    /// # Errors
    /// Returns `SqlMiddlewareDbError::ConfigError` when the table does not exist.
    pub async fn table(&self, name: &str) -> Result<BulkTable, SqlMiddlewareDbError> {
        BulkTable::bind(self.clone(), name).await
    }

    /// Close the session. Idempotent; later submissions fail with a closed error.
    ///
    /// # Errors
    /// Returns the session's error if it could not shut down cleanly.
    pub async fn close(&self) -> Result<(), SqlMiddlewareDbError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::debug!(target = %self.inner.target, process_id = ?self.inner.process_id, "closing connection");
        self.inner.worker.close().await
    }

    fn ensure_open(&self) -> Result<(), SqlMiddlewareDbError> {
        if self.is_closed() {
            return Err(SqlMiddlewareDbError::Closed(ResourceKind::Connection));
        }
        Ok(())
    }

    pub(crate) fn new_query(&self, sql: &str) -> (QueryHandle, EventSink) {
        new_query(
            sql,
            self.inner.options.event_buffer,
            self.inner.options.error_severity_threshold,
            Arc::clone(&self.inner.use_utc),
        )
    }

    /// Hand a prepared batch to the worker; `done` fires when the session is free again.
    pub(crate) fn dispatch(
        &self,
        request: BatchRequest,
        sink: EventSink,
        done: Option<oneshot::Sender<()>>,
    ) {
        if self.is_closed() {
            sink.finish(Err(SqlMiddlewareDbError::Closed(ResourceKind::Connection)));
            return;
        }
        let description = QueryDescription {
            id: sink.query_id(),
            sql: request.sql.clone(),
            param_count: request.params.len(),
        };
        self.inner.worker.run(request, description, sink, done);
    }

    /// Submit a batch that is already in `@Pn` form, skipping translation and counting.
    pub(crate) fn submit(&self, request: BatchRequest) -> Result<QueryHandle, SqlMiddlewareDbError> {
        self.ensure_open()?;
        let (handle, sink) = self.new_query(&request.sql);
        self.dispatch(request, sink, None);
        Ok(handle)
    }

    /// Submit SQL that this crate generated (already `@Pn` style).
    pub(crate) async fn run_internal(
        &self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<BatchResults, SqlMiddlewareDbError> {
        self.query_with(
            sql,
            params,
            QueryOptions::default().with_translation(crate::translation::TranslationMode::ForceOff),
        )?
        .aggregate()
        .await
    }
}

/// Translate placeholders and check the parameter count.
pub(crate) fn build_request(
    sql: &str,
    params: &[RowValues],
    translate: bool,
) -> Result<BatchRequest, SqlMiddlewareDbError> {
    let sql = translate_placeholders(sql, translate).into_owned();
    let expected = count_placeholders(&sql);
    if expected != params.len() {
        return Err(SqlMiddlewareDbError::ParameterError(format!(
            "statement expects {expected} parameters, {} supplied",
            params.len()
        )));
    }
    Ok(BatchRequest::new(sql, params.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_translates_and_counts() {
        let request = build_request("select ? + ?", &[RowValues::Int(1), RowValues::Int(2)], true)
            .unwrap();
        assert_eq!(request.sql, "select @P1 + @P2");
        assert_eq!(request.params.len(), 2);
    }

    #[test]
    fn request_rejects_parameter_mismatch() {
        let err = build_request("select ?", &[], true).unwrap_err();
        assert!(matches!(err, SqlMiddlewareDbError::ParameterError(_)));
    }
}
