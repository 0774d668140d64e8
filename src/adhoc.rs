//! One-shot helpers that open a connection, run a single request and close it again.

use std::sync::Arc;

use crate::config::ConnectionOptions;
use crate::connection::Connection;
use crate::error::SqlMiddlewareDbError;
use crate::procedure::{CallArgs, ProcedureResult};
use crate::results::BatchResults;
use crate::session::Connector;
use crate::types::RowValues;

async fn with_connection<T, F, Fut>(
    connector: Arc<dyn Connector>,
    options: ConnectionOptions,
    work: F,
) -> Result<T, SqlMiddlewareDbError>
where
    F: FnOnce(Connection) -> Fut,
    Fut: Future<Output = Result<T, SqlMiddlewareDbError>>,
{
    let conn = Connection::open(connector, options).await?;
    let outcome = work(conn.clone()).await;
    if let Err(err) = conn.close().await {
        tracing::debug!("closing adhoc connection failed: {err}");
    }
    outcome
}

/// Open a connection, aggregate one batch and close.
///
/// # Errors
/// Returns the connect error or the batch's error; the connection is closed either way.
pub async fn query(
    connector: Arc<dyn Connector>,
    options: ConnectionOptions,
    sql: &str,
    params: &[RowValues],
) -> Result<BatchResults, SqlMiddlewareDbError> {
    with_connection(connector, options, |conn| async move {
        conn.query_aggregate(sql, params).await
    })
    .await
}

/// Open a connection, call one stored procedure and close.
///
/// # Errors
/// Returns the connect error, `SqlMiddlewareDbError::ConfigError` for an unknown procedure, or
/// the call's error.
pub async fn call_proc(
    connector: Arc<dyn Connector>,
    options: ConnectionOptions,
    name: &str,
    args: CallArgs,
) -> Result<ProcedureResult, SqlMiddlewareDbError> {
    with_connection(connector, options, |conn| async move {
        conn.call_proc(name, args).await
    })
    .await
}
