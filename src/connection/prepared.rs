use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{ResourceKind, SqlMiddlewareDbError};
use crate::query::QueryHandle;
use crate::results::{BatchResults, ColumnMeta};
use crate::session::BatchRequest;
use crate::translation::{count_placeholders, translate_placeholders};
use crate::types::RowValues;

use super::Connection;

const DESCRIBE_SQL: &str = "SELECT name, system_type_name, max_length, is_nullable \
     FROM sys.dm_exec_describe_first_result_set(@P1, @P2, 0) \
     WHERE is_hidden = 0 ORDER BY column_ordinal";

/// A statement described once and executed many times on one connection.
///
/// The server is asked for the statement's result shape when it is prepared; execution binds
/// parameters against the stored text. After [`free`](Self::free) every use fails with a closed
/// error.
#[derive(Clone)]
pub struct PreparedStatement {
    conn: Connection,
    sql: Arc<str>,
    param_count: usize,
    meta: Arc<Vec<ColumnMeta>>,
    freed: Arc<AtomicBool>,
}

impl std::fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("sql", &self.sql)
            .field("param_count", &self.param_count)
            .field("freed", &self.is_freed())
            .finish()
    }
}

impl PreparedStatement {
    pub(super) async fn prepare(conn: Connection, sql: &str) -> Result<Self, SqlMiddlewareDbError> {
        let sql = translate_placeholders(sql, conn.options().translate_placeholders).into_owned();
        let param_count = count_placeholders(&sql);
        let declarations = if param_count == 0 {
            RowValues::Null
        } else {
            RowValues::Text(
                (1..=param_count)
                    .map(|i| format!("@P{i} nvarchar(4000)"))
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        };
        let described = conn
            .run_internal(
                DESCRIBE_SQL,
                &[RowValues::Text(sql.clone()), declarations],
            )
            .await?;
        let meta = described
            .first()
            .iter()
            .map(|row| {
                let name = row.get("name").and_then(RowValues::as_text).unwrap_or_default();
                let sql_type = row
                    .get("system_type_name")
                    .and_then(RowValues::as_text)
                    .unwrap_or("unknown");
                let size = row
                    .get("max_length")
                    .and_then(RowValues::as_int)
                    .and_then(|n| usize::try_from(*n).ok())
                    .unwrap_or(0);
                let nullable = row
                    .get("is_nullable")
                    .and_then(RowValues::as_bool)
                    .copied()
                    .unwrap_or(true);
                ColumnMeta::new(name, sql_type)
                    .with_size(size)
                    .with_nullable(nullable)
            })
            .collect();
        tracing::debug!(%sql, param_count, "statement prepared");
        Ok(Self {
            conn,
            sql: Arc::from(sql),
            param_count,
            meta: Arc::new(meta),
            freed: Arc::new(AtomicBool::new(false)),
        })
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn param_count(&self) -> usize {
        self.param_count
    }

    /// Columns of the statement's first result set, as described by the server.
    #[must_use]
    pub fn meta(&self) -> &Arc<Vec<ColumnMeta>> {
        &self.meta
    }

    #[must_use]
    pub fn is_freed(&self) -> bool {
        self.freed.load(Ordering::Acquire)
    }

    /// Execute with `params`, streaming events on the returned handle.
    ///
    /// # Errors
    /// Returns `SqlMiddlewareDbError::Closed` after [`free`](Self::free) and
    /// `SqlMiddlewareDbError::ParameterError` when the parameter count does not match.
    pub fn query(&self, params: &[RowValues]) -> Result<QueryHandle, SqlMiddlewareDbError> {
        if self.is_freed() {
            return Err(SqlMiddlewareDbError::Closed(ResourceKind::PreparedStatement));
        }
        if self.conn.is_closed() {
            return Err(SqlMiddlewareDbError::Closed(ResourceKind::Connection));
        }
        if params.len() != self.param_count {
            return Err(SqlMiddlewareDbError::ParameterError(format!(
                "prepared statement expects {} parameters, {} supplied",
                self.param_count,
                params.len()
            )));
        }
        let request = BatchRequest::new(&*self.sql, params.to_vec());
        let (handle, sink) = self.conn.new_query(&self.sql);
        self.conn.dispatch(request, sink, None);
        Ok(handle)
    }

    /// # Errors
    /// See [`query`](Self::query) and [`QueryHandle::aggregate`].
    pub async fn query_aggregate(
        &self,
        params: &[RowValues],
    ) -> Result<BatchResults, SqlMiddlewareDbError> {
        self.query(params)?.aggregate().await
    }

    /// # Errors
    /// See [`query_aggregate`](Self::query_aggregate).
    pub async fn execute(&self, params: &[RowValues]) -> Result<Vec<i64>, SqlMiddlewareDbError> {
        Ok(self.query_aggregate(params).await?.counts)
    }

    /// Release the statement. Idempotent.
    pub fn free(&self) {
        if !self.freed.swap(true, Ordering::AcqRel) {
            tracing::debug!(sql = %self.sql, "prepared statement freed");
        }
    }
}
