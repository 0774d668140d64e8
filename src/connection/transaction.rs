use crate::error::SqlMiddlewareDbError;
use crate::query::QueryHandle;
use crate::results::BatchResults;
use crate::types::RowValues;

use super::Connection;

/// Session isolation levels settable before a transaction starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Snapshot,
    Serializable,
}

impl IsolationLevel {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Snapshot => "SNAPSHOT",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Lightweight transaction wrapper.
///
/// Transaction control is plain SQL on the connection's session. Dropping a `Tx` without
/// calling [`commit`](Tx::commit) or [`rollback`](Tx::rollback) leaves the session
/// mid-transaction. Always finish the transaction explicitly. Statements submitted through
/// other clones of the same connection run inside the transaction too.
pub struct Tx<'a> {
    conn: &'a Connection,
    open: bool,
}

impl<'a> Tx<'a> {
    pub(super) async fn begin(
        conn: &'a Connection,
        isolation: Option<IsolationLevel>,
    ) -> Result<Self, SqlMiddlewareDbError> {
        let sql = match isolation {
            Some(level) => format!(
                "SET TRANSACTION ISOLATION LEVEL {}; BEGIN TRANSACTION",
                level.as_sql()
            ),
            None => "BEGIN TRANSACTION".to_string(),
        };
        conn.run_internal(&sql, &[]).await?;
        Ok(Tx { conn, open: true })
    }

    /// Submit a batch inside the transaction.
    ///
    /// # Errors
    /// See [`Connection::query`].
    pub fn query(&self, sql: &str, params: &[RowValues]) -> Result<QueryHandle, SqlMiddlewareDbError> {
        self.conn.query(sql, params)
    }

    /// # Errors
    /// See [`Connection::query_aggregate`].
    pub async fn query_aggregate(
        &self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<BatchResults, SqlMiddlewareDbError> {
        self.conn.query_aggregate(sql, params).await
    }

    /// Execute a data-modification batch inside the transaction.
    ///
    /// # Errors
    /// See [`Connection::execute`].
    pub async fn execute(
        &self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<Vec<i64>, SqlMiddlewareDbError> {
        self.conn.execute(sql, params).await
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Commit the transaction.
    ///
    /// # Errors
    /// Returns `SqlMiddlewareDbError` if commit fails.
    pub async fn commit(mut self) -> Result<(), SqlMiddlewareDbError> {
        if self.open {
            self.conn.run_internal("COMMIT TRANSACTION", &[]).await?;
            self.open = false;
        }
        Ok(())
    }

    /// Roll back the transaction.
    ///
    /// # Errors
    /// Returns `SqlMiddlewareDbError` if rollback fails.
    pub async fn rollback(mut self) -> Result<(), SqlMiddlewareDbError> {
        if self.open {
            self.conn
                .run_internal("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION", &[])
                .await?;
            self.open = false;
        }
        Ok(())
    }
}
