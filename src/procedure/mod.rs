//! Stored procedure resolution and calls.
//!
//! A [`ProcedureManager`] looks procedures up in the catalog once and caches their parameter
//! metadata on the connection. Calls are compiled into a single batch that declares OUTPUT and
//! table-valued variables, runs `EXEC @rc = ...` and selects the return code with the OUTPUT
//! values as its last rowset:
//!
//! ```rust,no_run
//! use mssql_middleware::prelude::*;
//!
//! # async fn demo(conn: Connection) -> Result<(), SqlMiddlewareDbError> {
//! let result = conn.call_proc("dbo.test_sp", CallArgs::positional([10_i64])).await?;
//! assert_eq!(result.output[0], RowValues::Int(result.return_code));
//! # Ok(())
//! # }
//! ```

mod args;
mod call;
mod definition;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub use args::{CallArgs, ProcArg};
pub use call::{MAX_PARAMS, MAX_ROWS_PER_INSERT};
pub use definition::{ProcedureDefinition, ProcedureParam};

use crate::connection::Connection;
use crate::error::SqlMiddlewareDbError;
use crate::query::QueryHandle;
use crate::results::{BatchResults, ColumnMeta, CustomDbRow};
use crate::session::BatchRequest;
use crate::types::RowValues;

pub(crate) type ProcedureCache = Arc<Mutex<HashMap<String, Arc<ProcedureDefinition>>>>;

/// What a procedure call produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcedureResult {
    /// Rowsets selected by the procedure body.
    pub meta: Vec<Arc<Vec<ColumnMeta>>>,
    pub results: Vec<Vec<CustomDbRow>>,
    /// The return code followed by OUTPUT parameters in declaration order.
    pub output: Vec<RowValues>,
    pub return_code: i64,
    pub info: Vec<String>,
    pub counts: Vec<i64>,
}

impl ProcedureResult {
    fn from_batch(mut batch: BatchResults) -> Result<Self, SqlMiddlewareDbError> {
        let output = match batch.pop_rowset() {
            Some((_, mut rows)) if !rows.is_empty() => rows.swap_remove(0).rows,
            _ => {
                return Err(SqlMiddlewareDbError::ExecutionError(
                    "procedure call returned no output row".to_string(),
                ));
            }
        };
        let return_code = output.first().and_then(RowValues::as_int).copied().unwrap_or(0);
        Ok(Self {
            meta: batch.meta,
            results: batch.results,
            output,
            return_code,
            info: batch.info,
            counts: batch.counts,
        })
    }

    /// Rows of the first rowset the procedure selected.
    #[must_use]
    pub fn first(&self) -> &[CustomDbRow] {
        match self.results.first() {
            Some(rows) => rows,
            None => &[],
        }
    }
}

/// Resolves procedures on one connection.
#[derive(Debug, Clone)]
pub struct ProcedureManager {
    conn: Connection,
    cache: ProcedureCache,
}

impl ProcedureManager {
    pub(crate) fn new(conn: Connection, cache: ProcedureCache) -> Self {
        Self { conn, cache }
    }

    fn cached(&self, key: &str) -> Option<Arc<ProcedureDefinition>> {
        self.cache.lock().ok().and_then(|c| c.get(key).cloned())
    }

    /// Look a procedure up by (optionally schema-qualified) name. `Ok(None)` when it does not
    /// exist.
    ///
    /// # Errors
    /// Returns the error of the catalog query.
    pub async fn get(&self, name: &str) -> Result<Option<ProcedureHandle>, SqlMiddlewareDbError> {
        let key = name.to_ascii_lowercase();
        if let Some(definition) = self.cached(&key) {
            return Ok(Some(ProcedureHandle::new(self.conn.clone(), definition)));
        }
        let Some(definition) = self.describe(name).await? else {
            tracing::debug!(procedure = name, "procedure not found");
            return Ok(None);
        };
        let definition = Arc::new(definition);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, Arc::clone(&definition));
        }
        Ok(Some(ProcedureHandle::new(self.conn.clone(), definition)))
    }

    /// Read a procedure's parameter metadata without caching it.
    ///
    /// # Errors
    /// Returns the error of the catalog query.
    pub async fn describe(
        &self,
        name: &str,
    ) -> Result<Option<ProcedureDefinition>, SqlMiddlewareDbError> {
        let rows = self
            .conn
            .run_internal(definition::DESCRIBE_PROCEDURE_SQL, &[RowValues::Text(name.to_string())])
            .await?;
        ProcedureDefinition::from_catalog(&rows)
    }

    /// Resolve `name` and call it.
    ///
    /// # Errors
    /// Returns `SqlMiddlewareDbError::ConfigError` when the procedure does not exist, otherwise
    /// see [`ProcedureHandle::call`].
    pub async fn call(
        &self,
        name: &str,
        args: CallArgs,
    ) -> Result<ProcedureResult, SqlMiddlewareDbError> {
        match self.get(name).await? {
            Some(handle) => handle.call(args).await,
            None => Err(SqlMiddlewareDbError::ConfigError(format!(
                "stored procedure {name} not found"
            ))),
        }
    }

    /// Forget cached definitions, e.g. after a procedure was altered.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }
}

/// A resolved procedure bound to a connection.
#[derive(Debug, Clone)]
pub struct ProcedureHandle {
    conn: Connection,
    definition: Arc<ProcedureDefinition>,
}

impl ProcedureHandle {
    fn new(conn: Connection, definition: Arc<ProcedureDefinition>) -> Self {
        Self { conn, definition }
    }

    #[must_use]
    pub fn definition(&self) -> &ProcedureDefinition {
        &self.definition
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.definition.qualified_name()
    }

    /// The batch a call with `args` would run.
    ///
    /// # Errors
    /// Returns `SqlMiddlewareDbError::ParameterError` for arguments that do not fit the
    /// procedure's parameters.
    pub fn build_call(&self, args: CallArgs) -> Result<BatchRequest, SqlMiddlewareDbError> {
        call::build_call(&self.definition, args)
    }

    /// Start a call and stream its events. The last rowset carries the return code and OUTPUT
    /// values.
    ///
    /// # Errors
    /// See [`build_call`](Self::build_call); `SqlMiddlewareDbError::Closed` when the connection
    /// is closed.
    pub fn call_query(&self, args: CallArgs) -> Result<QueryHandle, SqlMiddlewareDbError> {
        let request = self.build_call(args)?;
        self.conn.submit(request)
    }

    /// Call the procedure and collect its rowsets, output values and return code.
    ///
    /// # Errors
    /// Returns argument errors before anything is sent, and the server's error wrapped in
    /// `SqlMiddlewareDbError::Batch` when the call fails.
    pub async fn call(&self, args: CallArgs) -> Result<ProcedureResult, SqlMiddlewareDbError> {
        let batch = self.call_query(args)?.aggregate().await?;
        let result = ProcedureResult::from_batch(batch)?;
        tracing::debug!(
            procedure = %self.definition.qualified_name(),
            return_code = result.return_code,
            "procedure call finished"
        );
        Ok(result)
    }
}
