#![forbid(unsafe_code)]

//! Async SQL Server client layer.
//!
//! Connections run their statements on a background worker, one batch at a time. Every batch
//! yields a [`QueryHandle`](query::QueryHandle): a stream of events (`metadata`, `row`,
//! `row count`, `info`, `done`) that can be paused, resumed or cancelled, or aggregated into
//! [`BatchResults`](results::BatchResults). On top of that sit a bounded [`Pool`](pool::Pool),
//! stored procedure calls with OUTPUT and table-valued parameters, prepared statements and a
//! row-shaped bulk table helper.
//!
//! ```rust,no_run
//! use mssql_middleware::prelude::*;
//!
//! # async fn demo() -> Result<(), SqlMiddlewareDbError> {
//! let options = PoolOptions::new(ConnectionOptions::new(
//!     "Server=tcp:localhost,1433;Database=scratch;User Id=sa;Password=...",
//! ))
//! .with_ceiling(4);
//! let pool = Pool::connect(options).await?;
//!
//! let results = pool
//!     .query_aggregate("select @@SPID as id, ? as answer", &[RowValues::Int(42)])
//!     .await?;
//! assert_eq!(results.first()[0].get("answer"), Some(&RowValues::Int(42)));
//!
//! pool.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! The `mssql` feature (on by default) provides the tiberius backend. The `test-utils` feature
//! adds a scripted backend that replays canned events, used by this crate's own tests.

pub mod adhoc;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
#[cfg(feature = "mssql")]
pub mod mssql;
pub mod pool;
pub mod prelude;
pub mod procedure;
pub mod query;
pub mod results;
pub mod session;
pub mod table;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod translation;
pub mod types;

pub use config::{ConnectionOptions, PoolOptions};
pub use connection::{Connection, IsolationLevel, PreparedStatement, Tx};
pub use error::{ResourceKind, SqlMiddlewareDbError, StatementError};
pub use pool::{Pool, PoolEvent, PoolStatusRecord};
pub use procedure::{CallArgs, ProcArg, ProcedureResult};
pub use query::{QueryEvent, QueryHandle, QueryState};
pub use results::{BatchResults, ColumnMeta, CustomDbRow};
pub use types::{Record, RowValues};
