//! Convenient imports for common functionality.

pub use crate::config::{ConnectionOptions, PoolOptions};
pub use crate::connection::{Connection, IsolationLevel, PreparedStatement, Tx};
pub use crate::error::{ResourceKind, SqlMiddlewareDbError, StatementError};
pub use crate::pool::{Pool, PoolEvent, PoolStatusRecord};
pub use crate::procedure::{CallArgs, ProcArg, ProcedureHandle, ProcedureManager, ProcedureResult};
pub use crate::query::{QueryCanceller, QueryEvent, QueryHandle, QueryState, ServerMessage};
pub use crate::results::{BatchResults, ColumnMeta, CustomDbRow, RawResults, ResultSet};
pub use crate::session::{BatchRequest, Connector, Session};
pub use crate::table::{BulkTable, TableColumn, TableDefinition};
pub use crate::translation::{QueryOptions, TranslationMode, translate_placeholders};
pub use crate::types::{Record, RowValues};

#[cfg(feature = "mssql")]
pub use crate::mssql::TiberiusConnector;
