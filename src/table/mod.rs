//! Row-shaped access to a single table.
//!
//! [`BulkTable`] reads a table's columns and primary key once, then turns slices of
//! [`Record`]s into parameterized `INSERT`, `SELECT`, `UPDATE` and `DELETE` batches that stay
//! under the server's parameter limit.

mod sql;

use std::collections::HashMap;

use crate::connection::Connection;
use crate::error::SqlMiddlewareDbError;
use crate::results::CustomDbRow;
use crate::session::BatchRequest;
use crate::translation::{quote_ident, split_qualified};
use crate::types::{Record, RowValues};

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    pub name: String,
    /// Base type name, e.g. `nvarchar`.
    pub data_type: String,
    /// Character or byte length; `-1` for `(max)`.
    pub max_length: Option<i64>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub nullable: bool,
    pub is_identity: bool,
    pub is_computed: bool,
    pub is_primary_key: bool,
}

impl TableColumn {
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            max_length: None,
            precision: None,
            scale: None,
            nullable: true,
            is_identity: false,
            is_computed: false,
            is_primary_key: false,
        }
    }

    #[must_use]
    pub fn with_length(mut self, length: i64) -> Self {
        self.max_length = Some(length);
        self
    }

    #[must_use]
    pub fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Part of the primary key; implies `NOT NULL`.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.nullable = false;
        self
    }

    /// `IDENTITY(1,1)`; never written by inserts or updates.
    #[must_use]
    pub fn identity(mut self) -> Self {
        self.is_identity = true;
        self.nullable = false;
        self
    }

    pub(crate) fn is_insertable(&self) -> bool {
        !self.is_identity && !self.is_computed
    }

    /// Type as written in `CREATE TABLE`.
    #[must_use]
    pub fn declared_type(&self) -> String {
        let base = self.data_type.to_ascii_lowercase();
        match base.as_str() {
            "char" | "varchar" | "nchar" | "nvarchar" | "binary" | "varbinary" => {
                match self.max_length {
                    Some(n) if n < 0 => format!("{base}(max)"),
                    Some(n) => format!("{base}({n})"),
                    None => base,
                }
            }
            "decimal" | "numeric" => match (self.precision, self.scale) {
                (Some(p), Some(s)) => format!("{base}({p}, {s})"),
                _ => base,
            },
            "datetime2" | "time" | "datetimeoffset" => match self.scale {
                Some(s) => format!("{base}({s})"),
                None => base,
            },
            _ => base,
        }
    }

    fn from_catalog(row: &CustomDbRow) -> Self {
        let int = |col: &str| row.get(col).and_then(RowValues::as_int).copied();
        let small = |col: &str| int(col).and_then(|v| u8::try_from(v).ok());
        let flag = |col: &str| int(col).is_some_and(|v| v == 1);
        let data_type = row
            .get("data_type")
            .and_then(RowValues::as_text)
            .unwrap_or_default()
            .to_string();
        let is_time = matches!(
            data_type.to_ascii_lowercase().as_str(),
            "datetime2" | "time" | "datetimeoffset"
        );
        Self {
            name: row
                .get("column_name")
                .and_then(RowValues::as_text)
                .unwrap_or_default()
                .to_string(),
            data_type,
            max_length: int("max_length"),
            precision: small("numeric_precision"),
            scale: if is_time {
                small("datetime_precision")
            } else {
                small("numeric_scale")
            },
            nullable: flag("is_nullable"),
            is_identity: flag("is_identity"),
            is_computed: flag("is_computed"),
            is_primary_key: flag("is_primary_key"),
        }
    }
}

/// A table's name and columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub schema: Option<String>,
    pub name: String,
    pub columns: Vec<TableColumn>,
}

impl TableDefinition {
    /// `name` may be schema-qualified and bracket-quoted.
    #[must_use]
    pub fn new(name: &str) -> Self {
        let mut parts = split_qualified(name);
        let table = parts.pop().unwrap_or_default();
        Self {
            schema: parts.pop(),
            name: table,
            columns: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_column(mut self, column: TableColumn) -> Self {
        self.columns.push(column);
        self
    }

    #[must_use]
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.name)),
            None => quote_ident(&self.name),
        }
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&TableColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn primary_key(&self) -> Vec<&TableColumn> {
        self.columns.iter().filter(|c| c.is_primary_key).collect()
    }

    fn require_primary_key(&self) -> Result<Vec<&TableColumn>, SqlMiddlewareDbError> {
        let keys = self.primary_key();
        if keys.is_empty() {
            return Err(SqlMiddlewareDbError::ConfigError(format!(
                "{} has no primary key",
                self.qualified_name()
            )));
        }
        Ok(keys)
    }

    /// `CREATE TABLE` statement for this definition.
    #[must_use]
    pub fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let identity = if c.is_identity { " IDENTITY(1,1)" } else { "" };
                let null = if c.nullable { "NULL" } else { "NOT NULL" };
                format!("{} {}{identity} {null}", quote_ident(&c.name), c.declared_type())
            })
            .collect();
        let keys = self.primary_key();
        if !keys.is_empty() {
            let key_list = keys
                .iter()
                .map(|c| quote_ident(&c.name))
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({key_list})",
                quote_ident(&format!("PK_{}", self.name))
            ));
        }
        format!("CREATE TABLE {} ({})", self.qualified_name(), parts.join(", "))
    }

    /// Drop the table if it exists.
    #[must_use]
    pub fn drop_sql(&self) -> String {
        let name = self.qualified_name();
        format!(
            "IF OBJECT_ID(N'{}', N'U') IS NOT NULL DROP TABLE {name}",
            name.replace('\'', "''")
        )
    }
}

/// A table bound to a connection.
#[derive(Debug, Clone)]
pub struct BulkTable {
    conn: Connection,
    definition: TableDefinition,
}

impl BulkTable {
    pub(crate) async fn bind(conn: Connection, name: &str) -> Result<Self, SqlMiddlewareDbError> {
        let mut definition = TableDefinition::new(name);
        let schema = definition
            .schema
            .clone()
            .map_or(RowValues::Null, RowValues::Text);
        let rows = conn
            .run_internal(
                sql::DESCRIBE_TABLE_SQL,
                &[RowValues::Text(definition.name.clone()), schema],
            )
            .await?;
        let rows = rows.first();
        let Some(head) = rows.first() else {
            return Err(SqlMiddlewareDbError::ConfigError(format!("table {name} not found")));
        };
        definition.schema = head
            .get("table_schema")
            .and_then(RowValues::as_text)
            .map(str::to_string)
            .or(definition.schema);
        definition.columns = rows.iter().map(TableColumn::from_catalog).collect();
        tracing::debug!(
            table = %definition.qualified_name(),
            columns = definition.columns.len(),
            "table bound"
        );
        Ok(Self { conn, definition })
    }

    #[must_use]
    pub fn definition(&self) -> &TableDefinition {
        &self.definition
    }

    async fn run_all(&self, requests: Vec<BatchRequest>) -> Result<u64, SqlMiddlewareDbError> {
        let mut affected = 0u64;
        for request in requests {
            let counts = self.conn.submit(request)?.aggregate().await?.counts;
            affected += counts
                .into_iter()
                .map(|n| u64::try_from(n).unwrap_or(0))
                .sum::<u64>();
        }
        Ok(affected)
    }

    /// Insert `records`, returning the number of rows written.
    ///
    /// # Errors
    /// `SqlMiddlewareDbError::ParameterError` for keys that are not columns of the table; the
    /// server's error otherwise. Chunks already written stay written.
    pub async fn insert(&self, records: &[Record]) -> Result<u64, SqlMiddlewareDbError> {
        if records.is_empty() {
            return Ok(0);
        }
        self.run_all(sql::insert_requests(&self.definition, records)?)
            .await
    }

    /// Fetch the rows whose primary keys appear in `records`, in the order of `records`.
    ///
    /// # Errors
    /// `SqlMiddlewareDbError::ConfigError` when the table has no primary key and
    /// `SqlMiddlewareDbError::ParameterError` when a record lacks a key column.
    pub async fn select(&self, records: &[Record]) -> Result<Vec<Record>, SqlMiddlewareDbError> {
        let keys: Vec<String> = self
            .definition
            .require_primary_key()?
            .into_iter()
            .map(|c| c.name.clone())
            .collect();
        // Rows come back with timestamps materialized, so caller keys are compared the same way.
        let use_utc = self.conn.use_utc();
        let key_of = |record: &Record| -> String {
            keys.iter()
                .map(|k| {
                    record
                        .get(k)
                        .map_or(RowValues::Null, |v| v.materialized(use_utc))
                        .to_json()
                        .to_string()
                })
                .collect::<Vec<_>>()
                .join("\u{1f}")
        };

        let mut found: HashMap<String, Vec<Record>> = HashMap::new();
        for request in sql::select_requests(&self.definition, records)? {
            let batch = self.conn.submit(request)?.aggregate().await?;
            for row in batch.first() {
                let record = row.to_record();
                found.entry(key_of(&record)).or_default().push(record);
            }
        }
        let mut ordered = Vec::with_capacity(records.len());
        for record in records {
            if let Some(rows) = found.remove(&key_of(record)) {
                ordered.extend(rows);
            }
        }
        Ok(ordered)
    }

    /// Update non-key columns present in each record, matched by primary key.
    ///
    /// # Errors
    /// See [`select`](Self::select).
    pub async fn update(&self, records: &[Record]) -> Result<u64, SqlMiddlewareDbError> {
        self.run_all(sql::update_requests(&self.definition, records)?)
            .await
    }

    /// Delete rows matched by primary key.
    ///
    /// # Errors
    /// See [`select`](Self::select).
    pub async fn delete(&self, records: &[Record]) -> Result<u64, SqlMiddlewareDbError> {
        if records.is_empty() {
            return Ok(0);
        }
        self.run_all(sql::delete_requests(&self.definition, records)?)
            .await
    }
}
