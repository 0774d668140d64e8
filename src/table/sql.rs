use std::collections::BTreeSet;
use std::fmt::Write as _;

use super::{TableColumn, TableDefinition};
use crate::error::SqlMiddlewareDbError;
use crate::procedure::{MAX_PARAMS, MAX_ROWS_PER_INSERT};
use crate::session::BatchRequest;
use crate::translation::quote_ident;
use crate::types::{Record, RowValues};

pub(super) const DESCRIBE_TABLE_SQL: &str = "SELECT c.TABLE_SCHEMA AS table_schema, \
     c.TABLE_NAME AS table_name, c.COLUMN_NAME AS column_name, c.DATA_TYPE AS data_type, \
     c.CHARACTER_MAXIMUM_LENGTH AS max_length, c.NUMERIC_PRECISION AS numeric_precision, \
     c.NUMERIC_SCALE AS numeric_scale, c.DATETIME_PRECISION AS datetime_precision, \
     CASE WHEN c.IS_NULLABLE = 'YES' THEN 1 ELSE 0 END AS is_nullable, \
     COLUMNPROPERTY(OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME)), \
         c.COLUMN_NAME, 'IsIdentity') AS is_identity, \
     COLUMNPROPERTY(OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME)), \
         c.COLUMN_NAME, 'IsComputed') AS is_computed, \
     CASE WHEN k.COLUMN_NAME IS NULL THEN 0 ELSE 1 END AS is_primary_key \
     FROM INFORMATION_SCHEMA.COLUMNS c \
     LEFT JOIN (SELECT ku.TABLE_SCHEMA, ku.TABLE_NAME, ku.COLUMN_NAME \
         FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
         JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE ku \
           ON ku.CONSTRAINT_NAME = tc.CONSTRAINT_NAME AND ku.TABLE_SCHEMA = tc.TABLE_SCHEMA \
         WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY') k \
       ON k.TABLE_SCHEMA = c.TABLE_SCHEMA AND k.TABLE_NAME = c.TABLE_NAME \
         AND k.COLUMN_NAME = c.COLUMN_NAME \
     WHERE c.TABLE_NAME = @P1 AND c.TABLE_SCHEMA = COALESCE(@P2, SCHEMA_NAME()) \
     ORDER BY c.ORDINAL_POSITION";

/// Largest number of records one statement can carry when each needs `width` parameters.
fn chunk_size(width: usize) -> usize {
    (MAX_PARAMS / width.max(1)).clamp(1, MAX_ROWS_PER_INSERT)
}

fn push_param(params: &mut Vec<RowValues>, value: RowValues) -> String {
    params.push(value);
    format!("@P{}", params.len())
}

fn key_values<'r>(
    table: &TableDefinition,
    keys: &[&TableColumn],
    record: &'r Record,
) -> Result<Vec<&'r RowValues>, SqlMiddlewareDbError> {
    keys.iter()
        .map(|column| {
            record.get(&column.name).ok_or_else(|| {
                SqlMiddlewareDbError::ParameterError(format!(
                    "record for {} is missing key column {}",
                    table.qualified_name(),
                    column.name
                ))
            })
        })
        .collect()
}

fn check_known_columns(table: &TableDefinition, record: &Record) -> Result<(), SqlMiddlewareDbError> {
    match record.keys().find(|k| table.column(k).is_none()) {
        Some(unknown) => Err(SqlMiddlewareDbError::ParameterError(format!(
            "{} has no column {unknown}",
            table.qualified_name()
        ))),
        None => Ok(()),
    }
}

fn key_predicate(
    keys: &[&TableColumn],
    values: Vec<&RowValues>,
    params: &mut Vec<RowValues>,
) -> String {
    let terms = keys
        .iter()
        .zip(values)
        .map(|(column, value)| {
            format!("{} = {}", quote_ident(&column.name), push_param(params, value.clone()))
        })
        .collect::<Vec<_>>()
        .join(" AND ");
    format!("({terms})")
}

/// Multi-row `INSERT` statements, one request per chunk.
///
/// The column list is the set of keys present across `records`; identity and computed columns
/// are skipped and keys missing from a record are bound as NULL.
pub(super) fn insert_requests(
    table: &TableDefinition,
    records: &[Record],
) -> Result<Vec<BatchRequest>, SqlMiddlewareDbError> {
    for record in records {
        check_known_columns(table, record)?;
    }
    let present: BTreeSet<&str> = records.iter().flat_map(|r| r.keys().map(String::as_str)).collect();
    let columns: Vec<&TableColumn> = table
        .columns
        .iter()
        .filter(|c| c.is_insertable() && present.contains(c.name.as_str()))
        .collect();
    if columns.is_empty() {
        return Ok(records
            .iter()
            .map(|_| {
                BatchRequest::new(
                    format!("INSERT INTO {} DEFAULT VALUES", table.qualified_name()),
                    Vec::new(),
                )
            })
            .collect());
    }
    let column_list = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");

    let mut requests = Vec::new();
    for chunk in records.chunks(chunk_size(columns.len())) {
        let mut params = Vec::with_capacity(chunk.len() * columns.len());
        let tuples = chunk
            .iter()
            .map(|record| {
                let values = columns
                    .iter()
                    .map(|c| {
                        let value = record.get(&c.name).cloned().unwrap_or(RowValues::Null);
                        push_param(&mut params, value)
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({values})")
            })
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({column_list}) VALUES {tuples}",
            table.qualified_name()
        );
        requests.push(BatchRequest::new(sql, params));
    }
    Ok(requests)
}

/// `SELECT` statements fetching `records` by primary key.
pub(super) fn select_requests(
    table: &TableDefinition,
    records: &[Record],
) -> Result<Vec<BatchRequest>, SqlMiddlewareDbError> {
    let keys = table.require_primary_key()?;
    let column_list = table
        .columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let mut requests = Vec::new();
    for chunk in records.chunks(chunk_size(keys.len())) {
        let mut params = Vec::new();
        let mut predicates = Vec::with_capacity(chunk.len());
        for record in chunk {
            let values = key_values(table, &keys, record)?;
            predicates.push(key_predicate(&keys, values, &mut params));
        }
        let sql = format!(
            "SELECT {column_list} FROM {} WHERE {}",
            table.qualified_name(),
            predicates.join(" OR ")
        );
        requests.push(BatchRequest::new(sql, params));
    }
    Ok(requests)
}

/// One `UPDATE` per record, batched into requests under the parameter limit.
///
/// Every non-key column present in a record is assigned; records with nothing to assign are
/// skipped.
pub(super) fn update_requests(
    table: &TableDefinition,
    records: &[Record],
) -> Result<Vec<BatchRequest>, SqlMiddlewareDbError> {
    let keys = table.require_primary_key()?;
    let mut requests = Vec::new();
    let mut sql = String::new();
    let mut params: Vec<RowValues> = Vec::new();
    for record in records {
        check_known_columns(table, record)?;
        let assigned: Vec<(&String, &RowValues)> = record
            .iter()
            .filter(|(name, _)| {
                table
                    .column(name)
                    .is_some_and(|c| c.is_insertable() && !c.is_primary_key)
            })
            .collect();
        if assigned.is_empty() {
            continue;
        }
        let width = assigned.len() + keys.len();
        if params.len() + width > MAX_PARAMS && !params.is_empty() {
            requests.push(BatchRequest::new(std::mem::take(&mut sql), std::mem::take(&mut params)));
        }
        let key_vals = key_values(table, &keys, record)?;
        let set = assigned
            .into_iter()
            .map(|(name, value)| {
                format!("{} = {}", quote_ident(name), push_param(&mut params, value.clone()))
            })
            .collect::<Vec<_>>()
            .join(", ");
        let predicate = key_predicate(&keys, key_vals, &mut params);
        let _ = writeln!(
            sql,
            "UPDATE {} SET {set} WHERE {predicate};",
            table.qualified_name()
        );
    }
    if !sql.is_empty() {
        requests.push(BatchRequest::new(sql, params));
    }
    Ok(requests)
}

/// `DELETE` statements removing `records` by primary key.
pub(super) fn delete_requests(
    table: &TableDefinition,
    records: &[Record],
) -> Result<Vec<BatchRequest>, SqlMiddlewareDbError> {
    let keys = table.require_primary_key()?;
    let mut requests = Vec::new();
    for chunk in records.chunks(chunk_size(keys.len())) {
        let mut params = Vec::new();
        let mut predicates = Vec::with_capacity(chunk.len());
        for record in chunk {
            let values = key_values(table, &keys, record)?;
            predicates.push(key_predicate(&keys, values, &mut params));
        }
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            table.qualified_name(),
            predicates.join(" OR ")
        );
        requests.push(BatchRequest::new(sql, params));
    }
    Ok(requests)
}
