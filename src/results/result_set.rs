use std::collections::HashMap;
use std::sync::Arc;

use super::column::ColumnMeta;
use super::row::{CustomDbRow, build_index};
use crate::types::{Record, RowValues};

/// One rowset from a batch: column metadata plus the rows that followed it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// The rows returned by the statement
    pub results: Vec<CustomDbRow>,
    /// Number of rows in this rowset
    pub rows_affected: usize,
    meta: Arc<Vec<ColumnMeta>>,
    column_names: Arc<Vec<String>>,
    column_index: Arc<HashMap<String, usize>>,
}

impl ResultSet {
    /// Start an empty rowset for the given metadata.
    #[must_use]
    pub fn new(meta: Arc<Vec<ColumnMeta>>) -> Self {
        let column_names: Arc<Vec<String>> =
            Arc::new(meta.iter().map(|col| col.name.clone()).collect());
        let column_index = Arc::new(build_index(&column_names));
        Self {
            results: Vec::new(),
            rows_affected: 0,
            meta,
            column_names,
            column_index,
        }
    }

    /// Column metadata for this rowset
    #[must_use]
    pub fn meta(&self) -> &Arc<Vec<ColumnMeta>> {
        &self.meta
    }

    /// Get the column names for this result set
    #[must_use]
    pub fn get_column_names(&self) -> &Arc<Vec<String>> {
        &self.column_names
    }

    /// Add a row to the result set
    pub fn add_row_values(&mut self, row_values: Vec<RowValues>) {
        self.results.push(CustomDbRow::with_index(
            Arc::clone(&self.column_names),
            Arc::clone(&self.column_index),
            row_values,
        ));
        self.rows_affected += 1;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Rows as keyed records, in row order.
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.results.iter().map(CustomDbRow::to_record).collect()
    }
}
