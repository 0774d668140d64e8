use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{Record, RowValues};

/// A row from a database query result
///
/// This struct represents a single row from a database query result,
/// with access to both the column names and the values.
#[derive(Debug, Clone)]
pub struct CustomDbRow {
    /// The column names for this row (shared across all rows in a result set)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub rows: Vec<RowValues>,
    // name -> index, shared across the rows of one result set
    #[doc(hidden)]
    pub(crate) column_index_cache: Arc<HashMap<String, usize>>,
}

impl PartialEq for CustomDbRow {
    fn eq(&self, other: &Self) -> bool {
        self.column_names == other.column_names && self.rows == other.rows
    }
}

impl CustomDbRow {
    /// Create a new database row, building its own name index.
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, rows: Vec<RowValues>) -> Self {
        let cache = Arc::new(build_index(&column_names));
        Self {
            column_names,
            rows,
            column_index_cache: cache,
        }
    }

    pub(crate) fn with_index(
        column_names: Arc<Vec<String>>,
        index: Arc<HashMap<String, usize>>,
        rows: Vec<RowValues>,
    ) -> Self {
        Self {
            column_names,
            rows,
            column_index_cache: index,
        }
    }

    /// Get the index of a column by name
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        if let Some(&idx) = self.column_index_cache.get(column_name) {
            return Some(idx);
        }
        self.column_names.iter().position(|col| col == column_name)
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.get_column_index(column_name)
            .and_then(|idx| self.rows.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.rows.get(index)
    }

    /// Convert to a row-shaped object keyed by column name.
    ///
    /// Duplicate column names keep the last value; unnamed columns are keyed `ColumnN`.
    #[must_use]
    pub fn to_record(&self) -> Record {
        self.column_names
            .iter()
            .zip(self.rows.iter())
            .enumerate()
            .map(|(i, (name, value))| {
                let key = if name.is_empty() {
                    format!("Column{i}")
                } else {
                    name.clone()
                };
                (key, value.clone())
            })
            .collect()
    }
}

pub(crate) fn build_index(column_names: &[String]) -> HashMap<String, usize> {
    column_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unnamed_columns_get_positional_keys() {
        let names = Arc::new(vec![String::new(), "b".to_string()]);
        let row = CustomDbRow::new(names, vec![RowValues::Int(1), RowValues::Int(2)]);
        let record = row.to_record();
        assert_eq!(record.get("Column0"), Some(&RowValues::Int(1)));
        assert_eq!(record.get("b"), Some(&RowValues::Int(2)));
    }

    #[test]
    fn lookup_by_name_and_index() {
        let names = Arc::new(vec!["id".to_string(), "val".to_string()]);
        let row = CustomDbRow::new(names, vec![RowValues::Int(1), RowValues::Int(5)]);
        assert_eq!(row.get("val"), Some(&RowValues::Int(5)));
        assert_eq!(row.get_by_index(0), Some(&RowValues::Int(1)));
        assert!(row.get("missing").is_none());
    }
}
