use std::sync::Arc;

use super::column::ColumnMeta;
use super::result_set::ResultSet;
use super::row::CustomDbRow;
use crate::error::StatementError;
use crate::types::RowValues;

/// Everything a batch produced, in statement order.
///
/// `meta[i]` and `results[i]` describe the same rowset. A statement that returned no rows still
/// contributes an entry with an empty row vector; pure DML contributes only to `counts`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResults {
    pub meta: Vec<Arc<Vec<ColumnMeta>>>,
    pub results: Vec<Vec<CustomDbRow>>,
    /// Informational messages (PRINT, low-severity RAISERROR) in emission order.
    pub info: Vec<String>,
    /// Rows affected by each data-modification statement, in statement order.
    pub counts: Vec<i64>,
    pub errors: Vec<StatementError>,
}

impl BatchResults {
    /// Rows of the first rowset, or an empty slice when the batch produced none.
    #[must_use]
    pub fn first(&self) -> &[CustomDbRow] {
        match self.results.first() {
            Some(rows) => rows,
            None => &[],
        }
    }

    pub(crate) fn push_rowset(&mut self, rowset: ResultSet) {
        let meta = Arc::clone(rowset.meta());
        self.meta.push(meta);
        self.results.push(rowset.results);
    }

    /// Remove and return the last rowset, used to peel procedure output rows.
    pub(crate) fn pop_rowset(&mut self) -> Option<(Arc<Vec<ColumnMeta>>, Vec<CustomDbRow>)> {
        let rows = self.results.pop()?;
        let meta = self.meta.pop()?;
        Some((meta, rows))
    }

    /// Rebuild rowsets as [`ResultSet`]s.
    #[must_use]
    pub fn result_sets(&self) -> Vec<ResultSet> {
        self.meta
            .iter()
            .zip(self.results.iter())
            .map(|(meta, rows)| {
                let mut rs = ResultSet::new(Arc::clone(meta));
                for row in rows {
                    rs.add_row_values(row.rows.clone());
                }
                rs
            })
            .collect()
    }
}

/// Unaggregated rowsets: positional values only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResults {
    pub rowsets: Vec<RawRowset>,
    pub counts: Vec<i64>,
    pub info: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawRowset {
    pub meta: Arc<Vec<ColumnMeta>>,
    pub rows: Vec<Vec<RowValues>>,
}

impl From<BatchResults> for RawResults {
    fn from(batch: BatchResults) -> Self {
        let rowsets = batch
            .meta
            .into_iter()
            .zip(batch.results)
            .map(|(meta, rows)| RawRowset {
                meta,
                rows: rows.into_iter().map(|row| row.rows).collect(),
            })
            .collect();
        Self {
            rowsets,
            counts: batch.counts,
            info: batch.info,
        }
    }
}
