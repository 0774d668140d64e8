use crate::error::SqlMiddlewareDbError;
use crate::query::QueryEvent;

use super::batch::BatchResults;
use super::result_set::ResultSet;

/// Outcome of feeding one event to a [`ResultAggregator`].
#[derive(Debug)]
pub enum AggregateStep {
    Continue,
    Complete(Result<BatchResults, SqlMiddlewareDbError>),
}

/// Folds a batch's event stream into a [`BatchResults`].
///
/// A rowset is committed when its statement ends (a `Done` boundary, the next `Metadata`, or
/// completion). On a terminal error the uncommitted rowset is dropped and the error is
/// returned wrapped with everything committed so far.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    results: BatchResults,
    current: Option<ResultSet>,
}

impl ResultAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: QueryEvent) -> AggregateStep {
        match event {
            QueryEvent::Submitted(_) => {}
            QueryEvent::Metadata(meta) => {
                self.commit();
                self.current = Some(ResultSet::new(meta));
            }
            QueryEvent::Row(values) => match self.current.as_mut() {
                Some(rowset) => rowset.add_row_values(values),
                None => tracing::warn!("row received before any column metadata; dropped"),
            },
            QueryEvent::RowCount(count) => self.results.counts.push(count),
            QueryEvent::Info(message) => self.results.info.push(message.message),
            QueryEvent::Done { more: true } => self.commit(),
            QueryEvent::Done { more: false } => {
                self.commit();
                return AggregateStep::Complete(Ok(std::mem::take(&mut self.results)));
            }
            QueryEvent::Error(err) => return AggregateStep::Complete(Err(self.fail(err))),
            QueryEvent::Cancelled => {
                return AggregateStep::Complete(Err(self.fail(SqlMiddlewareDbError::Cancelled)));
            }
        }
        AggregateStep::Continue
    }

    /// Close out an event stream that ended without a terminal event.
    pub fn finish(mut self) -> Result<BatchResults, SqlMiddlewareDbError> {
        Err(self.fail(SqlMiddlewareDbError::ExecutionError(
            "query event stream ended before completion".to_string(),
        )))
    }

    fn commit(&mut self) {
        if let Some(rowset) = self.current.take() {
            self.results.push_rowset(rowset);
        }
    }

    fn fail(&mut self, err: SqlMiddlewareDbError) -> SqlMiddlewareDbError {
        self.current = None;
        if let Some(statement) = err.statement_error() {
            self.results.errors.push(statement.clone());
        }
        SqlMiddlewareDbError::with_partial(err, std::mem::take(&mut self.results))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::StatementError;
    use crate::query::ServerMessage;
    use crate::results::ColumnMeta;
    use crate::types::RowValues;

    fn meta() -> Arc<Vec<ColumnMeta>> {
        Arc::new(vec![
            ColumnMeta::new("id", "int"),
            ColumnMeta::new("val", "int"),
        ])
    }

    fn feed(events: Vec<QueryEvent>) -> Result<BatchResults, SqlMiddlewareDbError> {
        let mut agg = ResultAggregator::new();
        for event in events {
            if let AggregateStep::Complete(outcome) = agg.push(event) {
                return outcome;
            }
        }
        agg.finish()
    }

    #[test]
    fn zero_row_select_keeps_its_metadata() {
        let res = feed(vec![
            QueryEvent::Metadata(meta()),
            QueryEvent::Row(vec![RowValues::Int(1), RowValues::Int(5)]),
            QueryEvent::Done { more: true },
            QueryEvent::Metadata(meta()),
            QueryEvent::Done { more: true },
            QueryEvent::Done { more: false },
        ])
        .unwrap();
        assert_eq!(res.meta.len(), 2);
        assert_eq!(res.results[0].len(), 1);
        assert!(res.results[1].is_empty());
        assert_eq!(res.first().len(), 1);
    }

    #[test]
    fn info_and_counts_keep_emission_order() {
        let msg = |text: &str| QueryEvent::Info(ServerMessage::info(text));
        let res = feed(vec![
            msg("create"),
            QueryEvent::RowCount(1),
            msg("insert"),
            QueryEvent::RowCount(3),
            msg("drop"),
            QueryEvent::Done { more: false },
        ])
        .unwrap();
        assert_eq!(res.info, vec!["create", "insert", "drop"]);
        assert_eq!(res.counts, vec![1, 3]);
        assert!(res.meta.is_empty());
    }

    #[test]
    fn error_discards_open_rowset_and_keeps_counts() {
        let err = feed(vec![
            QueryEvent::RowCount(1),
            QueryEvent::RowCount(1),
            QueryEvent::Metadata(meta()),
            QueryEvent::Error(SqlMiddlewareDbError::Statement(StatementError::new(
                207,
                16,
                "Invalid column name 'x'.",
            ))),
        ])
        .unwrap_err();
        let partial = err.partial_results().unwrap();
        assert!(partial.meta.is_empty());
        assert!(partial.results.is_empty());
        assert_eq!(partial.counts, vec![1, 1]);
        assert_eq!(partial.errors.len(), 1);
    }

    #[test]
    fn cancelled_batch_surfaces_cancelled() {
        let err = feed(vec![QueryEvent::Metadata(meta()), QueryEvent::Cancelled]).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn stream_without_terminal_event_is_an_error() {
        let err = feed(vec![QueryEvent::RowCount(2)]).unwrap_err();
        assert_eq!(err.partial_results().map(|r| r.counts.clone()), Some(vec![2]));
    }
}
