use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::event::{QueryDescription, QueryEvent, ServerMessage};
use super::handle::{QueryControl, QueryState};
use crate::error::SqlMiddlewareDbError;
use crate::results::ColumnMeta;
use crate::types::{RowValues, materialize_timestamp};

/// Whether a session should keep fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The query was cancelled, aborted by an error, or its handle went away.
    Stop,
}

impl Flow {
    #[must_use]
    pub fn is_stop(self) -> bool {
        self == Flow::Stop
    }
}

/// The channel a [`Session`](crate::session::Session) reports batch progress through.
///
/// Every call may wait: row delivery blocks while the query is paused and while the consumer
/// is behind. A `Flow::Stop` return means the session must stop reading the batch.
#[derive(Debug)]
pub struct EventSink {
    query_id: u64,
    events: Option<mpsc::Sender<QueryEvent>>,
    terminal: Option<oneshot::Sender<QueryEvent>>,
    control: Arc<QueryControl>,
    severity_threshold: u8,
    use_utc: Arc<AtomicBool>,
    failure: Option<SqlMiddlewareDbError>,
    rows: u64,
}

impl EventSink {
    pub(crate) fn new(
        query_id: u64,
        events: mpsc::Sender<QueryEvent>,
        terminal: oneshot::Sender<QueryEvent>,
        control: Arc<QueryControl>,
        severity_threshold: u8,
        use_utc: Arc<AtomicBool>,
    ) -> Self {
        Self {
            query_id,
            events: Some(events),
            terminal: Some(terminal),
            control,
            severity_threshold,
            use_utc,
            failure: None,
            rows: 0,
        }
    }

    #[must_use]
    pub fn query_id(&self) -> u64 {
        self.query_id
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    /// Resolves once the query is cancelled; lets a session race a blocking wait against it.
    pub async fn cancelled(&self) {
        self.control.token().cancelled().await;
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.control.token().clone()
    }

    #[must_use]
    pub fn use_utc(&self) -> bool {
        self.use_utc.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn rows_delivered(&self) -> u64 {
        self.rows
    }

    pub async fn metadata(&mut self, columns: Vec<ColumnMeta>) -> Flow {
        self.send(QueryEvent::Metadata(Arc::new(columns))).await
    }

    /// Deliver one row. Waits while the query is paused; the row is never dropped by a pause.
    pub async fn row(&mut self, mut values: Vec<RowValues>) -> Flow {
        if !self.control.wait_while_paused().await {
            return Flow::Stop;
        }
        let use_utc = self.use_utc();
        for value in &mut values {
            if let RowValues::Timestamp(naive) = value {
                *value = RowValues::DateTime(materialize_timestamp(*naive, use_utc));
            }
        }
        let flow = self.send(QueryEvent::Row(values)).await;
        if flow == Flow::Continue {
            self.rows += 1;
        }
        flow
    }

    pub async fn row_count(&mut self, count: i64) -> Flow {
        self.send(QueryEvent::RowCount(count)).await
    }

    /// Classify a server message by severity: below the threshold it is delivered as info,
    /// otherwise the batch stops with a statement error.
    pub async fn message(&mut self, message: ServerMessage) -> Flow {
        if message.severity < self.severity_threshold {
            return self.send(QueryEvent::Info(message)).await;
        }
        tracing::debug!(
            query_id = self.query_id,
            code = message.code,
            severity = message.severity,
            "server error aborts batch"
        );
        self.fail(SqlMiddlewareDbError::Statement(message.into_statement_error()));
        Flow::Stop
    }

    pub async fn statement_done(&mut self) -> Flow {
        self.send(QueryEvent::Done { more: true }).await
    }

    /// Record a terminal failure to report when the sink is finished. The first failure wins.
    pub fn fail(&mut self, err: SqlMiddlewareDbError) {
        if self.failure.is_none() {
            self.failure = Some(err);
        }
    }

    pub(crate) async fn begin(&mut self, description: QueryDescription) -> Flow {
        self.control.transition(QueryState::Submitted);
        let flow = self.send(QueryEvent::Submitted(description)).await;
        self.control.mark_running();
        flow
    }

    /// Emit the terminal event and close the handle's event stream.
    pub(crate) fn finish(mut self, outcome: Result<(), SqlMiddlewareDbError>) {
        let failure = self.failure.take().or(outcome.err());
        let (state, terminal) = if self.control.is_cancelled() {
            (QueryState::Cancelled, QueryEvent::Cancelled)
        } else if let Some(err) = failure {
            (QueryState::Error, QueryEvent::Error(err))
        } else {
            (QueryState::Done, QueryEvent::Done { more: false })
        };
        tracing::debug!(query_id = self.query_id, rows = self.rows, ?state, "query finished");
        self.control.transition(state);
        self.events = None;
        if let Some(tx) = self.terminal.take() {
            let _ = tx.send(terminal);
        }
    }

    async fn send(&mut self, event: QueryEvent) -> Flow {
        if self.failure.is_some() || self.control.is_cancelled() {
            return Flow::Stop;
        }
        let Some(events) = self.events.as_ref() else {
            return Flow::Stop;
        };
        tracing::trace!(query_id = self.query_id, ?event, "query event");
        tokio::select! {
            sent = events.send(event) => {
                if sent.is_err() {
                    self.control.cancel();
                    return Flow::Stop;
                }
                Flow::Continue
            }
            () = self.control.token().cancelled() => Flow::Stop,
        }
    }
}

impl Drop for EventSink {
    fn drop(&mut self) {
        if let Some(tx) = self.terminal.take() {
            let err = SqlMiddlewareDbError::ExecutionError("session dropped the query".to_string());
            self.control.transition(QueryState::Error);
            let _ = tx.send(QueryEvent::Error(err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{QueryHandle, new_query};
    use chrono::NaiveDate;

    fn pair(threshold: u8) -> (QueryHandle, EventSink) {
        new_query("select 1", 16, threshold, Arc::new(AtomicBool::new(true)))
    }

    #[tokio::test]
    async fn low_severity_is_info_high_severity_is_error() {
        let (mut handle, mut sink) = pair(11);
        assert_eq!(sink.message(ServerMessage::new(50000, 9, "just saying")).await, Flow::Continue);
        assert_eq!(sink.message(ServerMessage::new(50000, 16, "boom")).await, Flow::Stop);
        assert_eq!(sink.row_count(1).await, Flow::Stop);
        sink.finish(Ok(()));

        assert!(matches!(handle.next_event().await, Some(QueryEvent::Info(m)) if m.message == "just saying"));
        match handle.next_event().await {
            Some(QueryEvent::Error(err)) => assert_eq!(err.statement_error().map(|e| e.code), Some(50000)),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(handle.next_event().await.is_none());
        assert_eq!(handle.state(), QueryState::Error);
    }

    #[tokio::test]
    async fn timestamps_are_materialized_at_row_time() {
        let (mut handle, mut sink) = pair(11);
        let naive = NaiveDate::from_ymd_opt(2020, 1, 2)
            .and_then(|d| d.and_hms_opt(3, 4, 5))
            .unwrap();
        sink.row(vec![RowValues::Timestamp(naive)]).await;
        sink.finish(Ok(()));
        match handle.next_event().await {
            Some(QueryEvent::Row(values)) => {
                assert_eq!(values[0].as_datetime().map(|d| d.naive_utc()), Some(naive));
            }
            other => panic!("expected row, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_sink_stops_and_reports_cancelled() {
        let (mut handle, mut sink) = pair(11);
        assert!(handle.cancel());
        assert_eq!(sink.row(vec![RowValues::Int(1)]).await, Flow::Stop);
        sink.finish(Ok(()));
        assert!(matches!(handle.next_event().await, Some(QueryEvent::Cancelled)));
        assert_eq!(handle.state(), QueryState::Cancelled);
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_the_sink() {
        let (handle, mut sink) = pair(11);
        drop(handle);
        assert_eq!(sink.row(vec![RowValues::Int(1)]).await, Flow::Stop);
    }
}
