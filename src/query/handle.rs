use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::event::QueryEvent;
use crate::error::SqlMiddlewareDbError;
use crate::results::{AggregateStep, BatchResults, ResultAggregator};

/// Lifecycle of a query.
///
/// `Created → Submitted → {Running ⇄ Paused} → {Done | Cancelled | Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryState {
    Created,
    Submitted,
    Running,
    Paused,
    Done,
    Cancelled,
    Error,
}

impl QueryState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, QueryState::Done | QueryState::Cancelled | QueryState::Error)
    }
}

/// State shared between a [`QueryHandle`] and the worker driving its batch.
#[derive(Debug)]
pub(crate) struct QueryControl {
    state: Mutex<QueryState>,
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
}

impl QueryControl {
    pub(crate) fn new() -> Arc<Self> {
        let (paused, _) = watch::channel(false);
        Arc::new(Self {
            state: Mutex::new(QueryState::Created),
            cancel: CancellationToken::new(),
            paused,
        })
    }

    pub(crate) fn state(&self) -> QueryState {
        *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Move to `to` unless already terminal. Returns whether the move happened.
    pub(crate) fn transition(&self, to: QueryState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.is_terminal() {
            return false;
        }
        *state = to;
        true
    }

    /// Enter `Running`, or `Paused` when a pause was requested before execution began.
    pub(crate) fn mark_running(&self) {
        let next = if *self.paused.borrow() {
            QueryState::Paused
        } else {
            QueryState::Running
        };
        self.transition(next);
    }

    pub(crate) fn cancel(&self) -> bool {
        if !self.transition(QueryState::Cancelled) {
            return false;
        }
        self.cancel.cancel();
        true
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn pause(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.is_terminal() {
            return false;
        }
        if *state == QueryState::Running {
            *state = QueryState::Paused;
        }
        self.paused.send_replace(true);
        true
    }

    fn resume(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.is_terminal() {
            return false;
        }
        if *state == QueryState::Paused {
            *state = QueryState::Running;
        }
        self.paused.send_replace(false);
        true
    }

    /// Wait until row delivery is allowed. Returns `false` if the query was cancelled meanwhile.
    pub(crate) async fn wait_while_paused(&self) -> bool {
        let mut rx = self.paused.subscribe();
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if !*rx.borrow_and_update() {
                return true;
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
                () = self.cancel.cancelled() => return false,
            }
        }
    }
}

/// Cloneable remote control for a query, for use from another task.
#[derive(Debug, Clone)]
pub struct QueryCanceller {
    control: Arc<QueryControl>,
}

impl QueryCanceller {
    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    pub fn pause(&self) -> bool {
        self.control.pause()
    }

    pub fn resume(&self) -> bool {
        self.control.resume()
    }

    #[must_use]
    pub fn state(&self) -> QueryState {
        self.control.state()
    }
}

/// An in-flight statement or batch.
///
/// Events arrive in order on the handle; it is also a [`Stream`] of [`QueryEvent`]s. Dropping
/// a handle before its terminal event cancels the query.
#[derive(Debug)]
pub struct QueryHandle {
    id: u64,
    sql: Arc<str>,
    events: mpsc::Receiver<QueryEvent>,
    terminal: Option<oneshot::Receiver<QueryEvent>>,
    control: Arc<QueryControl>,
}

impl QueryHandle {
    pub(crate) fn new(
        id: u64,
        sql: Arc<str>,
        events: mpsc::Receiver<QueryEvent>,
        terminal: oneshot::Receiver<QueryEvent>,
        control: Arc<QueryControl>,
    ) -> Self {
        Self {
            id,
            sql,
            events,
            terminal: Some(terminal),
            control,
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn state(&self) -> QueryState {
        self.control.state()
    }

    /// Request cancellation. Valid until the query reaches a terminal state.
    ///
    /// Rows already queued on the handle may still be read; the terminal event is
    /// [`QueryEvent::Cancelled`].
    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    /// Stop row delivery without ending the statement.
    pub fn pause(&self) -> bool {
        self.control.pause()
    }

    pub fn resume(&self) -> bool {
        self.control.resume()
    }

    #[must_use]
    pub fn canceller(&self) -> QueryCanceller {
        QueryCanceller {
            control: Arc::clone(&self.control),
        }
    }

    /// Next event, or `None` once the terminal event has been returned.
    pub async fn next_event(&mut self) -> Option<QueryEvent> {
        if let Some(event) = self.events.recv().await {
            return Some(event);
        }
        let terminal = self.terminal.take()?;
        terminal.await.ok()
    }

    /// Consume the handle and fold its events into a [`BatchResults`].
    ///
    /// # Errors
    /// Returns [`SqlMiddlewareDbError::Batch`] carrying the partial results when the batch
    /// fails or is cancelled.
    pub async fn aggregate(mut self) -> Result<BatchResults, SqlMiddlewareDbError> {
        let mut aggregator = ResultAggregator::new();
        while let Some(event) = self.next_event().await {
            if let AggregateStep::Complete(outcome) = aggregator.push(event) {
                return outcome;
            }
        }
        aggregator.finish()
    }

    /// Drain the handle, discarding rows.
    ///
    /// # Errors
    /// Returns the terminal error, or [`SqlMiddlewareDbError::Cancelled`].
    pub async fn finish(mut self) -> Result<(), SqlMiddlewareDbError> {
        while let Some(event) = self.next_event().await {
            match event {
                QueryEvent::Done { more: false } => return Ok(()),
                QueryEvent::Error(err) => return Err(err),
                QueryEvent::Cancelled => return Err(SqlMiddlewareDbError::Cancelled),
                _ => {}
            }
        }
        Err(SqlMiddlewareDbError::ExecutionError(
            "query event stream ended before completion".to_string(),
        ))
    }
}

impl Stream for QueryHandle {
    type Item = QueryEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.events.poll_recv(cx) {
            Poll::Ready(Some(event)) => return Poll::Ready(Some(event)),
            Poll::Ready(None) => {}
            Poll::Pending => return Poll::Pending,
        }
        let Some(terminal) = this.terminal.as_mut() else {
            return Poll::Ready(None);
        };
        match Pin::new(terminal).poll(cx) {
            Poll::Ready(outcome) => {
                this.terminal = None;
                Poll::Ready(outcome.ok())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for QueryHandle {
    fn drop(&mut self) {
        if !self.control.state().is_terminal() {
            tracing::debug!(query_id = self.id, "query handle dropped before completion; cancelling");
            self.control.cancel();
        }
    }
}
