//! Query handles and the event stream that connects them to sessions.
//!
//! A submitted batch is represented on the caller side by a [`QueryHandle`] and on the session
//! side by an [`EventSink`]. Events flow in order from one to the other; cancellation and pause
//! flow back through shared [`QueryState`].

mod event;
mod handle;
mod sink;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};

use handle::QueryControl;

pub use event::{QueryDescription, QueryEvent, ServerMessage};
pub use handle::{QueryCanceller, QueryHandle, QueryState};
pub use sink::{EventSink, Flow};

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

/// Create a connected handle/sink pair for one batch.
pub(crate) fn new_query(
    sql: &str,
    buffer: usize,
    severity_threshold: u8,
    use_utc: Arc<AtomicBool>,
) -> (QueryHandle, EventSink) {
    let id = NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed);
    let (events_tx, events_rx) = mpsc::channel(buffer.max(1));
    let (terminal_tx, terminal_rx) = oneshot::channel();
    let control = QueryControl::new();
    let handle = QueryHandle::new(id, Arc::from(sql), events_rx, terminal_rx, Arc::clone(&control));
    let sink = EventSink::new(id, events_tx, terminal_tx, control, severity_threshold, use_utc);
    (handle, sink)
}
