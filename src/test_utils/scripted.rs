//! A session backend that replays scripted events instead of talking to a server.

use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::SqlMiddlewareDbError;
use crate::query::{EventSink, ServerMessage};
use crate::results::ColumnMeta;
use crate::session::{BatchRequest, Connector, Session};
use crate::translation::split_statements;
use crate::types::RowValues;

/// A batch as a scripted session received it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedCall {
    pub session_id: i32,
    pub sql: String,
    pub params: Vec<RowValues>,
}

/// One thing a scripted session does while running a batch.
#[derive(Debug)]
pub enum ScriptStep {
    Metadata(Vec<ColumnMeta>),
    Row(Vec<RowValues>),
    RowCount(i64),
    Message(ServerMessage),
    /// End of a statement inside the batch.
    Done,
    /// Sleep, waking early if the query is cancelled.
    Delay(Duration),
    /// A transport failure: the batch ends with this error.
    Fail(SqlMiddlewareDbError),
    /// Like `Fail`, and the session reports itself unhealthy afterwards.
    Disconnect,
}

impl ScriptStep {
    /// Metadata for `columns` (typed by the first value of the first row) followed by the rows.
    #[must_use]
    pub fn rowset(columns: &[&str], rows: Vec<Vec<RowValues>>) -> Vec<ScriptStep> {
        let meta = columns
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let sql_type = match rows.first().and_then(|r| r.get(idx)) {
                    Some(RowValues::Int(_)) => "int",
                    Some(RowValues::Float(_)) => "float",
                    Some(RowValues::Bool(_)) => "bit",
                    Some(RowValues::Timestamp(_) | RowValues::DateTime(_)) => "datetime2",
                    Some(RowValues::Blob(_)) => "varbinary",
                    _ => "nvarchar",
                };
                ColumnMeta::new(*name, sql_type)
            })
            .collect();
        let mut steps = vec![ScriptStep::Metadata(meta)];
        steps.extend(rows.into_iter().map(ScriptStep::Row));
        steps
    }

    /// A server error (`RAISERROR`-style) with the given number and severity.
    #[must_use]
    pub fn error(code: i32, severity: u8, message: impl Into<String>) -> ScriptStep {
        ScriptStep::Message(ServerMessage::new(code, severity, message))
    }

    #[must_use]
    pub fn info(message: impl Into<String>) -> ScriptStep {
        ScriptStep::Message(ServerMessage::info(message))
    }
}

type Handler = dyn Fn(&ScriptedCall) -> Vec<ScriptStep> + Send + Sync;

/// Wrap a per-statement responder into a batch handler.
///
/// The batch text is split on top-level `;` and `respond` is called for each statement in turn;
/// statements are separated by [`ScriptStep::Done`].
pub fn per_statement<F>(respond: F) -> impl Fn(&ScriptedCall) -> Vec<ScriptStep> + Send + Sync
where
    F: Fn(&ScriptedCall, &str) -> Vec<ScriptStep> + Send + Sync,
{
    move |call| {
        let mut steps = Vec::new();
        for (idx, statement) in split_statements(&call.sql).into_iter().enumerate() {
            if idx > 0 {
                steps.push(ScriptStep::Done);
            }
            steps.extend(respond(call, statement));
        }
        steps
    }
}

struct Shared {
    handler: Box<Handler>,
    next_session: AtomicI32,
    opened: AtomicUsize,
    closed: AtomicUsize,
    failing_connects: AtomicUsize,
    connect_delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<ScriptedCall>>,
}

/// Opens [`ScriptedSession`]s that answer every batch through one handler.
///
/// Session ids start at 51, like user sessions on a real server. Clones share counters and the
/// call log.
#[derive(Clone)]
pub struct ScriptedConnector {
    shared: Arc<Shared>,
}

impl fmt::Debug for ScriptedConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedConnector")
            .field("opened", &self.opened())
            .field("closed", &self.closed())
            .finish_non_exhaustive()
    }
}

impl ScriptedConnector {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&ScriptedCall) -> Vec<ScriptStep> + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                handler: Box::new(handler),
                next_session: AtomicI32::new(51),
                opened: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
                failing_connects: AtomicUsize::new(0),
                connect_delay: Mutex::new(None),
                calls: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A connector whose sessions answer `@@SPID` queries with their id and accept everything
    /// else silently.
    #[must_use]
    pub fn spid_echo() -> Self {
        Self::new(|call| {
            if call.sql.to_ascii_uppercase().contains("@@SPID") {
                ScriptStep::rowset(&["id"], vec![vec![RowValues::Int(i64::from(call.session_id))]])
            } else {
                Vec::new()
            }
        })
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.shared.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.shared.connect_delay.lock() {
            *slot = delay;
        }
    }

    #[must_use]
    pub fn opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Sessions opened and not yet closed.
    #[must_use]
    pub fn live(&self) -> usize {
        self.opened().saturating_sub(self.closed())
    }

    /// Every batch received so far, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.shared.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<Box<dyn Session>, SqlMiddlewareDbError> {
        let delay = self.shared.connect_delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .shared
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(SqlMiddlewareDbError::ConnectionError(
                "scripted connect failure".to_string(),
            ));
        }
        let session_id = self.shared.next_session.fetch_add(1, Ordering::SeqCst);
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            shared: Arc::clone(&self.shared),
            session_id,
            healthy: true,
            open: true,
        }))
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// A session created by [`ScriptedConnector`].
pub struct ScriptedSession {
    shared: Arc<Shared>,
    session_id: i32,
    healthy: bool,
    open: bool,
}

#[async_trait]
impl Session for ScriptedSession {
    async fn run_batch(
        &mut self,
        request: &BatchRequest,
        sink: &mut EventSink,
    ) -> Result<(), SqlMiddlewareDbError> {
        let call = ScriptedCall {
            session_id: self.session_id,
            sql: request.sql.clone(),
            params: request.params.clone(),
        };
        let steps = (self.shared.handler)(&call);
        if let Ok(mut calls) = self.shared.calls.lock() {
            calls.push(call);
        }
        for step in steps {
            let flow = match step {
                ScriptStep::Metadata(columns) => sink.metadata(columns).await,
                ScriptStep::Row(values) => sink.row(values).await,
                ScriptStep::RowCount(count) => sink.row_count(count).await,
                ScriptStep::Message(message) => sink.message(message).await,
                ScriptStep::Done => sink.statement_done().await,
                ScriptStep::Delay(duration) => {
                    tokio::select! {
                        () = tokio::time::sleep(duration) => continue,
                        () = sink.cancelled() => return Ok(()),
                    }
                }
                ScriptStep::Fail(err) => return Err(err),
                ScriptStep::Disconnect => {
                    self.healthy = false;
                    return Err(SqlMiddlewareDbError::ConnectionError(
                        "scripted session lost".to_string(),
                    ));
                }
            };
            if flow.is_stop() {
                break;
            }
        }
        Ok(())
    }

    fn process_id(&self) -> Option<i32> {
        Some(self.session_id)
    }

    fn is_healthy(&self) -> bool {
        self.healthy && self.open
    }

    async fn close(&mut self) -> Result<(), SqlMiddlewareDbError> {
        if std::mem::replace(&mut self.open, false) {
            self.shared.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        if self.open {
            self.shared.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
