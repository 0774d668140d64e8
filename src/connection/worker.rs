use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::error::{ResourceKind, SqlMiddlewareDbError};
use crate::query::{EventSink, Flow, QueryDescription};
use crate::session::{BatchRequest, Session};
use crate::types::RowValues;

pub(super) enum Command {
    Run {
        request: BatchRequest,
        description: QueryDescription,
        sink: EventSink,
        /// Fired once the batch is finished and the session is free again.
        done: Option<oneshot::Sender<()>>,
    },
    Close {
        respond_to: oneshot::Sender<Result<(), SqlMiddlewareDbError>>,
    },
}

/// Owns a session on a dedicated task and runs batches strictly in submission order.
pub(super) struct Worker {
    sender: mpsc::UnboundedSender<Command>,
    healthy: Arc<AtomicBool>,
}

impl Worker {
    pub(super) fn spawn(
        session: Box<dyn Session>,
        query_timeout: Option<Duration>,
        label: String,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let healthy = Arc::new(AtomicBool::new(true));
        tokio::spawn(run_worker(
            session,
            receiver,
            query_timeout,
            Arc::clone(&healthy),
            label,
        ));
        Self { sender, healthy }
    }

    pub(super) fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed) && !self.sender.is_closed()
    }

    /// Queue a batch. When the worker is gone the sink is finished with a closed error.
    pub(super) fn run(
        &self,
        request: BatchRequest,
        description: QueryDescription,
        sink: EventSink,
        done: Option<oneshot::Sender<()>>,
    ) {
        let command = Command::Run {
            request,
            description,
            sink,
            done,
        };
        if let Err(mpsc::error::SendError(command)) = self.sender.send(command) {
            reject(command);
        }
    }

    pub(super) async fn close(&self) -> Result<(), SqlMiddlewareDbError> {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Command::Close { respond_to: tx }).is_err() {
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }
}

fn reject(command: Command) {
    match command {
        Command::Run { sink, .. } => {
            sink.finish(Err(SqlMiddlewareDbError::Closed(ResourceKind::Connection)));
        }
        Command::Close { respond_to } => {
            let _ = respond_to.send(Ok(()));
        }
    }
}

async fn run_worker(
    mut session: Box<dyn Session>,
    mut receiver: mpsc::UnboundedReceiver<Command>,
    query_timeout: Option<Duration>,
    healthy: Arc<AtomicBool>,
    label: String,
) {
    tracing::debug!(session = %label, "connection worker started");
    let mut closed = false;
    while let Some(command) = receiver.recv().await {
        match command {
            Command::Run {
                request,
                description,
                mut sink,
                done,
            } => {
                let request = to_wall_clock(request, sink.use_utc());
                run_one(&mut *session, &request, description, &mut sink, query_timeout, &label).await;
                if !session.is_healthy() {
                    tracing::warn!(session = %label, "session reported unhealthy");
                    healthy.store(false, Ordering::Relaxed);
                }
                sink.finish(Ok(()));
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
            Command::Close { respond_to } => {
                let outcome = session.close().await;
                if let Err(err) = &outcome {
                    tracing::warn!(session = %label, error = %err, "session close failed");
                }
                let _ = respond_to.send(outcome);
                closed = true;
                break;
            }
        }
    }
    if !closed {
        if let Err(err) = session.close().await {
            tracing::warn!(session = %label, error = %err, "session close failed");
        }
    }
    healthy.store(false, Ordering::Relaxed);
    receiver.close();
    while let Ok(command) = receiver.try_recv() {
        reject(command);
    }
    tracing::debug!(session = %label, "connection worker stopped");
}

/// Sessions only see naive timestamps; `DateTime` parameters are shifted into the zone rows
/// are materialized from, so a value written and read back compares equal.
fn to_wall_clock(mut request: BatchRequest, use_utc: bool) -> BatchRequest {
    for param in &mut request.params {
        if matches!(param, RowValues::DateTime(_)) {
            *param = param.to_wall_clock(use_utc);
        }
    }
    request
}

async fn run_one(
    session: &mut dyn Session,
    request: &BatchRequest,
    description: QueryDescription,
    sink: &mut EventSink,
    query_timeout: Option<Duration>,
    label: &str,
) {
    if sink.is_cancelled() {
        tracing::debug!(session = %label, query_id = description.id, "cancelled before start");
        return;
    }
    tracing::debug!(
        session = %label,
        query_id = description.id,
        params = description.param_count,
        "running batch"
    );
    if sink.begin(description).await == Flow::Stop {
        return;
    }
    let token = sink.cancellation();
    let run = async {
        match query_timeout {
            Some(limit) => tokio::time::timeout(limit, session.run_batch(request, sink))
                .await
                .unwrap_or(Err(SqlMiddlewareDbError::Timeout(limit))),
            None => session.run_batch(request, sink).await,
        }
    };
    let outcome = tokio::select! {
        outcome = run => outcome,
        () = token.cancelled() => Ok(()),
    };
    if let Err(err) = outcome {
        tracing::debug!(session = %label, error = %err, "batch failed");
        sink.fail(err);
    }
}
