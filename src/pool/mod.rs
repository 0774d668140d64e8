//! A bounded set of connections with FIFO admission.
//!
//! Requests are accepted immediately and wait for a free session in arrival order. At most
//! `ceiling` sessions are ever open; at most `max_pending` requests may wait.

mod events;
mod manager;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use deadpool::managed::{Object, PoolError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use events::{PoolEvent, PoolStatusRecord};
pub use manager::SessionManager;

use crate::config::PoolOptions;
use crate::connection::build_request;
use crate::error::{ResourceKind, SqlMiddlewareDbError};
use crate::query::{EventSink, QueryHandle, new_query};
use crate::results::{BatchResults, RawResults};
use crate::session::{BatchRequest, Connector};
use crate::translation::QueryOptions;
use crate::types::RowValues;

/// A connection checked out of the pool; returned when dropped.
pub type PooledConnection = Object<SessionManager>;

type DeadpoolPool = deadpool::managed::Pool<SessionManager>;

/// Connection pool.
///
/// ```rust,no_run
/// use mssql_middleware::prelude::*;
///
/// # async fn demo() -> Result<(), SqlMiddlewareDbError> {
/// let options = PoolOptions::new(ConnectionOptions::new(
///     "Server=tcp:localhost,1433;Database=master;User Id=sa;Password=Passw0rd!;TrustServerCertificate=true",
/// ))
/// .with_ceiling(4);
/// let pool = Pool::connect(options).await?;
/// let res = pool.query_aggregate("select @@SPID as spid", &[]).await?;
/// # let _ = res;
/// pool.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    options: PoolOptions,
    pool: DeadpoolPool,
    events: broadcast::Sender<PoolEvent>,
    use_utc: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    queue: OnceLock<mpsc::UnboundedSender<Queued>>,
    opened: AtomicBool,
    closed: AtomicBool,
    shutdown: CancellationToken,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Pool {
    /// Build a pool over `connector`. No session is opened until [`open`](Self::open) or the
    /// first request.
    ///
    /// # Errors
    /// Returns `SqlMiddlewareDbError::ConfigError` for invalid options.
    pub fn new(
        connector: Arc<dyn Connector>,
        options: PoolOptions,
    ) -> Result<Self, SqlMiddlewareDbError> {
        options.validate()?;
        let (events, _) = broadcast::channel(64);
        let use_utc = Arc::new(AtomicBool::new(options.connection.use_utc));
        let manager = SessionManager::new(
            connector,
            options.connection.clone(),
            Arc::clone(&use_utc),
            events.clone(),
        );
        let pool = DeadpoolPool::builder(manager)
            .max_size(options.ceiling)
            .build()
            .map_err(|e| SqlMiddlewareDbError::ConfigError(format!("failed to build pool: {e}")))?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                options,
                pool,
                events,
                use_utc,
                pending: Arc::new(AtomicUsize::new(0)),
                queue: OnceLock::new(),
                opened: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                reaper: Mutex::new(None),
            }),
        })
    }

    /// Build and open a SQL Server pool from `options.connection.connection_string`.
    ///
    /// # Errors
    /// Returns configuration or connection errors from building and warming the pool.
    #[cfg(feature = "mssql")]
    pub async fn connect(options: PoolOptions) -> Result<Self, SqlMiddlewareDbError> {
        let connector =
            crate::mssql::TiberiusConnector::new(&options.connection.connection_string)?;
        let pool = Self::new(Arc::new(connector), options)?;
        pool.open().await?;
        Ok(pool)
    }

    /// Open `floor` sessions, start the idle reaper and publish [`PoolEvent::Open`].
    ///
    /// # Errors
    /// Returns `SqlMiddlewareDbError::Closed` for a closed pool and the connection error when a
    /// floor session cannot be opened.
    pub async fn open(&self) -> Result<(), SqlMiddlewareDbError> {
        self.ensure_open()?;
        if self.inner.opened.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut warm = Vec::with_capacity(self.inner.options.floor);
        for _ in 0..self.inner.options.floor {
            match self.inner.acquire().await {
                Ok(conn) => warm.push(conn),
                Err(err) => {
                    self.inner.emit(PoolEvent::Error(err.to_string()));
                    return Err(err);
                }
            }
        }
        drop(warm);

        let reaper = tokio::spawn(run_reaper(
            Arc::downgrade(&self.inner),
            self.inner.shutdown.clone(),
        ));
        if let Ok(mut slot) = self.inner.reaper.lock() {
            *slot = Some(reaper);
        }
        tracing::info!(
            ceiling = self.inner.options.ceiling,
            floor = self.inner.options.floor,
            "pool open"
        );
        self.inner.emit(PoolEvent::Open {
            ceiling: self.inner.options.ceiling,
        });
        self.inner.publish_status();
        Ok(())
    }

    /// Telemetry stream. Events are advisory; a slow subscriber may miss some.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> PoolStatusRecord {
        self.inner.status()
    }

    #[must_use]
    pub fn options(&self) -> &PoolOptions {
        &self.inner.options
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Applies to every session of the pool, including rows of running queries.
    pub fn set_use_utc(&self, use_utc: bool) {
        self.inner.use_utc.store(use_utc, Ordering::Relaxed);
    }

    /// Submit a batch. Returns at once; the request runs when a session frees up.
    ///
    /// Cancelling the handle while the request is still waiting withdraws it.
    ///
    /// # Errors
    /// Returns `SqlMiddlewareDbError::Closed` for a closed pool,
    /// `SqlMiddlewareDbError::QueueFull` when `max_pending` requests are already waiting and
    /// `SqlMiddlewareDbError::ParameterError` for a parameter count mismatch.
    pub fn query(&self, sql: &str, params: &[RowValues]) -> Result<QueryHandle, SqlMiddlewareDbError> {
        self.query_with(sql, params, QueryOptions::default())
    }

    /// [`query`](Self::query) with per-call options.
    ///
    /// # Errors
    /// See [`query`](Self::query).
    pub fn query_with(
        &self,
        sql: &str,
        params: &[RowValues],
        options: QueryOptions,
    ) -> Result<QueryHandle, SqlMiddlewareDbError> {
        self.ensure_open()?;
        let conn_opts = &self.inner.options.connection;
        let request = build_request(
            sql,
            params,
            options.translation.resolve(conn_opts.translate_placeholders),
        )?;
        let slot = self.inner.admit()?;
        let (handle, sink) = new_query(
            &request.sql,
            conn_opts.event_buffer,
            conn_opts.error_severity_threshold,
            Arc::clone(&self.inner.use_utc),
        );
        self.enqueue(Queued {
            request,
            sink,
            _slot: slot,
        });
        Ok(handle)
    }

    /// # Errors
    /// See [`query`](Self::query) and [`QueryHandle::aggregate`].
    pub async fn query_aggregate(
        &self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<BatchResults, SqlMiddlewareDbError> {
        self.query(sql, params)?.aggregate().await
    }

    /// # Errors
    /// See [`query_aggregate`](Self::query_aggregate).
    pub async fn query_raw(
        &self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<RawResults, SqlMiddlewareDbError> {
        self.query_aggregate(sql, params).await.map(RawResults::from)
    }

    /// # Errors
    /// See [`query_aggregate`](Self::query_aggregate).
    pub async fn execute(
        &self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<Vec<i64>, SqlMiddlewareDbError> {
        Ok(self.query_aggregate(sql, params).await?.counts)
    }

    /// Check a session out for exclusive use (transactions, prepared statements, bulk tables).
    ///
    /// # Errors
    /// Returns `SqlMiddlewareDbError::Closed` for a closed pool and
    /// `SqlMiddlewareDbError::Timeout` when `acquire_timeout` elapses.
    pub async fn acquire(&self) -> Result<PooledConnection, SqlMiddlewareDbError> {
        self.ensure_open()?;
        let _slot = self.inner.admit()?;
        self.inner.acquire().await
    }

    /// Close the pool. Idle sessions close now, busy ones when their request finishes; waiting
    /// and later requests fail with a closed error. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.cancel();
        self.inner.pool.close();
        let reaper = self.inner.reaper.lock().ok().and_then(|mut slot| slot.take());
        if let Some(reaper) = reaper {
            let _ = reaper.await;
        }
        tracing::info!("pool closed");
        self.inner.emit(PoolEvent::Debug("pool closed".to_string()));
    }

    /// Hand a request to the dispatcher. Requests reach the dispatcher in call order.
    fn enqueue(&self, queued: Queued) {
        let queue = self.inner.queue.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_dispatcher(Arc::downgrade(&self.inner), rx));
            tx
        });
        if let Err(mpsc::error::SendError(queued)) = queue.send(queued) {
            queued.sink.finish(Err(SqlMiddlewareDbError::Closed(ResourceKind::Pool)));
        }
    }

    fn ensure_open(&self) -> Result<(), SqlMiddlewareDbError> {
        if self.is_closed() {
            return Err(SqlMiddlewareDbError::Closed(ResourceKind::Pool));
        }
        Ok(())
    }
}

impl PoolInner {
    fn emit(&self, event: PoolEvent) {
        match &event {
            PoolEvent::Error(message) => tracing::warn!(%message, "pool error"),
            PoolEvent::Status(status) => tracing::trace!(?status, "pool status"),
            other => tracing::debug!(event = ?other, "pool event"),
        }
        let _ = self.events.send(event);
    }

    fn status(&self) -> PoolStatusRecord {
        let status = self.pool.status();
        let free = usize::try_from(status.available).unwrap_or(0);
        PoolStatusRecord {
            ceiling: self.options.ceiling,
            in_use: status.size.saturating_sub(free),
            free,
            pending: self.pending.load(Ordering::Acquire),
            created: self.pool.manager().created(),
        }
    }

    fn publish_status(&self) {
        self.emit(PoolEvent::Status(self.status()));
    }

    /// Count a request into the waiting queue, or refuse it when the queue is full. The slot is
    /// released when the returned guard drops.
    fn admit(&self) -> Result<PendingSlot, SqlMiddlewareDbError> {
        let limit = self.options.max_pending;
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match limit {
                Some(max) if n >= max => None,
                _ => Some(n + 1),
            })
            .map(|_| PendingSlot {
                pending: Arc::clone(&self.pending),
            })
            .map_err(|n| {
                self.emit(PoolEvent::Error(format!("request refused, {n} pending")));
                SqlMiddlewareDbError::QueueFull(n)
            })
    }

    async fn acquire(&self) -> Result<PooledConnection, SqlMiddlewareDbError> {
        let get = self.pool.get();
        let outcome = match self.options.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, get)
                .await
                .map_err(|_| SqlMiddlewareDbError::Timeout(limit))?,
            None => get.await,
        };
        outcome.map_err(|err| match err {
            PoolError::Closed => SqlMiddlewareDbError::Closed(ResourceKind::Pool),
            PoolError::Backend(inner) => inner,
            other => SqlMiddlewareDbError::PoolError(other.to_string()),
        })
    }

    /// Wait for a session for the request at the head of the queue, then start it. The next
    /// request is not looked at until this one has a session or was withdrawn.
    async fn admit_next(self: &Arc<Self>, queued: Queued) {
        let Queued {
            request,
            sink,
            _slot: slot,
        } = queued;
        let withdrawn = sink.cancellation();
        let acquired = tokio::select! {
            biased;
            () = withdrawn.cancelled() => None,
            conn = self.acquire() => Some(conn),
        };
        drop(slot);
        let conn = match acquired {
            None => {
                tracing::debug!(query_id = sink.query_id(), "request withdrawn while queued");
                sink.finish(Ok(()));
                return;
            }
            Some(Err(err)) => {
                self.emit(PoolEvent::Error(err.to_string()));
                sink.finish(Err(err));
                return;
            }
            Some(Ok(conn)) => conn,
        };
        let (done_tx, done_rx) = oneshot::channel();
        conn.dispatch(request, sink, Some(done_tx));
        tokio::spawn(Arc::clone(self).hold(conn, done_rx));
    }

    /// Keep the session checked out until its batch is finished.
    async fn hold(self: Arc<Self>, conn: PooledConnection, done: oneshot::Receiver<()>) {
        let _ = done.await;
        drop(conn);
        self.publish_status();
    }
}

/// A request waiting for a session, holding its place in the pending count.
struct Queued {
    request: BatchRequest,
    sink: EventSink,
    _slot: PendingSlot,
}

/// One counted entry of the pending queue; released on drop, whichever way the wait ends.
struct PendingSlot {
    pending: Arc<AtomicUsize>,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Admit queued requests one at a time, in submission order.
async fn run_dispatcher(pool: Weak<PoolInner>, mut queue: mpsc::UnboundedReceiver<Queued>) {
    while let Some(queued) = queue.recv().await {
        let Some(inner) = pool.upgrade() else {
            queued.sink.finish(Err(SqlMiddlewareDbError::Closed(ResourceKind::Pool)));
            return;
        };
        inner.admit_next(queued).await;
    }
}

async fn run_reaper(pool: Weak<PoolInner>, shutdown: CancellationToken) {
    let Some(interval) = pool.upgrade().map(|p| p.options.scan_interval) else {
        return;
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = shutdown.cancelled() => return,
        }
        let Some(inner) = pool.upgrade() else {
            return;
        };
        if let Some(timeout) = inner.options.inactivity_timeout {
            let removable = inner.pool.status().size.saturating_sub(inner.options.floor);
            let removed = AtomicUsize::new(0);
            inner.pool.retain(|_, metrics| {
                if metrics.last_used() < timeout || removed.load(Ordering::Relaxed) >= removable {
                    return true;
                }
                removed.fetch_add(1, Ordering::Relaxed);
                false
            });
            let removed = removed.into_inner();
            if removed > 0 {
                inner.emit(PoolEvent::Debug(format!("closed {removed} idle sessions")));
            }
        }
        inner.publish_status();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_ceiling_is_rejected() {
        let options = PoolOptions::default().with_ceiling(0);
        assert!(options.validate().is_err());
    }
}
