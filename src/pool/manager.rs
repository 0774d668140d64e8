use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use deadpool::managed::{Manager, Metrics, RecycleError, RecycleResult};
use tokio::sync::broadcast;

use super::events::PoolEvent;
use crate::config::ConnectionOptions;
use crate::connection::Connection;
use crate::error::SqlMiddlewareDbError;
use crate::session::Connector;

/// Deadpool manager that opens [`Connection`]s through a [`Connector`].
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    options: ConnectionOptions,
    use_utc: Arc<AtomicBool>,
    events: broadcast::Sender<PoolEvent>,
    created: AtomicUsize,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("target", &self.connector.describe())
            .field("created", &self.created())
            .finish()
    }
}

impl SessionManager {
    pub(super) fn new(
        connector: Arc<dyn Connector>,
        options: ConnectionOptions,
        use_utc: Arc<AtomicBool>,
        events: broadcast::Sender<PoolEvent>,
    ) -> Self {
        Self {
            connector,
            options,
            use_utc,
            events,
            created: AtomicUsize::new(0),
        }
    }

    pub(super) fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

impl Manager for SessionManager {
    type Type = Connection;
    type Error = SqlMiddlewareDbError;

    async fn create(&self) -> Result<Connection, SqlMiddlewareDbError> {
        let conn = Connection::open_shared(
            self.connector.as_ref(),
            self.options.clone(),
            Arc::clone(&self.use_utc),
        )
        .await?;
        let created = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        let message = format!(
            "opened session {} ({created} created)",
            conn.process_id().map_or_else(|| "?".to_string(), |id| id.to_string())
        );
        tracing::debug!("{message}");
        let _ = self.events.send(PoolEvent::Debug(message));
        Ok(conn)
    }

    async fn recycle(
        &self,
        conn: &mut Connection,
        _metrics: &Metrics,
    ) -> RecycleResult<SqlMiddlewareDbError> {
        if conn.is_healthy() {
            Ok(())
        } else {
            tracing::debug!(process_id = ?conn.process_id(), "discarding unhealthy session");
            Err(RecycleError::Backend(SqlMiddlewareDbError::ConnectionError(
                "session is no longer usable".to_string(),
            )))
        }
    }
}
