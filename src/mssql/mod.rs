//! SQL Server sessions over tiberius.
//!
//! Known gaps of this backend: informational messages (`PRINT`, low-severity `RAISERROR`) are
//! not surfaced by tiberius, row counts are only reported for batches without a rowset, and a
//! cancelled batch is drained when the next request is sent rather than interrupted with an
//! attention packet. When a statement fails part way through a non-rowset batch, the counts of
//! the statements that already ran are lost and only the error is reported.

mod config;
mod convert;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use tiberius::error::Error as TiberiusError;
use tiberius::{Client, Config, QueryItem};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::error::SqlMiddlewareDbError;
use crate::query::{EventSink, ServerMessage};
use crate::session::{BatchRequest, Connector, Session};
use crate::translation::returns_rows;

/// Tiberius client over a tokio TCP stream.
pub type MssqlClient = Client<Compat<TcpStream>>;

/// Opens tiberius sessions from a connection string.
#[derive(Debug, Clone)]
pub struct TiberiusConnector {
    config: Config,
    target: String,
}

impl TiberiusConnector {
    /// # Errors
    /// Returns `SqlMiddlewareDbError::ConnectionError` for a connection string tiberius cannot
    /// parse.
    pub fn new(connection_string: &str) -> Result<Self, SqlMiddlewareDbError> {
        Ok(Self {
            config: config::parse_connection_string(connection_string)?,
            target: config::describe(connection_string),
        })
    }

    async fn open_client(config: Config) -> Result<MssqlClient, SqlMiddlewareDbError> {
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| SqlMiddlewareDbError::ConnectionError(format!("TCP connection error: {e}")))?;
        tcp.set_nodelay(true).ok();
        match Client::connect(config.clone(), tcp.compat_write()).await {
            Ok(client) => Ok(client),
            // Azure SQL redirects to another node after login.
            Err(TiberiusError::Routing { host, port }) => {
                tracing::debug!(%host, port, "following server redirect");
                let mut config = config;
                config.host(&host);
                config.port(port);
                let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
                    SqlMiddlewareDbError::ConnectionError(format!("TCP connection error: {e}"))
                })?;
                Client::connect(config, tcp.compat_write()).await.map_err(|e| {
                    SqlMiddlewareDbError::ConnectionError(format!("SQL Server connection error: {e}"))
                })
            }
            Err(e) => Err(SqlMiddlewareDbError::ConnectionError(format!(
                "SQL Server connection error: {e}"
            ))),
        }
    }
}

#[async_trait]
impl Connector for TiberiusConnector {
    async fn connect(&self) -> Result<Box<dyn Session>, SqlMiddlewareDbError> {
        let mut client = Self::open_client(self.config.clone()).await?;
        let process_id = client
            .simple_query("SELECT @@SPID")
            .await?
            .into_row()
            .await?
            .and_then(|row| row.try_get::<i16, _>(0).ok().flatten())
            .map(i32::from);
        Ok(Box::new(TiberiusSession {
            client: Some(client),
            process_id,
            broken: false,
        }))
    }

    fn describe(&self) -> String {
        self.target.clone()
    }
}

/// One tiberius client.
pub struct TiberiusSession {
    client: Option<MssqlClient>,
    process_id: Option<i32>,
    broken: bool,
}

impl TiberiusSession {
    /// Report a tiberius error: server errors go through the sink's severity check, anything
    /// else ends the batch and may leave the session unusable.
    async fn report(&mut self, err: TiberiusError, sink: &mut EventSink) {
        match err {
            TiberiusError::Server(token) => {
                let message = ServerMessage {
                    message: token.message().to_string(),
                    code: i32::try_from(token.code()).unwrap_or(i32::MAX),
                    severity: token.class(),
                    state: token.state(),
                    procedure: Some(token.procedure().to_string()).filter(|p| !p.is_empty()),
                    line: token.line(),
                };
                // A server error ends the tiberius stream even below the threshold.
                let _ = sink.message(message).await;
            }
            other => {
                if matches!(other, TiberiusError::Io { .. } | TiberiusError::Protocol(_)) {
                    self.broken = true;
                }
                sink.fail(SqlMiddlewareDbError::MssqlError(other));
            }
        }
    }
}

async fn stream_rows(
    client: &mut MssqlClient,
    request: &BatchRequest,
    sink: &mut EventSink,
) -> Result<(), TiberiusError> {
    let query = convert::bind_params(&request.sql, &request.params);
    let mut stream = query.query(client).await?;
    let mut seen_rowset = false;
    while let Some(item) = stream.try_next().await? {
        let flow = match item {
            QueryItem::Metadata(meta) => {
                if seen_rowset && sink.statement_done().await.is_stop() {
                    return Ok(());
                }
                seen_rowset = true;
                sink.metadata(convert::column_meta(meta.columns())).await
            }
            QueryItem::Row(row) => sink.row(convert::convert_row(&row)).await,
        };
        if flow.is_stop() {
            return Ok(());
        }
    }
    Ok(())
}

async fn execute(
    client: &mut MssqlClient,
    request: &BatchRequest,
    sink: &mut EventSink,
) -> Result<(), TiberiusError> {
    let query = convert::bind_params(&request.sql, &request.params);
    let result = query.execute(client).await?;
    let counts = result.rows_affected();
    for (idx, count) in counts.iter().enumerate() {
        if sink
            .row_count(i64::try_from(*count).unwrap_or(i64::MAX))
            .await
            .is_stop()
        {
            return Ok(());
        }
        if idx + 1 < counts.len() && sink.statement_done().await.is_stop() {
            return Ok(());
        }
    }
    Ok(())
}

#[async_trait]
impl Session for TiberiusSession {
    async fn run_batch(
        &mut self,
        request: &BatchRequest,
        sink: &mut EventSink,
    ) -> Result<(), SqlMiddlewareDbError> {
        let Some(client) = self.client.as_mut() else {
            return Err(SqlMiddlewareDbError::ConnectionError(
                "session already closed".to_string(),
            ));
        };
        let outcome = if returns_rows(&request.sql) {
            stream_rows(client, request, sink).await
        } else {
            execute(client, request, sink).await
        };
        if let Err(err) = outcome {
            self.report(err, sink).await;
        }
        Ok(())
    }

    fn process_id(&self) -> Option<i32> {
        self.process_id
    }

    fn is_healthy(&self) -> bool {
        self.client.is_some() && !self.broken
    }

    async fn close(&mut self) -> Result<(), SqlMiddlewareDbError> {
        if let Some(client) = self.client.take() {
            client.close().await?;
        }
        Ok(())
    }
}
