use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mssql_middleware::prelude::*;
use rand::{RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::args::{ProbeConfig, Scenario};

/// Submitted by the busy scenario; the fifth is cancelled and the sixth paused.
const BUSY_QUERIES: usize = 7;

pub(crate) async fn run(
    config: &ProbeConfig,
    connector: Arc<dyn Connector>,
) -> Result<(), SqlMiddlewareDbError> {
    match config.scenario {
        Scenario::Busy => busy(config, connector).await,
        Scenario::Payload => payload(config, connector).await,
        Scenario::Procedure => procedure(config, connector).await,
        Scenario::Severity => severity(config, connector).await,
        Scenario::Txn => txn(config, connector).await,
        Scenario::Pool => pool_sessions(config, connector).await,
    }
}

fn pool_options(config: &ProbeConfig) -> PoolOptions {
    PoolOptions::new(ConnectionOptions::default()).with_ceiling(config.ceiling)
}

fn log_pool_events(pool: &Pool) -> tokio::task::JoinHandle<()> {
    let mut events = pool.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                PoolEvent::Open { ceiling } => info!(ceiling, "pool open"),
                PoolEvent::Debug(message) => info!(%message, "pool debug"),
                PoolEvent::Status(status) => info!(
                    in_use = status.in_use,
                    free = status.free,
                    pending = status.pending,
                    "pool status"
                ),
                PoolEvent::Error(message) => warn!(%message, "pool error"),
            }
        }
    })
}

async fn busy(config: &ProbeConfig, connector: Arc<dyn Connector>) -> Result<(), SqlMiddlewareDbError> {
    let pool = Pool::new(connector, pool_options(config))?;
    let events = log_pool_events(&pool);
    pool.open().await?;

    let sql = format!("waitfor delay '{}'", waitfor_literal(config.delay()));
    let mut handles = Vec::with_capacity(BUSY_QUERIES);
    for _ in 0..BUSY_QUERIES {
        handles.push(pool.query(&sql, &[])?);
    }
    handles[4].cancel();
    let paused = handles[5].canceller();
    paused.pause();
    let resume_after = config.delay() * 2;
    tokio::spawn(async move {
        tokio::time::sleep(resume_after).await;
        info!("resuming paused query");
        paused.resume();
    });

    let mut outcomes = JoinSet::new();
    for (idx, handle) in handles.into_iter().enumerate() {
        let started = Instant::now();
        outcomes.spawn(async move { (idx, handle.finish().await, started.elapsed()) });
    }
    while let Some(joined) = outcomes.join_next().await {
        match joined {
            Ok((idx, Ok(()), elapsed)) => info!(query = idx + 1, ?elapsed, "query done"),
            Ok((idx, Err(err), elapsed)) => info!(query = idx + 1, ?elapsed, %err, "query ended"),
            Err(err) => warn!(%err, "query task failed"),
        }
    }
    pool.close().await;
    events.abort();
    Ok(())
}

/// `hh:mm:ss.fff` for `WAITFOR DELAY`.
fn waitfor_literal(delay: Duration) -> String {
    let millis = delay.as_millis();
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        millis / 3_600_000,
        millis / 60_000 % 60,
        millis / 1000 % 60,
        millis % 1000
    )
}

async fn payload(config: &ProbeConfig, connector: Arc<dyn Connector>) -> Result<(), SqlMiddlewareDbError> {
    let conn = Connection::open(connector, ConnectionOptions::default()).await?;
    let sql = config.payload_sql();
    let prepared = if config.prepared {
        Some(conn.prepare(&sql).await?)
    } else {
        None
    };
    info!(%sql, stream = config.stream, prepared = prepared.is_some(), "payload query");

    for round in 1..=config.repeats {
        let started = Instant::now();
        let handle = match &prepared {
            Some(statement) => statement.query(&[])?,
            None => conn.query(&sql, &[])?,
        };
        let rows = if config.stream {
            count_streamed(handle).await?
        } else {
            handle.aggregate().await?.results.iter().map(Vec::len).sum()
        };
        info!(round, rows, elapsed = ?started.elapsed(), "payload round");
    }
    if let Some(statement) = prepared {
        statement.free();
    }
    conn.close().await
}

async fn count_streamed(mut handle: QueryHandle) -> Result<usize, SqlMiddlewareDbError> {
    let mut rows = 0;
    while let Some(event) = handle.next_event().await {
        match event {
            QueryEvent::Row(_) => rows += 1,
            QueryEvent::Error(err) => return Err(err),
            QueryEvent::Cancelled => return Err(SqlMiddlewareDbError::Cancelled),
            QueryEvent::Done { more: false } => break,
            _ => {}
        }
    }
    Ok(rows)
}

async fn procedure(config: &ProbeConfig, connector: Arc<dyn Connector>) -> Result<(), SqlMiddlewareDbError> {
    let conn = Connection::open(connector, ConnectionOptions::default()).await?;
    let procedures = conn.procedures();
    let Some(handle) = procedures.get(&config.procedure).await? else {
        conn.close().await?;
        return Err(SqlMiddlewareDbError::ConfigError(format!(
            "procedure {} not found",
            config.procedure
        )));
    };
    info!(procedure = %handle.name(), "calling procedure");
    for round in 1..=config.repeats {
        let started = Instant::now();
        let value = config.value + i64::try_from(round).unwrap_or(0);
        let result = handle
            .call(CallArgs::positional([ProcArg::from(value)]))
            .await?;
        info!(
            round,
            return_code = result.return_code,
            output = ?result.output,
            rowsets = result.results.len(),
            elapsed = ?started.elapsed(),
            "procedure call"
        );
    }
    conn.close().await
}

async fn severity(config: &ProbeConfig, connector: Arc<dyn Connector>) -> Result<(), SqlMiddlewareDbError> {
    let conn = Connection::open(connector, ConnectionOptions::default()).await?;
    let sql = format!("RAISERROR('probe message', {}, 1)", config.severity);
    match conn.query_aggregate(&sql, &[]).await {
        Ok(results) => info!(severity = config.severity, info = ?results.info, "reported as info"),
        Err(err) => info!(severity = config.severity, %err, "reported as error"),
    }
    conn.close().await
}

async fn txn(config: &ProbeConfig, connector: Arc<dyn Connector>) -> Result<(), SqlMiddlewareDbError> {
    let setup = Connection::open(Arc::clone(&connector), ConnectionOptions::default()).await?;
    setup
        .execute(
            "IF OBJECT_ID('dbo._customer') IS NULL \
             CREATE TABLE dbo._customer (id int IDENTITY PRIMARY KEY, name nvarchar(100))",
            &[],
        )
        .await?;
    setup.close().await?;

    let mut workers = JoinSet::new();
    for worker in 0..config.ceiling {
        let conn = Connection::open(Arc::clone(&connector), ConnectionOptions::default()).await?;
        let iterations = config.iterations;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed ^ u64::try_from(worker).unwrap_or(0));
        workers.spawn(async move {
            for iteration in 0..iterations {
                let name = format!("customer-{}", rng.random_range(0..100_000u32));
                let tx = conn.begin_transaction_with(IsolationLevel::Snapshot).await?;
                let inserted = tx
                    .query_aggregate(
                        "INSERT INTO _customer (name) OUTPUT INSERTED.id, INSERTED.name VALUES (?)",
                        &[RowValues::Text(name)],
                    )
                    .await;
                let latest = match inserted {
                    Ok(_) => {
                        tx.query_aggregate("select top 10 * from _customer order by id DESC", &[])
                            .await
                    }
                    Err(err) => Err(err),
                };
                match latest {
                    Ok(rows) => {
                        tx.commit().await?;
                        info!(worker, iteration, seen = rows.first().len(), "committed");
                    }
                    Err(err) => {
                        warn!(worker, iteration, %err, "rolling back");
                        tx.rollback().await?;
                    }
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            conn.close().await
        });
    }
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, "txn worker failed"),
            Err(err) => warn!(%err, "txn worker panicked"),
        }
    }
    Ok(())
}

async fn pool_sessions(
    config: &ProbeConfig,
    connector: Arc<dyn Connector>,
) -> Result<(), SqlMiddlewareDbError> {
    let pool = Pool::new(connector, pool_options(config))?;
    let events = log_pool_events(&pool);
    pool.open().await?;

    let mut queries = JoinSet::new();
    for _ in 0..config.ceiling * 2 {
        let handle = pool.query("waitfor delay '00:00:00.200'; select @@SPID as id", &[])?;
        queries.spawn(handle.aggregate());
    }
    let mut sessions = BTreeSet::new();
    while let Some(joined) = queries.join_next().await {
        match joined {
            Ok(Ok(results)) => {
                let id = results.first().first().and_then(|row| row.get("id")).and_then(RowValues::as_int);
                if let Some(id) = id {
                    sessions.insert(*id);
                }
            }
            Ok(Err(err)) => warn!(%err, "query failed"),
            Err(err) => warn!(%err, "query task failed"),
        }
    }
    info!(
        ceiling = config.ceiling,
        distinct = sessions.len(),
        ?sessions,
        "sessions used"
    );
    pool.close().await;
    events.abort();
    Ok(())
}
