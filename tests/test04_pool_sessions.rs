use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use mssql_middleware::prelude::*;
use mssql_middleware::test_utils::{ScriptStep, ScriptedConnector, init_test_logging};

/// Sessions answer `@@SPID` after a short pause so requests overlap.
fn slow_spid() -> ScriptedConnector {
    ScriptedConnector::new(|call| {
        let mut steps = vec![ScriptStep::Delay(Duration::from_millis(25))];
        steps.extend(ScriptStep::rowset(
            &["id"],
            vec![vec![RowValues::Int(i64::from(call.session_id))]],
        ));
        steps
    })
}

async fn spids(pool: &Pool, requests: usize) -> Result<BTreeSet<i64>, SqlMiddlewareDbError> {
    let handles = (0..requests)
        .map(|_| pool.query("select @@SPID as id", &[]))
        .collect::<Result<Vec<_>, _>>()?;
    let mut ids = BTreeSet::new();
    for handle in handles {
        let res = handle.aggregate().await?;
        let id = res.first()[0]
            .get("id")
            .and_then(RowValues::as_int)
            .copied()
            .expect("spid");
        ids.insert(id);
    }
    Ok(ids)
}

#[tokio::test]
async fn concurrent_requests_never_exceed_the_ceiling() -> Result<(), SqlMiddlewareDbError> {
    init_test_logging();
    for ceiling in [1usize, 2, 4] {
        let connector = slow_spid();
        let pool = Pool::new(
            Arc::new(connector.clone()),
            PoolOptions::new(ConnectionOptions::new("")).with_ceiling(ceiling),
        )?;
        pool.open().await?;

        let ids = spids(&pool, ceiling * 2).await?;
        assert_eq!(ids.len(), ceiling, "ceiling {ceiling}");
        assert!(connector.opened() <= ceiling);
        assert_eq!(connector.calls().len(), ceiling * 2);

        pool.close().await;
    }
    Ok(())
}

#[tokio::test]
async fn floor_sessions_open_eagerly() -> Result<(), SqlMiddlewareDbError> {
    init_test_logging();
    let connector = ScriptedConnector::spid_echo();
    let pool = Pool::new(
        Arc::new(connector.clone()),
        PoolOptions::new(ConnectionOptions::new(""))
            .with_ceiling(3)
            .with_floor(2),
    )?;
    pool.open().await?;
    assert_eq!(connector.opened(), 2);
    assert_eq!(pool.status().free, 2);

    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn queue_limit_refuses_extra_requests() -> Result<(), SqlMiddlewareDbError> {
    init_test_logging();
    let connector = slow_spid();
    let pool = Pool::new(
        Arc::new(connector),
        PoolOptions::new(ConnectionOptions::new(""))
            .with_ceiling(1)
            .with_max_pending(Some(2)),
    )?;
    pool.open().await?;

    let first = pool.query("select @@SPID as id", &[])?;
    let second = pool.query("select @@SPID as id", &[])?;
    let third = pool.query("select @@SPID as id", &[]);
    assert!(matches!(third, Err(SqlMiddlewareDbError::QueueFull(2))));

    first.aggregate().await?;
    second.aggregate().await?;
    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn cancelling_a_queued_request_withdraws_it() -> Result<(), SqlMiddlewareDbError> {
    init_test_logging();
    let connector = slow_spid();
    let pool = Pool::new(
        Arc::new(connector.clone()),
        PoolOptions::new(ConnectionOptions::new("")).with_ceiling(1),
    )?;
    pool.open().await?;

    let running = pool.query("select @@SPID as id", &[])?;
    let queued = pool.query("select @@SPID as id", &[])?;
    assert!(queued.cancel());
    assert_eq!(queued.state(), QueryState::Cancelled);

    running.aggregate().await?;
    let err = queued.aggregate().await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(connector.calls().len(), 1);

    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn pool_publishes_open_and_status_events() -> Result<(), SqlMiddlewareDbError> {
    init_test_logging();
    let pool = Pool::new(
        Arc::new(ScriptedConnector::spid_echo()),
        PoolOptions::new(ConnectionOptions::new("")).with_ceiling(2),
    )?;
    let mut events = pool.subscribe();
    pool.open().await?;

    assert_eq!(events.recv().await.ok(), Some(PoolEvent::Open { ceiling: 2 }));
    match events.recv().await {
        Ok(PoolEvent::Status(status)) => assert_eq!(status.ceiling, 2),
        other => panic!("expected a status event, got {other:?}"),
    }

    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn idle_sessions_above_floor_are_reaped() -> Result<(), SqlMiddlewareDbError> {
    init_test_logging();
    let connector = slow_spid();
    let pool = Pool::new(
        Arc::new(connector.clone()),
        PoolOptions::new(ConnectionOptions::new(""))
            .with_ceiling(3)
            .with_inactivity_timeout(Some(Duration::from_millis(20)))
            .with_scan_interval(Duration::from_millis(10)),
    )?;
    pool.open().await?;
    spids(&pool, 3).await?;
    assert_eq!(connector.opened(), 3);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(connector.live(), 0);
    assert_eq!(pool.status().free, 0);

    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn failed_connect_is_reported_and_the_pool_recovers() -> Result<(), SqlMiddlewareDbError> {
    init_test_logging();
    let connector = ScriptedConnector::spid_echo();
    connector.fail_next_connects(1);
    let pool = Pool::new(
        Arc::new(connector.clone()),
        PoolOptions::new(ConnectionOptions::new("")).with_ceiling(1),
    )?;
    pool.open().await?;

    let err = pool.query_aggregate("select @@SPID", &[]).await.unwrap_err();
    match &err {
        SqlMiddlewareDbError::Batch(failure) => {
            assert!(matches!(failure.error, SqlMiddlewareDbError::ConnectionError(_)));
        }
        other => panic!("expected a batch failure, got {other:?}"),
    }
    let res = pool.query_aggregate("select @@SPID", &[]).await?;
    assert_eq!(res.first().len(), 1);

    pool.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queued_requests_run_in_submission_order() -> Result<(), SqlMiddlewareDbError> {
    init_test_logging();
    let connector = ScriptedConnector::new(|_| Vec::new());
    let pool = Pool::new(
        Arc::new(connector.clone()),
        PoolOptions::new(ConnectionOptions::new("")).with_ceiling(1),
    )?;
    pool.open().await?;

    let handles = (0..200_i64)
        .map(|i| pool.query("select ?", &[RowValues::Int(i)]))
        .collect::<Result<Vec<_>, _>>()?;
    for handle in handles {
        handle.finish().await?;
    }

    let order: Vec<i64> = connector
        .calls()
        .iter()
        .filter_map(|call| call.params.first().and_then(RowValues::as_int).copied())
        .collect();
    assert_eq!(order, (0..200_i64).collect::<Vec<_>>());

    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn abandoned_acquire_releases_its_queue_slot() -> Result<(), SqlMiddlewareDbError> {
    init_test_logging();
    let pool = Pool::new(
        Arc::new(ScriptedConnector::spid_echo()),
        PoolOptions::new(ConnectionOptions::new(""))
            .with_ceiling(1)
            .with_max_pending(Some(2)),
    )?;
    pool.open().await?;

    let held = pool.acquire().await?;
    for _ in 0..3 {
        let waited = tokio::time::timeout(Duration::from_millis(10), pool.acquire()).await;
        assert!(waited.is_err());
    }
    assert_eq!(pool.status().pending, 0);
    drop(held);

    let res = pool.query_aggregate("select @@SPID as id", &[]).await?;
    assert_eq!(res.first().len(), 1);
    assert_eq!(pool.status().pending, 0);

    pool.close().await;
    Ok(())
}
