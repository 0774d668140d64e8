use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use mssql_middleware::prelude::*;
use mssql_middleware::test_utils::{ScriptStep, ScriptedConnector, init_test_logging};
use mssql_middleware::types::materialize_timestamp;
use tokio::time::timeout;

fn numbers(n: i64) -> Vec<ScriptStep> {
    ScriptStep::rowset(&["n"], (1..=n).map(|i| vec![RowValues::Int(i)]).collect())
}

/// `slow` batches stall after their first row; everything else returns three rows.
fn connector() -> ScriptedConnector {
    ScriptedConnector::new(|call| {
        if call.sql.contains("slow") {
            let mut steps = numbers(1);
            steps.push(ScriptStep::Delay(Duration::from_secs(30)));
            steps.push(ScriptStep::Row(vec![RowValues::Int(2)]));
            steps
        } else {
            numbers(3)
        }
    })
}

async fn open(options: ConnectionOptions) -> Result<(ScriptedConnector, Connection), SqlMiddlewareDbError> {
    let connector = connector();
    let conn = Connection::open(Arc::new(connector.clone()), options).await?;
    Ok((connector, conn))
}

#[tokio::test]
async fn pause_holds_rows_until_resume() -> Result<(), SqlMiddlewareDbError> {
    init_test_logging();
    let (_, conn) = open(ConnectionOptions::new("")).await?;

    let mut handle = conn.query("select n from numbers", &[])?;
    assert!(handle.pause());

    assert!(matches!(handle.next_event().await, Some(QueryEvent::Submitted(_))));
    assert!(matches!(handle.next_event().await, Some(QueryEvent::Metadata(_))));
    assert!(timeout(Duration::from_millis(50), handle.next_event()).await.is_err());
    assert_eq!(handle.state(), QueryState::Paused);

    assert!(handle.resume());
    let mut rows = Vec::new();
    while let Some(event) = handle.next_event().await {
        match event {
            QueryEvent::Row(values) => rows.push(values),
            QueryEvent::Done { more: false } => break,
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(rows.len(), 3);
    assert_eq!(handle.state(), QueryState::Done);
    assert!(!handle.pause());

    conn.close().await
}

#[tokio::test]
async fn cancel_stops_a_running_batch_and_frees_the_session() -> Result<(), SqlMiddlewareDbError> {
    init_test_logging();
    let (_, conn) = open(ConnectionOptions::new("")).await?;

    let mut handle = conn.query("select slow", &[])?;
    loop {
        match handle.next_event().await {
            Some(QueryEvent::Row(_)) => break,
            Some(_) => {}
            None => panic!("stream ended early"),
        }
    }
    assert_eq!(handle.state(), QueryState::Running);
    assert!(handle.cancel());
    assert!(!handle.cancel());

    let mut terminal = None;
    while let Some(event) = handle.next_event().await {
        terminal = Some(event);
    }
    assert!(matches!(terminal, Some(QueryEvent::Cancelled)));
    assert_eq!(handle.state(), QueryState::Cancelled);

    let res = timeout(Duration::from_secs(5), conn.query_aggregate("select n", &[]))
        .await
        .expect("session freed after cancel")?;
    assert_eq!(res.first().len(), 3);

    conn.close().await
}

#[tokio::test]
async fn dropping_a_handle_cancels_its_batch() -> Result<(), SqlMiddlewareDbError> {
    init_test_logging();
    let (_, conn) = open(ConnectionOptions::new("")).await?;

    let handle = conn.query("select slow", &[])?;
    let canceller = handle.canceller();
    drop(handle);
    assert_eq!(canceller.state(), QueryState::Cancelled);

    let res = timeout(Duration::from_secs(5), conn.query_aggregate("select n", &[]))
        .await
        .expect("session freed after drop")?;
    assert_eq!(res.first().len(), 3);

    conn.close().await
}

#[tokio::test]
async fn cancelled_aggregate_reports_cancelled() -> Result<(), SqlMiddlewareDbError> {
    init_test_logging();
    let (_, conn) = open(ConnectionOptions::new("")).await?;

    let handle = conn.query("select slow", &[])?;
    let canceller = handle.canceller();
    let aggregate = tokio::spawn(handle.aggregate());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(canceller.cancel());

    let err = aggregate.await.expect("aggregate task").unwrap_err();
    assert!(err.is_cancelled());

    conn.close().await
}

#[tokio::test]
async fn query_timeout_ends_the_batch_with_timeout() -> Result<(), SqlMiddlewareDbError> {
    init_test_logging();
    let (_, conn) =
        open(ConnectionOptions::new("").with_query_timeout(Some(Duration::from_millis(30)))).await?;

    let err = conn.query_aggregate("select slow", &[]).await.unwrap_err();
    match &err {
        SqlMiddlewareDbError::Batch(failure) => {
            assert!(matches!(failure.error, SqlMiddlewareDbError::Timeout(_)));
            assert!(failure.results.results.is_empty());
        }
        other => panic!("expected a batch failure, got {other:?}"),
    }

    let res = conn.query_aggregate("select n", &[]).await?;
    assert_eq!(res.first().len(), 3);

    conn.close().await
}

#[tokio::test]
async fn placeholders_are_translated_and_counted() -> Result<(), SqlMiddlewareDbError> {
    init_test_logging();
    let (connector, conn) = open(ConnectionOptions::new("")).await?;

    conn.query_aggregate("select n from t where a = ? and b = '?'", &[RowValues::Int(1)])
        .await?;
    assert_eq!(
        connector.calls()[0].sql,
        "select n from t where a = @P1 and b = '?'"
    );
    assert_eq!(connector.calls()[0].params, vec![RowValues::Int(1)]);

    let err = conn.query("select n where a = ?", &[]).unwrap_err();
    assert!(matches!(err, SqlMiddlewareDbError::ParameterError(_)));

    conn.query_with(
        "select n where a = @P1",
        &[RowValues::Int(2)],
        QueryOptions::default().with_translation(TranslationMode::ForceOff),
    )?
    .finish()
    .await?;
    assert_eq!(connector.calls()[1].sql, "select n where a = @P1");

    conn.close().await
}

#[tokio::test]
async fn timestamps_follow_the_utc_flag() -> Result<(), SqlMiddlewareDbError> {
    init_test_logging();
    let naive = NaiveDate::from_ymd_opt(2024, 1, 2)
        .and_then(|d| d.and_hms_opt(3, 4, 5))
        .expect("valid timestamp");
    let connector = ScriptedConnector::new(move |_| {
        ScriptStep::rowset(&["at"], vec![vec![RowValues::Timestamp(naive)]])
    });
    let conn = Connection::open(Arc::new(connector), ConnectionOptions::new("")).await?;

    let res = conn.query_aggregate("select at", &[]).await?;
    assert_eq!(
        res.first()[0].get("at"),
        Some(&RowValues::DateTime(naive.and_utc()))
    );

    conn.set_use_utc(false);
    let res = conn.query_aggregate("select at", &[]).await?;
    assert_eq!(
        res.first()[0].get("at"),
        Some(&RowValues::DateTime(materialize_timestamp(naive, false)))
    );

    conn.close().await
}
