use std::sync::Arc;

use mssql_middleware::prelude::*;
use mssql_middleware::test_utils::{ScriptStep, ScriptedConnector, per_statement};

/// `print` is informational, `raiserror` carries its severity in the statement text.
fn connector() -> ScriptedConnector {
    ScriptedConnector::new(per_statement(|_, statement| {
        let statement = statement.trim();
        if let Some(text) = statement.strip_prefix("print ") {
            vec![ScriptStep::info(text.trim_matches('\''))]
        } else if let Some(rest) = statement.strip_prefix("raiserror ") {
            let severity: u8 = rest.trim().parse().expect("severity");
            vec![ScriptStep::error(50000, severity, format!("raised at {severity}"))]
        } else if statement.starts_with("select") {
            ScriptStep::rowset(&["x"], vec![vec![RowValues::Int(1)]])
        } else if statement.starts_with("insert") {
            vec![ScriptStep::RowCount(1)]
        } else {
            Vec::new()
        }
    }))
}

#[tokio::test]
async fn severity_below_threshold_is_info() -> Result<(), SqlMiddlewareDbError> {
    let conn = Connection::open(Arc::new(connector()), ConnectionOptions::new("")).await?;

    let res = conn
        .query_aggregate(
            "print 'create'; select x; raiserror 10; insert t; print 'drop'",
            &[],
        )
        .await?;
    assert_eq!(res.info, vec!["create", "raised at 10", "drop"]);
    assert_eq!(res.counts, vec![1]);
    assert_eq!(res.results.len(), 1);
    assert!(res.errors.is_empty());

    conn.close().await
}

#[tokio::test]
async fn severity_at_threshold_aborts_the_batch() -> Result<(), SqlMiddlewareDbError> {
    let connector = connector();
    let conn = Connection::open(Arc::new(connector.clone()), ConnectionOptions::new("")).await?;

    let err = conn
        .query_aggregate("print 'before'; select x; raiserror 11; select x", &[])
        .await
        .unwrap_err();
    assert_eq!(err.statement_error().map(|e| e.severity), Some(11));
    let partial = err.partial_results().expect("partial results");
    assert_eq!(partial.info, vec!["before"]);
    assert_eq!(partial.results.len(), 1);

    conn.close().await
}

#[tokio::test]
async fn threshold_is_configurable() -> Result<(), SqlMiddlewareDbError> {
    let conn = Connection::open(
        Arc::new(connector()),
        ConnectionOptions::new("").with_severity_threshold(17),
    )
    .await?;

    let res = conn
        .query_aggregate("raiserror 16; select x; select x", &[])
        .await?;
    assert_eq!(res.info, vec!["raised at 16"]);
    assert_eq!(res.results.len(), 2);

    conn.close().await
}

#[tokio::test]
async fn go_separated_scripts_run_batch_by_batch() -> Result<(), SqlMiddlewareDbError> {
    let connector = connector();
    let conn = Connection::open(Arc::new(connector.clone()), ConnectionOptions::new("")).await?;

    let outcomes = conn
        .run_script("insert t\nGO\nselect x\ngo\nraiserror 16\nGO\nselect x\n")
        .await;
    let err = outcomes.unwrap_err();
    assert_eq!(err.statement_error().map(|e| e.code), Some(50000));
    // The batch after the failing one never ran.
    assert_eq!(connector.calls().len(), 3);

    let outcomes = conn.run_script("insert t\nGO\nselect x").await?;
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].counts, vec![1]);
    assert_eq!(outcomes[1].first().len(), 1);

    conn.close().await
}

#[tokio::test]
async fn raw_results_keep_positional_rows() -> Result<(), SqlMiddlewareDbError> {
    let conn = Connection::open(Arc::new(connector()), ConnectionOptions::new("")).await?;

    let raw = conn.query_raw("select x; insert t", &[]).await?;
    assert_eq!(raw.rowsets.len(), 1);
    assert_eq!(raw.rowsets[0].rows, vec![vec![RowValues::Int(1)]]);
    assert_eq!(raw.counts, vec![1]);

    conn.close().await
}
