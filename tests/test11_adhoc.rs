use std::sync::Arc;

use mssql_middleware::adhoc;
use mssql_middleware::prelude::*;
use mssql_middleware::test_utils::{ScriptStep, ScriptedConnector};

#[tokio::test]
async fn adhoc_query_opens_and_closes_a_session() -> Result<(), SqlMiddlewareDbError> {
    let connector = ScriptedConnector::new(|_| {
        ScriptStep::rowset(&["one"], vec![vec![RowValues::Int(1)]])
    });

    let res = adhoc::query(
        Arc::new(connector.clone()),
        ConnectionOptions::new(""),
        "select 1 as one",
        &[],
    )
    .await?;
    assert_eq!(res.first()[0].get("one"), Some(&RowValues::Int(1)));
    assert_eq!(connector.opened(), 1);
    assert_eq!(connector.live(), 0);
    Ok(())
}

#[tokio::test]
async fn adhoc_errors_still_close_the_session() {
    let connector = ScriptedConnector::new(|_| vec![ScriptStep::error(208, 16, "Invalid object name 'nope'.")]);

    let err = adhoc::query(
        Arc::new(connector.clone()),
        ConnectionOptions::new(""),
        "select * from nope",
        &[],
    )
    .await
    .unwrap_err();
    assert_eq!(err.statement_error().map(|e| e.sqlstate.as_str()), Some("42S02"));
    assert_eq!(connector.live(), 0);

    let err = adhoc::call_proc(
        Arc::new(connector.clone()),
        ConnectionOptions::new(""),
        "dbo.nope",
        CallArgs::None,
    )
    .await
    .unwrap_err();
    assert!(err.statement_error().is_some());
    assert_eq!(connector.live(), 0);
}

#[tokio::test]
async fn failed_connect_is_a_connection_error() {
    let connector = ScriptedConnector::spid_echo();
    connector.fail_next_connects(1);

    let err = adhoc::query(Arc::new(connector), ConnectionOptions::new(""), "select 1", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, SqlMiddlewareDbError::ConnectionError(_)));
}
