use std::sync::Arc;

use mssql_middleware::prelude::*;
use mssql_middleware::test_utils::{ScriptStep, ScriptedConnector};

fn connector() -> ScriptedConnector {
    ScriptedConnector::new(|call| {
        if call.sql.contains("dm_exec_describe_first_result_set") {
            return ScriptStep::rowset(
                &["name", "system_type_name", "max_length", "is_nullable"],
                vec![
                    vec![
                        RowValues::Text("id".into()),
                        RowValues::Text("int".into()),
                        RowValues::Int(4),
                        RowValues::Bool(false),
                    ],
                    vec![
                        RowValues::Text("name".into()),
                        RowValues::Text("nvarchar(50)".into()),
                        RowValues::Int(100),
                        RowValues::Bool(true),
                    ],
                ],
            );
        }
        if call.sql.starts_with("select id, name") {
            let id = call.params.first().cloned().unwrap_or(RowValues::Null);
            return ScriptStep::rowset(
                &["id", "name"],
                vec![vec![id, RowValues::Text("row".into())]],
            );
        }
        if call.sql.starts_with("update") {
            return vec![ScriptStep::RowCount(1)];
        }
        Vec::new()
    })
}

#[tokio::test]
async fn prepared_statement_describes_once_and_runs_many() -> Result<(), SqlMiddlewareDbError> {
    let connector = connector();
    let conn = Connection::open(Arc::new(connector.clone()), ConnectionOptions::new("")).await?;

    let stmt = conn.prepare("select id, name from employee where id = ?").await?;
    assert_eq!(stmt.sql(), "select id, name from employee where id = @P1");
    assert_eq!(stmt.param_count(), 1);
    assert_eq!(stmt.meta().len(), 2);
    assert_eq!(stmt.meta()[1].name, "name");
    assert!(stmt.meta()[1].nullable);

    let describe = &connector.calls()[0];
    assert_eq!(
        describe.params,
        vec![
            RowValues::Text("select id, name from employee where id = @P1".into()),
            RowValues::Text("@P1 nvarchar(4000)".into()),
        ]
    );

    for id in 1..=3 {
        let res = stmt.query_aggregate(&[RowValues::Int(id)]).await?;
        assert_eq!(res.first()[0].get("id"), Some(&RowValues::Int(id)));
    }
    assert_eq!(connector.calls().len(), 4);

    let err = stmt.query(&[]).unwrap_err();
    assert!(matches!(err, SqlMiddlewareDbError::ParameterError(_)));

    conn.close().await
}

#[tokio::test]
async fn freed_statement_reports_closed() -> Result<(), SqlMiddlewareDbError> {
    let conn = Connection::open(Arc::new(connector()), ConnectionOptions::new("")).await?;

    let stmt = conn.prepare("update employee set name = ? where id = ?").await?;
    assert_eq!(stmt.execute(&[RowValues::Text("x".into()), RowValues::Int(1)]).await?, vec![1]);

    stmt.free();
    stmt.free();
    assert!(stmt.is_freed());
    let err = stmt
        .execute(&[RowValues::Text("x".into()), RowValues::Int(1)])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SqlMiddlewareDbError::Closed(ResourceKind::PreparedStatement)
    ));
    assert!(err.to_string().contains("closed"));

    conn.close().await
}

#[tokio::test]
async fn transaction_control_runs_on_the_session() -> Result<(), SqlMiddlewareDbError> {
    let connector = connector();
    let conn = Connection::open(Arc::new(connector.clone()), ConnectionOptions::new("")).await?;

    let tx = conn.begin_transaction().await?;
    assert!(tx.is_open());
    assert_eq!(tx.execute("update employee set name = 'a'", &[]).await?, vec![1]);
    tx.commit().await?;

    let tx = conn.begin_transaction_with(IsolationLevel::Snapshot).await?;
    tx.execute("update employee set name = 'b'", &[]).await?;
    tx.rollback().await?;

    let sql: Vec<String> = connector.calls().into_iter().map(|c| c.sql).collect();
    assert_eq!(
        sql,
        vec![
            "BEGIN TRANSACTION",
            "update employee set name = 'a'",
            "COMMIT TRANSACTION",
            "SET TRANSACTION ISOLATION LEVEL SNAPSHOT; BEGIN TRANSACTION",
            "update employee set name = 'b'",
            "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION",
        ]
    );

    conn.close().await
}

#[tokio::test]
async fn pooled_connections_are_exclusive_while_held() -> Result<(), SqlMiddlewareDbError> {
    let connector = ScriptedConnector::spid_echo();
    let pool = Pool::new(
        Arc::new(connector.clone()),
        PoolOptions::new(ConnectionOptions::new("")).with_ceiling(2),
    )?;
    pool.open().await?;

    let held = pool.acquire().await?;
    let spid = held.process_id().expect("spid");
    let tx = held.begin_transaction().await?;

    // Pool traffic goes to the other session meanwhile.
    let res = pool.query_aggregate("select @@SPID as id", &[]).await?;
    let other = res.first()[0].get("id").and_then(RowValues::as_int).copied();
    assert_ne!(other, Some(i64::from(spid)));

    tx.commit().await?;
    drop(held);
    assert_eq!(connector.opened(), 2);

    pool.close().await;
    Ok(())
}
