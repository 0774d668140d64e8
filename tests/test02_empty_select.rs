use std::sync::Arc;

use mssql_middleware::prelude::*;
use mssql_middleware::test_utils::{ScriptStep, ScriptedConnector, per_statement};

#[tokio::test]
async fn zero_row_select_still_yields_metadata_and_an_empty_rowset()
-> Result<(), SqlMiddlewareDbError> {
    let connector = ScriptedConnector::new(per_statement(|_, statement| {
        if statement.contains("where 1 = 0") {
            vec![ScriptStep::Metadata(vec![
                ColumnMeta::new("id", "int"),
                ColumnMeta::new("name", "nvarchar"),
            ])]
        } else {
            ScriptStep::rowset(
                &["id", "name"],
                vec![vec![RowValues::Int(1), RowValues::Text("a".into())]],
            )
        }
    }));
    let conn = Connection::open(Arc::new(connector), ConnectionOptions::new("")).await?;

    let res = conn
        .query_aggregate("select id, name from t where 1 = 0", &[])
        .await?;
    assert_eq!(res.meta.len(), 1);
    assert_eq!(res.meta[0].len(), 2);
    assert_eq!(res.meta[0][1].name, "name");
    assert_eq!(res.results.len(), 1);
    assert!(res.results[0].is_empty());
    assert!(res.first().is_empty());

    // An empty rowset keeps its slot between non-empty ones.
    let res = conn
        .query_aggregate(
            "select id, name from t; select id, name from t where 1 = 0; select id, name from t",
            &[],
        )
        .await?;
    assert_eq!(res.meta.len(), 3);
    assert_eq!(
        res.results.iter().map(Vec::len).collect::<Vec<_>>(),
        vec![1, 0, 1]
    );

    conn.close().await
}
