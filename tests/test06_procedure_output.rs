use std::sync::Arc;

use mssql_middleware::prelude::*;
use mssql_middleware::test_utils::{ScriptStep, ScriptedCall, ScriptedConnector};

/// Catalog rows for `dbo.test_sp (@num1 int, @num2 int OUTPUT, @num3 int OUTPUT)`.
fn catalog() -> Vec<ScriptStep> {
    let param = |id: i64, name: &str, output: bool| {
        vec![
            RowValues::Text("dbo".into()),
            RowValues::Text("test_sp".into()),
            RowValues::Int(id),
            RowValues::Text(name.into()),
            RowValues::Text("int".into()),
            RowValues::Int(4),
            RowValues::Int(10),
            RowValues::Int(0),
            RowValues::Bool(output),
            RowValues::Bool(false),
            RowValues::Text("sys".into()),
        ]
    };
    ScriptStep::rowset(
        &[
            "schema_name",
            "proc_name",
            "parameter_id",
            "param_name",
            "type_name",
            "max_length",
            "precision",
            "scale",
            "is_output",
            "is_table_type",
            "type_schema",
        ],
        vec![
            param(1, "@num1", false),
            param(2, "@num2", true),
            param(3, "@num3", true),
        ],
    )
}

/// The procedure doubles and triples its input into the OUTPUT parameters and returns 99.
fn respond(call: &ScriptedCall) -> Vec<ScriptStep> {
    if call.sql.contains("sys.parameters") {
        let known = matches!(
            call.params.first().and_then(RowValues::as_text),
            Some("dbo.test_sp" | "test_sp")
        );
        return if known {
            catalog()
        } else {
            vec![ScriptStep::Metadata(vec![ColumnMeta::new("schema_name", "nvarchar")])]
        };
    }
    if call.sql.contains("EXEC @__rc") {
        let input = call.params.first().and_then(RowValues::as_int).copied().unwrap_or(0);
        let mut steps = vec![ScriptStep::info("test_sp running")];
        steps.extend(ScriptStep::rowset(
            &["note"],
            vec![vec![RowValues::Text("body".into())]],
        ));
        steps.push(ScriptStep::Done);
        steps.extend(ScriptStep::rowset(
            &["return_value", "num2", "num3"],
            vec![vec![
                RowValues::Int(99),
                RowValues::Int(input * 2),
                RowValues::Int(input * 3),
            ]],
        ));
        return steps;
    }
    Vec::new()
}

async fn open(connector: &ScriptedConnector) -> Result<Connection, SqlMiddlewareDbError> {
    Connection::open(Arc::new(connector.clone()), ConnectionOptions::new("")).await
}

#[tokio::test]
async fn output_holds_return_code_then_outputs() -> Result<(), SqlMiddlewareDbError> {
    let connector = ScriptedConnector::new(respond);
    let conn = open(&connector).await?;

    let result = conn
        .call_proc("dbo.test_sp", CallArgs::positional([10_i64]))
        .await?;
    assert_eq!(
        result.output,
        vec![RowValues::Int(99), RowValues::Int(20), RowValues::Int(30)]
    );
    assert_eq!(result.return_code, 99);
    assert_eq!(result.output[0], RowValues::Int(result.return_code));
    assert_eq!(result.results.len(), 1);
    assert_eq!(result.first()[0].get("note"), Some(&RowValues::Text("body".into())));
    assert_eq!(result.info, vec!["test_sp running"]);

    let exec = connector
        .calls()
        .into_iter()
        .find(|c| c.sql.contains("EXEC @__rc"))
        .expect("exec batch");
    assert!(exec.sql.contains(
        "EXEC @__rc = [dbo].[test_sp] @num1 = @P1, @num2 = @__o2 OUTPUT, @num3 = @__o3 OUTPUT;"
    ));
    assert_eq!(exec.params, vec![RowValues::Int(10)]);

    conn.close().await
}

#[tokio::test]
async fn named_arguments_and_the_definition_cache() -> Result<(), SqlMiddlewareDbError> {
    let connector = ScriptedConnector::new(respond);
    let conn = open(&connector).await?;
    let procedures = conn.procedures();

    let handle = procedures.get("dbo.test_sp").await?.expect("procedure");
    assert_eq!(handle.name(), "[dbo].[test_sp]");
    assert_eq!(handle.definition().params.len(), 3);
    assert_eq!(handle.definition().outputs().count(), 2);

    let result = handle.call(CallArgs::named([("num1", 4_i64)])).await?;
    assert_eq!(result.output[1], RowValues::Int(8));

    // Resolved once, then served from the cache.
    procedures.get("DBO.TEST_SP").await?.expect("cached procedure");
    let lookups = |c: &ScriptedConnector| {
        c.calls().iter().filter(|call| call.sql.contains("sys.parameters")).count()
    };
    assert_eq!(lookups(&connector), 1);
    procedures.clear_cache();
    procedures.get("dbo.test_sp").await?;
    assert_eq!(lookups(&connector), 2);

    conn.close().await
}

#[tokio::test]
async fn bad_arguments_are_rejected_before_sending() -> Result<(), SqlMiddlewareDbError> {
    let connector = ScriptedConnector::new(respond);
    let conn = open(&connector).await?;

    let err = conn
        .call_proc("dbo.test_sp", CallArgs::named([("nope", 1_i64)]))
        .await
        .unwrap_err();
    assert!(matches!(err, SqlMiddlewareDbError::ParameterError(_)));

    let err = conn
        .call_proc("dbo.test_sp", CallArgs::positional([1_i64, 2, 3, 4]))
        .await
        .unwrap_err();
    assert!(matches!(err, SqlMiddlewareDbError::ParameterError(_)));
    assert!(!connector.calls().iter().any(|c| c.sql.contains("EXEC @__rc")));

    conn.close().await
}

#[tokio::test]
async fn unknown_procedure_is_a_config_error() -> Result<(), SqlMiddlewareDbError> {
    let connector = ScriptedConnector::new(respond);
    let conn = open(&connector).await?;

    assert!(conn.procedures().get("dbo.missing").await?.is_none());
    let err = conn
        .call_proc("dbo.missing", CallArgs::None)
        .await
        .unwrap_err();
    assert!(matches!(err, SqlMiddlewareDbError::ConfigError(_)));
    assert!(err.to_string().contains("dbo.missing"));

    conn.close().await
}
