//! Canned server behavior for `--scripted` runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use mssql_middleware::ColumnMeta;
use mssql_middleware::RowValues;
use mssql_middleware::test_utils::{ScriptStep, ScriptedCall, ScriptedConnector, per_statement};

/// A connector whose sessions understand every statement the probe scenarios send.
pub(crate) fn connector() -> ScriptedConnector {
    let customers = Arc::new(AtomicI64::new(0));
    let statements = per_statement(move |call, statement| respond(call, statement, &customers));
    ScriptedConnector::new(move |call| {
        if call.sql.contains("sys.parameters") {
            procedure_catalog(call)
        } else if call.sql.contains("EXEC @__rc") {
            procedure_output(call)
        } else {
            statements(call)
        }
    })
}

fn respond(call: &ScriptedCall, statement: &str, customers: &AtomicI64) -> Vec<ScriptStep> {
    let lowered = statement.trim().to_ascii_lowercase();
    if let Some(delay) = lowered.strip_prefix("waitfor delay") {
        return vec![ScriptStep::Delay(parse_waitfor(delay))];
    }
    if lowered.contains("@@spid") {
        return ScriptStep::rowset(&["id"], vec![vec![RowValues::Int(i64::from(call.session_id))]]);
    }
    if let Some(args) = lowered.strip_prefix("raiserror(") {
        let severity = args
            .split(',')
            .nth(1)
            .and_then(|s| s.trim().parse::<u8>().ok())
            .unwrap_or(16);
        return vec![ScriptStep::error(50000, severity, "probe message")];
    }
    if lowered.starts_with("insert into") && lowered.contains("_customer") {
        let id = customers.fetch_add(1, Ordering::SeqCst) + 1;
        let name = call.params.first().cloned().unwrap_or(RowValues::Null);
        return ScriptStep::rowset(&["id", "name"], vec![vec![RowValues::Int(id), name]]);
    }
    if lowered.contains("from _customer") {
        let last = customers.load(Ordering::SeqCst);
        let rows = (0..last.min(10))
            .map(|offset| {
                vec![
                    RowValues::Int(last - offset),
                    RowValues::Text(format!("customer {}", last - offset)),
                ]
            })
            .collect();
        return ScriptStep::rowset(&["id", "name"], rows);
    }
    if let Some(rest) = lowered.strip_prefix("select top (") {
        let top = rest
            .split(')')
            .next()
            .and_then(|n| n.trim().parse::<i64>().ok())
            .unwrap_or(0);
        let rows = (1..=top)
            .map(|id| vec![RowValues::Int(id), RowValues::Text(format!("column_{id}"))])
            .collect();
        return ScriptStep::rowset(&["id", "name"], rows);
    }
    Vec::new()
}

/// `'hh:mm:ss[.fff]'` as used by `WAITFOR DELAY`.
fn parse_waitfor(literal: &str) -> Duration {
    let literal = literal.trim().trim_end_matches(';').trim().trim_matches('\'');
    let mut secs = 0.0_f64;
    for part in literal.split(':') {
        secs = secs * 60.0 + part.parse::<f64>().unwrap_or(0.0);
    }
    Duration::from_secs_f64(secs.max(0.0))
}

/// One input and one OUTPUT parameter for whatever procedure is asked about.
fn procedure_catalog(call: &ScriptedCall) -> Vec<ScriptStep> {
    let name = call.params.first().and_then(RowValues::as_text).unwrap_or("test_sp");
    let proc_name = name.rsplit('.').next().unwrap_or(name).trim_matches(['[', ']']).to_string();
    let param = |id: i64, param_name: &str, output: bool| {
        vec![
            RowValues::Text("dbo".into()),
            RowValues::Text(proc_name.clone()),
            RowValues::Int(id),
            RowValues::Text(param_name.into()),
            RowValues::Text("int".into()),
            RowValues::Int(4),
            RowValues::Int(10),
            RowValues::Int(0),
            RowValues::Bool(output),
            RowValues::Bool(false),
            RowValues::Text("sys".into()),
        ]
    };
    let mut steps = vec![ScriptStep::Metadata(
        [
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
        ]
        .into_iter()
        .map(|column| ColumnMeta::new(column, "nvarchar"))
        .collect(),
    )];
    steps.push(ScriptStep::Row(param(1, "@value", false)));
    steps.push(ScriptStep::Row(param(2, "@doubled", true)));
    steps
}

fn procedure_output(call: &ScriptedCall) -> Vec<ScriptStep> {
    let input = call.params.first().and_then(RowValues::as_int).copied().unwrap_or(0);
    ScriptStep::rowset(
        &["return_value", "doubled"],
        vec![vec![RowValues::Int(0), RowValues::Int(input * 2)]],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waitfor_literal_is_parsed() {
        assert_eq!(parse_waitfor(" '00:00:02';"), Duration::from_secs(2));
        assert_eq!(parse_waitfor("'00:01:00.5'"), Duration::from_millis(60_500));
    }
}
