use std::collections::BTreeSet;
use std::fmt::Write as _;

use super::args::{CallArgs, ProcArg};
use super::definition::{ProcedureDefinition, ProcedureParam};
use crate::error::SqlMiddlewareDbError;
use crate::session::BatchRequest;
use crate::translation::quote_ident;
use crate::types::{Record, RowValues};

/// Server limit on parameters in one request.
pub const MAX_PARAMS: usize = 2100;
/// Server limit on row constructors in one `VALUES` list.
pub const MAX_ROWS_PER_INSERT: usize = 1000;

const RETURN_VAR: &str = "@__rc";

/// Pair each declared parameter with the argument supplied for it, if any.
fn resolve<'d>(
    definition: &'d ProcedureDefinition,
    args: CallArgs,
) -> Result<Vec<(&'d ProcedureParam, Option<ProcArg>)>, SqlMiddlewareDbError> {
    let mut bound: Vec<(&ProcedureParam, Option<ProcArg>)> =
        definition.params.iter().map(|p| (p, None)).collect();
    match args {
        CallArgs::None => {}
        CallArgs::Positional(values) => {
            if values.len() > bound.len() {
                return Err(SqlMiddlewareDbError::ParameterError(format!(
                    "{} takes {} parameters, {} supplied",
                    definition.qualified_name(),
                    bound.len(),
                    values.len()
                )));
            }
            for (slot, value) in bound.iter_mut().zip(values) {
                slot.1 = Some(value);
            }
        }
        CallArgs::Named(values) => {
            for (key, value) in values {
                let Some(slot) = bound.iter_mut().find(|(p, _)| p.matches(&key)) else {
                    return Err(SqlMiddlewareDbError::ParameterError(format!(
                        "{} has no parameter named {key}",
                        definition.qualified_name()
                    )));
                };
                if slot.1.is_some() {
                    return Err(SqlMiddlewareDbError::ParameterError(format!(
                        "parameter @{} supplied twice",
                        slot.0.name
                    )));
                }
                slot.1 = Some(value);
            }
        }
    }
    Ok(bound)
}

struct Builder {
    sql: String,
    params: Vec<RowValues>,
}

impl Builder {
    fn bind(&mut self, value: RowValues) -> String {
        self.params.push(value);
        format!("@P{}", self.params.len())
    }

    fn fill_table(&mut self, variable: &str, rows: Vec<Record>) {
        let columns: BTreeSet<String> = rows.iter().flat_map(|r| r.keys().cloned()).collect();
        if columns.is_empty() {
            for _ in &rows {
                let _ = writeln!(self.sql, "INSERT INTO {variable} DEFAULT VALUES;");
            }
            return;
        }
        let column_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let per_chunk = (MAX_PARAMS / columns.len()).clamp(1, MAX_ROWS_PER_INSERT);
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            let mut tuples = Vec::with_capacity(per_chunk);
            for mut row in rows.by_ref().take(per_chunk) {
                let placeholders = columns
                    .iter()
                    .map(|c| self.bind(row.remove(c).unwrap_or(RowValues::Null)))
                    .collect::<Vec<_>>()
                    .join(", ");
                tuples.push(format!("({placeholders})"));
            }
            let _ = writeln!(
                self.sql,
                "INSERT INTO {variable} ({column_list}) VALUES {};",
                tuples.join(", ")
            );
        }
    }
}

/// Generate the batch that calls `definition` with `args`.
///
/// The batch runs the procedure with `SET NOCOUNT OFF` so its own row counts are reported, then
/// selects the return code and OUTPUT variables as its final rowset.
pub(super) fn build_call(
    definition: &ProcedureDefinition,
    args: CallArgs,
) -> Result<BatchRequest, SqlMiddlewareDbError> {
    let resolved = resolve(definition, args)?;
    let mut builder = Builder {
        sql: format!("SET NOCOUNT ON;\nDECLARE {RETURN_VAR} int;\n"),
        params: Vec::new(),
    };
    let mut exec_args = Vec::new();
    let mut outputs = Vec::new();

    for (index, (param, arg)) in resolved.into_iter().enumerate() {
        let name = format!("@{}", param.name);
        match (param.is_table_type, arg) {
            (true, Some(ProcArg::Table(rows))) => {
                let variable = format!("@__t{}", index + 1);
                let _ = writeln!(builder.sql, "DECLARE {variable} {};", param.declared_type());
                builder.fill_table(&variable, rows);
                exec_args.push(format!("{name} = {variable}"));
            }
            (true, None) => {}
            (false, Some(arg @ ProcArg::Table(_))) | (true, Some(arg @ ProcArg::Value(_))) => {
                return Err(SqlMiddlewareDbError::ParameterError(format!(
                    "parameter {name} of {} cannot take {}",
                    definition.qualified_name(),
                    arg.kind()
                )));
            }
            (false, arg) if param.is_output => {
                let variable = format!("@__o{}", index + 1);
                let _ = writeln!(builder.sql, "DECLARE {variable} {};", param.declared_type());
                if let Some(ProcArg::Value(initial)) = arg {
                    if !initial.is_null() {
                        let placeholder = builder.bind(initial);
                        let _ = writeln!(builder.sql, "SET {variable} = {placeholder};");
                    }
                }
                exec_args.push(format!("{name} = {variable} OUTPUT"));
                outputs.push((variable, param.name.clone()));
            }
            (false, Some(ProcArg::Value(value))) => {
                let placeholder = builder.bind(value);
                exec_args.push(format!("{name} = {placeholder}"));
            }
            (false, None) => {}
        }
    }

    if builder.params.len() > MAX_PARAMS {
        return Err(SqlMiddlewareDbError::ParameterError(format!(
            "call to {} needs {} parameters; the server accepts at most {MAX_PARAMS}",
            definition.qualified_name(),
            builder.params.len()
        )));
    }

    let _ = write!(
        builder.sql,
        "SET NOCOUNT OFF;\nEXEC {RETURN_VAR} = {}",
        definition.qualified_name()
    );
    if !exec_args.is_empty() {
        let _ = write!(builder.sql, " {}", exec_args.join(", "));
    }
    let _ = write!(builder.sql, ";\nSET NOCOUNT ON;\nSELECT {RETURN_VAR} AS [return_value]");
    for (variable, name) in &outputs {
        let _ = write!(builder.sql, ", {variable} AS {}", quote_ident(name));
    }
    builder.sql.push(';');

    Ok(BatchRequest::new(builder.sql, builder.params))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, ordinal: usize, type_name: &str, is_output: bool) -> ProcedureParam {
        ProcedureParam {
            name: name.into(),
            ordinal,
            type_name: type_name.into(),
            type_schema: "sys".into(),
            max_length: 4,
            precision: 10,
            scale: 0,
            is_output,
            is_table_type: false,
        }
    }

    fn definition() -> ProcedureDefinition {
        ProcedureDefinition {
            schema: "dbo".into(),
            name: "test_sp".into(),
            params: vec![
                param("num1", 1, "int", false),
                param("num2", 2, "int", true),
                param("num3", 3, "int", true),
            ],
        }
    }

    #[test]
    fn positional_call_declares_outputs() {
        let request = build_call(&definition(), CallArgs::positional([10_i64])).unwrap();
        assert!(request.sql.contains("DECLARE @__o2 int;"));
        assert!(request.sql.contains(
            "EXEC @__rc = [dbo].[test_sp] @num1 = @P1, @num2 = @__o2 OUTPUT, @num3 = @__o3 OUTPUT;"
        ));
        assert!(request.sql.ends_with("SELECT @__rc AS [return_value], @__o2 AS [num2], @__o3 AS [num3];"));
        assert_eq!(request.params, vec![RowValues::Int(10)]);
    }

    #[test]
    fn named_call_matches_without_at_sign() {
        let args = CallArgs::named([("@NUM1", 5_i64), ("num3", 7_i64)]);
        let request = build_call(&definition(), args).unwrap();
        assert!(request.sql.contains("SET @__o3 = @P2;"));
        assert_eq!(request.params, vec![RowValues::Int(5), RowValues::Int(7)]);
    }

    #[test]
    fn unknown_named_argument_is_rejected() {
        let err = build_call(&definition(), CallArgs::named([("nope", 1_i64)])).unwrap_err();
        assert!(matches!(err, SqlMiddlewareDbError::ParameterError(_)));
    }

    #[test]
    fn too_many_positional_arguments_are_rejected() {
        let err = build_call(&definition(), CallArgs::positional([1_i64, 2, 3, 4])).unwrap_err();
        assert!(matches!(err, SqlMiddlewareDbError::ParameterError(_)));
    }

    #[test]
    fn table_rows_fill_a_declared_variable() {
        let mut tvp = param("employees", 1, "EmployeeType", false);
        tvp.is_table_type = true;
        tvp.type_schema = "dbo".into();
        let def = ProcedureDefinition {
            schema: "dbo".into(),
            name: "insert_employees".into(),
            params: vec![tvp],
        };
        let rows = vec![
            Record::from([("id".to_string(), RowValues::Int(1)), ("name".to_string(), "a".into())]),
            Record::from([("id".to_string(), RowValues::Int(2))]),
        ];
        let request = build_call(&def, CallArgs::positional([ProcArg::table(rows)])).unwrap();
        assert!(request.sql.contains("DECLARE @__t1 [dbo].[EmployeeType];"));
        assert!(request.sql.contains("INSERT INTO @__t1 ([id], [name]) VALUES (@P1, @P2), (@P3, @P4);"));
        assert_eq!(request.params[3], RowValues::Null);
        assert!(request.sql.contains("@employees = @__t1"));
    }

    #[test]
    fn scalar_for_table_parameter_is_rejected() {
        let mut tvp = param("employees", 1, "EmployeeType", false);
        tvp.is_table_type = true;
        let def = ProcedureDefinition {
            schema: "dbo".into(),
            name: "p".into(),
            params: vec![tvp],
        };
        assert!(build_call(&def, CallArgs::positional([1_i64])).is_err());
    }
}
