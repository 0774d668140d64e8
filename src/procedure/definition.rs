use crate::error::SqlMiddlewareDbError;
use crate::results::BatchResults;
use crate::translation::quote_ident;
use crate::types::RowValues;

/// Catalog query resolving a procedure and its parameters. `@P1` is the name as given.
pub(super) const DESCRIBE_PROCEDURE_SQL: &str = "SELECT s.name AS schema_name, o.name AS proc_name, \
     p.parameter_id, p.name AS param_name, t.name AS type_name, p.max_length, p.precision, \
     p.scale, p.is_output, t.is_table_type, ts.name AS type_schema \
     FROM sys.objects o \
     JOIN sys.schemas s ON s.schema_id = o.schema_id \
     LEFT JOIN sys.parameters p ON p.object_id = o.object_id AND p.parameter_id > 0 \
     LEFT JOIN sys.types t ON t.user_type_id = p.user_type_id \
     LEFT JOIN sys.schemas ts ON ts.schema_id = t.schema_id \
     WHERE o.object_id = OBJECT_ID(@P1) AND o.type IN ('P', 'PC') \
     ORDER BY p.parameter_id";

/// One declared procedure parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureParam {
    /// Name without the leading `@`.
    pub name: String,
    /// 1-based declaration position.
    pub ordinal: usize,
    pub type_name: String,
    pub type_schema: String,
    /// Declared length in bytes; `-1` for `(max)`.
    pub max_length: i64,
    pub precision: u8,
    pub scale: u8,
    pub is_output: bool,
    pub is_table_type: bool,
}

impl ProcedureParam {
    /// The parameter's type as it would be written in a `DECLARE`.
    #[must_use]
    pub fn declared_type(&self) -> String {
        if self.is_table_type {
            return format!("{}.{}", quote_ident(&self.type_schema), quote_ident(&self.type_name));
        }
        let base = self.type_name.to_ascii_lowercase();
        let length = |divisor: i64| {
            if self.max_length < 0 {
                "max".to_string()
            } else {
                (self.max_length / divisor).max(1).to_string()
            }
        };
        match base.as_str() {
            "char" | "varchar" | "binary" | "varbinary" => format!("{base}({})", length(1)),
            "nchar" | "nvarchar" => format!("{base}({})", length(2)),
            "decimal" | "numeric" => format!("{base}({}, {})", self.precision, self.scale),
            "datetime2" | "time" | "datetimeoffset" => format!("{base}({})", self.scale),
            _ => base,
        }
    }

    pub(super) fn matches(&self, key: &str) -> bool {
        self.name
            .eq_ignore_ascii_case(key.strip_prefix('@').unwrap_or(key))
    }
}

/// A resolved stored procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureDefinition {
    pub schema: String,
    pub name: String,
    pub params: Vec<ProcedureParam>,
}

impl ProcedureDefinition {
    /// `[schema].[name]`
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }

    #[must_use]
    pub fn outputs(&self) -> impl Iterator<Item = &ProcedureParam> {
        self.params.iter().filter(|p| p.is_output)
    }

    /// Build a definition from the catalog query's rows; `None` when the procedure was not found.
    pub(super) fn from_catalog(rows: &BatchResults) -> Result<Option<Self>, SqlMiddlewareDbError> {
        let rows = rows.first();
        let Some(head) = rows.first() else {
            return Ok(None);
        };
        let text = |row: &crate::results::CustomDbRow, col: &str| {
            row.get(col)
                .and_then(RowValues::as_text)
                .map(str::to_string)
                .unwrap_or_default()
        };
        let int = |row: &crate::results::CustomDbRow, col: &str| {
            row.get(col).and_then(RowValues::as_int).copied().unwrap_or(0)
        };
        let flag = |row: &crate::results::CustomDbRow, col: &str| {
            row.get(col).and_then(RowValues::as_bool).copied().unwrap_or(false)
        };

        let mut params = Vec::new();
        for row in rows {
            if row.get("parameter_id").is_none_or(RowValues::is_null) {
                continue;
            }
            let name = text(row, "param_name");
            let ordinal = usize::try_from(int(row, "parameter_id")).map_err(|e| {
                SqlMiddlewareDbError::ExecutionError(format!("invalid parameter ordinal: {e}"))
            })?;
            params.push(ProcedureParam {
                name: name.trim_start_matches('@').to_string(),
                ordinal,
                type_name: text(row, "type_name"),
                type_schema: text(row, "type_schema"),
                max_length: int(row, "max_length"),
                precision: u8::try_from(int(row, "precision")).unwrap_or(0),
                scale: u8::try_from(int(row, "scale")).unwrap_or(0),
                is_output: flag(row, "is_output"),
                is_table_type: flag(row, "is_table_type"),
            });
        }
        Ok(Some(Self {
            schema: text(head, "schema_name"),
            name: text(head, "proc_name"),
            params,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(type_name: &str, max_length: i64) -> ProcedureParam {
        ProcedureParam {
            name: "p".into(),
            ordinal: 1,
            type_name: type_name.into(),
            type_schema: "sys".into(),
            max_length,
            precision: 18,
            scale: 2,
            is_output: false,
            is_table_type: false,
        }
    }

    #[test]
    fn declared_types_carry_lengths() {
        assert_eq!(param("varchar", 50).declared_type(), "varchar(50)");
        assert_eq!(param("nvarchar", 100).declared_type(), "nvarchar(50)");
        assert_eq!(param("nvarchar", -1).declared_type(), "nvarchar(max)");
        assert_eq!(param("decimal", 9).declared_type(), "decimal(18, 2)");
        assert_eq!(param("int", 4).declared_type(), "int");
    }

    #[test]
    fn table_types_are_schema_qualified() {
        let mut p = param("EmployeeType", -1);
        p.is_table_type = true;
        p.type_schema = "dbo".into();
        assert_eq!(p.declared_type(), "[dbo].[EmployeeType]");
    }

    #[test]
    fn keyed_names_match_with_or_without_at_sign() {
        let p = param("int", 4);
        assert!(p.matches("@P"));
        assert!(p.matches("p"));
        assert!(!p.matches("q"));
    }
}
