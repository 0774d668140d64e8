use serde::Serialize;

/// Client-facing type tag of a column, derived from its SQL type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Number,
    Text,
    Boolean,
    Date,
    Binary,
    Unknown,
}

impl ClientType {
    /// Map a SQL type name (`int`, `varchar`, `int identity`, ...) to its client tag.
    ///
    /// Only the first word is considered, so decorations such as `identity` are ignored.
    #[must_use]
    pub fn from_sql_type(sql_type: &str) -> Self {
        let base = sql_type
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match base.as_str() {
            "tinyint" | "smallint" | "int" | "bigint" | "decimal" | "numeric" | "float"
            | "real" | "money" | "smallmoney" => ClientType::Number,
            "char" | "varchar" | "nchar" | "nvarchar" | "text" | "ntext" | "xml"
            | "uniqueidentifier" | "sql_variant" => ClientType::Text,
            "bit" => ClientType::Boolean,
            "date" | "datetime" | "datetime2" | "smalldatetime" | "datetimeoffset" | "time" => {
                ClientType::Date
            }
            "binary" | "varbinary" | "image" | "udt" | "timestamp" | "rowversion" => {
                ClientType::Binary
            }
            _ => ClientType::Unknown,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ClientType::Number => "number",
            ClientType::Text => "text",
            ClientType::Boolean => "boolean",
            ClientType::Date => "date",
            ClientType::Binary => "binary",
            ClientType::Unknown => "unknown",
        }
    }
}

/// Metadata for one column of a result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMeta {
    pub name: String,
    /// Declared size (characters for text, precision for numbers); 0 when unknown.
    pub size: usize,
    pub nullable: bool,
    #[serde(rename = "type")]
    pub client_type: ClientType,
    #[serde(rename = "sqlType")]
    pub sql_type: String,
}

impl ColumnMeta {
    #[must_use]
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        let sql_type = sql_type.into();
        Self {
            name: name.into(),
            size: 0,
            nullable: true,
            client_type: ClientType::from_sql_type(&sql_type),
            sql_type,
        }
    }

    #[must_use]
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    #[must_use]
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}
