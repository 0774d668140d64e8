use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tiberius::{Column, ColumnData, ColumnType, Query, Row};

use crate::results::ColumnMeta;
use crate::types::RowValues;

fn sql_type_name(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Bit | ColumnType::Bitn => "bit",
        ColumnType::Int1 => "tinyint",
        ColumnType::Int2 => "smallint",
        ColumnType::Int4 => "int",
        ColumnType::Int8 => "bigint",
        ColumnType::Intn => "int",
        ColumnType::Float4 => "real",
        ColumnType::Float8 | ColumnType::Floatn => "float",
        ColumnType::Money | ColumnType::Money4 => "money",
        ColumnType::Decimaln => "decimal",
        ColumnType::Numericn => "numeric",
        ColumnType::Datetime | ColumnType::Datetimen => "datetime",
        ColumnType::Datetime4 => "smalldatetime",
        ColumnType::Datetime2 => "datetime2",
        ColumnType::Daten => "date",
        ColumnType::Timen => "time",
        ColumnType::DatetimeOffsetn => "datetimeoffset",
        ColumnType::Guid => "uniqueidentifier",
        ColumnType::BigVarChar => "varchar",
        ColumnType::BigChar => "char",
        ColumnType::NVarchar => "nvarchar",
        ColumnType::NChar => "nchar",
        ColumnType::Text => "text",
        ColumnType::NText => "ntext",
        ColumnType::Xml => "xml",
        ColumnType::BigVarBin => "varbinary",
        ColumnType::BigBinary => "binary",
        ColumnType::Image => "image",
        _ => "unknown",
    }
}

/// Column metadata for a result set. Empty names become `ColumnN` (1-based).
pub(super) fn column_meta(columns: &[Column]) -> Vec<ColumnMeta> {
    columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let name = if column.name().is_empty() {
                format!("Column{}", idx + 1)
            } else {
                column.name().to_string()
            };
            ColumnMeta::new(name, sql_type_name(column.column_type()))
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn convert_data(data: &ColumnData<'_>) -> RowValues {
    match data {
        ColumnData::Bit(Some(b)) => RowValues::Bool(*b),
        ColumnData::U8(Some(v)) => RowValues::Int(i64::from(*v)),
        ColumnData::I16(Some(v)) => RowValues::Int(i64::from(*v)),
        ColumnData::I32(Some(v)) => RowValues::Int(i64::from(*v)),
        ColumnData::I64(Some(v)) => RowValues::Int(*v),
        ColumnData::F32(Some(v)) => RowValues::Float(f64::from(*v)),
        ColumnData::F64(Some(v)) => RowValues::Float(*v),
        ColumnData::Numeric(Some(n)) => {
            if n.scale() == 0 {
                if let Ok(v) = i64::try_from(n.value()) {
                    return RowValues::Int(v);
                }
            }
            RowValues::Float(n.value() as f64 / 10f64.powi(i32::from(n.scale())))
        }
        ColumnData::String(Some(s)) => RowValues::Text(s.to_string()),
        ColumnData::Guid(Some(g)) => RowValues::Text(g.to_string()),
        ColumnData::Binary(Some(b)) => RowValues::Blob(b.to_vec()),
        ColumnData::Xml(Some(xml)) => RowValues::Text(xml.to_string()),
        _ => RowValues::Null,
    }
}

/// Decode a row. Date and time columns go through tiberius' chrono conversions; naive
/// timestamps are left for the sink to materialize.
pub(super) fn convert_row(row: &Row) -> Vec<RowValues> {
    row.cells()
        .enumerate()
        .map(|(idx, (_, data))| match data {
            ColumnData::DateTime(Some(_))
            | ColumnData::SmallDateTime(Some(_))
            | ColumnData::DateTime2(Some(_)) => row
                .try_get::<NaiveDateTime, _>(idx)
                .ok()
                .flatten()
                .map_or(RowValues::Null, RowValues::Timestamp),
            ColumnData::DateTimeOffset(Some(_)) => row
                .try_get::<chrono::DateTime<chrono::Utc>, _>(idx)
                .ok()
                .flatten()
                .map_or(RowValues::Null, RowValues::DateTime),
            ColumnData::Date(Some(_)) => row
                .try_get::<NaiveDate, _>(idx)
                .ok()
                .flatten()
                .map_or(RowValues::Null, |d| RowValues::Timestamp(d.and_time(NaiveTime::MIN))),
            ColumnData::Time(Some(_)) => row
                .try_get::<NaiveTime, _>(idx)
                .ok()
                .flatten()
                .map_or(RowValues::Null, |t| {
                    RowValues::Text(t.format("%H:%M:%S%.f").to_string())
                }),
            other => convert_data(other),
        })
        .collect()
}

/// Bind parameters in order. Timestamps are sent as ISO-8601 text; `DateTime` values have
/// already been shifted to the connection's wall clock by the worker, any left are sent as UTC.
pub(super) fn bind_params<'a>(sql: &'a str, params: &[RowValues]) -> Query<'a> {
    let mut query = Query::new(sql);
    for param in params {
        match param {
            RowValues::Int(i) => query.bind(*i),
            RowValues::Float(f) => query.bind(*f),
            RowValues::Text(s) => query.bind(s.clone()),
            RowValues::Bool(b) => query.bind(*b),
            RowValues::Timestamp(dt) => query.bind(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            RowValues::DateTime(dt) => {
                query.bind(dt.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f").to_string());
            }
            RowValues::Null => query.bind(Option::<String>::None),
            RowValues::JSON(value) => query.bind(value.to_string()),
            RowValues::Blob(bytes) => query.bind(bytes.clone()),
        }
    }
    query
}
