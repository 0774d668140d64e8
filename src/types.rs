use std::collections::BTreeMap;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde_json::Value as JsonValue;

/// Values that can be stored in a database row or used as query parameters.
///
/// The same enum is used for parameters, decoded columns, procedure arguments and
/// bulk-table records:
/// ```rust
/// use mssql_middleware::prelude::*;
///
/// let params = vec![
///     RowValues::Int(1),
///     RowValues::Text("alice".into()),
///     RowValues::Bool(true),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Naive timestamp, as decoded from the wire or supplied by the caller
    Timestamp(NaiveDateTime),
    /// Timestamp pinned to UTC after row materialization
    DateTime(DateTime<Utc>),
    /// NULL value
    Null,
    /// JSON value
    JSON(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
}

/// A row-shaped object: column name to value.
///
/// Used for keyed procedure arguments, table-valued parameter rows and bulk table rows.
pub type Record = BTreeMap<String, RowValues>;

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let RowValues::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<&bool> {
        if let RowValues::Bool(value) = self {
            return Some(value);
        } else if let Some(i) = self.as_int() {
            if *i == 1 {
                return Some(&true);
            } else if *i == 0 {
                return Some(&false);
            }
        }
        None
    }

    /// Timestamp view of the value; materialized UTC values are returned as naive UTC.
    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            RowValues::Timestamp(value) => Some(*value),
            RowValues::DateTime(value) => Some(value.naive_utc()),
            RowValues::Text(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
                .ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        if let RowValues::DateTime(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            RowValues::Float(value) => Some(*value),
            #[allow(clippy::cast_precision_loss)]
            RowValues::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let RowValues::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// The value as a row would carry it back: naive timestamps become [`RowValues::DateTime`].
    #[must_use]
    pub fn materialized(&self, use_utc: bool) -> RowValues {
        match self {
            RowValues::Timestamp(naive) => {
                RowValues::DateTime(materialize_timestamp(*naive, use_utc))
            }
            other => other.clone(),
        }
    }

    /// The value as a session receives it: [`RowValues::DateTime`] becomes a naive wall-clock
    /// timestamp in the connection's zone.
    #[must_use]
    pub fn to_wall_clock(&self, use_utc: bool) -> RowValues {
        match self {
            RowValues::DateTime(dt) => RowValues::Timestamp(wall_clock(dt, use_utc)),
            other => other.clone(),
        }
    }

    /// Render the value as JSON, used by the probe binary's reports.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            RowValues::Int(i) => JsonValue::from(*i),
            RowValues::Float(f) => JsonValue::from(*f),
            RowValues::Text(s) => JsonValue::from(s.as_str()),
            RowValues::Bool(b) => JsonValue::from(*b),
            RowValues::Timestamp(ts) => JsonValue::from(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            RowValues::DateTime(dt) => JsonValue::from(dt.to_rfc3339()),
            RowValues::Null => JsonValue::Null,
            RowValues::JSON(v) => v.clone(),
            RowValues::Blob(bytes) => JsonValue::from(
                bytes.iter().map(|b| format!("{b:02x}")).collect::<String>(),
            ),
        }
    }
}

impl From<i64> for RowValues {
    fn from(value: i64) -> Self {
        RowValues::Int(value)
    }
}

impl From<i32> for RowValues {
    fn from(value: i32) -> Self {
        RowValues::Int(i64::from(value))
    }
}

impl From<f64> for RowValues {
    fn from(value: f64) -> Self {
        RowValues::Float(value)
    }
}

impl From<bool> for RowValues {
    fn from(value: bool) -> Self {
        RowValues::Bool(value)
    }
}

impl From<&str> for RowValues {
    fn from(value: &str) -> Self {
        RowValues::Text(value.to_string())
    }
}

impl From<String> for RowValues {
    fn from(value: String) -> Self {
        RowValues::Text(value)
    }
}

impl From<DateTime<Utc>> for RowValues {
    fn from(value: DateTime<Utc>) -> Self {
        RowValues::DateTime(value)
    }
}

impl<T: Into<RowValues>> From<Option<T>> for RowValues {
    fn from(value: Option<T>) -> Self {
        value.map_or(RowValues::Null, Into::into)
    }
}

/// Pin a naive server timestamp to UTC.
///
/// With `use_utc` the value is taken as already being UTC; otherwise it is read as local
/// wall-clock time. Ambiguous local times resolve to the earlier instant and nonexistent
/// ones fall back to UTC.
#[must_use]
pub fn materialize_timestamp(naive: NaiveDateTime, use_utc: bool) -> DateTime<Utc> {
    if use_utc {
        return Utc.from_utc_datetime(&naive);
    }
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map_or_else(|| Utc.from_utc_datetime(&naive), |dt| dt.with_timezone(&Utc))
}

/// The wall-clock reading of `dt` a server session stores, the inverse of
/// [`materialize_timestamp`].
#[must_use]
pub fn wall_clock(dt: &DateTime<Utc>, use_utc: bool) -> NaiveDateTime {
    if use_utc {
        dt.naive_utc()
    } else {
        dt.with_timezone(&Local).naive_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn utc_materialization_keeps_wall_clock() {
        let naive = NaiveDate::from_ymd_opt(2021, 4, 27)
            .and_then(|d| d.and_hms_milli_opt(3, 5, 38, 120))
            .unwrap();
        let dt = materialize_timestamp(naive, true);
        assert_eq!(dt.naive_utc(), naive);
    }

    #[test]
    fn wall_clock_inverts_materialization_in_both_zones() {
        let naive = NaiveDate::from_ymd_opt(2021, 7, 15)
            .and_then(|d| d.and_hms_micro_opt(12, 34, 56, 789_456))
            .unwrap();
        for use_utc in [true, false] {
            let dt = materialize_timestamp(naive, use_utc);
            assert_eq!(wall_clock(&dt, use_utc), naive);
            let bound = RowValues::DateTime(dt).to_wall_clock(use_utc);
            assert_eq!(bound, RowValues::Timestamp(naive));
            assert_eq!(bound.materialized(use_utc), RowValues::DateTime(dt));
        }
    }

    #[test]
    fn materialized_leaves_other_values_alone() {
        assert_eq!(RowValues::Int(3).materialized(false), RowValues::Int(3));
        assert_eq!(RowValues::Null.to_wall_clock(true), RowValues::Null);
    }

    #[test]
    fn bool_view_accepts_bit_integers() {
        assert_eq!(RowValues::Int(1).as_bool(), Some(&true));
        assert_eq!(RowValues::Int(0).as_bool(), Some(&false));
        assert_eq!(RowValues::Int(2).as_bool(), None);
    }

    #[test]
    fn option_into_row_values() {
        let none: Option<i64> = None;
        assert!(RowValues::from(none).is_null());
        assert_eq!(RowValues::from(Some("x")), RowValues::Text("x".into()));
    }
}
