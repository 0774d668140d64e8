use std::collections::BTreeMap;

use crate::types::{Record, RowValues};

/// One argument to a stored procedure.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcArg {
    /// A scalar value. For OUTPUT parameters this is the initial value.
    Value(RowValues),
    /// Rows for a table-valued parameter, keyed by column name.
    Table(Vec<Record>),
}

impl ProcArg {
    #[must_use]
    pub fn table(rows: impl IntoIterator<Item = Record>) -> Self {
        ProcArg::Table(rows.into_iter().collect())
    }

    pub(super) fn kind(&self) -> &'static str {
        match self {
            ProcArg::Value(_) => "a scalar value",
            ProcArg::Table(_) => "table rows",
        }
    }
}

macro_rules! scalar_arg {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for ProcArg {
                fn from(value: $ty) -> Self {
                    ProcArg::Value(value.into())
                }
            }
        )*
    };
}

scalar_arg!(RowValues, i64, i32, f64, bool, &str, String);

impl<T: Into<RowValues>> From<Option<T>> for ProcArg {
    fn from(value: Option<T>) -> Self {
        ProcArg::Value(value.into())
    }
}

/// Arguments for a procedure call: by declaration order or by parameter name.
///
/// Names match case-insensitively, with or without the leading `@`. Parameters left out are not
/// passed, so the procedure's defaults apply; OUTPUT parameters are always bound.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CallArgs {
    #[default]
    None,
    Positional(Vec<ProcArg>),
    Named(BTreeMap<String, ProcArg>),
}

impl CallArgs {
    #[must_use]
    pub fn positional<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<ProcArg>,
    {
        CallArgs::Positional(args.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn named<I, K, A>(args: I) -> Self
    where
        I: IntoIterator<Item = (K, A)>,
        K: Into<String>,
        A: Into<ProcArg>,
    {
        CallArgs::Named(
            args.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<Vec<RowValues>> for CallArgs {
    fn from(values: Vec<RowValues>) -> Self {
        CallArgs::positional(values)
    }
}

impl From<Record> for CallArgs {
    fn from(record: Record) -> Self {
        CallArgs::named(record)
    }
}
