mod aggregator;
mod batch;
mod column;
mod result_set;
mod row;

pub use aggregator::{AggregateStep, ResultAggregator};
pub use batch::{BatchResults, RawResults, RawRowset};
pub use column::{ClientType, ColumnMeta};
pub use result_set::ResultSet;
pub use row::CustomDbRow;
