//! Source table introspection and row reads.

pub(crate) mod mssql;

pub use mssql::MssqlPool;

use crate::core::identifier::TableName;
use crate::core::schema::ColumnSpec;
use crate::core::value::SqlValue;
use crate::error::Result;
use async_trait::async_trait;

/// Trait for reading source tables.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Describe the columns of `table` in ordinal order.
    ///
    /// Character columns carry their observed maximum length, falling back
    /// to the declared length when the table has no non-NULL values.
    /// Returns `SchemaNotFound` when the table does not exist.
    async fn describe(&self, table: &TableName) -> Result<Vec<ColumnSpec>>;

    /// Read every row of `table`, selecting `columns` in order.
    async fn fetch_rows(&self, table: &TableName, columns: &[ColumnSpec])
        -> Result<Vec<Vec<SqlValue>>>;
}
