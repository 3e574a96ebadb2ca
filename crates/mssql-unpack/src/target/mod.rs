//! Destination table (re)creation and batched inserts.

mod mssql;

use crate::core::identifier::TableName;
use crate::core::schema::DestinationSchema;
use crate::error::Result;
use crate::transform::{RowTemplate, TransformedRow};
use async_trait::async_trait;

/// Bound parameters available to one statement. `sp_executesql` uses two of
/// SQL Server's 2100 slots.
pub const MAX_PARAMETERS: usize = 2098;

/// Row limit of a single `INSERT ... VALUES` list.
pub const MAX_VALUES_ROWS: usize = 1000;

/// Trait for writing destination tables.
#[async_trait]
pub trait TableWriter: Send + Sync {
    /// Drop `table` if it exists and create it with `schema`.
    ///
    /// The two statements commit independently; running this twice leaves
    /// the same empty table.
    async fn recreate(&self, table: &TableName, schema: &DestinationSchema) -> Result<()>;

    /// Insert all `rows` in one transaction. Returns the number of rows inserted.
    async fn insert_batch(
        &self,
        table: &TableName,
        template: &RowTemplate,
        rows: Vec<TransformedRow>,
    ) -> Result<u64>;
}

/// Rows per `INSERT` statement for a table of `columns` columns.
pub fn rows_per_statement(columns: usize) -> usize {
    if columns == 0 {
        return MAX_VALUES_ROWS;
    }
    (MAX_PARAMETERS / columns).clamp(1, MAX_VALUES_ROWS)
}

/// Multi-row `VALUES` list with numbered placeholders:
/// `(@P1, @P2), (@P3, @P4)` for 2 rows of 2 columns.
pub fn values_clause(rows: usize, columns: usize) -> String {
    let mut param = 0;
    (0..rows)
        .map(|_| {
            let placeholders: Vec<String> = (0..columns)
                .map(|_| {
                    param += 1;
                    format!("@P{}", param)
                })
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_per_statement_respects_parameter_limit() {
        assert_eq!(rows_per_statement(3), 699);
        assert_eq!(rows_per_statement(10), 209);
        assert_eq!(rows_per_statement(2098), 1);
        assert_eq!(rows_per_statement(5000), 1);
    }

    #[test]
    fn test_rows_per_statement_respects_row_limit() {
        assert_eq!(rows_per_statement(1), 1000);
        assert_eq!(rows_per_statement(2), 1000);
        assert_eq!(rows_per_statement(0), 1000);
    }

    #[test]
    fn test_values_clause() {
        assert_eq!(values_clause(1, 3), "(@P1, @P2, @P3)");
        assert_eq!(values_clause(2, 2), "(@P1, @P2), (@P3, @P4)");
    }

    #[test]
    fn test_values_clause_stays_within_limit() {
        let columns = 7;
        let rows = rows_per_statement(columns);
        let clause = values_clause(rows, columns);
        let last = format!("@P{}", rows * columns);
        assert!(clause.ends_with(&format!("{})", last)));
        assert!(rows * columns <= MAX_PARAMETERS);
    }
}
