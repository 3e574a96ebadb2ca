//! SQL Server destination writer.

use async_trait::async_trait;
use bb8::PooledConnection;
use tiberius::ToSql;
use tracing::{debug, info, warn};

use super::{rows_per_statement, values_clause, TableWriter};
use crate::core::identifier::{quote_mssql, TableName};
use crate::core::schema::DestinationSchema;
use crate::core::value::{SqlNullType, SqlValue};
use crate::error::{Result, UnpackError};
use crate::source::mssql::TiberiusConnectionManager;
use crate::source::MssqlPool;
use crate::transform::{RowTemplate, TransformedRow};

type Connection<'a> = PooledConnection<'a, TiberiusConnectionManager>;

impl MssqlPool {
    /// Run one statement as its own batch on a fresh pooled connection.
    async fn execute_batch(&self, table: &TableName, sql: &str) -> Result<()> {
        debug!("{}", sql);
        let mut conn = self.get_client().await?;
        conn.simple_query(sql)
            .await
            .map_err(|e| UnpackError::load(table.to_string(), e.to_string()))?
            .into_results()
            .await
            .map_err(|e| UnpackError::load(table.to_string(), e.to_string()))?;
        Ok(())
    }

    async fn insert_all(
        conn: &mut Connection<'_>,
        table: &TableName,
        template: &RowTemplate,
        rows: &[TransformedRow],
    ) -> Result<u64> {
        let qualified = table.qualified()?;
        let col_str = template
            .columns()
            .iter()
            .map(|c| quote_mssql(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");

        let batch_size = rows_per_statement(template.len());
        let mut inserted = 0u64;

        for batch in rows.chunks(batch_size) {
            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                qualified,
                col_str,
                values_clause(batch.len(), template.len())
            );

            let params: Vec<Box<dyn ToSql>> = batch
                .iter()
                .flat_map(|row| row.values().iter().map(sql_value_to_sql_param))
                .collect();
            let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

            conn.execute(sql.as_str(), &param_refs).await.map_err(|e| {
                UnpackError::load(
                    table.to_string(),
                    format!(
                        "INSERT of rows {}..{}: {}",
                        inserted + 1,
                        inserted + batch.len() as u64,
                        e
                    ),
                )
            })?;

            inserted += batch.len() as u64;
        }

        debug!(
            "Inserted {} rows into {} (batch size: {})",
            inserted, table, batch_size
        );
        Ok(inserted)
    }
}

#[async_trait]
impl TableWriter for MssqlPool {
    async fn recreate(&self, table: &TableName, schema: &DestinationSchema) -> Result<()> {
        self.execute_batch(table, &format!("DROP TABLE IF EXISTS {}", table.qualified()?))
            .await?;
        self.execute_batch(table, &schema.create_table_sql(table)?)
            .await?;

        info!("Created {} with {} columns", table, schema.len());
        Ok(())
    }

    async fn insert_batch(
        &self,
        table: &TableName,
        template: &RowTemplate,
        rows: Vec<TransformedRow>,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        for (i, row) in rows.iter().enumerate() {
            template
                .check(row)
                .map_err(|e| UnpackError::load(table.to_string(), format!("row {}: {}", i + 1, e)))?;
        }

        let mut conn = self.get_client().await?;

        conn.simple_query("BEGIN TRANSACTION")
            .await
            .map_err(|e| UnpackError::load(table.to_string(), format!("begin transaction: {}", e)))?
            .into_results()
            .await?;

        let inserted = match Self::insert_all(&mut conn, table, template, &rows).await {
            Ok(inserted) => inserted,
            Err(e) => {
                if let Ok(stream) = conn.simple_query("ROLLBACK TRANSACTION").await {
                    let _ = stream.into_results().await;
                }
                return Err(e);
            }
        };

        conn.simple_query("COMMIT TRANSACTION")
            .await
            .map_err(|e| UnpackError::load(table.to_string(), format!("commit transaction: {}", e)))?
            .into_results()
            .await?;

        Ok(inserted)
    }
}

/// Convert a value to a bound parameter. NULLs keep their column type so
/// SQL Server does not attempt a text conversion.
fn sql_value_to_sql_param(value: &SqlValue) -> Box<dyn ToSql> {
    match value {
        SqlValue::Null(null_type) => null_param(*null_type),
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::U8(i) => Box::new(*i),
        SqlValue::I16(i) => Box::new(*i),
        SqlValue::I32(i) => Box::new(*i),
        SqlValue::I64(i) => Box::new(*i),
        SqlValue::F32(f) => {
            if f.is_finite() {
                Box::new(*f)
            } else {
                warn!("Binding non-finite F32 as NULL");
                Box::new(Option::<f32>::None)
            }
        }
        SqlValue::F64(f) => {
            if f.is_finite() {
                Box::new(*f)
            } else {
                warn!("Binding non-finite F64 as NULL");
                Box::new(Option::<f64>::None)
            }
        }
        SqlValue::String(s) => Box::new(s.clone()),
        SqlValue::Bytes(b) => Box::new(b.clone()),
        SqlValue::Uuid(u) => Box::new(*u),
        SqlValue::Decimal(d) => Box::new(*d),
        SqlValue::DateTime(dt) => Box::new(*dt),
        SqlValue::DateTimeOffset(dto) => Box::new(*dto),
        SqlValue::Date(d) => Box::new(*d),
        SqlValue::Time(t) => Box::new(*t),
    }
}

fn null_param(null_type: SqlNullType) -> Box<dyn ToSql> {
    match null_type {
        SqlNullType::Bool => Box::new(Option::<bool>::None),
        SqlNullType::U8 => Box::new(Option::<u8>::None),
        SqlNullType::I16 => Box::new(Option::<i16>::None),
        SqlNullType::I32 => Box::new(Option::<i32>::None),
        SqlNullType::I64 => Box::new(Option::<i64>::None),
        SqlNullType::F32 => Box::new(Option::<f32>::None),
        SqlNullType::F64 => Box::new(Option::<f64>::None),
        SqlNullType::String => Box::new(Option::<String>::None),
        SqlNullType::Bytes => Box::new(Option::<Vec<u8>>::None),
        SqlNullType::Uuid => Box::new(Option::<uuid::Uuid>::None),
        SqlNullType::Decimal => Box::new(Option::<rust_decimal::Decimal>::None),
        SqlNullType::DateTime => Box::new(Option::<chrono::NaiveDateTime>::None),
        SqlNullType::DateTimeOffset => {
            Box::new(Option::<chrono::DateTime<chrono::FixedOffset>>::None)
        }
        SqlNullType::Date => Box::new(Option::<chrono::NaiveDate>::None),
        SqlNullType::Time => Box::new(Option::<chrono::NaiveTime>::None),
    }
}
