//! SQL Server connection pool and source reads.

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query, Row, SqlBrowser};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};
use uuid::Uuid;

use super::SourceReader;
#[cfg(feature = "kerberos")]
use crate::config::AuthMethod as ConfigAuthMethod;
use crate::config::ConnectionConfig;
use crate::core::identifier::{quote_mssql, TableName};
use crate::core::schema::ColumnSpec;
use crate::core::value::{SqlNullType, SqlValue};
use crate::error::{Result, UnpackError};

const CATALOG_QUERY: &str = r#"
    SELECT
        COLUMN_NAME,
        DATA_TYPE,
        CAST(ISNULL(CHARACTER_MAXIMUM_LENGTH, 0) AS INT),
        CAST(ISNULL(NUMERIC_PRECISION, 0) AS INT),
        CAST(COALESCE(NUMERIC_SCALE, DATETIME_PRECISION, -1) AS INT)
    FROM INFORMATION_SCHEMA.COLUMNS
    WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
    ORDER BY ORDINAL_POSITION
"#;

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
pub(crate) struct TiberiusConnectionManager {
    config: ConnectionConfig,
}

impl TiberiusConnectionManager {
    fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        if let Some(instance) = &self.config.instance {
            config.instance_name(instance);
        }
        config.database(&self.config.database);
        config.application_name("mssql-unpack");
        match self.config.auth {
            #[cfg(feature = "kerberos")]
            ConfigAuthMethod::Integrated => {
                info!("Using integrated authentication via GSSAPI");
                config.authentication(AuthMethod::Integrated);
            }
            _ => {
                config.authentication(AuthMethod::sql_server(
                    &self.config.user,
                    &self.config.password,
                ));
            }
        }

        if self.config.encrypt {
            if self.config.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = if self.config.instance.is_some() {
            TcpStream::connect_named(&config).await?
        } else {
            TcpStream::connect(config.get_addr())
                .await
                .map_err(|e| tiberius::error::Error::Io {
                    kind: e.kind(),
                    message: e.to_string(),
                })?
        };

        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// SQL Server connection pool. Reads source tables and writes destination tables.
pub struct MssqlPool {
    pool: Pool<TiberiusConnectionManager>,
}

impl MssqlPool {
    /// Create a pool and verify that a connection can be opened.
    pub async fn new(config: &ConnectionConfig) -> Result<Self> {
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .build(manager)
            .await
            .map_err(|e| UnpackError::connection(e, "creating SQL Server pool"))?;

        // Test connection
        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| UnpackError::connection(e, "opening first connection"))?;

            conn.simple_query("SELECT 1")
                .await
                .map_err(|e| UnpackError::connection(e, "testing connection"))?
                .into_row()
                .await
                .map_err(|e| UnpackError::connection(e, "testing connection"))?;
        }

        info!(
            "Connected to SQL Server: {}:{}/{} (pool_size={})",
            config.host, config.port, config.database, config.max_connections
        );

        Ok(Self { pool })
    }

    /// Get a pooled connection.
    pub(crate) async fn get_client(
        &self,
    ) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| UnpackError::connection(e, "acquiring pooled connection"))
    }

    /// Observed `MAX(LEN(col))` of each character column, in one scan.
    ///
    /// `None` means the column holds no non-NULL values.
    async fn observed_lengths(
        &self,
        client: &mut Client<Compat<TcpStream>>,
        table: &TableName,
        columns: &[&ColumnSpec],
    ) -> Result<Vec<Option<i32>>> {
        let exprs = columns
            .iter()
            .map(|c| Ok(format!("CAST(MAX(LEN({})) AS INT)", quote_mssql(&c.name)?)))
            .collect::<Result<Vec<_>>>()?;
        let sql = format!("SELECT {} FROM {}", exprs.join(", "), table.qualified()?);
        debug!("{}", sql);

        let row = client.simple_query(sql).await?.into_row().await?;
        match row {
            Some(row) => (0..columns.len())
                .map(|i| Ok(row.try_get::<i32, _>(i)?))
                .collect(),
            None => Ok(vec![None; columns.len()]),
        }
    }
}

#[async_trait]
impl SourceReader for MssqlPool {
    async fn describe(&self, table: &TableName) -> Result<Vec<ColumnSpec>> {
        let mut client = self.get_client().await?;

        let mut query = Query::new(CATALOG_QUERY);
        query.bind(table.schema.as_str());
        query.bind(table.name.as_str());
        let rows = query.query(&mut *client).await?.into_first_result().await?;

        if rows.is_empty() {
            return Err(UnpackError::SchemaNotFound(table.to_string()));
        }

        let mut columns = rows
            .iter()
            .map(|row| {
                let name = row.try_get::<&str, _>(0)?.unwrap_or_default();
                let data_type = row.try_get::<&str, _>(1)?.unwrap_or_default();
                let mut col = ColumnSpec::new(name, data_type);
                col.declared_length = row.try_get::<i32, _>(2)?.unwrap_or(0);
                col.precision = row.try_get::<i32, _>(3)?.unwrap_or(0);
                col.scale = row.try_get::<i32, _>(4)?.unwrap_or(-1);
                Ok(col)
            })
            .collect::<Result<Vec<_>>>()?;

        let character: Vec<&ColumnSpec> = columns.iter().filter(|c| c.is_character()).collect();
        if !character.is_empty() {
            // Not atomic with fetch_rows: concurrent writers can make these lengths stale
            // before the rows are read, and a longer value then fails the insert.
            let observed = self.observed_lengths(&mut *client, table, &character).await?;
            let mut observed = observed.into_iter();
            for col in columns.iter_mut().filter(|c| c.is_character()) {
                let declared = (col.declared_length != 0).then_some(col.declared_length);
                col.max_length = observed.next().flatten().or(declared);
            }
        }

        debug!("Described {}: {} columns", table, columns.len());
        Ok(columns)
    }

    async fn fetch_rows(
        &self,
        table: &TableName,
        columns: &[ColumnSpec],
    ) -> Result<Vec<Vec<SqlValue>>> {
        let select_list = columns
            .iter()
            .map(select_expr)
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let sql = format!("SELECT {} FROM {}", select_list, table.qualified()?);
        debug!("{}", sql);

        let mut client = self.get_client().await?;
        let rows = client.simple_query(sql).await?.into_first_result().await?;

        rows.iter()
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(i, col)| convert_row_value(row, i, &col.data_type))
                    .collect()
            })
            .collect()
    }
}

/// Select-list expression for a column. `xml` is read back as text.
fn select_expr(col: &ColumnSpec) -> Result<String> {
    let quoted = quote_mssql(&col.name)?;
    Ok(match col.data_type.to_lowercase().as_str() {
        "xml" => format!("CAST({0} AS nvarchar(max)) AS {0}", quoted),
        _ => quoted,
    })
}

/// Convert a row value to SqlValue based on the declared column type.
fn convert_row_value(row: &Row, idx: usize, data_type: &str) -> Result<SqlValue> {
    let value = match data_type.to_lowercase().as_str() {
        "bit" => row.try_get::<bool, _>(idx)?.map(SqlValue::Bool),
        "tinyint" => row.try_get::<u8, _>(idx)?.map(SqlValue::U8),
        "smallint" => row.try_get::<i16, _>(idx)?.map(SqlValue::I16),
        "int" => row.try_get::<i32, _>(idx)?.map(SqlValue::I32),
        "bigint" => row.try_get::<i64, _>(idx)?.map(SqlValue::I64),
        "real" => row.try_get::<f32, _>(idx)?.map(SqlValue::F32),
        "float" => row.try_get::<f64, _>(idx)?.map(SqlValue::F64),
        "uniqueidentifier" => row.try_get::<Uuid, _>(idx)?.map(SqlValue::Uuid),
        "datetime" | "datetime2" | "smalldatetime" => {
            row.try_get::<NaiveDateTime, _>(idx)?.map(SqlValue::DateTime)
        }
        "datetimeoffset" => row
            .try_get::<DateTime<FixedOffset>, _>(idx)?
            .map(SqlValue::DateTimeOffset),
        "date" => row.try_get::<NaiveDate, _>(idx)?.map(SqlValue::Date),
        "time" => row.try_get::<NaiveTime, _>(idx)?.map(SqlValue::Time),
        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => row
            .try_get::<&[u8], _>(idx)?
            .map(|v| SqlValue::Bytes(v.to_vec())),
        "decimal" | "numeric" | "money" | "smallmoney" => match row.try_get::<Decimal, _>(idx) {
            Ok(v) => v.map(SqlValue::Decimal),
            // money arrives as a float
            Err(_) => row.try_get::<f64, _>(idx)?.map(|f| {
                Decimal::try_from(f)
                    .map(SqlValue::Decimal)
                    .unwrap_or(SqlValue::F64(f))
            }),
        },
        _ => row
            .try_get::<&str, _>(idx)?
            .map(|s| SqlValue::String(s.to_string())),
    };

    Ok(value.unwrap_or_else(|| SqlValue::Null(SqlNullType::for_data_type(data_type))))
}
