//! # mssql-unpack
//!
//! Replicates SQL Server tables while exploding stringified composite
//! columns (values like `{a,b,c}`) into scalar columns.
//!
//! For each source table named in a JSON mapping document the library:
//!
//! - **Introspects** the source columns and their observed string lengths
//! - **Synthesizes** a destination schema with `{col}_1 .. {col}_N` sub-fields
//! - **Recreates** the destination table (drop, then create)
//! - **Transforms** every row, parsing date sub-fields and null-filling gaps
//! - **Inserts** the rows in one transaction
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mssql_unpack::{ConnectionConfig, MssqlPool, Orchestrator, UnpackConfig};
//!
//! #[tokio::main]
//! async fn main() -> mssql_unpack::Result<()> {
//!     let config = UnpackConfig::load("mapping.json")?;
//!     let connection = ConnectionConfig::from_env()?;
//!     let pool = Arc::new(MssqlPool::new(&connection).await?);
//!
//!     let orchestrator = Orchestrator::new(pool.clone(), pool, connection.schema.clone());
//!     let report = orchestrator.run(&config).await.into_result()?;
//!     println!("Inserted {} rows", report.rows_inserted);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod orchestrator;
pub mod source;
pub mod target;
pub mod transform;

// Re-exports for convenient access
pub use config::{AuthMethod, ConnectionConfig, TableMapping, UnpackConfig};
pub use self::core::{ColumnSpec, DestinationSchema, ExplosionRule, SqlValue, TableName};
pub use error::{Result, Stage, UnpackError};
pub use orchestrator::{Orchestrator, RunReport, TableReport, TableStatus};
pub use source::{MssqlPool, SourceReader};
pub use target::TableWriter;
pub use transform::{RowTemplate, RowTransformer, TransformedRow};
