//! Core types shared by the introspection, transform, and load stages.
//!
//! - [`identifier`]: SQL Server identifier validation and quoting
//! - [`schema`]: column metadata, explosion rules, destination schema synthesis
//! - [`value`]: SQL value representation

pub mod identifier;
pub mod schema;
pub mod value;

pub use identifier::{quote_mssql, TableName};
pub use schema::{
    synthesize, ColumnKind, ColumnOrigin, ColumnSpec, DestinationSchema, ExplosionRule,
    OutputColumn,
};
pub use value::{SqlNullType, SqlValue};
