//! Identifier validation and quoting for SQL Server statements.
//!
//! Table and column names in the mapping document end up in DDL and DML
//! text, where they cannot be bound as parameters. Every identifier is
//! therefore validated and bracket-quoted before it is written into a
//! statement; data values always travel as bound parameters.
//!
//! # Security
//!
//! The mapping document is trusted to name tables, but quoting means a
//! hostile or mistyped name produces an invalid-object error instead of
//! executing arbitrary SQL.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UnpackError};

/// Maximum identifier length for SQL Server (`sysname` is 128 characters).
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier for security issues.
///
/// Rejects:
/// - Empty identifiers
/// - Identifiers containing null bytes (injection vector)
/// - Identifiers exceeding maximum length
///
/// # Errors
///
/// Returns `UnpackError::Config` for invalid identifiers with a descriptive message.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(UnpackError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(UnpackError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(UnpackError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} characters: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }

    Ok(())
}

/// Quote a SQL Server identifier using brackets.
///
/// Escapes closing brackets by doubling them and wraps in brackets.
/// Validates the identifier before quoting.
///
/// # Examples
///
/// ```
/// use mssql_unpack::core::identifier::quote_mssql;
///
/// assert_eq!(quote_mssql("users").unwrap(), "[users]");
/// assert_eq!(quote_mssql("table]name").unwrap(), "[table]]name]");
/// ```
pub fn quote_mssql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// Qualify a SQL Server table name with schema.
///
/// Returns `[schema].[table]` with proper quoting.
pub fn qualify_mssql(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mssql(schema)?, quote_mssql(table)?))
}

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableName {
    /// Schema name (e.g. "dbo").
    pub schema: String,

    /// Table name.
    pub name: String,
}

impl TableName {
    /// Create a table name from its parts, validating both.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let table = Self {
            schema: schema.into(),
            name: name.into(),
        };
        validate_identifier(&table.schema)?;
        validate_identifier(&table.name)?;
        Ok(table)
    }

    /// Parse `table` or `schema.table`, using `default_schema` for the former.
    ///
    /// Only the first dot separates schema from table, so dotted table
    /// names must be written with an explicit schema. Surrounding brackets
    /// on either part are removed.
    pub fn parse(raw: &str, default_schema: &str) -> Result<Self> {
        let raw = raw.trim();
        match raw.split_once('.') {
            Some((schema, name)) => Self::new(unbracket(schema), unbracket(name)),
            None => Self::new(default_schema, unbracket(raw)),
        }
    }

    /// Bracket-quoted `[schema].[table]` for use in statements.
    pub fn qualified(&self) -> Result<String> {
        qualify_mssql(&self.schema, &self.name)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

fn unbracket(part: &str) -> &str {
    let part = part.trim();
    part.strip_prefix('[')
        .and_then(|p| p.strip_suffix(']'))
        .unwrap_or(part)
}
