//! Error types for the unpack library.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Exit code for configuration errors (bad document, bad environment).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code when the database cannot be reached.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code when a source table does not exist.
pub const EXIT_SCHEMA_NOT_FOUND: u8 = 3;
/// Exit code for DDL/DML failures.
pub const EXIT_LOAD_ERROR: u8 = 4;
/// Exit code when the run finished but at least one table failed.
pub const EXIT_TABLES_FAILED: u8 = 5;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for unpack operations.
#[derive(Error, Debug)]
pub enum UnpackError {
    /// Configuration error (malformed document, unknown keys, bad identifiers)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database unreachable or pool exhausted
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection { message: String, context: String },

    /// Source table absent from the catalog
    #[error("Source table {0} not found")]
    SchemaNotFound(String),

    /// DDL or DML failure for a specific table
    #[error("Load failed for table {table}: {message}")]
    Load { table: String, message: String },

    /// Driver-level error from SQL Server
    #[error("Database error: {0}")]
    Database(#[from] tiberius::error::Error),

    /// The run completed but some tables failed
    #[error("{} table(s) failed: {}", .failed.len(), .failed.join(", "))]
    TablesFailed { failed: Vec<String> },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UnpackError {
    /// Create a Connection error with context about where it occurred
    pub fn connection(message: impl fmt::Display, context: impl Into<String>) -> Self {
        UnpackError::Connection {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Load error
    pub fn load(table: impl Into<String>, message: impl Into<String>) -> Self {
        UnpackError::Load {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            UnpackError::Config(_) | UnpackError::Json(_) => EXIT_CONFIG_ERROR,
            UnpackError::Connection { .. } => EXIT_CONNECTION_ERROR,
            UnpackError::SchemaNotFound(_) => EXIT_SCHEMA_NOT_FOUND,
            UnpackError::Load { .. } | UnpackError::Database(_) => EXIT_LOAD_ERROR,
            UnpackError::TablesFailed { .. } => EXIT_TABLES_FAILED,
            UnpackError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for unpack operations.
pub type Result<T> = std::result::Result<T, UnpackError>;

/// Processing stage of a single table, used to locate failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Introspect,
    Synthesize,
    Create,
    Fetch,
    Transform,
    Insert,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Introspect => "introspect",
            Stage::Synthesize => "synthesize",
            Stage::Create => "create",
            Stage::Fetch => "fetch",
            Stage::Transform => "transform",
            Stage::Insert => "insert",
        };
        f.write_str(name)
    }
}
