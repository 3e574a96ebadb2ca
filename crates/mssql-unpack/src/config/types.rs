//! Configuration type definitions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::schema::ExplosionRule;

/// Mapping for one source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableMapping {
    /// Destination table (`table` or `schema.table`).
    pub destination_table_name: String,

    /// Stringified columns and the number of sub-fields to extract from each.
    pub stringified_columns: BTreeMap<String, usize>,

    /// Stringified columns whose sub-fields are `YYYY-MM-DD` dates.
    #[serde(rename = "colDate", default)]
    pub col_date: Vec<String>,
}

impl TableMapping {
    /// Explosion rules for this mapping, ordered by source column name.
    pub fn explosion_rules(&self) -> Vec<ExplosionRule> {
        self.stringified_columns
            .iter()
            .map(|(column, count)| ExplosionRule {
                source_column: column.clone(),
                count: *count,
                is_date: self.col_date.iter().any(|c| c == column),
            })
            .collect()
    }
}

/// Table-mapping document: source table to [`TableMapping`], in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackConfig {
    pub tables: Vec<(String, TableMapping)>,
}

impl UnpackConfig {
    /// Number of mapped tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Check if the document maps no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Iterate over `(source, mapping)` pairs in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TableMapping)> {
        self.tables.iter().map(|(source, m)| (source.as_str(), m))
    }
}

/// How connections authenticate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// SQL login with `DB_USERNAME`/`DB_PASSWORD`.
    #[default]
    SqlServer,
    /// Integrated (Kerberos) authentication, `DB_TRUSTED_CONNECTION=yes`.
    /// Requires the `kerberos` feature.
    Integrated,
}

/// SQL Server connection settings, read from `DB_*` environment variables.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Server host (`DB_SERVER`).
    pub host: String,

    /// Named instance, when `DB_SERVER` is `host\instance`.
    pub instance: Option<String>,

    /// TCP port (`DB_PORT`, or `host,port` in `DB_SERVER`; default 1433).
    pub port: u16,

    /// Database name (`DB_DATABASE`).
    pub database: String,

    /// Authentication method.
    pub auth: AuthMethod,

    /// SQL login (`DB_USERNAME`).
    pub user: String,

    /// Password (`DB_PASSWORD`).
    pub password: String,

    /// Schema for unqualified table names (`DB_SCHEMA`, default "dbo").
    pub schema: String,

    /// Require TLS (`DB_ENCRYPT`, default true).
    pub encrypt: bool,

    /// Trust the server certificate (`DB_TRUST_SERVER_CERT`, default false).
    pub trust_server_cert: bool,

    /// Pool size (`DB_MAX_CONNECTIONS`, default 4).
    pub max_connections: u32,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("instance", &self.instance)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("auth", &self.auth)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

pub(crate) const DEFAULT_PORT: u16 = 1433;
pub(crate) const DEFAULT_SCHEMA: &str = "dbo";
pub(crate) const DEFAULT_MAX_CONNECTIONS: u32 = 4;
