//! Configuration loading and validation.
//!
//! Two sources feed a run: the JSON table-mapping document, and connection
//! settings taken from `DB_*` environment variables (usually via `.env`).

mod types;
mod validation;

pub use types::*;
pub use validation::validate_connection;

use crate::error::{Result, UnpackError};
use serde_json::{Map, Value};
use std::path::Path;

impl UnpackConfig {
    /// Load the table-mapping document from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse the table-mapping document from a JSON string.
    ///
    /// Entries keep their document order.
    pub fn from_json(json: &str) -> Result<Self> {
        let document: Map<String, Value> = serde_json::from_str(json)?;

        let tables = document
            .into_iter()
            .map(|(source, value)| {
                let mapping: TableMapping = serde_json::from_value(value)
                    .map_err(|e| UnpackError::Config(format!("{}: {}", source, e)))?;
                Ok((source, mapping))
            })
            .collect::<Result<Vec<_>>>()?;

        let config = Self { tables };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl ConnectionConfig {
    /// Read connection settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read connection settings through `lookup`.
    ///
    /// `DB_SERVER` accepts `host`, `host,port`, `host\instance` and an
    /// optional `tcp:` prefix. An explicit `DB_PORT` overrides the port
    /// embedded in `DB_SERVER`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let server = get("DB_SERVER").unwrap_or_default();
        let server = server.strip_prefix("tcp:").unwrap_or(&server);
        let (host_part, server_port) = match server.split_once(',') {
            Some((host, port)) => (host, Some(parse_port("DB_SERVER", port)?)),
            None => (server, None),
        };
        let (host, instance) = match host_part.split_once('\\') {
            Some((host, instance)) => (host.to_string(), Some(instance.to_string())),
            None => (host_part.to_string(), None),
        };

        let port = match get("DB_PORT") {
            Some(port) => parse_port("DB_PORT", &port)?,
            None => server_port.unwrap_or(DEFAULT_PORT),
        };

        let max_connections = match get("DB_MAX_CONNECTIONS") {
            Some(v) => v.parse().map_err(|_| {
                UnpackError::Config(format!("DB_MAX_CONNECTIONS must be a number, got '{}'", v))
            })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let auth = if parse_flag("DB_TRUSTED_CONNECTION", get("DB_TRUSTED_CONNECTION"), false)? {
            AuthMethod::Integrated
        } else {
            AuthMethod::SqlServer
        };

        let config = Self {
            host,
            instance,
            port,
            database: get("DB_DATABASE").unwrap_or_default(),
            auth,
            user: get("DB_USERNAME").unwrap_or_default(),
            // Passwords may legitimately start or end with spaces
            password: lookup("DB_PASSWORD").unwrap_or_default(),
            schema: get("DB_SCHEMA").unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            encrypt: parse_flag("DB_ENCRYPT", get("DB_ENCRYPT"), true)?,
            trust_server_cert: parse_flag(
                "DB_TRUST_SERVER_CERT",
                get("DB_TRUST_SERVER_CERT"),
                false,
            )?,
            max_connections,
        };

        validation::validate_connection(&config)?;
        Ok(config)
    }
}

fn parse_port(key: &str, raw: &str) -> Result<u16> {
    raw.trim()
        .parse()
        .map_err(|_| UnpackError::Config(format!("{} has an invalid port: '{}'", key, raw)))
}

fn parse_flag(key: &str, raw: Option<String>, default: bool) -> Result<bool> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" | "disable" => Ok(false),
        _ => Err(UnpackError::Config(format!(
            "{} must be true or false, got '{}'",
            key, raw
        ))),
    }
}
