//! Configuration validation.

use super::{AuthMethod, ConnectionConfig, UnpackConfig};
use crate::core::identifier::{validate_identifier, TableName};
use crate::error::{Result, UnpackError};

/// Validate the table-mapping document.
pub fn validate(config: &UnpackConfig) -> Result<()> {
    if config.is_empty() {
        return Err(UnpackError::Config(
            "configuration maps no tables".into(),
        ));
    }

    for (source, mapping) in config.iter() {
        // Schema is irrelevant here; only the parts' validity is checked.
        TableName::parse(source, "dbo")
            .map_err(|e| UnpackError::Config(format!("source table '{}': {}", source, e)))?;
        TableName::parse(&mapping.destination_table_name, "dbo").map_err(|e| {
            UnpackError::Config(format!("{}: destination_table_name: {}", source, e))
        })?;

        for (column, count) in &mapping.stringified_columns {
            validate_identifier(column).map_err(|e| {
                UnpackError::Config(format!("{}: stringified column: {}", source, e))
            })?;
            if *count == 0 {
                return Err(UnpackError::Config(format!(
                    "{}: stringified column '{}' must extract at least 1 field",
                    source, column
                )));
            }
        }

        for column in &mapping.col_date {
            if !mapping.stringified_columns.contains_key(column) {
                return Err(UnpackError::Config(format!(
                    "{}: colDate column '{}' is not listed in stringified_columns",
                    source, column
                )));
            }
        }
    }

    Ok(())
}

/// Validate connection settings.
pub fn validate_connection(config: &ConnectionConfig) -> Result<()> {
    if config.host.is_empty() {
        return Err(UnpackError::Config("DB_SERVER is required".into()));
    }
    if config.database.is_empty() {
        return Err(UnpackError::Config("DB_DATABASE is required".into()));
    }
    match config.auth {
        AuthMethod::SqlServer if config.user.is_empty() => {
            return Err(UnpackError::Config("DB_USERNAME is required".into()));
        }
        AuthMethod::Integrated if !cfg!(feature = "kerberos") => {
            return Err(UnpackError::Config(
                "DB_TRUSTED_CONNECTION requires a build with the `kerberos` feature".into(),
            ));
        }
        _ => {}
    }
    validate_identifier(&config.schema)
        .map_err(|e| UnpackError::Config(format!("DB_SCHEMA: {}", e)))?;
    if config.max_connections == 0 {
        return Err(UnpackError::Config(
            "DB_MAX_CONNECTIONS must be at least 1".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableMapping;
    use std::collections::BTreeMap;

    fn mapping() -> TableMapping {
        TableMapping {
            destination_table_name: "visits_flat".to_string(),
            stringified_columns: BTreeMap::from([
                ("tags".to_string(), 3),
                ("dates".to_string(), 2),
            ]),
            col_date: vec!["dates".to_string()],
        }
    }

    fn valid_config() -> UnpackConfig {
        UnpackConfig {
            tables: vec![("visits".to_string(), mapping())],
        }
    }

    fn valid_connection() -> ConnectionConfig {
        ConnectionConfig {
            host: "localhost".to_string(),
            instance: None,
            port: 1433,
            database: "clinic".to_string(),
            auth: AuthMethod::SqlServer,
            user: "sa".to_string(),
            password: "password".to_string(),
            schema: "dbo".to_string(),
            encrypt: false,
            trust_server_cert: true,
            max_connections: 4,
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_empty_config() {
        assert!(validate(&UnpackConfig::default()).is_err());
    }

    #[test]
    fn test_zero_count() {
        let mut config = valid_config();
        config.tables[0]
            .1
            .stringified_columns
            .insert("codes".to_string(), 0);
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("codes"));
    }

    #[test]
    fn test_col_date_must_be_stringified() {
        let mut config = valid_config();
        config.tables[0].1.col_date.push("admitted".to_string());
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("admitted"));
    }

    #[test]
    fn test_empty_destination() {
        let mut config = valid_config();
        config.tables[0].1.destination_table_name = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_valid_connection() {
        assert!(validate_connection(&valid_connection()).is_ok());
    }

    #[test]
    fn test_missing_server() {
        let mut config = valid_connection();
        config.host = String::new();
        let err = validate_connection(&config).unwrap_err();
        assert!(err.to_string().contains("DB_SERVER"));
    }

    #[test]
    fn test_username_required_only_for_sql_login() {
        let mut config = valid_connection();
        config.user = String::new();
        let err = validate_connection(&config).unwrap_err();
        assert!(err.to_string().contains("DB_USERNAME"));

        config.auth = AuthMethod::Integrated;
        assert_eq!(
            validate_connection(&config).is_ok(),
            cfg!(feature = "kerberos")
        );
    }

    #[test]
    fn test_zero_max_connections() {
        let mut config = valid_connection();
        config.max_connections = 0;
        assert!(validate_connection(&config).is_err());
    }

    #[test]
    fn test_connection_config_debug_redacts_password() {
        let mut config = valid_connection();
        config.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", config);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }
}
