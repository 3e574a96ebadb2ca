//! Source column metadata, explosion rules, and destination schema synthesis.
//!
//! The destination schema is derived, never diffed: for every source column
//! either one pass-through column or N suffixed sub-field columns are emitted,
//! in source order. The same inputs always produce the same schema.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::identifier::{quote_mssql, TableName};
use super::value::SqlNullType;
use crate::error::{Result, UnpackError};

/// Length used for character columns whose observed length is unknown.
pub const DEFAULT_CHARACTER_LENGTH: i32 = 50;

/// Column type used for every sub-field of a date explosion.
pub const EXPLODED_DATE_TYPE: &str = "datetime2";

/// Column type used for sub-fields exploded from a non-character source column.
pub const EXPLODED_FALLBACK_TYPE: &str = "nvarchar";

/// Broad classification of a declared SQL Server type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// `char`, `varchar`, `nchar`, `nvarchar`.
    Character,
    /// `date`, `datetime`, `datetime2`, `smalldatetime`, `datetimeoffset`, `time`.
    Temporal,
    /// Everything else.
    Other,
}

impl ColumnKind {
    /// Classify a declared type name.
    pub fn classify(data_type: &str) -> Self {
        match data_type.to_lowercase().as_str() {
            "char" | "varchar" | "nchar" | "nvarchar" => ColumnKind::Character,
            "date" | "datetime" | "datetime2" | "smalldatetime" | "datetimeoffset" | "time" => {
                ColumnKind::Temporal
            }
            _ => ColumnKind::Other,
        }
    }
}

/// Column metadata produced by introspecting the source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,

    /// Declared data type (e.g., "int", "nvarchar", "datetime2").
    pub data_type: String,

    /// Classification of `data_type`.
    pub kind: ColumnKind,

    /// Declared character length from the catalog (-1 for max, 0 when not applicable).
    pub declared_length: i32,

    /// Numeric precision.
    pub precision: i32,

    /// Numeric or fractional-seconds scale (-1 when the catalog reports none).
    pub scale: i32,

    /// Observed maximum string length (-1 for max). Only set for character columns.
    pub max_length: Option<i32>,
}

impl ColumnSpec {
    /// Create a column spec, classifying the declared type.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        let data_type = data_type.into();
        Self {
            name: name.into(),
            kind: ColumnKind::classify(&data_type),
            data_type,
            declared_length: 0,
            precision: 0,
            scale: -1,
            max_length: None,
        }
    }

    /// Set the observed maximum length.
    pub fn with_max_length(mut self, max_length: i32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Set numeric precision and scale.
    pub fn with_precision(mut self, precision: i32, scale: i32) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    /// Check if this is a variable-length character column.
    pub fn is_character(&self) -> bool {
        self.kind == ColumnKind::Character
    }

    /// Check if this is an unbounded text column (`text`, `ntext`, `xml`).
    pub fn is_long_text(&self) -> bool {
        matches!(
            self.data_type.to_lowercase().as_str(),
            "text" | "ntext" | "xml"
        )
    }
}

/// How one stringified source column is exploded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplosionRule {
    /// Source column holding `{a,b,c}`-style values.
    pub source_column: String,

    /// Number of sub-fields to extract (at least 1).
    pub count: usize,

    /// Whether sub-fields are parsed as `YYYY-MM-DD` dates.
    pub is_date: bool,
}

impl ExplosionRule {
    /// Output column name of the 1-based sub-field `index`.
    pub fn field_name(&self, index: usize) -> String {
        format!("{}_{}", self.source_column, index)
    }
}

/// Where a destination column's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnOrigin {
    /// Copied from the source column at `source_index`.
    PassThrough { source_index: usize },
    /// Sub-field `position` (1-based) of the source column at `source_index`.
    Exploded {
        source_index: usize,
        position: usize,
        is_date: bool,
    },
}

/// One column of the destination table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputColumn {
    /// Column name in the destination table.
    pub name: String,

    /// Rendered SQL Server type, e.g. `nvarchar(42)` or `datetime2`.
    pub sql_type: String,

    /// Type used when binding a NULL for this column.
    #[serde(skip, default = "default_null_type")]
    pub null_type: SqlNullType,

    /// Source of the column's value.
    pub origin: ColumnOrigin,
}

fn default_null_type() -> SqlNullType {
    SqlNullType::String
}

/// Ordered column layout of the destination table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationSchema {
    pub columns: Vec<OutputColumn>,
}

impl DestinationSchema {
    /// Number of destination columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if the schema has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Destination column names in order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// `CREATE TABLE` statement for this schema. All columns are nullable.
    pub fn create_table_sql(&self, table: &TableName) -> Result<String> {
        let col_defs = self
            .columns
            .iter()
            .map(|c| Ok(format!("{} {} NULL", quote_mssql(&c.name)?, c.sql_type)))
            .collect::<Result<Vec<_>>>()?;

        Ok(format!(
            "CREATE TABLE {} (\n    {}\n)",
            table.qualified()?,
            col_defs.join(",\n    ")
        ))
    }
}

/// Derive the destination schema from source columns and explosion rules.
///
/// Columns without a rule pass through; character columns take the observed
/// maximum length (default 50), other types keep their declared type. A
/// column with a rule of count N becomes `{name}_1 .. {name}_N` at the
/// column's position: `datetime2` for date rules, otherwise the declared
/// character type with the observed length. Non-character sources explode
/// into `nvarchar(max)` for `text`/`ntext`/`xml` and `nvarchar(50)` otherwise.
///
/// Rules naming a column the source does not have are ignored with a
/// warning. Duplicate output names are a configuration error.
pub fn synthesize(columns: &[ColumnSpec], rules: &[ExplosionRule]) -> Result<DestinationSchema> {
    let rules_by_column: HashMap<&str, &ExplosionRule> = rules
        .iter()
        .map(|r| (r.source_column.as_str(), r))
        .collect();

    for rule in rules {
        if !columns.iter().any(|c| c.name == rule.source_column) {
            warn!(
                "Stringified column '{}' does not exist in the source table, ignoring",
                rule.source_column
            );
        }
    }

    let mut output = Vec::with_capacity(columns.len());
    for (source_index, col) in columns.iter().enumerate() {
        match rules_by_column.get(col.name.as_str()) {
            Some(rule) => {
                let (sql_type, null_type) = if rule.is_date {
                    (EXPLODED_DATE_TYPE.to_string(), SqlNullType::DateTime)
                } else if col.is_character() {
                    (
                        format_character_type(&col.data_type, col.max_length),
                        SqlNullType::String,
                    )
                } else if col.is_long_text() {
                    (
                        format_character_type(EXPLODED_FALLBACK_TYPE, Some(-1)),
                        SqlNullType::String,
                    )
                } else {
                    (
                        format_character_type(EXPLODED_FALLBACK_TYPE, None),
                        SqlNullType::String,
                    )
                };

                for position in 1..=rule.count {
                    output.push(OutputColumn {
                        name: rule.field_name(position),
                        sql_type: sql_type.clone(),
                        null_type,
                        origin: ColumnOrigin::Exploded {
                            source_index,
                            position,
                            is_date: rule.is_date,
                        },
                    });
                }
            }
            None => {
                let sql_type = if col.is_character() {
                    format_character_type(&col.data_type, col.max_length)
                } else {
                    format_mssql_type(&col.data_type, col.declared_length, col.precision, col.scale)
                };
                output.push(OutputColumn {
                    name: col.name.clone(),
                    sql_type,
                    null_type: SqlNullType::for_data_type(&col.data_type),
                    origin: ColumnOrigin::PassThrough { source_index },
                });
            }
        }
    }

    let mut seen = HashSet::with_capacity(output.len());
    for col in &output {
        // SQL Server compares column names case-insensitively under default collations
        if !seen.insert(col.name.to_lowercase()) {
            return Err(UnpackError::Config(format!(
                "destination column '{}' would be defined twice; rename the source column or adjust stringified_columns",
                col.name
            )));
        }
    }

    debug!(
        "Synthesized {} destination columns from {} source columns",
        output.len(),
        columns.len()
    );
    Ok(DestinationSchema { columns: output })
}

/// Render a character type with a length bound.
///
/// Unknown lengths use [`DEFAULT_CHARACTER_LENGTH`]. Lengths beyond the
/// inline limit (8000 bytes, i.e. 4000 for the `n` types) or `-1` render as
/// `(max)`; fixed-width `char`/`nchar` switch to their variable-width
/// counterpart because `char(max)` does not exist.
pub fn format_character_type(data_type: &str, length: Option<i32>) -> String {
    let lower = data_type.to_lowercase();
    let is_unicode = lower.starts_with('n');
    let limit = if is_unicode { 4000 } else { 8000 };
    let len = length.unwrap_or(DEFAULT_CHARACTER_LENGTH);

    if len == -1 || len > limit {
        let base = match lower.as_str() {
            "char" => "varchar",
            "nchar" => "nvarchar",
            _ => data_type,
        };
        format!("{}(max)", base)
    } else {
        format!("{}({})", data_type, len.max(1))
    }
}

/// Format a non-character SQL Server type with its length, precision, and scale.
pub fn format_mssql_type(data_type: &str, max_length: i32, precision: i32, scale: i32) -> String {
    let lower = data_type.to_lowercase();
    match lower.as_str() {
        "float" => {
            if precision > 0 {
                format!("float({})", precision)
            } else {
                "float".to_string()
            }
        }

        "decimal" | "numeric" => {
            if precision > 0 {
                format!("{}({}, {})", data_type, precision, scale)
            } else {
                format!("{}(18, 0)", data_type)
            }
        }

        "datetime2" | "time" | "datetimeoffset" => {
            if scale >= 0 {
                format!("{}({})", data_type, scale)
            } else {
                data_type.to_string()
            }
        }

        "timestamp" | "rowversion" => "binary(8)".to_string(),

        "binary" | "varbinary" => {
            if max_length > 0 {
                format!("{}({})", data_type, max_length)
            } else {
                format!("{}(max)", data_type)
            }
        }

        _ => data_type.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(col: &str, count: usize, is_date: bool) -> ExplosionRule {
        ExplosionRule {
            source_column: col.to_string(),
            count,
            is_date,
        }
    }

    fn sample_columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new("id", "int"),
            ColumnSpec::new("tags", "nvarchar").with_max_length(42),
            ColumnSpec::new("visits", "varchar").with_max_length(33),
            ColumnSpec::new("note", "varchar").with_max_length(12),
            ColumnSpec::new("amount", "decimal").with_precision(10, 2),
        ]
    }

    #[test]
    fn test_classify() {
        assert_eq!(ColumnKind::classify("NVARCHAR"), ColumnKind::Character);
        assert_eq!(ColumnKind::classify("datetime2"), ColumnKind::Temporal);
        assert_eq!(ColumnKind::classify("int"), ColumnKind::Other);
        assert_eq!(ColumnKind::classify("text"), ColumnKind::Other);
    }

    #[test]
    fn test_synthesize_order_and_types() {
        let rules = vec![rule("tags", 3, false), rule("visits", 2, true)];
        let schema = synthesize(&sample_columns(), &rules).unwrap();

        assert_eq!(
            schema.column_names(),
            vec![
                "id", "tags_1", "tags_2", "tags_3", "visits_1", "visits_2", "note", "amount"
            ]
        );
        let types: Vec<&str> = schema.columns.iter().map(|c| c.sql_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "int",
                "nvarchar(42)",
                "nvarchar(42)",
                "nvarchar(42)",
                "datetime2",
                "datetime2",
                "varchar(12)",
                "decimal(10, 2)"
            ]
        );
        assert_eq!(
            schema.columns[2].origin,
            ColumnOrigin::Exploded {
                source_index: 1,
                position: 2,
                is_date: false
            }
        );
        assert_eq!(schema.columns[4].null_type, SqlNullType::DateTime);
    }

    #[test]
    fn test_synthesize_date_rule_ignores_declared_type() {
        let columns = vec![ColumnSpec::new("dates", "varchar").with_max_length(200)];
        let schema = synthesize(&columns, &[rule("dates", 1, true)]).unwrap();
        assert_eq!(schema.columns[0].sql_type, "datetime2");
    }

    #[test]
    fn test_synthesize_default_length_when_unknown() {
        let columns = vec![
            ColumnSpec::new("a", "varchar"),
            ColumnSpec::new("b", "nvarchar"),
        ];
        let schema = synthesize(&columns, &[rule("b", 2, false)]).unwrap();
        assert_eq!(schema.columns[0].sql_type, "varchar(50)");
        assert_eq!(schema.columns[1].sql_type, "nvarchar(50)");
    }

    #[test]
    fn test_synthesize_non_character_explosion_falls_back_to_text() {
        let columns = vec![ColumnSpec::new("codes", "int")];
        let schema = synthesize(&columns, &[rule("codes", 2, false)]).unwrap();
        assert_eq!(schema.columns[0].sql_type, "nvarchar(50)");
        assert_eq!(schema.columns[0].null_type, SqlNullType::String);
    }

    #[test]
    fn test_synthesize_long_text_explosion_is_unbounded() {
        for data_type in ["text", "ntext", "xml", "NTEXT"] {
            let columns = vec![ColumnSpec::new("notes", data_type)];
            let schema = synthesize(&columns, &[rule("notes", 2, false)]).unwrap();
            assert_eq!(schema.columns[0].sql_type, "nvarchar(max)", "{}", data_type);
            assert_eq!(schema.columns[1].sql_type, "nvarchar(max)", "{}", data_type);
        }
    }

    #[test]
    fn test_synthesize_keeps_zero_fractional_precision() {
        let columns = vec![
            ColumnSpec::new("seen_at", "datetime2").with_precision(0, 0),
            ColumnSpec::new("opened", "time").with_precision(0, 0),
            ColumnSpec::new("logged", "datetimeoffset").with_precision(0, 3),
        ];
        let schema = synthesize(&columns, &[]).unwrap();
        assert_eq!(schema.columns[0].sql_type, "datetime2(0)");
        assert_eq!(schema.columns[1].sql_type, "time(0)");
        assert_eq!(schema.columns[2].sql_type, "datetimeoffset(3)");
    }

    #[test]
    fn test_synthesize_ignores_rule_for_missing_column() {
        let schema = synthesize(&sample_columns(), &[rule("missing", 2, false)]).unwrap();
        assert_eq!(schema.len(), 5);
    }

    #[test]
    fn test_synthesize_rejects_duplicate_output_names() {
        let columns = vec![
            ColumnSpec::new("tags", "varchar").with_max_length(10),
            ColumnSpec::new("TAGS_1", "varchar").with_max_length(10),
        ];
        let err = synthesize(&columns, &[rule("tags", 2, false)]).unwrap_err();
        assert!(matches!(err, UnpackError::Config(_)));
        assert!(err.to_string().contains("TAGS_1"));
    }

    #[test]
    fn test_synthesize_is_deterministic() {
        let rules = vec![rule("visits", 2, true), rule("tags", 3, false)];
        let reversed: Vec<ExplosionRule> = rules.iter().rev().cloned().collect();
        let a = synthesize(&sample_columns(), &rules).unwrap();
        let b = synthesize(&sample_columns(), &reversed).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_format_character_type() {
        assert_eq!(format_character_type("varchar", Some(10)), "varchar(10)");
        assert_eq!(format_character_type("varchar", Some(0)), "varchar(1)");
        assert_eq!(format_character_type("varchar", Some(-1)), "varchar(max)");
        assert_eq!(format_character_type("nvarchar", Some(4001)), "nvarchar(max)");
        assert_eq!(format_character_type("varchar", Some(8000)), "varchar(8000)");
        assert_eq!(format_character_type("nchar", Some(5000)), "nvarchar(max)");
        assert_eq!(format_character_type("char", None), "char(50)");
    }

    #[test]
    fn test_format_mssql_type() {
        assert_eq!(format_mssql_type("int", 0, 10, 0), "int");
        assert_eq!(format_mssql_type("decimal", 0, 0, 0), "decimal(18, 0)");
        assert_eq!(format_mssql_type("numeric", 0, 12, 4), "numeric(12, 4)");
        assert_eq!(format_mssql_type("datetime2", 0, 0, 7), "datetime2(7)");
        assert_eq!(format_mssql_type("datetime2", 0, 0, 0), "datetime2(0)");
        assert_eq!(format_mssql_type("time", 0, 0, -1), "time");
        assert_eq!(format_mssql_type("datetime", 0, 0, 3), "datetime");
        assert_eq!(format_mssql_type("float", 0, 53, 0), "float(53)");
        assert_eq!(format_mssql_type("varbinary", 16, 0, 0), "varbinary(16)");
        assert_eq!(format_mssql_type("varbinary", -1, 0, 0), "varbinary(max)");
        assert_eq!(format_mssql_type("timestamp", 0, 0, 0), "binary(8)");
    }

    #[test]
    fn test_create_table_sql() {
        let rules = vec![rule("visits", 2, true)];
        let columns = vec![
            ColumnSpec::new("id", "int"),
            ColumnSpec::new("visits", "varchar").with_max_length(30),
        ];
        let schema = synthesize(&columns, &rules).unwrap();
        let table = TableName::new("dbo", "patient_visits").unwrap();
        assert_eq!(
            schema.create_table_sql(&table).unwrap(),
            "CREATE TABLE [dbo].[patient_visits] (\n    [id] int NULL,\n    [visits_1] datetime2 NULL,\n    [visits_2] datetime2 NULL\n)"
        );
    }
}
