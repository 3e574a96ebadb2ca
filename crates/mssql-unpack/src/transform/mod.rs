//! Row transformation: explode stringified columns into scalar sub-fields.
//!
//! A stringified value looks like `{a,b,c}` or `{"a","b","c"}`. One leading
//! `{` and one trailing `}` are removed, the rest is split on `,`, and each
//! token loses one surrounding pair of `"`. Sub-field `i` takes token `i-1`;
//! empty or missing tokens become NULL, extra tokens are ignored.
//!
//! Date sub-fields are parsed as `YYYY-MM-DD`. A token that does not parse
//! is treated as missing data and becomes NULL; it never fails the row.
//!
//! Columns without a rule pass through unchanged, except that the literal
//! string `NULL` becomes a real NULL.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::core::identifier::TableName;
use crate::core::schema::{ColumnOrigin, DestinationSchema};
use crate::core::value::{SqlNullType, SqlValue};
use crate::error::{Result, UnpackError};

/// Input format of date tokens.
pub const DATE_TOKEN_FORMAT: &str = "%Y-%m-%d";

/// String value that is coerced to a real NULL.
pub const NULL_LITERAL: &str = "NULL";

/// Column layout shared by every [`TransformedRow`] of one destination table.
///
/// Built once per [`DestinationSchema`]; rows only carry values, and the
/// template maps output column names to positions.
#[derive(Debug, Clone)]
pub struct RowTemplate {
    columns: Vec<String>,
    /// Value type enforced for generated sub-fields; pass-through columns accept any type.
    expected: Vec<Option<SqlNullType>>,
    positions: HashMap<String, usize>,
}

impl RowTemplate {
    /// Build the template for a destination schema.
    pub fn new(schema: &DestinationSchema) -> Self {
        let columns = schema.column_names();
        let positions = columns
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let expected = schema
            .columns
            .iter()
            .map(|c| match c.origin {
                ColumnOrigin::Exploded { .. } => Some(c.null_type),
                ColumnOrigin::PassThrough { .. } => None,
            })
            .collect();

        Self {
            columns,
            expected,
            positions,
        }
    }

    /// Output column names in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of output columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if the template has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Position of an output column.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    /// Verify a row matches this template.
    pub fn check(&self, row: &TransformedRow) -> std::result::Result<(), String> {
        if row.values.len() != self.columns.len() {
            return Err(format!(
                "row has {} values but the destination has {} columns",
                row.values.len(),
                self.columns.len()
            ));
        }

        for (i, value) in row.values.iter().enumerate() {
            if let Some(expected) = self.expected[i] {
                if !value.is_null() && value.null_type() != expected {
                    return Err(format!(
                        "column {} expects {:?} but got {:?}",
                        self.columns[i],
                        expected,
                        value.null_type()
                    ));
                }
            }
        }

        Ok(())
    }
}

/// One destination row, aligned with a [`RowTemplate`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedRow {
    values: Vec<SqlValue>,
}

impl TransformedRow {
    /// Wrap values that are already in template order.
    pub fn from_values(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    /// Values in template order.
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Consume the row, returning its values.
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Look up a value by output column name.
    pub fn get<'a>(&'a self, template: &RowTemplate, column: &str) -> Option<&'a SqlValue> {
        template.position(column).and_then(|i| self.values.get(i))
    }
}

/// Counters for values that were null-filled instead of failing the row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformStats {
    /// Rows transformed.
    pub rows: u64,
    /// Date tokens that did not parse as `YYYY-MM-DD`.
    pub invalid_dates: u64,
    /// Sub-fields of non-NULL values left empty (short list or empty token).
    pub missing_tokens: u64,
    /// `NULL` literals coerced to real NULLs in pass-through columns.
    pub null_literals: u64,
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Pass { source_index: usize, null_type: SqlNullType },
    Explode { source_index: usize, count: usize, is_date: bool },
}

/// Converts source rows into destination rows for one destination schema.
#[derive(Debug, Clone)]
pub struct RowTransformer {
    table: String,
    steps: Vec<Step>,
    source_width: usize,
    output_width: usize,
}

impl RowTransformer {
    /// Build a transformer for `schema`, whose source table has `source_width` columns.
    ///
    /// The output layout is taken entirely from the schema, so every row has
    /// the same columns regardless of its content.
    pub fn new(schema: &DestinationSchema, source_width: usize) -> Self {
        let mut steps: Vec<Step> = Vec::new();
        for col in &schema.columns {
            match col.origin {
                ColumnOrigin::PassThrough { source_index } => steps.push(Step::Pass {
                    source_index,
                    null_type: col.null_type,
                }),
                ColumnOrigin::Exploded {
                    source_index,
                    is_date,
                    ..
                } => match steps.last_mut() {
                    Some(Step::Explode {
                        source_index: last,
                        count,
                        ..
                    }) if *last == source_index => *count += 1,
                    _ => steps.push(Step::Explode {
                        source_index,
                        count: 1,
                        is_date,
                    }),
                },
            }
        }

        Self {
            table: String::new(),
            steps,
            source_width,
            output_width: schema.len(),
        }
    }

    /// Name the source table in errors.
    pub fn for_table(mut self, table: &TableName) -> Self {
        self.table = table.to_string();
        self
    }

    /// Transform one source row.
    pub fn transform(&self, source_row: &[SqlValue]) -> Result<TransformedRow> {
        let mut stats = TransformStats::default();
        self.transform_with_stats(source_row, &mut stats)
    }

    /// Transform every row, collecting null-fill counters.
    pub fn transform_all(
        &self,
        source_rows: &[Vec<SqlValue>],
    ) -> Result<(Vec<TransformedRow>, TransformStats)> {
        let mut stats = TransformStats::default();
        let rows = source_rows
            .iter()
            .map(|row| self.transform_with_stats(row, &mut stats))
            .collect::<Result<Vec<_>>>()?;

        if stats.invalid_dates > 0 || stats.missing_tokens > 0 {
            debug!(
                "Null-filled {} invalid date tokens and {} missing tokens across {} rows",
                stats.invalid_dates, stats.missing_tokens, stats.rows
            );
        }
        Ok((rows, stats))
    }

    fn transform_with_stats(
        &self,
        source_row: &[SqlValue],
        stats: &mut TransformStats,
    ) -> Result<TransformedRow> {
        if source_row.len() != self.source_width {
            return Err(UnpackError::load(
                self.table.clone(),
                format!(
                    "source row has {} values, expected {}",
                    source_row.len(),
                    self.source_width
                ),
            ));
        }

        let mut values = Vec::with_capacity(self.output_width);
        for step in &self.steps {
            match *step {
                Step::Pass {
                    source_index,
                    null_type,
                } => match &source_row[source_index] {
                    SqlValue::String(s) if s == NULL_LITERAL => {
                        stats.null_literals += 1;
                        values.push(SqlValue::Null(null_type));
                    }
                    value => values.push(value.clone()),
                },
                Step::Explode {
                    source_index,
                    count,
                    is_date,
                } => {
                    let text = source_row[source_index]
                        .as_text()
                        .filter(|s| s != NULL_LITERAL);
                    let tokens = match text {
                        Some(text) => {
                            let tokens = extract_tokens(&text, count);
                            stats.missing_tokens +=
                                tokens.iter().filter(|t| t.is_none()).count() as u64;
                            tokens
                        }
                        None => vec![None; count],
                    };

                    for token in tokens {
                        values.push(sub_field_value(token, is_date, stats));
                    }
                }
            }
        }

        stats.rows += 1;
        Ok(TransformedRow { values })
    }
}

fn sub_field_value(token: Option<String>, is_date: bool, stats: &mut TransformStats) -> SqlValue {
    match (token, is_date) {
        (None, true) => SqlValue::Null(SqlNullType::DateTime),
        (None, false) => SqlValue::Null(SqlNullType::String),
        (Some(token), true) => match parse_date_token(&token) {
            Some(dt) => SqlValue::DateTime(dt),
            None => {
                stats.invalid_dates += 1;
                SqlValue::Null(SqlNullType::DateTime)
            }
        },
        (Some(token), false) => SqlValue::String(token),
    }
}

/// Split a stringified value into exactly `count` sub-field tokens.
///
/// Empty tokens and positions past the end of the list are `None`.
pub fn extract_tokens(raw: &str, count: usize) -> Vec<Option<String>> {
    let inner = raw.strip_prefix('{').unwrap_or(raw);
    let inner = inner.strip_suffix('}').unwrap_or(inner);

    let mut tokens = inner.split(',');
    (0..count)
        .map(|_| {
            tokens
                .next()
                .map(strip_quotes)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        })
        .collect()
}

fn strip_quotes(token: &str) -> &str {
    let token = token.strip_prefix('"').unwrap_or(token);
    token.strip_suffix('"').unwrap_or(token)
}

/// Parse a `YYYY-MM-DD` token to midnight of that day.
///
/// The year must be exactly four digits; month and day take one or two.
/// Signs and surrounding whitespace are rejected.
pub fn parse_date_token(token: &str) -> Option<NaiveDateTime> {
    if !is_date_shaped(token) {
        return None;
    }
    NaiveDate::parse_from_str(token, DATE_TOKEN_FORMAT)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn is_date_shaped(token: &str) -> bool {
    let all_digits = |part: &str, min: usize, max: usize| {
        (min..=max).contains(&part.len()) && part.bytes().all(|b| b.is_ascii_digit())
    };

    let mut parts = token.split('-');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(year), Some(month), Some(day), None) => {
            all_digits(year, 4, 4) && all_digits(month, 1, 2) && all_digits(day, 1, 2)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{synthesize, ColumnSpec, ExplosionRule};

    fn schema_for(rules: &[ExplosionRule]) -> (DestinationSchema, usize) {
        let columns = vec![
            ColumnSpec::new("id", "int"),
            ColumnSpec::new("tags", "varchar").with_max_length(40),
            ColumnSpec::new("dates", "varchar").with_max_length(40),
            ColumnSpec::new("note", "varchar").with_max_length(10),
        ];
        (synthesize(&columns, rules).unwrap(), columns.len())
    }

    fn rules() -> Vec<ExplosionRule> {
        vec![
            ExplosionRule {
                source_column: "tags".into(),
                count: 3,
                is_date: false,
            },
            ExplosionRule {
                source_column: "dates".into(),
                count: 2,
                is_date: true,
            },
        ]
    }

    fn date(y: i32, m: u32, d: u32) -> SqlValue {
        SqlValue::DateTime(
            NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        )
    }

    fn text(s: &str) -> SqlValue {
        SqlValue::String(s.to_string())
    }

    #[test]
    fn test_extract_tokens_plain() {
        assert_eq!(
            extract_tokens("{a,b,c}", 3),
            vec![Some("a".into()), Some("b".into()), Some("c".into())]
        );
    }

    #[test]
    fn test_extract_tokens_strips_quotes() {
        assert_eq!(extract_tokens(r#"{"a","b","c"}"#, 3), extract_tokens("{a,b,c}", 3));
    }

    #[test]
    fn test_extract_tokens_short_list_null_fills() {
        assert_eq!(
            extract_tokens("{a}", 3),
            vec![Some("a".into()), None, None]
        );
    }

    #[test]
    fn test_extract_tokens_empty_inputs() {
        assert_eq!(extract_tokens("{}", 2), vec![None, None]);
        assert_eq!(extract_tokens("", 2), vec![None, None]);
        assert_eq!(extract_tokens(r#"{"",b}"#, 2), vec![None, Some("b".into())]);
    }

    #[test]
    fn test_extract_tokens_ignores_extra_tokens() {
        assert_eq!(extract_tokens("{a,b,c,d}", 2), vec![Some("a".into()), Some("b".into())]);
    }

    #[test]
    fn test_extract_tokens_keeps_whitespace() {
        assert_eq!(extract_tokens("{a, b}", 2), vec![Some("a".into()), Some(" b".into())]);
    }

    #[test]
    fn test_extract_tokens_strips_only_one_brace() {
        assert_eq!(extract_tokens("{{a}}", 1), vec![Some("{a}".into())]);
    }

    #[test]
    fn test_parse_date_token() {
        let parsed = parse_date_token("2021-05-01").unwrap();
        assert_eq!(parsed.format("%m-%d-%Y").to_string(), "05-01-2021");
        assert!(parse_date_token("bad-date").is_none());
        assert!(parse_date_token("2021-02-30").is_none());
        assert!(parse_date_token("05/01/2021").is_none());
    }

    #[test]
    fn test_parse_date_token_requires_four_digit_year_without_padding() {
        assert!(parse_date_token(" 2021-06-15").is_none());
        assert!(parse_date_token("2021-06-15 ").is_none());
        assert!(parse_date_token("21-05-01").is_none());
        assert!(parse_date_token("+2021-05-01").is_none());
        assert!(parse_date_token("02021-05-01").is_none());
        assert!(parse_date_token("2021-005-01").is_none());

        let short = parse_date_token("2021-5-1").unwrap();
        assert_eq!(short.format("%Y-%m-%d").to_string(), "2021-05-01");
    }

    #[test]
    fn test_transform_padded_date_token_is_null() {
        let (schema, width) = schema_for(&rules());
        let transformer = RowTransformer::new(&schema, width);
        let template = RowTemplate::new(&schema);

        let rows = vec![vec![
            SqlValue::I32(1),
            text("{a}"),
            text("{2021-05-01, 2021-06-15}"),
            text("n"),
        ]];
        let (out, stats) = transformer.transform_all(&rows).unwrap();

        assert_eq!(out[0].get(&template, "dates_1"), Some(&date(2021, 5, 1)));
        assert_eq!(
            out[0].get(&template, "dates_2"),
            Some(&SqlValue::Null(SqlNullType::DateTime))
        );
        assert_eq!(stats.invalid_dates, 1);
    }

    #[test]
    fn test_transform_full_row() {
        let (schema, width) = schema_for(&rules());
        let transformer = RowTransformer::new(&schema, width);
        let template = RowTemplate::new(&schema);

        let row = transformer
            .transform(&[
                SqlValue::I32(1),
                text(r#"{"a","b","c"}"#),
                text("{2021-05-01,bad-date}"),
                text("hello"),
            ])
            .unwrap();

        assert_eq!(row.len(), schema.len());
        assert_eq!(row.get(&template, "id"), Some(&SqlValue::I32(1)));
        assert_eq!(row.get(&template, "tags_1"), Some(&text("a")));
        assert_eq!(row.get(&template, "tags_3"), Some(&text("c")));
        assert_eq!(row.get(&template, "dates_1"), Some(&date(2021, 5, 1)));
        assert_eq!(
            row.get(&template, "dates_2"),
            Some(&SqlValue::Null(SqlNullType::DateTime))
        );
        assert_eq!(row.get(&template, "note"), Some(&text("hello")));
        assert!(template.check(&row).is_ok());
    }

    #[test]
    fn test_transform_arity_is_constant_for_malformed_input() {
        let (schema, width) = schema_for(&rules());
        let transformer = RowTransformer::new(&schema, width);

        let inputs = vec![
            vec![SqlValue::I32(1), text("{}"), text(""), text("x")],
            vec![SqlValue::I32(2), text("garbage"), text("{2021-13-45}"), text("x")],
            vec![
                SqlValue::I32(3),
                SqlValue::Null(SqlNullType::String),
                SqlValue::Null(SqlNullType::String),
                SqlValue::Null(SqlNullType::String),
            ],
            vec![SqlValue::I32(4), text("{a,b,c,d,e,f}"), text("{,,,}"), text("")],
        ];

        for input in inputs {
            let row = transformer.transform(&input).unwrap();
            assert_eq!(row.len(), schema.len());
        }
    }

    #[test]
    fn test_transform_null_literal_pass_through() {
        let (schema, width) = schema_for(&rules());
        let transformer = RowTransformer::new(&schema, width);
        let template = RowTemplate::new(&schema);

        let row = transformer
            .transform(&[SqlValue::I32(1), text("{}"), text("{}"), text("NULL")])
            .unwrap();
        assert_eq!(
            row.get(&template, "note"),
            Some(&SqlValue::Null(SqlNullType::String))
        );

        // Other falsy-looking values survive
        let row = transformer
            .transform(&[SqlValue::I32(0), text("{}"), text("{}"), text("")])
            .unwrap();
        assert_eq!(row.get(&template, "id"), Some(&SqlValue::I32(0)));
        assert_eq!(row.get(&template, "note"), Some(&text("")));
    }

    #[test]
    fn test_transform_null_stringified_value_never_yields_null_text() {
        let (schema, width) = schema_for(&rules());
        let transformer = RowTransformer::new(&schema, width);
        let template = RowTemplate::new(&schema);

        for tags in [text("NULL"), SqlValue::Null(SqlNullType::String)] {
            let row = transformer
                .transform(&[SqlValue::I32(1), tags, text("{}"), text("x")])
                .unwrap();
            for col in ["tags_1", "tags_2", "tags_3"] {
                assert_eq!(
                    row.get(&template, col),
                    Some(&SqlValue::Null(SqlNullType::String))
                );
            }
        }
    }

    #[test]
    fn test_transform_rejects_wrong_source_width() {
        let (schema, width) = schema_for(&rules());
        let table = TableName::new("dbo", "visits").unwrap();
        let transformer = RowTransformer::new(&schema, width).for_table(&table);
        let err = transformer.transform(&[SqlValue::I32(1)]).unwrap_err();
        assert!(matches!(err, UnpackError::Load { .. }));
        assert!(err.to_string().contains("dbo.visits"));
    }

    #[test]
    fn test_transform_all_counts_null_fills() {
        let (schema, width) = schema_for(&rules());
        let transformer = RowTransformer::new(&schema, width);

        let rows = vec![
            vec![SqlValue::I32(1), text("{a}"), text("{2021-05-01,nope}"), text("NULL")],
            vec![SqlValue::I32(2), text("{a,b,c}"), text("{x,2020-01-31}"), text("y")],
        ];
        let (out, stats) = transformer.transform_all(&rows).unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(stats.rows, 2);
        assert_eq!(stats.invalid_dates, 2);
        assert_eq!(stats.missing_tokens, 2);
        assert_eq!(stats.null_literals, 1);
    }

    #[test]
    fn test_template_check_rejects_mismatch() {
        let (schema, _) = schema_for(&rules());
        let template = RowTemplate::new(&schema);

        let short = TransformedRow::from_values(vec![SqlValue::I32(1)]);
        assert!(template.check(&short).unwrap_err().contains("columns"));

        let mut values = vec![SqlValue::Null(SqlNullType::String); schema.len()];
        let dates_1 = template.position("dates_1").unwrap();
        values[dates_1] = text("2021-05-01");
        let wrong_type = TransformedRow::from_values(values);
        assert!(template.check(&wrong_type).unwrap_err().contains("dates_1"));
    }
}
