//! Run coordinator: processes every mapped table in document order.

use crate::config::{TableMapping, UnpackConfig};
use crate::core::identifier::TableName;
use crate::core::schema::synthesize;
use crate::error::{Result, Stage, UnpackError};
use crate::source::SourceReader;
use crate::target::TableWriter;
use crate::transform::{RowTemplate, RowTransformer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// Outcome of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Completed,
    Failed,
    /// Dry run: schema synthesized, nothing executed.
    Planned,
}

/// Per-table entry of a [`RunReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableReport {
    /// Source table as written in the mapping document.
    pub source: String,

    /// Destination table as written in the mapping document.
    pub destination: String,

    pub status: TableStatus,

    /// Rows read from the source table.
    pub rows_read: u64,

    /// Rows inserted into the destination table.
    pub rows_inserted: u64,

    /// Date tokens that did not parse and were stored as NULL.
    pub invalid_dates: u64,

    /// Stage that failed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// `CREATE TABLE` statement for the destination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ddl: Option<String>,
}

impl TableReport {
    fn new(source: &str, mapping: &TableMapping) -> Self {
        Self {
            source: source.to_string(),
            destination: mapping.destination_table_name.clone(),
            status: TableStatus::Failed,
            rows_read: 0,
            rows_inserted: 0,
            invalid_dates: 0,
            failed_stage: None,
            error: None,
            ddl: None,
        }
    }
}

/// Result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run identifier.
    pub run_id: String,

    /// `completed`, `failed`, or `dry_run`.
    pub status: String,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,

    pub tables_total: usize,
    pub tables_success: usize,
    pub tables_failed: usize,

    /// Rows inserted across all tables.
    pub rows_inserted: u64,

    pub tables: Vec<TableReport>,
}

impl RunReport {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Failed tables as `source (stage)`.
    pub fn failed_tables(&self) -> Vec<String> {
        self.tables
            .iter()
            .filter(|t| t.status == TableStatus::Failed)
            .map(|t| match t.failed_stage {
                Some(stage) => format!("{} ({})", t.source, stage),
                None => t.source.clone(),
            })
            .collect()
    }

    /// `Err(TablesFailed)` when any table failed.
    pub fn into_result(self) -> Result<Self> {
        if self.tables_failed > 0 {
            return Err(UnpackError::TablesFailed {
                failed: self.failed_tables(),
            });
        }
        Ok(self)
    }
}

/// Run coordinator.
pub struct Orchestrator {
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TableWriter>,
    default_schema: String,
    dry_run: bool,
}

impl Orchestrator {
    /// Create an orchestrator. Unqualified table names resolve to `default_schema`.
    pub fn new(
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TableWriter>,
        default_schema: impl Into<String>,
    ) -> Self {
        Self {
            source,
            target,
            default_schema: default_schema.into(),
            dry_run: false,
        }
    }

    /// Stop each table after schema synthesis and report the DDL instead.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Process every mapped table. A failed table is recorded and the run
    /// continues with the next one.
    pub async fn run(&self, config: &UnpackConfig) -> RunReport {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting run {} ({} tables)", run_id, config.len());

        let mut tables = Vec::with_capacity(config.len());
        for (source, mapping) in config.iter() {
            let mut report = TableReport::new(source, mapping);

            match self.process_table(source, mapping, &mut report).await {
                Ok(()) => {
                    report.status = if self.dry_run {
                        TableStatus::Planned
                    } else {
                        TableStatus::Completed
                    };
                }
                Err((stage, e)) => {
                    error!("{} failed at {}: {}", source, stage, e);
                    report.status = TableStatus::Failed;
                    report.failed_stage = Some(stage);
                    report.error = Some(e.to_string());
                }
            }
            tables.push(report);
        }

        let completed_at = Utc::now();
        let duration_seconds = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        let tables_failed = tables
            .iter()
            .filter(|t| t.status == TableStatus::Failed)
            .count();
        let rows_inserted = tables.iter().map(|t| t.rows_inserted).sum();

        let status = if tables_failed > 0 {
            "failed"
        } else if self.dry_run {
            "dry_run"
        } else {
            "completed"
        };

        let report = RunReport {
            run_id,
            status: status.to_string(),
            started_at,
            completed_at,
            duration_seconds,
            tables_total: tables.len(),
            tables_success: tables.len() - tables_failed,
            tables_failed,
            rows_inserted,
            tables,
        };

        info!(
            "Run {}: {} tables ({} failed), {} rows in {:.1}s",
            report.status,
            report.tables_total,
            report.tables_failed,
            report.rows_inserted,
            report.duration_seconds
        );
        report
    }

    async fn process_table(
        &self,
        source: &str,
        mapping: &TableMapping,
        report: &mut TableReport,
    ) -> std::result::Result<(), (Stage, UnpackError)> {
        let at = |stage: Stage| move |e: UnpackError| (stage, e);

        let source_table =
            TableName::parse(source, &self.default_schema).map_err(at(Stage::Introspect))?;
        let columns = self
            .source
            .describe(&source_table)
            .await
            .map_err(at(Stage::Introspect))?;

        let rules = mapping.explosion_rules();
        let schema = synthesize(&columns, &rules).map_err(at(Stage::Synthesize))?;

        let destination = TableName::parse(&mapping.destination_table_name, &self.default_schema)
            .map_err(at(Stage::Create))?;
        report.ddl = Some(
            schema
                .create_table_sql(&destination)
                .map_err(at(Stage::Create))?,
        );

        if self.dry_run {
            info!(
                "{} -> {}: {} columns (dry run)",
                source_table,
                destination,
                schema.len()
            );
            return Ok(());
        }

        info!("{} -> {}", source_table, destination);
        self.target
            .recreate(&destination, &schema)
            .await
            .map_err(at(Stage::Create))?;

        let rows = self
            .source
            .fetch_rows(&source_table, &columns)
            .await
            .map_err(at(Stage::Fetch))?;
        report.rows_read = rows.len() as u64;

        let transformer = RowTransformer::new(&schema, columns.len()).for_table(&source_table);
        let (transformed, stats) = transformer
            .transform_all(&rows)
            .map_err(at(Stage::Transform))?;
        drop(rows);
        report.invalid_dates = stats.invalid_dates;

        let template = RowTemplate::new(&schema);
        report.rows_inserted = self
            .target
            .insert_batch(&destination, &template, transformed)
            .await
            .map_err(at(Stage::Insert))?;

        info!(
            "{}: {} rows inserted into {}",
            source_table, report.rows_inserted, destination
        );
        Ok(())
    }
}
