//! mssql-unpack CLI - explode stringified columns of SQL Server tables.

use clap::Parser;
use mssql_unpack::{ConnectionConfig, MssqlPool, Orchestrator, RunReport, UnpackConfig, UnpackError};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "mssql-unpack")]
#[command(about = "Replicate SQL Server tables, exploding stringified columns into scalar columns")]
#[command(version)]
struct Cli {
    /// Path to the JSON table-mapping document
    #[arg(short, long = "config-file", alias = "config_file")]
    config_file: PathBuf,

    /// Read DB_* connection settings from this file instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Introspect and print the destination DDL without changing anything
    #[arg(long)]
    dry_run: bool,

    /// Output JSON run report to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), UnpackError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    // The mapping document is checked before any connection is attempted
    let config = UnpackConfig::load(&cli.config_file)?;
    info!(
        "Loaded {} table mappings from {:?}",
        config.len(),
        cli.config_file
    );

    load_env(cli.env_file.as_deref())?;
    let connection = ConnectionConfig::from_env()?;

    let pool = Arc::new(MssqlPool::new(&connection).await?);
    let orchestrator = Orchestrator::new(pool.clone(), pool, connection.schema.clone())
        .with_dry_run(cli.dry_run);

    let report = orchestrator.run(&config).await;

    if cli.output_json {
        println!("{}", report.to_json()?);
    } else {
        print_summary(&report, cli.dry_run);
    }

    report.into_result().map(|_| ())
}

fn load_env(path: Option<&Path>) -> Result<(), UnpackError> {
    match path {
        Some(path) => {
            dotenvy::from_path(path).map_err(|e| match e {
                dotenvy::Error::Io(io) => UnpackError::Io(io),
                other => UnpackError::Config(format!("{}: {}", path.display(), other)),
            })?;
        }
        None => {
            // ./.env is optional; the variables may already be set
            dotenvy::dotenv().ok();
        }
    }
    Ok(())
}

fn print_summary(report: &RunReport, dry_run: bool) {
    if dry_run {
        for table in &report.tables {
            if let Some(ddl) = &table.ddl {
                println!("-- {} -> {}\n{};\n", table.source, table.destination, ddl);
            }
        }
    }

    let status_msg = match (report.tables_failed, dry_run) {
        (0, true) => "Dry run completed!",
        (0, false) => "Run completed!",
        _ => "Run completed with failures",
    };
    println!("\n{}", status_msg);
    println!("  Run ID: {}", report.run_id);
    println!("  Duration: {:.2}s", report.duration_seconds);
    println!("  Tables: {}/{}", report.tables_success, report.tables_total);
    println!("  Rows: {}", report.rows_inserted);
    for table in report.tables.iter().filter(|t| t.error.is_some()) {
        println!(
            "  Failed: {} ({}): {}",
            table.source,
            table
                .failed_stage
                .map(|s| s.to_string())
                .unwrap_or_default(),
            table.error.as_deref().unwrap_or_default()
        );
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
