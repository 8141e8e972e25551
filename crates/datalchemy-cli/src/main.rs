mod registry;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use datalchemy_generate::{GenerationEngine, GenerationError, MemoryStore, RunReport};
use datalchemy_plan::{PlanError, load_plan, plan_json_schema};
use datalchemy_postgres::{PgSchemaProvider, PgStorage, connect};
use registry::{init_logging, load_dry_run_schema, redact_connection, write_json};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
enum CliError {
    #[error("registry error: {0}")]
    Registry(#[from] registry::RegistryError),
    #[error("plan error: {0}")]
    Plan(#[from] PlanError),
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("unsupported engine: {0}")]
    UnsupportedEngine(String),
}

#[derive(Parser, Debug)]
#[command(name = "datalchemy", version, about = "Datalchemy CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fill the plan's target tables with generated rows.
    Generate(GenerateArgs),
    /// Print the JSON Schema of plan documents.
    PlanSchema(PlanSchemaArgs),
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Plan file (`.json` or `.toml`).
    #[arg(long)]
    plan: PathBuf,
    /// Database connection string.
    #[arg(long, value_name = "CONNECTION_STRING", required_unless_present = "dry_run")]
    conn: Option<String>,
    /// Generate into memory using the table definitions in `--schema`.
    #[arg(long, default_value_t = false, conflicts_with = "conn", requires = "schema")]
    dry_run: bool,
    /// Table definitions for `--dry-run`.
    #[arg(long)]
    schema: Option<PathBuf>,
    /// Override the plan's worker count.
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    workers: Option<u16>,
    /// Override the plan's batch size.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    batch_size: Option<u32>,
    /// Override the plan's seed.
    #[arg(long)]
    seed: Option<u64>,
    /// Also write JSON log lines to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Write the run report as JSON to this file.
    #[arg(long)]
    json_report: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PlanSchemaArgs {
    /// Write to a file instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Generate(args) => run_generate(args).await,
        Command::PlanSchema(args) => run_plan_schema(args),
    }
}

async fn run_generate(args: GenerateArgs) -> Result<(), CliError> {
    init_logging(args.log_file.as_deref())?;

    let mut plan = load_plan(&args.plan)?;
    if let Some(workers) = args.workers {
        plan.run.workers = workers as usize;
    }
    if let Some(batch_size) = args.batch_size {
        plan.run.batch_size = batch_size as usize;
    }
    if args.seed.is_some() {
        plan.run.seed = args.seed;
    }
    tracing::info!(
        plan = %args.plan.display(),
        targets = plan.targets.len(),
        "plan loaded"
    );

    let engine = if args.dry_run {
        let path = args.schema.as_deref().ok_or_else(|| {
            CliError::InvalidConfig("--dry-run needs --schema".to_string())
        })?;
        let definitions = load_dry_run_schema(path)?;
        // Sample reads follow the plan seed so seeded dry runs repeat exactly.
        let store = MemoryStore::with_sample_seed(plan.run.seed.unwrap_or_default());
        for table in definitions.tables {
            store.create_table(table)?;
        }
        for (name, labels) in &definitions.domains {
            let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
            store.add_domain(name.as_str(), &labels);
        }
        tracing::info!(schema = %path.display(), "dry run against memory");
        GenerationEngine::new(Arc::new(store.clone()), Arc::new(store))
    } else {
        let conn = args.conn.as_deref().ok_or_else(|| {
            CliError::InvalidConfig("connection string is required".to_string())
        })?;
        let engine_name = detect_engine(conn)?;
        tracing::info!(engine = engine_name, connection = %redact_connection(conn), "connecting");
        // One connection per worker plus one for sampling and sizing.
        let pool = connect(conn, plan.run.workers as u32 + 1).await?;
        GenerationEngine::new(
            Arc::new(PgSchemaProvider::new(pool.clone())),
            Arc::new(PgStorage::new(pool)),
        )
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping generation");
            on_signal.cancel();
        }
    });

    let report = engine.run(&plan, cancel).await?;
    print_summary(&report);
    if let Some(path) = &args.json_report {
        write_json(path, &report)?;
        tracing::info!(path = %path.display(), "report written");
    }
    Ok(())
}

fn run_plan_schema(args: PlanSchemaArgs) -> Result<(), CliError> {
    let schema = plan_json_schema();
    match args.out {
        Some(path) => write_json(&path, &schema)?,
        None => println!("{}", serde_json::to_string_pretty(&schema)?),
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    println!("run {} (seed {})", report.run_id, report.seed);
    for table in &report.tables {
        let name = match &table.schema {
            Some(schema) => format!("{schema}.{}", table.table),
            None => table.table.clone(),
        };
        println!(
            "  {name}: {} rows, {} bytes, {} rejected, {} ms",
            table.rows_committed, table.bytes_committed, table.rows_rejected, table.duration_ms
        );
    }
    println!(
        "total: {} rows, {} bytes in {} ms",
        report.rows_total, report.bytes_total, report.duration_ms
    );
}

fn detect_engine(conn: &str) -> Result<&'static str, CliError> {
    if conn.starts_with("postgres://") || conn.starts_with("postgresql://") {
        Ok("postgres")
    } else {
        Err(CliError::UnsupportedEngine(redact_connection(conn)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn dry_run_excludes_a_connection() {
        let parsed = Cli::try_parse_from([
            "datalchemy",
            "generate",
            "--plan",
            "plan.json",
            "--dry-run",
            "--conn",
            "postgres://db/x",
        ]);
        assert!(parsed.is_err());

        let parsed = Cli::try_parse_from([
            "datalchemy",
            "generate",
            "--plan",
            "plan.json",
            "--dry-run",
            "--schema",
            "tables.json",
            "--workers",
            "4",
        ])
        .unwrap();
        let Command::Generate(args) = parsed.command else {
            panic!("expected generate");
        };
        assert!(args.dry_run);
        assert_eq!(args.workers, Some(4));
    }

    #[test]
    fn rejects_unknown_engines() {
        assert_eq!(detect_engine("postgresql://db/app").unwrap(), "postgres");
        assert!(matches!(
            detect_engine("mysql://root:pw@db/app"),
            Err(CliError::UnsupportedEngine(conn)) if conn == "mysql://root:***@db/app"
        ));
    }
}
