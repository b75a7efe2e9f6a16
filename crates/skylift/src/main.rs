//! skylift - copy SQLite tables into ScyllaDB / Cassandra
//!
//! # Usage
//!
//! ```bash
//! # Migrate with built-in defaults (test.db → 127.0.0.1, my_keyspace.my_table)
//! skylift
//!
//! # Migrate using a config file, overriding the source
//! skylift -c skylift.yaml --source ./chinook.db run
//!
//! # Validate configuration
//! skylift -c skylift.yaml validate
//!
//! # Print the CQL a run would issue
//! skylift -c skylift.yaml schema
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use skylift::config::MigrationConfig;
use skylift::error::ErrorCategory;
use skylift::pipeline::Migration;
use skylift::schema::{keyspace_ddl, table_ddl};
use skylift::scylladb::ScyllaConnector;
use skylift::writer::InsertShape;

#[derive(Parser)]
#[command(name = "skylift")]
#[command(version, about = "One-shot migration of a SQLite table into ScyllaDB / Cassandra")]
struct Cli {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Override the source database path
    #[arg(long)]
    source: Option<PathBuf>,

    /// Override the cluster contact points (repeatable)
    #[arg(long = "contact-point")]
    contact_points: Vec<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the migration (default)
    Run,
    /// Validate configuration file
    Validate,
    /// Print the schema and insert statements without connecting
    Schema,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", diagnostic(&err));
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// One line naming the failed stage and the underlying error
fn diagnostic(err: &anyhow::Error) -> String {
    match err
        .chain()
        .find_map(|cause| cause.downcast_ref::<skylift::Error>())
    {
        Some(cause) => format!("migration failed during {}: {}", cause.category(), cause),
        None => format!("migration failed during {}: {:#}", ErrorCategory::Internal, err),
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_migration(config).await,
        Commands::Validate => validate_config(&config),
        Commands::Schema => show_schema(&config),
    }
}

fn load_config(cli: &Cli) -> Result<MigrationConfig> {
    let mut config = match &cli.config {
        Some(path) => MigrationConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => MigrationConfig::default(),
    };

    if let Some(source) = &cli.source {
        config.source.path = source.clone();
    }
    if !cli.contact_points.is_empty() {
        config.cluster.contact_points = cli.contact_points.clone();
    }

    config.validate()?;
    Ok(config)
}

async fn run_migration(config: MigrationConfig) -> Result<()> {
    info!(
        source = %config.source.path.display(),
        tables = config.table_plans().len(),
        keyspace = %config.target.keyspace,
        "starting migration"
    );

    let mut migration = Migration::new(config, Box::new(ScyllaConnector::new()));
    let report = migration.run().await?;

    for table in &report.tables {
        info!(
            source = %table.source,
            target = %table.target,
            rows_written = table.rows_written,
            "table summary"
        );
    }
    info!(
        rows_read = report.rows_read,
        rows_written = report.rows_written,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "migration finished"
    );
    Ok(())
}

fn validate_config(config: &MigrationConfig) -> Result<()> {
    println!("Configuration is valid");
    println!("  Source: {}", config.source.path.display());
    println!("  Cluster: {}", config.cluster.contact_points.join(", "));
    for plan in config.table_plans() {
        println!("  Table: {} -> {}", plan.source_table, plan.spec.qualified_name());
    }
    println!("  Replication: {}", config.target.replication.to_cql());
    println!("  Max in flight: {}", config.target.max_in_flight);
    Ok(())
}

fn show_schema(config: &MigrationConfig) -> Result<()> {
    println!("{};", keyspace_ddl(&config.target.keyspace, &config.target.replication));
    for plan in config.table_plans() {
        println!("{};", table_ddl(&plan.spec.qualified_name(), &plan.spec.columns)?);
        println!("{};", InsertShape::for_table(&plan.spec).cql());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_names_stage() {
        let err = anyhow::Error::from(skylift::Error::config("unknown field `tabel`"))
            .context("failed to load config from skylift.yaml");
        assert_eq!(
            diagnostic(&err),
            "migration failed during configuration: configuration error: unknown field `tabel`"
        );
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "skylift",
            "--source",
            "/tmp/other.db",
            "--contact-point",
            "10.0.0.1",
            "--contact-point",
            "10.0.0.2",
            "schema",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.source.path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.cluster.contact_points, vec!["10.0.0.1", "10.0.0.2"]);
        assert!(matches!(cli.command, Some(Commands::Schema)));
    }
}
