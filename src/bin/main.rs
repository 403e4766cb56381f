//! sqldelta CLI - column lineage and breaking-change analysis for SQL
//!
//! Usage:
//!   sqldelta lineage <file.sql> [--dialect <dialect>] [--schema <schema.json>]
//!   sqldelta diff <old.sql> <new.sql> [--dialect <dialect>] [--schema <schema.json>]
//!   sqldelta impact <changes.json>
//!
//! Examples:
//!   sqldelta lineage models/orders.sql --dialect snowflake
//!   sqldelta diff base/orders.sql models/orders.sql --schema target/schema.json
//!   sqldelta -v impact target/changes.json

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use sqldelta::config::{load_schema, Settings, SettingsError};
use sqldelta::semantic::{
    classify_change_with_stats, compute_lineage_with_stats, impact_radius, AdjacencyMap,
    CllResult, DependencyGraph, GraphError, ImpactAnalyzer, LineageError, NodeChange,
};
use sqldelta::sql::{Dialect, Schema};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqldelta")]
#[command(about = "sqldelta - column lineage and breaking-change analysis for SQL")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to a sqldelta.toml config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the column lineage of a query as JSON
    Lineage {
        /// Path to the .sql file
        file: PathBuf,

        /// SQL dialect to parse
        #[arg(short, long)]
        dialect: Option<DialectArg>,

        /// JSON column-type schema
        #[arg(short, long)]
        schema: Option<PathBuf>,
    },

    /// Classify the change between two versions of a query
    Diff {
        /// Path to the base version
        old: PathBuf,

        /// Path to the current version
        new: PathBuf,

        /// SQL dialect to parse
        #[arg(short, long)]
        dialect: Option<DialectArg>,

        /// JSON column-type schema, used for both versions
        #[arg(short, long)]
        schema: Option<PathBuf>,
    },

    /// Compute the impacted nodes of a set of classified changes
    Impact {
        /// JSON file with `nodes`, `parents` and optionally `lineage`
        file: PathBuf,

        /// Ignore column lineage and propagate to every downstream node
        #[arg(long)]
        node_level: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DialectArg {
    Generic,
    Postgres,
    Duckdb,
    Mysql,
    Tsql,
    Snowflake,
    Bigquery,
    Redshift,
    Databricks,
    Hive,
    Sqlite,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Generic => Dialect::Generic,
            DialectArg::Postgres => Dialect::Postgres,
            DialectArg::Duckdb => Dialect::DuckDb,
            DialectArg::Mysql => Dialect::MySql,
            DialectArg::Tsql => Dialect::TSql,
            DialectArg::Snowflake => Dialect::Snowflake,
            DialectArg::Bigquery => Dialect::BigQuery,
            DialectArg::Redshift => Dialect::Redshift,
            DialectArg::Databricks => Dialect::Databricks,
            DialectArg::Hive => Dialect::Hive,
            DialectArg::Sqlite => Dialect::Sqlite,
        }
    }
}

/// Errors surfaced by the CLI.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("Error reading file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Lineage(#[from] LineageError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Contents of the file passed to `sqldelta impact`.
#[derive(Deserialize)]
struct ImpactInput {
    nodes: HashMap<String, NodeChange>,
    #[serde(default)]
    parents: AdjacencyMap,
    #[serde(default)]
    children: AdjacencyMap,
    #[serde(default)]
    lineage: HashMap<String, CllResult>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Install the stderr subscriber. `RUST_LOG` overrides the `-v` count.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,sqldelta={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn run(cli: Cli) -> Result<(), CliError> {
    let settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::load()?,
    };

    match cli.command {
        Commands::Lineage {
            file,
            dialect,
            schema,
        } => cmd_lineage(&settings, &file, dialect, schema.as_deref()),
        Commands::Diff {
            old,
            new,
            dialect,
            schema,
        } => cmd_diff(&settings, &old, &new, dialect, schema.as_deref()),
        Commands::Impact { file, node_level } => cmd_impact(&settings, &file, node_level),
    }
}

fn read(path: &Path) -> Result<String, CliError> {
    fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Command-line options win over the config file.
fn resolve_inputs(
    settings: &Settings,
    dialect: Option<DialectArg>,
    schema: Option<&Path>,
) -> Result<(Dialect, Option<Schema>), CliError> {
    let dialect = match dialect {
        Some(arg) => arg.into(),
        None => settings.analysis.dialect()?,
    };
    let schema = match schema {
        Some(path) => Some(load_schema(path)?),
        None => settings.analysis.schema()?,
    };
    Ok((dialect, schema))
}

fn cmd_lineage(
    settings: &Settings,
    file: &Path,
    dialect: Option<DialectArg>,
    schema: Option<&Path>,
) -> Result<(), CliError> {
    let sql = read(file)?;
    let (dialect, schema) = resolve_inputs(settings, dialect, schema)?;

    let (lineage, stats) = compute_lineage_with_stats(&sql, schema.as_ref(), Some(dialect))?;
    tracing::debug!(file = %file.display(), ?stats, "lineage computed");

    println!("{}", serde_json::to_string_pretty(&lineage)?);
    Ok(())
}

fn cmd_diff(
    settings: &Settings,
    old: &Path,
    new: &Path,
    dialect: Option<DialectArg>,
    schema: Option<&Path>,
) -> Result<(), CliError> {
    let old_sql = read(old)?;
    let new_sql = read(new)?;
    let (dialect, schema) = resolve_inputs(settings, dialect, schema)?;

    let (change, stats) = classify_change_with_stats(
        &old_sql,
        &new_sql,
        schema.as_ref(),
        schema.as_ref(),
        Some(dialect),
    );
    tracing::debug!(?stats, "change classified");

    println!("{}", serde_json::to_string_pretty(&change)?);
    Ok(())
}

fn cmd_impact(settings: &Settings, file: &Path, node_level: bool) -> Result<(), CliError> {
    let input: ImpactInput = serde_json::from_str(&read(file)?)?;

    let column_level = settings.impact.column_level && !node_level && !input.lineage.is_empty();
    if !column_level {
        let impacted = impact_radius(&input.nodes, &input.parents, &input.children);
        println!("{}", serde_json::to_string_pretty(&impacted)?);
        return Ok(());
    }

    let mut graph = DependencyGraph::from_parent_map(&input.parents);
    for (parent, children) in &input.children {
        for child in children {
            graph.add_edge(parent, child);
        }
    }
    let mut analyzer = ImpactAnalyzer::new(graph);
    for (node, lineage) in input.lineage {
        analyzer.add_lineage(node, lineage);
    }

    let report = analyzer.analyze(&input.nodes)?;
    tracing::debug!(impacted = report.len(), "column-level impact computed");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
