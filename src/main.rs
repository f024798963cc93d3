use sqlbuddy::audit::AuditLog;
use sqlbuddy::db::ExecutionOutcome;
use sqlbuddy::orchestrator::GenerationResult;
use sqlbuddy::{
    DatabaseConfig, DatabaseKind, GeneratorSettings, ProviderConfig, ProviderKind, SqlBuddy,
    ValidationVerdict,
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Rows printed for a result set before truncating
const MAX_PRINTED_ROWS: usize = 50;

#[derive(Parser)]
#[command(name = "sqlbuddy")]
#[command(about = "Generate, validate and safely execute SQL from natural language")]
#[command(version)]
struct Args {
    /// Database type: mysql or postgresql (or set SQLBUDDY_DB_TYPE)
    #[arg(long, global = true)]
    db_type: Option<String>,

    /// Database host (or set SQLBUDDY_DB_HOST)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Database port (defaults to the engine's standard port)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Database user (or set SQLBUDDY_DB_USER)
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Database password (or set SQLBUDDY_DB_PASSWORD)
    #[arg(long, global = true)]
    password: Option<String>,

    /// Database name (or set SQLBUDDY_DB_NAME)
    #[arg(short, long, global = true)]
    database: Option<String>,

    /// LLM provider: openai or claude
    #[arg(long, global = true, default_value = "openai")]
    llm_provider: String,

    /// Provider API key (or set OPENAI_API_KEY / ANTHROPIC_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Model name (defaults per provider)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Sampling temperature
    #[arg(long, global = true)]
    temperature: Option<f32>,

    /// Per-attempt provider timeout in seconds (or set SQLBUDDY_LLM_TIMEOUT_SECS)
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Append gate decisions and executions to this JSON-lines file
    #[arg(long, global = true)]
    audit_log: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate SQL from a natural-language description
    Generate {
        description: String,

        /// Execute the generated query (first candidate when using --variations)
        #[arg(long)]
        execute: bool,

        /// Number of alternative queries to generate
        #[arg(long)]
        variations: Option<usize>,

        /// Allow destructive statements through the execution gate
        #[arg(long)]
        allow_destructive: bool,
    },
    /// Validate and execute a SQL query
    Execute {
        sql: String,

        /// Allow destructive statements through the execution gate
        #[arg(long)]
        allow_destructive: bool,
    },
    /// Show database schema information
    Schema {
        /// Show a single table
        #[arg(short, long)]
        table: Option<String>,

        /// Show counts and table names only
        #[arg(short, long)]
        summary: bool,
    },
    /// Explain what a SQL query does
    Explain { sql: String },
    /// Suggest an optimized version of a SQL query
    Optimize { sql: String },
    /// Test the database connection and provider configuration
    Test,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let args = Args::parse();
    init_tracing(args.verbose);

    let buddy = connect(&args).await?;

    match &args.command {
        Commands::Generate {
            description,
            execute,
            variations,
            allow_destructive,
        } => {
            let result = match variations {
                Some(n) => buddy.generate_multiple_queries(description, *n).await?,
                None => buddy.generate_query(description).await?,
            };
            print_generation(&result, args.json)?;

            if *execute {
                let outcome = buddy
                    .execute_candidate(&result, 0, *allow_destructive)
                    .await?;
                print_outcome(&outcome, args.json)?;
            }
        }
        Commands::Execute {
            sql,
            allow_destructive,
        } => {
            let verdict = buddy.validate(sql).await?;
            if !args.json {
                print_verdict(&verdict);
            }
            let outcome = buddy.execute_query(sql, *allow_destructive).await?;
            print_outcome(&outcome, args.json)?;
        }
        Commands::Schema { table, summary } => {
            if let Some(table) = table {
                let info = buddy.table_info(table).await?;
                if args.json {
                    println!("{}", serde_json::to_string_pretty(&info)?);
                } else {
                    println!("\nTable: {}", info.name);
                    for column in &info.columns {
                        let mut flags = Vec::new();
                        if column.is_primary_key {
                            flags.push("PK");
                        }
                        if !column.nullable {
                            flags.push("NOT NULL");
                        }
                        println!("  {:<30} {:<20} {}", column.name, column.data_type, flags.join(" "));
                    }
                    for fk in &info.foreign_keys {
                        println!("  FK {} -> {}.{}", fk.column, fk.referenced_table, fk.referenced_column);
                    }
                }
            } else if *summary {
                let summary = buddy.schema_summary().await?;
                if args.json {
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                } else {
                    println!("\nDatabase: {}", summary.database.as_deref().unwrap_or("(unnamed)"));
                    println!("Tables: {}", summary.total_tables);
                    println!("Columns: {}", summary.total_columns);
                    println!("Relationships: {}", summary.total_relationships);
                    for name in &summary.table_names {
                        println!("  - {}", name);
                    }
                }
            } else {
                let schema = buddy.load_schema(false).await?;
                if args.json {
                    println!("{}", serde_json::to_string_pretty(schema.as_ref())?);
                } else {
                    println!("{}", schema.render_detailed());
                }
            }
        }
        Commands::Explain { sql } => {
            let result = buddy.explain_query(sql).await?;
            print_generation(&result, args.json)?;
        }
        Commands::Optimize { sql } => {
            let result = buddy.optimize_query(sql).await?;
            print_generation(&result, args.json)?;
        }
        Commands::Test => {
            let version = buddy.test_connection().await?;
            let summary = buddy.schema_summary().await?;
            println!("Database connection OK: {}", version);
            println!("Tables found: {}", summary.total_tables);
            println!("LLM provider: {}", buddy.provider_description());
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn connect(args: &Args) -> Result<SqlBuddy> {
    let mut database = DatabaseConfig::from_env()?;
    if let Some(kind) = &args.db_type {
        database.kind = kind.parse::<DatabaseKind>()?;
        if std::env::var("SQLBUDDY_DB_PORT").is_err() {
            database.port = database.kind.default_port();
        }
    }
    if let Some(host) = &args.host {
        database.host = host.clone();
    }
    if let Some(port) = args.port {
        database.port = port;
    }
    if let Some(user) = &args.user {
        database.user = user.clone();
    }
    if let Some(password) = &args.password {
        database.password = password.clone();
    }
    if let Some(name) = &args.database {
        database.database = name.clone();
    }

    let kind = args.llm_provider.parse::<ProviderKind>()?;
    let mut provider = ProviderConfig::resolve(kind, args.api_key.clone())?;
    if let Some(model) = &args.model {
        provider = provider.with_model(model.clone());
    }
    if let Some(temperature) = args.temperature {
        provider = provider.with_temperature(temperature);
    }

    let mut settings = GeneratorSettings::from_env()?;
    if let Some(secs) = args.timeout_secs {
        settings.timeout = Duration::from_secs(secs);
    }

    info!(db = %database.kind, provider = %provider.kind, "Connecting");
    let mut buddy = SqlBuddy::connect(&database, provider, settings).await?;
    if let Some(path) = &args.audit_log {
        buddy = buddy.with_audit_log(AuditLog::new(Some(path.clone()), 1000));
    }
    Ok(buddy)
}

fn print_verdict(verdict: &ValidationVerdict) {
    let status = if verdict.is_valid() { "VALID" } else { "INVALID" };
    let destructive = if verdict.is_destructive() { " (DESTRUCTIVE)" } else { "" };
    println!("\nValidation: {}{}", status, destructive);
    for error in verdict.errors() {
        println!("  ✗ {}", error);
    }
    for warning in verdict.warnings() {
        println!("  ⚠ {}", warning);
    }
}

fn print_generation(result: &GenerationResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!("\n{}", "=".repeat(80));
    match &result.variations {
        Some(variations) => {
            for (i, candidate) in variations.iter().enumerate() {
                println!("\nVariation {}:", i + 1);
                println!("{}", candidate.query);
                print_verdict(&candidate.validation);
            }
        }
        None => {
            if let Some(optimization) = &result.optimization {
                println!("\nOriginal query:");
                println!("{}", optimization.original_query);
                print_verdict(&optimization.original_validation);
                println!("\nOptimized query:");
            } else {
                println!("\nQuery:");
            }
            println!("{}", result.query);
            print_verdict(&result.validation);
        }
    }

    if let Some(explanation) = &result.explanation {
        println!("\nExplanation:\n{}", explanation);
    }
    if !result.tables_used.is_empty() {
        println!("\nTables used: {}", result.tables_used.join(", "));
    }
    if let Some(details) = result.optimization.as_ref().and_then(|o| o.details.as_ref()) {
        println!("\nOptimization notes:\n{}", details);
    }
    for warning in &result.warnings {
        println!("⚠ {}", warning);
    }
    println!("{}", "=".repeat(80));
    Ok(())
}

fn print_outcome(outcome: &ExecutionOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    if outcome.columns.is_empty() {
        println!("\n{} row(s) affected", outcome.row_count);
        return Ok(());
    }

    println!("\n{}", outcome.columns.join("\t"));
    for row in outcome.rows.iter().take(MAX_PRINTED_ROWS) {
        let cells: Vec<String> = outcome
            .columns
            .iter()
            .map(|c| match row.get(c) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => "NULL".to_string(),
                Some(other) => other.to_string(),
            })
            .collect();
        println!("{}", cells.join("\t"));
    }
    if outcome.rows.len() > MAX_PRINTED_ROWS {
        println!("... {} more row(s)", outcome.rows.len() - MAX_PRINTED_ROWS);
    }
    println!("\n{} row(s) returned", outcome.row_count);
    Ok(())
}
