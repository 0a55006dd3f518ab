//! Visibility CLI
//!
//! Resolves a caller's visibility policy against Postgres and shows what a
//! fetch would do (or does).
//!
//! Usage:
//!   cargo run --features cli --bin visibility_cli -- policy \
//!     --caller 5f0c…  --role national_reviewer
//!
//!   cargo run --features cli --bin visibility_cli -- plan pilots \
//!     --caller 5f0c… --page 2 --page-size 10 --count
//!
//!   cargo run --features cli --bin visibility_cli -- fetch events \
//!     --caller 5f0c… --status open --json

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use uuid::Uuid;

use visibility_core::caller::CallerContext;
use visibility_core::schema::EntityQuerySpec;
use visibility_core::strategic::StrategicFilters;
use visibility_core::types::Pagination;
use visibility_engine::{EngineConfig, EntityKind, VisibilityEngine};
use visibility_postgres::DatabaseConfig;

#[derive(Parser, Debug)]
#[command(name = "visibility_cli")]
#[command(about = "Inspect visibility policies, compiled plans and scoped fetches")]
struct Cli {
    /// Database URL (overrides DATABASE_URL)
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every entity collection with its cache TTL
    Entities,
    /// Resolve and print a caller's visibility policy
    Policy(CallerArgs),
    /// Print the compiled query plan for an entity
    Plan(QueryArgs),
    /// Fetch rows for an entity under the caller's visibility
    Fetch(QueryArgs),
}

#[derive(Args, Debug)]
struct CallerArgs {
    /// Caller id; omit for an anonymous caller
    #[arg(long)]
    caller: Option<Uuid>,

    /// Role (repeatable)
    #[arg(long = "role")]
    roles: Vec<String>,

    /// Permission (repeatable)
    #[arg(long = "permission")]
    permissions: Vec<String>,
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Entity collection, e.g. "pilots" or "living-labs"
    entity: EntityKind,

    #[command(flatten)]
    caller: CallerArgs,

    /// Status value (repeatable)
    #[arg(long = "status")]
    statuses: Vec<String>,

    /// Strategic plan id (repeatable)
    #[arg(long = "plan")]
    plans: Vec<Uuid>,

    /// One-based page number
    #[arg(long, requires = "page_size")]
    page: Option<usize>,

    #[arg(long)]
    page_size: Option<usize>,

    /// Request an exact count
    #[arg(long)]
    count: bool,

    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

impl CallerArgs {
    fn context(&self) -> CallerContext {
        match self.caller {
            Some(id) => CallerContext::new(id, self.roles.clone())
                .with_permissions(self.permissions.clone()),
            None => CallerContext {
                roles: self.roles.clone(),
                permissions: self.permissions.clone(),
                ..CallerContext::anonymous()
            },
        }
    }
}

impl QueryArgs {
    fn spec(&self) -> Result<EntityQuerySpec> {
        let mut spec = self.entity.query();
        if !self.statuses.is_empty() {
            let statuses: Vec<&str> = self.statuses.iter().map(String::as_str).collect();
            spec = spec.filter(self.entity.status_filter(&statuses)?);
        }
        if !self.plans.is_empty() {
            spec = visibility_core::strategic::with_strategic(
                &spec,
                &StrategicFilters::plans(self.plans.iter().copied()),
            )?;
        }
        match (self.page, self.page_size) {
            (Some(page), Some(size)) => spec = spec.paginate(Pagination::page(page, size)),
            (None, Some(size)) => spec = spec.paginate(Pagination::limit(size)),
            _ => {}
        }
        if self.count {
            spec = spec.with_count();
        }
        Ok(spec)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    if let Command::Entities = cli.command {
        for kind in EntityKind::ALL {
            let schema = kind.schema();
            println!(
                "{:<24} ttl={:>3}m{}",
                kind.collection().bold(),
                schema.cache_ttl.as_secs() / 60,
                if schema.strict_pagination { "  strict-pagination" } else { "" }
            );
        }
        return Ok(());
    }

    let mut database = DatabaseConfig::default();
    if let Some(url) = cli.database_url {
        database = database.with_url(url);
    }
    let engine = VisibilityEngine::connect(&database, EngineConfig::from_env()).await?;

    match cli.command {
        Command::Entities => {}
        Command::Policy(args) => {
            let policy = engine.policy_for(&args.context()).await;
            println!("{} {}", "level:".cyan(), policy.level.to_string().bold());
            println!("{}", serde_json::to_string_pretty(&policy)?);
        }
        Command::Plan(args) => {
            let policy = engine.policy_for(&args.caller.context()).await;
            let compiled = engine.compile(&args.spec()?, &policy)?;
            if !args.json {
                println!(
                    "{} {} ({})",
                    "plan:".cyan(),
                    compiled.kind().bold(),
                    compiled.level()
                );
            }
            println!("{}", serde_json::to_string_pretty(&compiled)?);
        }
        Command::Fetch(args) => {
            let spec = args.spec()?;
            let result = engine
                .fetch_for(&args.caller.context(), &spec)
                .await
                .with_context(|| format!("fetching {}", args.entity))?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                for row in &result.rows {
                    println!("{}", serde_json::Value::Object(row.clone()));
                }
                let summary = match (result.count, args.page_size) {
                    (Some(count), Some(size)) => format!(
                        "{} rows, {} total, {} pages",
                        result.rows.len(),
                        count,
                        result.total_pages(size).unwrap_or(0)
                    ),
                    (Some(count), None) => format!("{} rows, {} total", result.rows.len(), count),
                    _ => format!("{} rows", result.rows.len()),
                };
                let summary = if result.merged {
                    format!("{summary} (merged)")
                } else {
                    summary
                };
                println!("{}", summary.green());
            }
        }
    }
    Ok(())
}
