//! # Report Pipeline CLI (`reports`)
//!
//! ## Usage
//!
//! ```bash
//! reports --config ./config/reports.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `reports init` | Create the SQLite catalog and run schema migrations |
//! | `reports run` | Process every `[[companies]]` entry, print the batch result |
//! | `reports run-one` | Process one company by legal id or name |
//! | `reports list` | Print cataloged reports |
//! | `reports serve` | Start the HTTP trigger and catalog API |
//!
//! Log verbosity follows `RUST_LOG` (default `report_pipeline=info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use report_pipeline::catalog::SqliteCatalog;
use report_pipeline::config::{self, Config};
use report_pipeline::models::BatchResult;
use report_pipeline::pipeline::{IndexMode, Pipeline};
use report_pipeline::server::{self, AppState};
use report_pipeline::{db, migrate, source};

/// Acquire, catalog and index periodic disclosure reports.
#[derive(Parser)]
#[command(name = "reports", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/reports.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the catalog schema. Idempotent.
    Init,

    /// Run the pipeline over all configured companies.
    Run,

    /// Run the pipeline for a single company.
    RunOne {
        /// Legal id or company name to search for.
        #[arg(long)]
        query: String,

        /// Ticker the reports are cataloged under.
        #[arg(long)]
        ticker: String,

        /// Publish and catalog only; leave indexing for a later run.
        #[arg(long)]
        skip_indexing: bool,
    },

    /// List cataloged reports.
    List {
        /// Only reports of this ticker.
        #[arg(long)]
        ticker: Option<String>,

        #[arg(long, default_value_t = 0)]
        skip: i64,

        #[arg(long, default_value_t = 100)]
        limit: i64,
    },

    /// Start the HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("report_pipeline=info,reports=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("catalog initialized at {}", cfg.db.path.display());
        }
        Commands::Run => {
            let (pipeline, _) = build_pipeline(&cfg).await?;
            let mut source = source::open_source(&cfg.crawler)?;
            let result = pipeline.run_batch(&cfg.companies, source.as_mut()).await;
            print_result(&result)?;
        }
        Commands::RunOne {
            query,
            ticker,
            skip_indexing,
        } => {
            let (pipeline, _) = build_pipeline(&cfg).await?;
            let mut source = source::open_source(&cfg.crawler)?;
            let mode = if skip_indexing {
                IndexMode::Deferred
            } else {
                IndexMode::Inline
            };
            let result = pipeline
                .run_company(source.as_mut(), &query, &ticker, mode)
                .await;
            print_result(&result)?;
        }
        Commands::List {
            ticker,
            skip,
            limit,
        } => {
            let pool = db::connect(&cfg).await?;
            migrate::migrate_pool(&pool).await?;
            let catalog = SqliteCatalog::new(pool);
            let records = match ticker {
                Some(ref t) => catalog.list_by_ticker_page(t, skip, limit).await?,
                None => catalog.list(skip, limit).await?,
            };
            if records.is_empty() {
                println!("no reports");
            }
            for r in &records {
                println!(
                    "{:>6}  {:<8} {} {:>2}m  {}",
                    r.id, r.ticker, r.year, r.period, r.address
                );
            }
        }
        Commands::Serve => {
            let (pipeline, catalog) = build_pipeline(&cfg).await?;
            let crawler = cfg.crawler.clone();
            let state = AppState {
                config: Arc::new(cfg),
                pipeline: Arc::new(pipeline),
                catalog,
                sources: Arc::new(move || source::open_source(&crawler)),
            };
            server::run_server(state).await?;
        }
    }

    Ok(())
}

async fn build_pipeline(cfg: &Config) -> Result<(Pipeline, SqliteCatalog)> {
    let pool = db::connect(cfg).await?;
    migrate::migrate_pool(&pool).await?;
    let pipeline = Pipeline::from_config(cfg, pool.clone())?;
    Ok((pipeline, SqliteCatalog::new(pool)))
}

fn print_result(result: &BatchResult) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(())
}
