use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use playstore_import::cli::db_counts::{self, DbCountsConfig};
use playstore_import::cli::import::{self, ImportConfig};
use playstore_import::database_ops::db::Db;
use playstore_import::logging::{init_tracing, DEFAULT_FILTER};
use playstore_import::util::env;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "playstore-import", version, about = "Google Play catalog CSV importer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Import the CSV export into categories, developers and apps
    Import(ImportArgs),
    /// Print row counts for the catalog tables
    Counts {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Create the catalog tables and indexes if they are missing
    InitSchema {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// CSV export to read (default: env SOURCE_CSV or data/Google-Playstore.csv)
    #[arg(long)]
    source: Option<PathBuf>,
    /// Rows read per chunk (default: env CHUNK_SIZE or 10000)
    #[arg(long)]
    chunk_size: Option<usize>,
    /// Rows per insert transaction (default: env BATCH_SIZE or 1000)
    #[arg(long)]
    batch_size: Option<usize>,
    /// Optional override for the database URL
    #[arg(long)]
    db_url: Option<String>,
    /// Optional override for max pool connections
    #[arg(long)]
    max_connections: Option<u32>,
    /// Create tables before importing (also enabled by AUTO_MIGRATE=1)
    #[arg(long, default_value_t = false)]
    init_schema: bool,
    /// Run against an in-memory store; nothing is written to the database
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    /// Print the run summary as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl ImportArgs {
    fn into_config(self) -> ImportConfig {
        let mut cfg = ImportConfig::from_env();
        if let Some(source) = self.source {
            cfg.source = source;
        }
        if let Some(n) = self.chunk_size {
            cfg.chunk_size = n;
        }
        if let Some(n) = self.batch_size {
            cfg.batch_size = n;
        }
        if let Some(n) = self.max_connections {
            cfg.max_connections = n;
        }
        cfg.database_url = self.db_url;
        cfg.init_schema |= self.init_schema;
        cfg.dry_run = self.dry_run;
        cfg
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env first so RUST_LOG is picked up
    env::init_env();
    init_tracing(DEFAULT_FILTER)?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Import(args) => {
            let json = args.json;
            let summary = import::run(args.into_config()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", summary.render());
            }
        }
        Commands::Counts { db_url } => {
            db_counts::run(DbCountsConfig {
                database_url: db_url,
            })
            .await?;
        }
        Commands::InitSchema { db_url } => {
            let db_url = match db_url {
                Some(url) => url,
                None => env::db_url()?,
            };
            let db = Db::connect(&db_url, 1)
                .await
                .context("Db::connect failed")?;
            let result = db.ensure_schema().await;
            db.close().await;
            result?;
        }
    }
    Ok(())
}
