use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tracing::info;

use crate::database_ops::db::{Db, APP_COLUMNS, PG_MAX_BIND_PARAMS};
use crate::database_ops::memory::MemoryCatalogStore;
use crate::orchestrator::{ImportPipeline, RunSummary};
use crate::source::CsvSource;
use crate::util::env as env_util;

pub const DEFAULT_SOURCE: &str = "data/Google-Playstore.csv";
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// CSV export to read.
    pub source: PathBuf,
    /// Rows held in memory per read.
    pub chunk_size: usize,
    /// Rows per insert transaction.
    pub batch_size: usize,
    /// Optional override for the Postgres connection string.
    pub database_url: Option<String>,
    /// Pool size; one run only ever uses a single connection.
    pub max_connections: u32,
    /// Create the catalog tables before importing.
    pub init_schema: bool,
    /// Import into an in-process store instead of the database.
    pub dry_run: bool,
}

impl ImportConfig {
    /// Defaults overlaid with `SOURCE_CSV`, `CHUNK_SIZE`, `BATCH_SIZE`, `DB_MAX_CONNS`
    /// and `AUTO_MIGRATE`.
    pub fn from_env() -> Self {
        env_util::init_env();
        Self {
            source: env_util::env_opt("SOURCE_CSV")
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string())
                .into(),
            chunk_size: env_util::env_parse("CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
            batch_size: env_util::env_parse("BATCH_SIZE", DEFAULT_BATCH_SIZE),
            database_url: None,
            max_connections: env_util::env_parse("DB_MAX_CONNS", 1u32),
            init_schema: env_util::env_flag("AUTO_MIGRATE", false),
            dry_run: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk size must be positive");
        }
        if self.batch_size == 0 {
            bail!("batch size must be positive");
        }
        let max_batch = PG_MAX_BIND_PARAMS / APP_COLUMNS.len();
        if self.batch_size > max_batch {
            bail!(
                "batch size {} exceeds {} rows ({} bind parameters per app row)",
                self.batch_size,
                max_batch,
                APP_COLUMNS.len()
            );
        }
        if self.max_connections == 0 {
            bail!("max connections must be at least 1");
        }
        Ok(())
    }

    fn pipeline(&self) -> ImportPipeline {
        ImportPipeline::new(CsvSource::new(&self.source, self.chunk_size), self.batch_size)
    }
}

pub async fn run(cfg: ImportConfig) -> Result<RunSummary> {
    cfg.validate()?;
    env_util::preflight_check(
        "import",
        &[],
        &[
            ("SOURCE_CSV", cfg.source.display().to_string()),
            ("CHUNK_SIZE", cfg.chunk_size.to_string()),
            ("BATCH_SIZE", cfg.batch_size.to_string()),
            ("DB_MAX_CONNS", cfg.max_connections.to_string()),
            ("DRY_RUN", cfg.dry_run.to_string()),
        ],
    )?;
    let pipeline = cfg.pipeline();

    if cfg.dry_run {
        info!("dry run: importing into an in-memory store");
        let mut store = MemoryCatalogStore::new();
        return pipeline.run(&mut store).await;
    }

    let db_url = match cfg.database_url.clone() {
        Some(url) => url,
        None => env_util::db_url()?,
    };
    let db = Db::connect(&db_url, cfg.max_connections)
        .await
        .context("Db::connect failed")?;
    if cfg.init_schema {
        db.ensure_schema().await.context("schema bootstrap failed")?;
    }

    let result = async {
        // the connection goes back to the pool when `store` drops, on success or error
        let mut store = db.acquire_store().await.context("failed to acquire connection")?;
        pipeline.run(&mut store).await
    }
    .await;
    db.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::fixtures::CsvFixture;

    fn config() -> ImportConfig {
        ImportConfig {
            source: DEFAULT_SOURCE.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            database_url: None,
            max_connections: 1,
            init_schema: false,
            dry_run: true,
        }
    }

    #[test]
    fn defaults_are_valid() {
        config().validate().unwrap();
    }

    #[test]
    fn rejects_batches_beyond_bind_limit() {
        let cfg = ImportConfig {
            batch_size: 5_000,
            ..config()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("bind parameters"));
    }

    #[test]
    fn rejects_zero_sizes() {
        assert!(ImportConfig { chunk_size: 0, ..config() }.validate().is_err());
        assert!(ImportConfig { batch_size: 0, ..config() }.validate().is_err());
        assert!(ImportConfig { max_connections: 0, ..config() }.validate().is_err());
    }

    #[tokio::test]
    async fn dry_run_imports_without_a_database() {
        let file = CsvFixture::new()
            .app("a1", "Tools", "Dev1", "", &[])
            .app("a2", "Games", "Dev1", "", &[])
            .write();
        let cfg = ImportConfig {
            source: file.path().to_path_buf(),
            ..config()
        };

        let summary = run(cfg).await.unwrap();

        assert_eq!(summary.processed_rows, 2);
        assert_eq!(summary.apps.writes.rows_written, 2);
        assert_eq!(summary.categories.distinct, 2);
    }
}
