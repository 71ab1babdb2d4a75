use anyhow::Result;
use async_trait::async_trait;
use sqlx::{
    pool::PoolConnection,
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    Connection, PgPool, Postgres, QueryBuilder, Row,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::store::{
    CatalogStore, CategoryMap, ConflictPolicy, DeveloperKey, DeveloperMap, Rows, Table,
};

/// Bootstrap DDL for the three catalog tables. Idempotent.
const CATALOG_SCHEMA: &str = include_str!("../../migrations/0001_playstore_catalog.sql");

/// Insert column lists, in bind order.
const CATEGORY_COLUMNS: &[&str] = &["name"];
const DEVELOPER_COLUMNS: &[&str] = &["name", "website", "email"];
pub const APP_COLUMNS: &[&str] = &[
    "name",
    "app_id",
    "category_id",
    "developer_id",
    "rating",
    "rating_count",
    "installs",
    "min_installs",
    "max_installs",
    "is_free",
    "price",
    "currency",
    "size",
    "min_android",
    "released_date",
    "last_updated",
    "content_rating",
    "privacy_policy_url",
    "has_ads",
    "has_in_app_purchases",
    "is_editors_choice",
    "scraped_time",
];

/// PostgreSQL caps a statement at this many bind parameters.
pub const PG_MAX_BIND_PARAMS: usize = 65_535;

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let use_prepared = std::env::var("USE_PREPARED")
            .map(|v| (v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("on")))
            .unwrap_or(false);
        let mut connect_options = PgConnectOptions::from_str(database_url)?;

        if database_url.contains("sslmode=require") && !database_url.contains("sslmode=disable") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        if !use_prepared {
            // PgBouncer txn mode safe
            connect_options = connect_options.statement_cache_capacity(0);
        }

        // Optional bulk-load session tuning
        let fast_ingest = std::env::var("FAST_INGEST")
            .map(|v| (v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("on")))
            .unwrap_or(false);
        let work_mem_mb: u32 = std::env::var("FAST_INGEST_WORK_MEM_MB")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(64);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .after_connect(move |conn, _meta| {
                let do_fast = fast_ingest;
                let wm = work_mem_mb;
                Box::pin(async move {
                    if do_fast {
                        // Best-effort; ignore errors to avoid blocking startup in restricted envs
                        let _ = sqlx::query("SET synchronous_commit = 'off'")
                            .execute(&mut *conn)
                            .await;
                        let _ = sqlx::query(&format!("SET work_mem = '{}MB'", wm))
                            .execute(&mut *conn)
                            .await;
                    }
                    Ok(())
                })
            })
            .connect_with(connect_options)
            .await?;
        info!(max_connections, "connected to db");
        Ok(Self { pool })
    }

    /// Create the catalog tables and indexes when they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(CATALOG_SCHEMA).execute(&self.pool).await?;
        info!("catalog schema ensured");
        Ok(())
    }

    /// Check out the single connection an import run works on.
    pub async fn acquire_store(&self) -> Result<PgCatalogStore> {
        let conn = self.pool.acquire().await?;
        Ok(PgCatalogStore { conn })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Catalog store bound to one pooled connection. Dropping it returns the connection.
pub struct PgCatalogStore {
    conn: PoolConnection<Postgres>,
}

fn insert_statement<'a>(rows: Rows<'a>, policy: ConflictPolicy) -> QueryBuilder<'a, Postgres> {
    let table = rows.table();
    let columns = match table {
        Table::Categories => CATEGORY_COLUMNS,
        Table::Developers => DEVELOPER_COLUMNS,
        Table::Apps => APP_COLUMNS,
    };
    let mut qb: QueryBuilder<'a, Postgres> =
        QueryBuilder::new(format!("INSERT INTO {} ({}) ", table.name(), columns.join(", ")));

    match rows {
        Rows::Categories(rows) => {
            qb.push_values(rows, |mut b, r| {
                b.push_bind(&r.name);
            });
        }
        Rows::Developers(rows) => {
            qb.push_values(rows, |mut b, r| {
                b.push_bind(&r.key.name)
                    .push_bind(&r.website)
                    .push_bind(&r.key.email);
            });
        }
        Rows::Apps(rows) => {
            qb.push_values(rows, |mut b, r| {
                b.push_bind(&r.name)
                    .push_bind(&r.app_id)
                    .push_bind(r.category_id)
                    .push_bind(r.developer_id)
                    .push_bind(&r.rating)
                    .push_bind(r.rating_count)
                    .push_bind(&r.installs)
                    .push_bind(r.min_installs)
                    .push_bind(r.max_installs)
                    .push_bind(r.is_free)
                    .push_bind(&r.price)
                    .push_bind(&r.currency)
                    .push_bind(&r.size)
                    .push_bind(&r.min_android)
                    .push_bind(r.released_date)
                    .push_bind(r.last_updated)
                    .push_bind(&r.content_rating)
                    .push_bind(&r.privacy_policy_url)
                    .push_bind(r.has_ads)
                    .push_bind(r.has_in_app_purchases)
                    .push_bind(r.is_editors_choice)
                    .push_bind(r.scraped_time);
            });
        }
    }

    if policy == ConflictPolicy::Skip {
        qb.push(format!(
            " ON CONFLICT ({}) DO NOTHING",
            table.conflict_key().join(", ")
        ));
    }
    qb
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    #[instrument(skip(self, rows), fields(table = %rows.table(), rows = rows.len()))]
    async fn insert_batch(&mut self, rows: Rows<'_>, policy: ConflictPolicy) -> Result<u64> {
        let mut qb = insert_statement(rows, policy);
        let mut tx = self.conn.begin().await?;
        match qb.build().persistent(false).execute(&mut *tx).await {
            Ok(done) => {
                tx.commit().await?;
                Ok(done.rows_affected())
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err.into())
            }
        }
    }

    #[instrument(skip(self))]
    async fn load_categories(&mut self) -> Result<CategoryMap> {
        let rows = sqlx::query("SELECT id, name FROM categories")
            .persistent(false)
            .fetch_all(&mut *self.conn)
            .await?;
        let mut map = CategoryMap::with_capacity(rows.len());
        for r in rows {
            map.insert(r.try_get::<String, _>("name")?, r.try_get::<i32, _>("id")?);
        }
        Ok(map)
    }

    #[instrument(skip(self))]
    async fn load_developers(&mut self) -> Result<DeveloperMap> {
        // legacy rows may carry NULL emails; key them like the importer does
        let rows = sqlx::query("SELECT id, name, COALESCE(email, '') AS email FROM developers")
            .persistent(false)
            .fetch_all(&mut *self.conn)
            .await?;
        let mut map = DeveloperMap::with_capacity(rows.len());
        for r in rows {
            let key = DeveloperKey {
                name: r.try_get("name")?,
                email: r.try_get("email")?,
            };
            map.insert(key, r.try_get::<i32, _>("id")?);
        }
        Ok(map)
    }

    async fn count(&mut self, table: Table) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let n: i64 = sqlx::query_scalar(&sql)
            .persistent(false)
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(n)
    }
}
