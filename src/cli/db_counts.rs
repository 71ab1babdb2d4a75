use anyhow::{Context, Result};
use tracing::info;

use crate::database_ops::db::Db;
use crate::database_ops::store::{CatalogStore, Table};
use crate::util::env as env_util;

#[derive(Debug, Clone, Default)]
pub struct DbCountsConfig {
    /// Optional override for the Postgres connection string.
    pub database_url: Option<String>,
}

/// Row counts for the catalog tables, in `Table::ALL` order.
pub async fn collect<S>(store: &mut S) -> Result<Vec<(Table, i64)>>
where
    S: CatalogStore + ?Sized,
{
    let mut out = Vec::with_capacity(Table::ALL.len());
    for table in Table::ALL {
        let n = store
            .count(table)
            .await
            .with_context(|| format!("count failed for {table}"))?;
        out.push((table, n));
    }
    Ok(out)
}

pub fn render(counts: &[(Table, i64)]) -> String {
    let mut out = String::new();
    for (table, n) in counts {
        out.push_str(&format!("{:<12} {:>12}\n", table.name(), n));
    }
    out
}

pub async fn run(cfg: DbCountsConfig) -> Result<()> {
    env_util::init_env();
    let db_url = match cfg.database_url {
        Some(url) => url,
        None => env_util::db_url()?,
    };
    let db = Db::connect(&db_url, 1).await?;
    let counts = async {
        let mut store = db.acquire_store().await?;
        collect(&mut store).await
    }
    .await;
    db.close().await;
    let counts = counts?;
    info!(tables = counts.len(), "collected table counts");
    print!("{}", render(&counts));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::memory::MemoryCatalogStore;
    use crate::database_ops::store::{NewCategory, Rows};
    use crate::database_ops::store::ConflictPolicy;

    #[tokio::test]
    async fn counts_every_table() {
        let mut store = MemoryCatalogStore::new();
        let rows = vec![NewCategory { name: "Tools".into() }];
        store
            .insert_batch(Rows::Categories(&rows), ConflictPolicy::Skip)
            .await
            .unwrap();

        let counts = collect(&mut store).await.unwrap();

        assert_eq!(
            counts,
            vec![(Table::Categories, 1), (Table::Developers, 0), (Table::Apps, 0)]
        );
        let text = render(&counts);
        assert!(text.starts_with("categories"));
        assert_eq!(text.lines().count(), 3);
    }
}
