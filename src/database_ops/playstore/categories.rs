use anyhow::{Context, Result};
use indexmap::IndexSet;
use tracing::{info, instrument};

use super::{Resolved, ResolutionStats};
use crate::database_ops::batch::write_batches;
use crate::database_ops::store::{CatalogStore, CategoryMap, ConflictPolicy, NewCategory};
use crate::source::{cell, Column, CsvSource};

/// Stream the `Category` column and collect each distinct name once.
pub fn scan_categories(source: &CsvSource) -> Result<(IndexSet<String>, ResolutionStats)> {
    let mut reader = source.open()?;
    let idx = reader.index_of(Column::Category);
    let mut names: IndexSet<String> = IndexSet::new();
    let mut stats = ResolutionStats::default();

    while let Some(chunk) = reader.next_chunk()? {
        stats.rows_read += chunk.rows_read() as u64;
        stats.rows_rejected += chunk.rejected as u64;
        for record in &chunk.records {
            match cell(record, idx) {
                Some(name) => {
                    if !names.contains(name) {
                        names.insert(name.to_string());
                    }
                }
                None => stats.blank_keys += 1,
            }
        }
        info!(phase = "categories", rows_read = stats.rows_read, distinct = names.len(), "reading categories");
    }

    stats.distinct = names.len() as u64;
    Ok((names, stats))
}

/// Insert every unseen category and return the complete name -> id snapshot.
#[instrument(skip_all, fields(source = %source.path().display()))]
pub async fn resolve_categories<S>(
    store: &mut S,
    source: &CsvSource,
    batch_size: usize,
) -> Result<Resolved<CategoryMap>>
where
    S: CatalogStore + ?Sized,
{
    let (names, mut stats) = scan_categories(source).context("category scan failed")?;
    info!(distinct = stats.distinct, blank = stats.blank_keys, "found unique categories");

    let rows: Vec<NewCategory> = names.into_iter().map(|name| NewCategory { name }).collect();
    stats.writes = write_batches(store, &rows, batch_size, ConflictPolicy::Skip).await;
    info!(
        written = stats.writes.rows_written,
        failed_batches = stats.writes.failed_batches,
        "inserted categories"
    );

    let map = store
        .load_categories()
        .await
        .context("failed to reload category ids")?;
    stats.mapped = map.len() as u64;
    Ok(Resolved { map, stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::memory::MemoryCatalogStore;
    use crate::source::fixtures::CsvFixture;

    #[tokio::test]
    async fn repeated_names_produce_one_row() {
        let file = CsvFixture::new()
            .app("a1", "Games", "Dev1", "", &[])
            .app("a2", "Games", "Dev1", "", &[])
            .app("a3", "Tools", "Dev1", "", &[])
            .write();
        let source = CsvSource::new(file.path(), 2);
        let mut store = MemoryCatalogStore::new();

        let resolved = resolve_categories(&mut store, &source, 1).await.unwrap();

        assert_eq!(resolved.stats.rows_read, 3);
        assert_eq!(resolved.stats.distinct, 2);
        assert_eq!(resolved.stats.writes.rows_written, 2);
        let games: Vec<_> = store.categories().iter().filter(|c| c.name == "Games").collect();
        assert_eq!(games.len(), 1);
        assert_eq!(resolved.map.get("Games"), Some(&games[0].id));
    }

    #[tokio::test]
    async fn names_are_case_sensitive_and_blanks_skipped() {
        let file = CsvFixture::new()
            .app("a1", "Games", "Dev1", "", &[])
            .app("a2", "games", "Dev1", "", &[])
            .app("a3", "", "Dev1", "", &[])
            .write();
        let source = CsvSource::new(file.path(), 10);
        let mut store = MemoryCatalogStore::new();

        let resolved = resolve_categories(&mut store, &source, 10).await.unwrap();

        assert_eq!(resolved.stats.distinct, 2);
        assert_eq!(resolved.stats.blank_keys, 1);
        assert!(resolved.map.contains_key("Games"));
        assert!(resolved.map.contains_key("games"));
    }

    #[tokio::test]
    async fn mapping_includes_categories_from_earlier_runs() {
        let mut store = MemoryCatalogStore::new();
        let earlier = CsvFixture::new().app("a0", "Education", "Dev1", "", &[]).write();
        resolve_categories(&mut store, &CsvSource::new(earlier.path(), 10), 10)
            .await
            .unwrap();

        let file = CsvFixture::new().app("a1", "Games", "Dev1", "", &[]).write();
        let resolved = resolve_categories(&mut store, &CsvSource::new(file.path(), 10), 10)
            .await
            .unwrap();

        assert_eq!(resolved.stats.mapped, 2);
        assert!(resolved.map.contains_key("Education"));
    }

    #[tokio::test]
    async fn unreadable_source_is_fatal() {
        let source = CsvSource::new("/nonexistent/playstore.csv", 10);
        let mut store = MemoryCatalogStore::new();
        assert!(resolve_categories(&mut store, &source, 10).await.is_err());
    }
}
