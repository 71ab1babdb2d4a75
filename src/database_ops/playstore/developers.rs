use anyhow::{Context, Result};
use indexmap::IndexMap;
use tracing::{info, instrument};

use super::{Resolved, ResolutionStats};
use crate::database_ops::batch::write_batches;
use crate::database_ops::store::{
    CatalogStore, ConflictPolicy, DeveloperKey, DeveloperMap, NewDeveloper,
};
use crate::source::{cell, Column, CsvSource};

/// Stream the developer columns and collect each distinct `(name, email)` once.
/// The first website seen for a key is the one written.
pub fn scan_developers(
    source: &CsvSource,
) -> Result<(IndexMap<DeveloperKey, String>, ResolutionStats)> {
    let mut reader = source.open()?;
    let name_idx = reader.index_of(Column::DeveloperId);
    let website_idx = reader.index_of(Column::DeveloperWebsite);
    let email_idx = reader.index_of(Column::DeveloperEmail);
    let mut developers: IndexMap<DeveloperKey, String> = IndexMap::new();
    let mut stats = ResolutionStats::default();

    while let Some(chunk) = reader.next_chunk()? {
        stats.rows_read += chunk.rows_read() as u64;
        stats.rows_rejected += chunk.rejected as u64;
        for record in &chunk.records {
            let Some(name) = cell(record, name_idx) else {
                stats.blank_keys += 1;
                continue;
            };
            let key = DeveloperKey::new(name, cell(record, email_idx));
            developers
                .entry(key)
                .or_insert_with(|| cell(record, website_idx).unwrap_or_default().to_string());
        }
        info!(phase = "developers", rows_read = stats.rows_read, distinct = developers.len(), "reading developers");
    }

    stats.distinct = developers.len() as u64;
    Ok((developers, stats))
}

/// Insert every unseen developer and return the complete `(name, email)` -> id snapshot.
#[instrument(skip_all, fields(source = %source.path().display()))]
pub async fn resolve_developers<S>(
    store: &mut S,
    source: &CsvSource,
    batch_size: usize,
) -> Result<Resolved<DeveloperMap>>
where
    S: CatalogStore + ?Sized,
{
    let (developers, mut stats) = scan_developers(source).context("developer scan failed")?;
    info!(distinct = stats.distinct, blank = stats.blank_keys, "found unique developers");

    let rows: Vec<NewDeveloper> = developers
        .into_iter()
        .map(|(key, website)| NewDeveloper { key, website })
        .collect();
    stats.writes = write_batches(store, &rows, batch_size, ConflictPolicy::Skip).await;
    info!(
        written = stats.writes.rows_written,
        failed_batches = stats.writes.failed_batches,
        "inserted developers"
    );

    let map = store
        .load_developers()
        .await
        .context("failed to reload developer ids")?;
    stats.mapped = map.len() as u64;
    Ok(Resolved { map, stats })
}
