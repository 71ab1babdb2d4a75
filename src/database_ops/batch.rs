//! Shared bulk-insert helper. A failed batch is rolled back by the store, logged, and
//! counted as zero rows written; callers keep going with the next batch.
use serde::Serialize;
use tracing::{debug, warn};

use super::store::{CatalogStore, ConflictPolicy, Rows, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub table: Table,
    pub attempted: usize,
    pub written: u64,
    pub failed: bool,
}

/// Running totals over every batch a phase wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchTotals {
    pub batches: u64,
    pub failed_batches: u64,
    pub rows_attempted: u64,
    pub rows_written: u64,
}

impl BatchTotals {
    pub fn record(&mut self, outcome: &BatchOutcome) {
        self.batches += 1;
        self.rows_attempted += outcome.attempted as u64;
        self.rows_written += outcome.written;
        if outcome.failed {
            self.failed_batches += 1;
        }
    }

    pub fn merge(&mut self, other: BatchTotals) {
        self.batches += other.batches;
        self.failed_batches += other.failed_batches;
        self.rows_attempted += other.rows_attempted;
        self.rows_written += other.rows_written;
    }
}

pub async fn write_batch<S>(store: &mut S, rows: Rows<'_>, policy: ConflictPolicy) -> BatchOutcome
where
    S: CatalogStore + ?Sized,
{
    let table = rows.table();
    let attempted = rows.len();
    if rows.is_empty() {
        return BatchOutcome {
            table,
            attempted,
            written: 0,
            failed: false,
        };
    }

    match store.insert_batch(rows, policy).await {
        Ok(written) => {
            debug!(%table, attempted, written, "batch committed");
            BatchOutcome {
                table,
                attempted,
                written,
                failed: false,
            }
        }
        Err(err) => {
            warn!(%table, attempted, error = %format!("{err:#}"), "batch insert failed; rolled back");
            BatchOutcome {
                table,
                attempted,
                written: 0,
                failed: true,
            }
        }
    }
}

/// Split `rows` into `batch_size` slices and write each one. The final slice may be short.
pub async fn write_batches<S, T>(
    store: &mut S,
    rows: &[T],
    batch_size: usize,
    policy: ConflictPolicy,
) -> BatchTotals
where
    S: CatalogStore + ?Sized,
    T: Sync,
    for<'a> &'a [T]: Into<Rows<'a>>,
{
    let mut totals = BatchTotals::default();
    for batch in rows.chunks(batch_size.max(1)) {
        let outcome = write_batch(store, batch.into(), policy).await;
        totals.record(&outcome);
    }
    totals
}
