//! Google Play catalog import: category and developer resolution followed by the app pass.
pub mod apps;
pub mod categories;
pub mod developers;

use serde::Serialize;

use super::batch::BatchTotals;

/// Counters for one resolution phase (categories or developers).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionStats {
    /// Source rows consumed, including rejected ones.
    pub rows_read: u64,
    /// Rows the CSV reader could not parse.
    pub rows_rejected: u64,
    /// Rows whose key column was blank.
    pub blank_keys: u64,
    pub distinct: u64,
    pub writes: BatchTotals,
    /// Entries in the rebuilt mapping, including ones from earlier runs.
    pub mapped: u64,
}

/// Output of a resolution phase: the id snapshot the app pass resolves against.
#[derive(Debug, Clone, Default)]
pub struct Resolved<M> {
    pub map: M,
    pub stats: ResolutionStats,
}
