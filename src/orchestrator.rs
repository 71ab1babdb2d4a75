//! Runs the three import phases in order over one store handle and reports the totals.
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::database_ops::playstore::apps::{ingest_apps, AppStats};
use crate::database_ops::playstore::categories::resolve_categories;
use crate::database_ops::playstore::developers::resolve_developers;
use crate::database_ops::playstore::ResolutionStats;
use crate::database_ops::store::CatalogStore;
use crate::source::CsvSource;

#[derive(Debug, Clone)]
pub struct ImportPipeline {
    source: CsvSource,
    batch_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Source rows the app pass consumed.
    pub processed_rows: u64,
    /// Rows inserted across all three tables.
    pub rows_written: u64,
    pub categories: ResolutionStats,
    pub developers: ResolutionStats,
    pub apps: AppStats,
    #[serde(rename = "elapsed_secs", serialize_with = "as_secs")]
    pub elapsed: Duration,
}

fn as_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl RunSummary {
    /// Human-readable report printed at the end of a run.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("Data import completed\n");
        out.push_str(&format!("Total time: {:.2} seconds\n", self.elapsed.as_secs_f64()));
        out.push_str(&format!("Processed {} rows\n", self.processed_rows));
        out.push_str(&format!("Wrote {} rows\n", self.rows_written));
        out.push_str(&format!(
            "categories: {} distinct, {} written, {} failed batches\n",
            self.categories.distinct,
            self.categories.writes.rows_written,
            self.categories.writes.failed_batches
        ));
        out.push_str(&format!(
            "developers: {} distinct, {} written, {} failed batches\n",
            self.developers.distinct,
            self.developers.writes.rows_written,
            self.developers.writes.failed_batches
        ));
        out.push_str(&format!(
            "apps: {} written, {} dropped (unresolved={}, invalid={}, unparsable={}), {} failed batches\n",
            self.apps.writes.rows_written,
            self.apps.dropped(),
            self.apps.dropped_unresolved,
            self.apps.dropped_invalid,
            self.apps.rows_rejected,
            self.apps.writes.failed_batches
        ));
        out
    }
}

impl ImportPipeline {
    pub fn new(source: CsvSource, batch_size: usize) -> Self {
        Self {
            source,
            batch_size: batch_size.max(1),
        }
    }

    /// Resolve categories, then developers, then import apps.
    ///
    /// Any error from the two resolution phases aborts the run because the app pass
    /// needs complete mappings. Failed app batches are counted, not raised.
    pub async fn run<S>(&self, store: &mut S) -> Result<RunSummary>
    where
        S: CatalogStore + ?Sized,
    {
        let started = Instant::now();
        info!(
            source = %self.source.path().display(),
            chunk_size = self.source.chunk_size(),
            batch_size = self.batch_size,
            "starting data import"
        );

        let categories = resolve_categories(store, &self.source, self.batch_size)
            .await
            .context("category resolution failed")?;
        let developers = resolve_developers(store, &self.source, self.batch_size)
            .await
            .context("developer resolution failed")?;
        let apps = ingest_apps(
            store,
            &self.source,
            self.batch_size,
            &categories.map,
            &developers.map,
        )
        .await
        .context("app import failed")?;

        let summary = RunSummary {
            processed_rows: apps.rows_read,
            rows_written: categories.stats.writes.rows_written
                + developers.stats.writes.rows_written
                + apps.writes.rows_written,
            categories: categories.stats,
            developers: developers.stats,
            apps,
            elapsed: started.elapsed(),
        };
        info!(
            elapsed_secs = summary.elapsed.as_secs_f64(),
            processed_rows = summary.processed_rows,
            rows_written = summary.rows_written,
            apps_written = summary.apps.writes.rows_written,
            apps_dropped = summary.apps.dropped(),
            "data import completed"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    use crate::database_ops::memory::MemoryCatalogStore;
    use crate::database_ops::store::{CategoryMap, ConflictPolicy, DeveloperMap, Rows, Table};
    use crate::source::fixtures::CsvFixture;
    use crate::source::Column;

    fn three_row_export() -> CsvFixture {
        CsvFixture::new()
            .app("com.tools.one", "Tools", "Dev1", "d1@x.com", &[])
            .app("com.tools.two", "Tools", "Dev1", "d1@x.com", &[])
            .app("com.games.one", "Games", "Dev2", "", &[])
    }

    /// Wraps the in-memory store and fails selected operations like a dropped connection.
    #[derive(Default)]
    struct FailingStore {
        inner: MemoryCatalogStore,
        fail_app_inserts: bool,
        fail_category_reload: bool,
    }

    #[async_trait::async_trait]
    impl CatalogStore for FailingStore {
        async fn insert_batch(&mut self, rows: Rows<'_>, policy: ConflictPolicy) -> Result<u64> {
            if self.fail_app_inserts && rows.table() == Table::Apps {
                bail!("connection reset by peer");
            }
            self.inner.insert_batch(rows, policy).await
        }

        async fn load_categories(&mut self) -> Result<CategoryMap> {
            if self.fail_category_reload {
                bail!("connection reset by peer");
            }
            self.inner.load_categories().await
        }

        async fn load_developers(&mut self) -> Result<DeveloperMap> {
            self.inner.load_developers().await
        }

        async fn count(&mut self, table: Table) -> Result<i64> {
            self.inner.count(table).await
        }
    }

    async fn counts(store: &mut MemoryCatalogStore) -> [i64; 3] {
        let mut out = [0; 3];
        for (slot, table) in out.iter_mut().zip(Table::ALL) {
            *slot = store.count(table).await.unwrap();
        }
        out
    }

    #[tokio::test]
    async fn end_to_end_and_rerun_writes_nothing() {
        let file = three_row_export().write();
        let pipeline = ImportPipeline::new(CsvSource::new(file.path(), 2), 2);
        let mut store = MemoryCatalogStore::new();

        let first = pipeline.run(&mut store).await.unwrap();
        assert_eq!(counts(&mut store).await, [2, 2, 3]);
        assert_eq!(first.processed_rows, 3);
        assert_eq!(first.rows_written, 7);
        assert_eq!(first.apps.dropped(), 0);

        let second = pipeline.run(&mut store).await.unwrap();
        assert_eq!(counts(&mut store).await, [2, 2, 3]);
        assert_eq!(second.rows_written, 0);
        assert_eq!(second.categories.mapped, 2);
        assert_eq!(second.developers.mapped, 2);
    }

    #[tokio::test]
    async fn every_app_references_stored_entities() {
        let file = three_row_export()
            .app("com.orphan", "", "Dev3", "", &[])
            .write();
        let pipeline = ImportPipeline::new(CsvSource::new(file.path(), 10), 10);
        let mut store = MemoryCatalogStore::new();

        let summary = pipeline.run(&mut store).await.unwrap();

        assert_eq!(summary.apps.dropped_unresolved, 1);
        for app in store.apps() {
            assert!(store.categories().iter().any(|c| c.id == app.row.category_id));
            assert!(store.developers().iter().any(|d| d.id == app.row.developer_id));
        }
        let tools = store.categories().iter().find(|c| c.name == "Tools").unwrap().id;
        let dev1 = store
            .developers()
            .iter()
            .find(|d| d.name == "Dev1" && d.email == "d1@x.com")
            .unwrap()
            .id;
        let app = store.app("com.tools.two").unwrap();
        assert_eq!((app.category_id, app.developer_id), (tools, dev1));
    }

    #[tokio::test]
    async fn existing_apps_are_not_updated() {
        let mut store = MemoryCatalogStore::new();
        let first = three_row_export().write();
        ImportPipeline::new(CsvSource::new(first.path(), 10), 10)
            .run(&mut store)
            .await
            .unwrap();

        let changed = CsvFixture::new()
            .app(
                "com.tools.one",
                "Tools",
                "Dev1",
                "d1@x.com",
                &[(Column::AppName, "Renamed"), (Column::Rating, "1.0")],
            )
            .write();
        let summary = ImportPipeline::new(CsvSource::new(changed.path(), 10), 10)
            .run(&mut store)
            .await
            .unwrap();

        assert_eq!(summary.apps.writes.rows_written, 0);
        let app = store.app("com.tools.one").unwrap();
        assert_eq!(app.name, "App com.tools.one");
        assert_eq!(app.rating.as_ref().map(|r| r.to_string()).as_deref(), Some("4.1"));
    }

    #[tokio::test]
    async fn missing_source_aborts_before_any_write() {
        let pipeline = ImportPipeline::new(CsvSource::new("/nonexistent/export.csv", 10), 10);
        let mut store = MemoryCatalogStore::new();

        let err = pipeline.run(&mut store).await.unwrap_err();

        assert!(format!("{err:#}").contains("category resolution failed"));
        assert_eq!(counts(&mut store).await, [0, 0, 0]);
    }

    #[tokio::test]
    async fn lost_connection_during_category_reload_aborts() {
        let file = three_row_export().write();
        let pipeline = ImportPipeline::new(CsvSource::new(file.path(), 10), 10);
        let mut store = FailingStore {
            fail_category_reload: true,
            ..Default::default()
        };

        let err = pipeline.run(&mut store).await.unwrap_err();

        assert!(format!("{err:#}").contains("category resolution failed"));
        assert!(format!("{err:#}").contains("connection reset by peer"));
        assert_eq!(store.inner.count(Table::Developers).await.unwrap(), 0);
        assert_eq!(store.inner.count(Table::Apps).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_app_batches_do_not_stop_the_run() {
        let file = three_row_export().write();
        let pipeline = ImportPipeline::new(CsvSource::new(file.path(), 10), 2);
        let mut store = FailingStore {
            fail_app_inserts: true,
            ..Default::default()
        };

        let summary = pipeline.run(&mut store).await.unwrap();

        assert_eq!(summary.apps.writes.batches, 2);
        assert_eq!(summary.apps.writes.failed_batches, 2);
        assert_eq!(summary.apps.writes.rows_written, 0);
        assert_eq!(summary.processed_rows, 3);
        assert_eq!(summary.rows_written, 4);
        assert_eq!(store.inner.count(Table::Apps).await.unwrap(), 0);
    }

    #[test]
    fn summary_renders_elapsed_and_rows() {
        let summary = RunSummary {
            processed_rows: 1200,
            rows_written: 10,
            categories: ResolutionStats::default(),
            developers: ResolutionStats::default(),
            apps: AppStats::default(),
            elapsed: Duration::from_millis(1500),
        };
        let text = summary.render();
        assert!(text.contains("Total time: 1.50 seconds"));
        assert!(text.contains("Processed 1200 rows"));
        assert!(text.contains("Wrote 10 rows"));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["elapsed_secs"], 1.5);
        assert_eq!(json["apps"]["writes"]["rows_written"], 0);
    }
}
