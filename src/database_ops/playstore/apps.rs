use anyhow::Result;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::database_ops::batch::{write_batches, BatchTotals};
use crate::database_ops::store::{
    CatalogStore, CategoryMap, ConflictPolicy, DeveloperKey, DeveloperMap, NewApp,
};
use crate::normalization::fields::{
    parse_boolean, parse_date, parse_decimal, parse_int4, parse_integer, parse_price,
    parse_timestamp, present, CATALOG_DATE_FORMAT, INT8_MAX, SCRAPED_TIME_FORMAT,
};
use crate::source::{CsvSource, SourceRecord};

/// Why a single source row was not turned into an app.
#[derive(Debug, Error)]
pub enum RowError {
    #[error("missing required field `{0}`")]
    Missing(&'static str),
    #[error("invalid `{field}` value {value:?}")]
    Invalid { field: &'static str, value: String },
    #[error("unresolved category {0:?}")]
    UnresolvedCategory(Option<String>),
    #[error("unresolved developer ({name:?}, {email:?})")]
    UnresolvedDeveloper { name: Option<String>, email: String },
}

impl RowError {
    pub fn is_unresolved(&self) -> bool {
        matches!(
            self,
            RowError::UnresolvedCategory(_) | RowError::UnresolvedDeveloper { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AppStats {
    pub rows_read: u64,
    pub rows_rejected: u64,
    /// Rows whose category or developer had no id.
    pub dropped_unresolved: u64,
    /// Rows that could not be decoded or had an unusable required field.
    pub dropped_invalid: u64,
    pub writes: BatchTotals,
}

impl AppStats {
    pub fn dropped(&self) -> u64 {
        self.rows_rejected + self.dropped_unresolved + self.dropped_invalid
    }
}

/// Key cells keep their exact text; only blank cells count as missing.
fn key_cell(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

fn text(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Normalize one source row and resolve its foreign keys against the snapshots.
pub fn build_app(
    raw: SourceRecord,
    categories: &CategoryMap,
    developers: &DeveloperMap,
) -> Result<NewApp, RowError> {
    let app_id = key_cell(&raw.app_id)
        .ok_or(RowError::Missing("App Id"))?
        .to_string();

    let category_id = key_cell(&raw.category)
        .and_then(|name| categories.get(name))
        .copied()
        .ok_or_else(|| RowError::UnresolvedCategory(raw.category.clone()))?;

    let email = key_cell(&raw.developer_email);
    let developer_id = key_cell(&raw.developer_id)
        .and_then(|name| developers.get(&DeveloperKey::new(name, email)))
        .copied()
        .ok_or_else(|| RowError::UnresolvedDeveloper {
            name: raw.developer_id.clone(),
            email: email.unwrap_or_default().to_string(),
        })?;

    let name = text(raw.app_name).ok_or(RowError::Missing("App Name"))?;

    let rating = match present(raw.rating.as_deref()) {
        None => None,
        Some(value) => Some(parse_decimal(Some(value)).ok_or_else(|| RowError::Invalid {
            field: "Rating",
            value: value.to_string(),
        })?),
    };

    let scraped_time = match present(raw.scraped_time.as_deref()) {
        None => return Err(RowError::Missing("Scraped Time")),
        Some(value) => parse_timestamp(Some(value), SCRAPED_TIME_FORMAT).ok_or_else(|| {
            RowError::Invalid {
                field: "Scraped Time",
                value: value.to_string(),
            }
        })?,
    };

    Ok(NewApp {
        name,
        app_id,
        category_id,
        developer_id,
        rating,
        rating_count: parse_int4(raw.rating_count.as_deref()),
        installs: parse_integer(raw.installs.as_deref(), INT8_MAX).map(|n| n.to_string()),
        min_installs: parse_int4(raw.minimum_installs.as_deref()),
        max_installs: parse_int4(raw.maximum_installs.as_deref()),
        is_free: parse_boolean(raw.free.as_deref()),
        price: parse_price(raw.price.as_deref()),
        currency: text(raw.currency),
        size: text(raw.size),
        min_android: text(raw.minimum_android),
        released_date: parse_date(raw.released.as_deref(), CATALOG_DATE_FORMAT),
        last_updated: parse_date(raw.last_updated.as_deref(), CATALOG_DATE_FORMAT),
        content_rating: text(raw.content_rating),
        privacy_policy_url: text(raw.privacy_policy),
        has_ads: parse_boolean(raw.ad_supported.as_deref()),
        has_in_app_purchases: parse_boolean(raw.in_app_purchases.as_deref()),
        is_editors_choice: parse_boolean(raw.editors_choice.as_deref()),
        scraped_time,
    })
}

/// Stream the full export, normalizing and writing apps chunk by chunk.
///
/// Row problems are logged and counted; a failed batch is logged and counted; only a
/// source that stops being readable ends the pass early.
#[instrument(skip_all, fields(source = %source.path().display()))]
pub async fn ingest_apps<S>(
    store: &mut S,
    source: &CsvSource,
    batch_size: usize,
    categories: &CategoryMap,
    developers: &DeveloperMap,
) -> Result<AppStats>
where
    S: CatalogStore + ?Sized,
{
    let mut reader = source.open()?;
    let headers = reader.headers().clone();
    let mut stats = AppStats::default();

    while let Some(chunk) = reader.next_chunk()? {
        stats.rows_read += chunk.rows_read() as u64;
        stats.rows_rejected += chunk.rejected as u64;

        let mut rows: Vec<NewApp> = Vec::with_capacity(chunk.records.len());
        for record in &chunk.records {
            let raw: SourceRecord = match record.deserialize(Some(&headers)) {
                Ok(raw) => raw,
                Err(err) => {
                    let line = record.position().map(|p| p.line());
                    warn!(line = ?line, cause = %err, "dropping malformed app row");
                    stats.dropped_invalid += 1;
                    continue;
                }
            };
            let app_id = raw.app_id.clone();
            match build_app(raw, categories, developers) {
                Ok(app) => rows.push(app),
                Err(err) => {
                    warn!(
                        app_id = app_id.as_deref().unwrap_or("<missing>"),
                        cause = %err,
                        "dropping app row"
                    );
                    if err.is_unresolved() {
                        stats.dropped_unresolved += 1;
                    } else {
                        stats.dropped_invalid += 1;
                    }
                }
            }
        }

        // remainder of the chunk goes out even when it is shorter than a batch
        let totals = write_batches(store, &rows, batch_size, ConflictPolicy::Skip).await;
        stats.writes.merge(totals);
        info!(
            phase = "apps",
            rows_read = stats.rows_read,
            written = stats.writes.rows_written,
            dropped = stats.dropped(),
            "importing apps"
        );
    }

    Ok(stats)
}
