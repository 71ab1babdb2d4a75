//! Chunked reader over the catalog CSV export.
//!
//! The export is read three times per run (categories, developers, apps), each pass
//! holding at most one chunk of records in memory.
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// Column names the export must carry. Order in the file does not matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    AppName,
    AppId,
    Category,
    DeveloperId,
    DeveloperWebsite,
    DeveloperEmail,
    Rating,
    RatingCount,
    Installs,
    MinimumInstalls,
    MaximumInstalls,
    Free,
    Price,
    Currency,
    Size,
    MinimumAndroid,
    Released,
    LastUpdated,
    ContentRating,
    PrivacyPolicy,
    AdSupported,
    InAppPurchases,
    EditorsChoice,
    ScrapedTime,
}

impl Column {
    pub const ALL: [Column; 24] = [
        Column::AppName,
        Column::AppId,
        Column::Category,
        Column::DeveloperId,
        Column::DeveloperWebsite,
        Column::DeveloperEmail,
        Column::Rating,
        Column::RatingCount,
        Column::Installs,
        Column::MinimumInstalls,
        Column::MaximumInstalls,
        Column::Free,
        Column::Price,
        Column::Currency,
        Column::Size,
        Column::MinimumAndroid,
        Column::Released,
        Column::LastUpdated,
        Column::ContentRating,
        Column::PrivacyPolicy,
        Column::AdSupported,
        Column::InAppPurchases,
        Column::EditorsChoice,
        Column::ScrapedTime,
    ];

    pub const fn header(self) -> &'static str {
        match self {
            Column::AppName => "App Name",
            Column::AppId => "App Id",
            Column::Category => "Category",
            Column::DeveloperId => "Developer Id",
            Column::DeveloperWebsite => "Developer Website",
            Column::DeveloperEmail => "Developer Email",
            Column::Rating => "Rating",
            Column::RatingCount => "Rating Count",
            Column::Installs => "Installs",
            Column::MinimumInstalls => "Minimum Installs",
            Column::MaximumInstalls => "Maximum Installs",
            Column::Free => "Free",
            Column::Price => "Price",
            Column::Currency => "Currency",
            Column::Size => "Size",
            Column::MinimumAndroid => "Minimum Android",
            Column::Released => "Released",
            Column::LastUpdated => "Last Updated",
            Column::ContentRating => "Content Rating",
            Column::PrivacyPolicy => "Privacy Policy",
            Column::AdSupported => "Ad Supported",
            Column::InAppPurchases => "In App Purchases",
            Column::EditorsChoice => "Editors Choice",
            Column::ScrapedTime => "Scraped Time",
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source is missing required columns: {0:?}")]
    MissingColumns(Vec<&'static str>),
}

/// One raw row, exactly as exported. Empty cells deserialize to `None`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceRecord {
    #[serde(rename = "App Name")]
    pub app_name: Option<String>,
    #[serde(rename = "App Id")]
    pub app_id: Option<String>,
    #[serde(rename = "Category")]
    pub category: Option<String>,
    #[serde(rename = "Developer Id")]
    pub developer_id: Option<String>,
    #[serde(rename = "Developer Website")]
    pub developer_website: Option<String>,
    #[serde(rename = "Developer Email")]
    pub developer_email: Option<String>,
    #[serde(rename = "Rating")]
    pub rating: Option<String>,
    #[serde(rename = "Rating Count")]
    pub rating_count: Option<String>,
    #[serde(rename = "Installs")]
    pub installs: Option<String>,
    #[serde(rename = "Minimum Installs")]
    pub minimum_installs: Option<String>,
    #[serde(rename = "Maximum Installs")]
    pub maximum_installs: Option<String>,
    #[serde(rename = "Free")]
    pub free: Option<String>,
    #[serde(rename = "Price")]
    pub price: Option<String>,
    #[serde(rename = "Currency")]
    pub currency: Option<String>,
    #[serde(rename = "Size")]
    pub size: Option<String>,
    #[serde(rename = "Minimum Android")]
    pub minimum_android: Option<String>,
    #[serde(rename = "Released")]
    pub released: Option<String>,
    #[serde(rename = "Last Updated")]
    pub last_updated: Option<String>,
    #[serde(rename = "Content Rating")]
    pub content_rating: Option<String>,
    #[serde(rename = "Privacy Policy")]
    pub privacy_policy: Option<String>,
    #[serde(rename = "Ad Supported")]
    pub ad_supported: Option<String>,
    #[serde(rename = "In App Purchases")]
    pub in_app_purchases: Option<String>,
    #[serde(rename = "Editors Choice")]
    pub editors_choice: Option<String>,
    #[serde(rename = "Scraped Time")]
    pub scraped_time: Option<String>,
}

/// Location of the export plus the chunk size every pass reads with.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
    chunk_size: usize,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            path: path.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Open a fresh pass over the file and validate its header row.
    pub fn open(&self) -> Result<ChunkReader<BufReader<File>>> {
        let file = File::open(&self.path)
            .with_context(|| format!("failed to open source {}", self.path.display()))?;
        ChunkReader::new(BufReader::with_capacity(8 << 20, file), self.chunk_size)
            .with_context(|| format!("failed to read header of {}", self.path.display()))
    }
}

/// A block of raw records plus the number of lines that could not be parsed at all.
#[derive(Debug, Default)]
pub struct Chunk {
    pub records: Vec<StringRecord>,
    pub rejected: usize,
}

impl Chunk {
    /// Rows consumed from the file, parsed or not.
    pub fn rows_read(&self) -> usize {
        self.records.len() + self.rejected
    }
}

pub struct ChunkReader<R: Read> {
    reader: csv::Reader<R>,
    headers: StringRecord,
    chunk_size: usize,
    done: bool,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(inner: R, chunk_size: usize) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .trim(csv::Trim::None)
            .from_reader(inner);
        let headers = reader.headers()?.clone();

        let missing: Vec<&'static str> = Column::ALL
            .iter()
            .map(|c| c.header())
            .filter(|name| !headers.iter().any(|h| h == *name))
            .collect();
        if !missing.is_empty() {
            return Err(SourceError::MissingColumns(missing).into());
        }

        Ok(Self {
            reader,
            headers,
            chunk_size: chunk_size.max(1),
            done: false,
        })
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    /// Position of a column in this file's header row.
    pub fn index_of(&self, column: Column) -> usize {
        // presence was checked in `new`
        self.headers
            .iter()
            .position(|h| h == column.header())
            .unwrap_or_default()
    }

    /// Read up to `chunk_size` rows. `Ok(None)` once the file is exhausted.
    ///
    /// Rows that are not valid CSV (wrong field count, bad UTF-8) are logged and counted
    /// in [`Chunk::rejected`]; I/O errors abort the pass.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.done {
            return Ok(None);
        }
        let mut chunk = Chunk {
            records: Vec::with_capacity(self.chunk_size),
            rejected: 0,
        };
        while chunk.rows_read() < self.chunk_size {
            let mut record = StringRecord::new();
            match self.reader.read_record(&mut record) {
                Ok(true) => chunk.records.push(record),
                Ok(false) => {
                    self.done = true;
                    break;
                }
                Err(err) if err.is_io_error() => {
                    return Err(anyhow::Error::new(err).context("source read failed"));
                }
                Err(err) => {
                    let line = err.position().map(|p| p.line());
                    warn!(line = ?line, error = %err, "skipping malformed source row");
                    chunk.rejected += 1;
                }
            }
        }
        if chunk.rows_read() == 0 {
            return Ok(None);
        }
        Ok(Some(chunk))
    }
}

/// Cell value with blanks treated as missing.
pub fn cell(record: &StringRecord, index: usize) -> Option<&str> {
    record.get(index).filter(|s| !s.trim().is_empty())
}


#[cfg(test)]
mod tests {
    use super::fixtures::CsvFixture;
    use super::*;

    #[test]
    fn reads_in_fixed_size_chunks() {
        let csv = CsvFixture::new()
            .app("a1", "Tools", "Dev1", "d1@x.com", &[])
            .app("a2", "Tools", "Dev1", "d1@x.com", &[])
            .app("a3", "Games", "Dev2", "", &[])
            .app("a4", "Games", "Dev2", "", &[])
            .app("a5", "Games", "Dev2", "", &[])
            .render();
        let mut reader = ChunkReader::new(csv.as_bytes(), 2).unwrap();

        let mut sizes = Vec::new();
        while let Some(chunk) = reader.next_chunk().unwrap() {
            sizes.push(chunk.records.len());
        }
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn missing_columns_are_fatal() {
        let csv = "App Name,App Id,Category\nFoo,com.foo,Tools\n";
        let err = ChunkReader::new(csv.as_bytes(), 10)
            .err()
            .expect("header validation should fail");
        let source_err = err.downcast_ref::<SourceError>().expect("typed error");
        let SourceError::MissingColumns(missing) = source_err;
        assert!(missing.contains(&"Developer Id"));
        assert!(missing.contains(&"Scraped Time"));
        assert!(!missing.contains(&"Category"));
    }

    #[test]
    fn malformed_rows_are_counted_not_fatal() {
        let mut csv = CsvFixture::new()
            .app("a1", "Tools", "Dev1", "", &[])
            .render();
        csv.push_str("only,three,fields\n");
        csv.push_str(
            &CsvFixture::new()
                .app("a2", "Tools", "Dev1", "", &[])
                .render()
                .lines()
                .nth(1)
                .unwrap(),
        );
        csv.push('\n');

        let mut reader = ChunkReader::new(csv.as_bytes(), 10).unwrap();
        let chunk = reader.next_chunk().unwrap().unwrap();
        assert_eq!(chunk.records.len(), 2);
        assert_eq!(chunk.rejected, 1);
        assert_eq!(chunk.rows_read(), 3);
    }

    #[test]
    fn records_deserialize_with_blank_cells_as_none() {
        let csv = CsvFixture::new()
            .app("a1", "Tools", "Dev1", "", &[(Column::Rating, "")])
            .render();
        let mut reader = ChunkReader::new(csv.as_bytes(), 10).unwrap();
        let headers = reader.headers().clone();
        let chunk = reader.next_chunk().unwrap().unwrap();
        let row: SourceRecord = chunk.records[0].deserialize(Some(&headers)).unwrap();
        assert_eq!(row.app_id.as_deref(), Some("a1"));
        assert_eq!(row.developer_email, None);
        assert_eq!(row.rating, None);
        assert_eq!(row.free.as_deref(), Some("True"));
    }

    #[test]
    fn projection_uses_header_positions() {
        let csv = CsvFixture::new()
            .app("a1", "Tools", "Dev1", "", &[])
            .render();
        let mut reader = ChunkReader::new(csv.as_bytes(), 10).unwrap();
        let idx = reader.index_of(Column::Category);
        let chunk = reader.next_chunk().unwrap().unwrap();
        assert_eq!(cell(&chunk.records[0], idx), Some("Tools"));
        let email = reader.index_of(Column::DeveloperEmail);
        assert_eq!(cell(&chunk.records[0], email), None);
    }
}
