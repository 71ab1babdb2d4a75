//! Row types for the three catalog tables and the store seam the importer writes through.
use std::collections::HashMap;
use std::fmt;

use anyhow::Result;
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Categories,
    Developers,
    Apps,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Categories, Table::Developers, Table::Apps];

    pub const fn name(self) -> &'static str {
        match self {
            Table::Categories => "categories",
            Table::Developers => "developers",
            Table::Apps => "apps",
        }
    }

    /// Columns of the natural unique key used as the conflict target.
    pub const fn conflict_key(self) -> &'static [&'static str] {
        match self {
            Table::Categories => &["name"],
            Table::Developers => &["name", "email"],
            Table::Apps => &["app_id"],
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What to do with a row whose natural key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// `ON CONFLICT (...) DO NOTHING`
    #[default]
    Skip,
    /// Plain insert; a duplicate fails the whole batch.
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCategory {
    pub name: String,
}

/// Natural key of a developer. Missing emails are always `""`, never `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeveloperKey {
    pub name: String,
    pub email: String,
}

impl DeveloperKey {
    pub fn new(name: impl Into<String>, email: Option<&str>) -> Self {
        Self {
            name: name.into(),
            email: email.unwrap_or_default().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDeveloper {
    pub key: DeveloperKey,
    pub website: String,
}

/// A fully normalized app row ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewApp {
    pub name: String,
    pub app_id: String,
    pub category_id: i32,
    pub developer_id: i32,
    pub rating: Option<BigDecimal>,
    pub rating_count: Option<i32>,
    pub installs: Option<String>,
    pub min_installs: Option<i32>,
    pub max_installs: Option<i32>,
    pub is_free: bool,
    pub price: Option<BigDecimal>,
    pub currency: Option<String>,
    pub size: Option<String>,
    pub min_android: Option<String>,
    pub released_date: Option<NaiveDate>,
    pub last_updated: Option<NaiveDate>,
    pub content_rating: Option<String>,
    pub privacy_policy_url: Option<String>,
    pub has_ads: bool,
    pub has_in_app_purchases: bool,
    pub is_editors_choice: bool,
    pub scraped_time: NaiveDateTime,
}

/// A batch of rows for exactly one table.
#[derive(Debug, Clone, Copy)]
pub enum Rows<'a> {
    Categories(&'a [NewCategory]),
    Developers(&'a [NewDeveloper]),
    Apps(&'a [NewApp]),
}

impl Rows<'_> {
    pub fn table(&self) -> Table {
        match self {
            Rows::Categories(_) => Table::Categories,
            Rows::Developers(_) => Table::Developers,
            Rows::Apps(_) => Table::Apps,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Rows::Categories(rows) => rows.len(),
            Rows::Developers(rows) => rows.len(),
            Rows::Apps(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> From<&'a [NewCategory]> for Rows<'a> {
    fn from(rows: &'a [NewCategory]) -> Self {
        Rows::Categories(rows)
    }
}

impl<'a> From<&'a [NewDeveloper]> for Rows<'a> {
    fn from(rows: &'a [NewDeveloper]) -> Self {
        Rows::Developers(rows)
    }
}

impl<'a> From<&'a [NewApp]> for Rows<'a> {
    fn from(rows: &'a [NewApp]) -> Self {
        Rows::Apps(rows)
    }
}

pub type CategoryMap = HashMap<String, i32>;
pub type DeveloperMap = HashMap<DeveloperKey, i32>;

/// Transactional relational store holding the normalized catalog.
#[async_trait::async_trait]
pub trait CatalogStore: Send {
    /// Insert one batch atomically: either every non-conflicting row becomes visible or
    /// none does. Returns the number of rows actually inserted.
    async fn insert_batch(&mut self, rows: Rows<'_>, policy: ConflictPolicy) -> Result<u64>;

    async fn load_categories(&mut self) -> Result<CategoryMap>;

    async fn load_developers(&mut self) -> Result<DeveloperMap>;

    async fn count(&mut self, table: Table) -> Result<i64>;
}
