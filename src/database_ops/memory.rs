//! In-process catalog store with the same constraints as the PostgreSQL schema:
//! unique natural keys, required foreign keys and all-or-nothing batches.
//! Backs `--dry-run` and the test suite.
use std::collections::HashSet;

use anyhow::{bail, Result};

use super::store::{
    CatalogStore, CategoryMap, ConflictPolicy, DeveloperKey, DeveloperMap, NewApp, NewCategory,
    NewDeveloper, Rows, Table,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCategory {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDeveloper {
    pub id: i32,
    pub name: String,
    pub website: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredApp {
    pub id: i32,
    pub row: NewApp,
}

#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    categories: Vec<StoredCategory>,
    developers: Vec<StoredDeveloper>,
    apps: Vec<StoredApp>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn categories(&self) -> &[StoredCategory] {
        &self.categories
    }

    pub fn developers(&self) -> &[StoredDeveloper] {
        &self.developers
    }

    pub fn apps(&self) -> &[StoredApp] {
        &self.apps
    }

    pub fn app(&self, app_id: &str) -> Option<&NewApp> {
        self.apps
            .iter()
            .find(|a| a.row.app_id == app_id)
            .map(|a| &a.row)
    }

    fn next_id(len: usize) -> i32 {
        i32::try_from(len + 1).unwrap_or(i32::MAX)
    }

    fn insert_categories(
        &mut self,
        rows: &[NewCategory],
        policy: ConflictPolicy,
    ) -> Result<u64> {
        let mut seen: HashSet<&str> = self.categories.iter().map(|c| c.name.as_str()).collect();
        let mut staged = Vec::new();
        for row in rows {
            if !seen.insert(row.name.as_str()) {
                if policy == ConflictPolicy::Fail {
                    bail!("duplicate key value violates unique constraint categories_name_key ({})", row.name);
                }
                continue;
            }
            staged.push(row.name.clone());
        }
        let written = staged.len() as u64;
        for name in staged {
            let id = Self::next_id(self.categories.len());
            self.categories.push(StoredCategory { id, name });
        }
        Ok(written)
    }

    fn insert_developers(
        &mut self,
        rows: &[NewDeveloper],
        policy: ConflictPolicy,
    ) -> Result<u64> {
        let mut seen: HashSet<(&str, &str)> = self
            .developers
            .iter()
            .map(|d| (d.name.as_str(), d.email.as_str()))
            .collect();
        let mut staged = Vec::new();
        for row in rows {
            if !seen.insert((row.key.name.as_str(), row.key.email.as_str())) {
                if policy == ConflictPolicy::Fail {
                    bail!(
                        "duplicate key value violates unique constraint developers_name_email_key ({}, {})",
                        row.key.name,
                        row.key.email
                    );
                }
                continue;
            }
            staged.push(row.clone());
        }
        let written = staged.len() as u64;
        for row in staged {
            let id = Self::next_id(self.developers.len());
            self.developers.push(StoredDeveloper {
                id,
                name: row.key.name,
                website: row.website,
                email: row.key.email,
            });
        }
        Ok(written)
    }

    fn insert_apps(&mut self, rows: &[NewApp], policy: ConflictPolicy) -> Result<u64> {
        let category_ids: HashSet<i32> = self.categories.iter().map(|c| c.id).collect();
        let developer_ids: HashSet<i32> = self.developers.iter().map(|d| d.id).collect();
        let mut seen: HashSet<&str> = self.apps.iter().map(|a| a.row.app_id.as_str()).collect();
        let mut staged = Vec::new();
        for row in rows {
            if !category_ids.contains(&row.category_id) {
                bail!(
                    "insert on apps violates foreign key apps_category_id_fkey (category_id={})",
                    row.category_id
                );
            }
            if !developer_ids.contains(&row.developer_id) {
                bail!(
                    "insert on apps violates foreign key apps_developer_id_fkey (developer_id={})",
                    row.developer_id
                );
            }
            if !seen.insert(row.app_id.as_str()) {
                if policy == ConflictPolicy::Fail {
                    bail!("duplicate key value violates unique constraint apps_app_id_key ({})", row.app_id);
                }
                continue;
            }
            staged.push(row.clone());
        }
        let written = staged.len() as u64;
        for row in staged {
            let id = Self::next_id(self.apps.len());
            self.apps.push(StoredApp { id, row });
        }
        Ok(written)
    }
}

#[async_trait::async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn insert_batch(&mut self, rows: Rows<'_>, policy: ConflictPolicy) -> Result<u64> {
        // every check runs before anything is pushed, so a failing batch leaves no trace
        match rows {
            Rows::Categories(rows) => self.insert_categories(rows, policy),
            Rows::Developers(rows) => self.insert_developers(rows, policy),
            Rows::Apps(rows) => self.insert_apps(rows, policy),
        }
    }

    async fn load_categories(&mut self) -> Result<CategoryMap> {
        Ok(self
            .categories
            .iter()
            .map(|c| (c.name.clone(), c.id))
            .collect())
    }

    async fn load_developers(&mut self) -> Result<DeveloperMap> {
        Ok(self
            .developers
            .iter()
            .map(|d| {
                (
                    DeveloperKey {
                        name: d.name.clone(),
                        email: d.email.clone(),
                    },
                    d.id,
                )
            })
            .collect())
    }

    async fn count(&mut self, table: Table) -> Result<i64> {
        let n = match table {
            Table::Categories => self.categories.len(),
            Table::Developers => self.developers.len(),
            Table::Apps => self.apps.len(),
        };
        Ok(n as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn developer_key_is_name_and_email() {
        let mut store = MemoryCatalogStore::new();
        let rows = vec![
            NewDeveloper {
                key: DeveloperKey::new("Acme", None),
                website: String::new(),
            },
            NewDeveloper {
                key: DeveloperKey::new("Acme", Some("a@x.com")),
                website: String::new(),
            },
            NewDeveloper {
                key: DeveloperKey::new("Acme", Some("")),
                website: "https://acme.dev".into(),
            },
        ];
        let written = store
            .insert_batch(Rows::Developers(&rows), ConflictPolicy::Skip)
            .await
            .unwrap();
        assert_eq!(written, 2);
        let map = store.load_developers().await.unwrap();
        assert!(map.contains_key(&DeveloperKey::new("Acme", None)));
        assert!(map.contains_key(&DeveloperKey::new("Acme", Some("a@x.com"))));
    }

    #[tokio::test]
    async fn duplicate_with_fail_policy_rejects_whole_batch() {
        let mut store = MemoryCatalogStore::new();
        let rows = vec![
            NewCategory { name: "Games".into() },
            NewCategory { name: "Games".into() },
        ];
        let err = store
            .insert_batch(Rows::Categories(&rows), ConflictPolicy::Fail)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("categories_name_key"));
        assert_eq!(store.count(Table::Categories).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ids_are_assigned_sequentially() {
        let mut store = MemoryCatalogStore::new();
        let rows = vec![
            NewCategory { name: "Tools".into() },
            NewCategory { name: "Games".into() },
        ];
        store
            .insert_batch(Rows::Categories(&rows), ConflictPolicy::Skip)
            .await
            .unwrap();
        let ids: Vec<i32> = store.categories().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
