//! Catalog lookups.

use crate::error::RewardsError;
use crate::models::{CatalogItem, CatalogQuery};
use crate::services::executor::UnitOfWork;
use crate::services::store::RewardsStore;

use async_trait::async_trait;
use uuid::Uuid;

/// Reads one catalog item.
#[derive(Debug, Clone)]
pub struct GetCatalogItem {
    item_id: Uuid,
}

impl GetCatalogItem {
    /// Read catalog item `item_id`.
    pub fn new(item_id: Uuid) -> Self {
        Self { item_id }
    }
}

#[async_trait]
impl<S: RewardsStore> UnitOfWork<S> for GetCatalogItem {
    type Output = CatalogItem;

    fn name(&self) -> &'static str {
        "get_catalog_item"
    }

    async fn run(&mut self, store: &mut S) -> Result<CatalogItem, RewardsError> {
        let item_id = self.item_id;
        store
            .catalog_item(item_id)
            .await?
            .ok_or_else(|| RewardsError::not_found(format!("Catalog item {item_id} not found")))
    }
}

/// Lists catalog items, optionally in one category.
#[derive(Debug, Clone)]
pub struct ListCatalogItems {
    query: CatalogQuery,
}

impl ListCatalogItems {
    /// List the items `query` selects.
    pub fn new(query: CatalogQuery) -> Self {
        Self { query }
    }
}

#[async_trait]
impl<S: RewardsStore> UnitOfWork<S> for ListCatalogItems {
    type Output = Vec<CatalogItem>;

    fn name(&self) -> &'static str {
        "list_catalog_items"
    }

    async fn run(&mut self, store: &mut S) -> Result<Vec<CatalogItem>, RewardsError> {
        store.catalog_items(&self.query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClusterConfig;
    use crate::services::connection::{Connector, Session};
    use crate::services::credentials::Credential;
    use crate::services::memory::{MemoryDatabase, MemorySession};
    use std::time::Duration;

    async fn session(db: &MemoryDatabase) -> MemorySession {
        let config = ClusterConfig::new("localhost", "us-east-1", "postgres", "admin");
        let credential = Credential::new("pw", Duration::from_secs(30));
        let mut session = db.connector().open(&config, &credential).await.unwrap();
        session.begin().await.unwrap();
        session
    }

    fn seed(db: &MemoryDatabase, name: &str, category: &str, points_price: i32) -> Uuid {
        db.seed_catalog(CatalogItem {
            name: name.to_string(),
            category: Some(category.to_string()),
            points_price,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_get_catalog_item() {
        let db = MemoryDatabase::new();
        let id = seed(&db, "Atlas", "Books", 40);
        let mut session = session(&db).await;

        let item = GetCatalogItem::new(id).run(&mut session).await.unwrap();
        assert_eq!(item.name, "Atlas");
        assert_eq!(item.category.as_deref(), Some("Books"));

        let missing = Uuid::new_v4();
        let err = GetCatalogItem::new(missing).run(&mut session).await.unwrap_err();
        assert_eq!(err.to_string(), format!("Catalog item {missing} not found"));
    }

    #[tokio::test]
    async fn test_listing_filters_and_sorts() {
        let db = MemoryDatabase::new();
        seed(&db, "Atlas", "Books", 40);
        seed(&db, "Zine", "Books", 5);
        seed(&db, "Kite", "Toys", 30);
        let mut session = session(&db).await;

        let query = CatalogQuery::new(Some("Books"), Some("points_price"), Some("desc"));
        let items = ListCatalogItems::new(query).run(&mut session).await.unwrap();
        let names: Vec<&str> = items.iter().map(|item| item.name.as_str()).collect();
        assert_eq!(names, ["Atlas", "Zine"]);

        let all = ListCatalogItems::new(CatalogQuery::default()).run(&mut session).await.unwrap();
        let names: Vec<&str> = all.iter().map(|item| item.name.as_str()).collect();
        assert_eq!(names, ["Atlas", "Kite", "Zine"]);
    }
}
