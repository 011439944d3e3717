//! Shopping cart maintenance.

use crate::error::RewardsError;
use crate::models::CartItem;
use crate::services::executor::UnitOfWork;
use crate::services::store::{resolve_customer, RewardsStore};

use async_trait::async_trait;
use uuid::Uuid;

/// What an [`UpsertCartItem`] did to the cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartChange {
    /// A new line was added.
    Added,
    /// An existing line now has this quantity.
    Updated(i32),
    /// The line dropped below one unit and was removed.
    Removed,
    /// Nothing to change.
    Unchanged,
}

/// Adds `quantity` units of an item to a cart. Negative quantities take
/// units out; a line that drops below one unit is deleted.
#[derive(Debug, Clone)]
pub struct UpsertCartItem {
    username: String,
    item_id: Uuid,
    quantity: i32,
}

impl UpsertCartItem {
    /// Change `username`'s cart line for `item_id` by `quantity`.
    pub fn new(username: impl Into<String>, item_id: Uuid, quantity: i32) -> Self {
        Self { username: username.into(), item_id, quantity }
    }

    async fn require_catalog_item<S: RewardsStore>(
        &self,
        store: &mut S,
    ) -> Result<(), RewardsError> {
        if store.catalog_item_exists(self.item_id).await? {
            Ok(())
        } else {
            Err(RewardsError::not_found(format!("Catalog item {} not found", self.item_id)))
        }
    }
}

#[async_trait]
impl<S: RewardsStore> UnitOfWork<S> for UpsertCartItem {
    type Output = CartChange;

    fn name(&self) -> &'static str {
        "upsert_cart_item"
    }

    async fn run(&mut self, store: &mut S) -> Result<CartChange, RewardsError> {
        let customer_id = resolve_customer(store, &self.username).await?;

        match store.cart_quantity(customer_id, self.item_id).await? {
            Some(current) => {
                let net = current.saturating_add(self.quantity);
                if net < 1 {
                    store.delete_cart_item(customer_id, self.item_id).await?;
                    Ok(CartChange::Removed)
                } else {
                    self.require_catalog_item(store).await?;
                    store.update_cart_quantity(customer_id, self.item_id, net).await?;
                    Ok(CartChange::Updated(net))
                }
            }
            None if self.quantity > 0 => {
                self.require_catalog_item(store).await?;
                store.insert_cart_item(customer_id, self.item_id, self.quantity).await?;
                Ok(CartChange::Added)
            }
            None => Ok(CartChange::Unchanged),
        }
    }
}

/// Removes one line from a cart, or the whole cart.
#[derive(Debug, Clone)]
pub struct RemoveCartItems {
    username: String,
    item_id: Option<Uuid>,
}

impl RemoveCartItems {
    /// Remove `item_id` from the cart, or everything when `None`.
    pub fn new(username: impl Into<String>, item_id: Option<Uuid>) -> Self {
        Self { username: username.into(), item_id }
    }
}

#[async_trait]
impl<S: RewardsStore> UnitOfWork<S> for RemoveCartItems {
    type Output = u64;

    fn name(&self) -> &'static str {
        "remove_cart_items"
    }

    async fn run(&mut self, store: &mut S) -> Result<u64, RewardsError> {
        let customer_id = resolve_customer(store, &self.username).await?;
        match self.item_id {
            Some(item_id) => store.delete_cart_item(customer_id, item_id).await,
            None => store.delete_cart(customer_id).await,
        }
    }
}

/// Reads a customer's cart.
#[derive(Debug, Clone)]
pub struct ListCart {
    username: String,
}

impl ListCart {
    /// List `username`'s cart.
    pub fn new(username: impl Into<String>) -> Self {
        Self { username: username.into() }
    }
}

#[async_trait]
impl<S: RewardsStore> UnitOfWork<S> for ListCart {
    type Output = Vec<CartItem>;

    fn name(&self) -> &'static str {
        "list_cart"
    }

    async fn run(&mut self, store: &mut S) -> Result<Vec<CartItem>, RewardsError> {
        let customer_id = resolve_customer(store, &self.username).await?;
        store.cart_items(customer_id).await
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

    async fn run<W: UnitOfWork<MemorySession>>(
        db: &MemoryDatabase,
        mut work: W,
    ) -> Result<W::Output, RewardsError> {
        let config = ClusterConfig::new("localhost", "us-east-1", "postgres", "admin");
        let credential = Credential::new("pw", Duration::from_secs(30));
        let mut session = db.connector().open(&config, &credential).await?;
        session.begin().await?;
        let output = work.run(&mut session).await?;
        session.commit().await?;
        Ok(output)
    }

    #[tokio::test]
    async fn test_upsert_adds_then_accumulates() {
        let db = MemoryDatabase::new();
        let customer = db.seed_customer("alice", 0);
        let mug = db.seed_catalog_item("Mug", 10);

        let change = run(&db, UpsertCartItem::new("alice", mug, 2)).await.unwrap();
        assert_eq!(change, CartChange::Added);
        assert_eq!(
            run(&db, UpsertCartItem::new("alice", mug, 3)).await.unwrap(),
            CartChange::Updated(5)
        );
        assert_eq!(db.snapshot().carts[&(customer, mug)], 5);
    }

    #[tokio::test]
    async fn test_upsert_removes_line_below_one_unit() {
        let db = MemoryDatabase::new();
        let customer = db.seed_customer("alice", 0);
        let mug = db.seed_catalog_item("Mug", 10);
        db.seed_cart_line(customer, mug, 2);

        assert_eq!(
            run(&db, UpsertCartItem::new("alice", mug, -2)).await.unwrap(),
            CartChange::Removed
        );
        assert!(db.snapshot().cart_of(customer).is_empty());
    }

    #[tokio::test]
    async fn test_upsert_negative_on_missing_line_is_noop() {
        let db = MemoryDatabase::new();
        db.seed_customer("alice", 0);
        let mug = db.seed_catalog_item("Mug", 10);

        assert_eq!(
            run(&db, UpsertCartItem::new("alice", mug, -1)).await.unwrap(),
            CartChange::Unchanged
        );
    }

    #[tokio::test]
    async fn test_upsert_unknown_item_is_not_found() {
        let db = MemoryDatabase::new();
        db.seed_customer("alice", 0);

        let err = run(&db, UpsertCartItem::new("alice", Uuid::new_v4(), 1)).await.unwrap_err();
        assert_eq!(err.category(), "NotFound");
    }

    #[tokio::test]
    async fn test_remove_one_or_all() {
        let db = MemoryDatabase::new();
        let customer = db.seed_customer("alice", 0);
        let mug = db.seed_catalog_item("Mug", 10);
        let hat = db.seed_catalog_item("Hat", 20);
        let pen = db.seed_catalog_item("Pen", 1);
        db.seed_cart_line(customer, mug, 1);
        db.seed_cart_line(customer, hat, 1);
        db.seed_cart_line(customer, pen, 1);

        assert_eq!(run(&db, RemoveCartItems::new("alice", Some(mug))).await.unwrap(), 1);
        assert_eq!(run(&db, RemoveCartItems::new("alice", None)).await.unwrap(), 2);
        assert!(db.snapshot().cart_of(customer).is_empty());
    }

    #[tokio::test]
    async fn test_list_cart_orders_by_name() {
        let db = MemoryDatabase::new();
        let customer = db.seed_customer("alice", 0);
        let mug = db.seed_catalog_item("Mug", 10);
        let hat = db.seed_catalog_item("Hat", 20);
        db.seed_cart_line(customer, mug, 1);
        db.seed_cart_line(customer, hat, 3);

        let items = run(&db, ListCart::new("alice")).await.unwrap();
        let names: Vec<_> = items.iter().map(|item| item.name.as_str()).collect();
        assert_eq!(names, ["Hat", "Mug"]);
        assert_eq!(items[0].quantity, 3);
    }
}
