//! Statement-level operations the rewards units of work issue.

use crate::error::RewardsError;
use crate::models::{
    CartItem, CartLine, CatalogItem, CatalogQuery, Customer, LedgerEntry, OrderItem,
    TransactionDetails,
};
use crate::services::connection::Session;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Rewards schema access through an open session.
///
/// Every call runs inside the transaction the executor opened; nothing here
/// commits or rolls back.
#[async_trait]
pub trait RewardsStore: Session {
    /// Internal customer id for a username.
    async fn customer_id(&mut self, username: &str) -> Result<Option<Uuid>, RewardsError>;

    /// Full customer profile for a username.
    async fn customer(&mut self, username: &str) -> Result<Option<Customer>, RewardsError>;

    /// Cart lines joined with current catalog prices.
    async fn cart_lines(&mut self, customer_id: Uuid) -> Result<Vec<CartLine>, RewardsError>;

    /// Cart lines with catalog names, ordered by name.
    async fn cart_items(&mut self, customer_id: Uuid) -> Result<Vec<CartItem>, RewardsError>;

    /// Quantity of one cart line.
    async fn cart_quantity(
        &mut self,
        customer_id: Uuid,
        item_id: Uuid,
    ) -> Result<Option<i32>, RewardsError>;

    /// Whether a catalog item exists.
    async fn catalog_item_exists(&mut self, item_id: Uuid) -> Result<bool, RewardsError>;

    /// One catalog item.
    async fn catalog_item(&mut self, item_id: Uuid) -> Result<Option<CatalogItem>, RewardsError>;

    /// Catalog items passing `query`'s filter, in its order.
    async fn catalog_items(&mut self, query: &CatalogQuery)
        -> Result<Vec<CatalogItem>, RewardsError>;

    /// Add a cart line.
    async fn insert_cart_item(
        &mut self,
        customer_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<(), RewardsError>;

    /// Set the quantity of a cart line.
    async fn update_cart_quantity(
        &mut self,
        customer_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<u64, RewardsError>;

    /// Delete one cart line.
    async fn delete_cart_item(&mut self, customer_id: Uuid, item_id: Uuid)
        -> Result<u64, RewardsError>;

    /// Delete every cart line of a customer.
    async fn delete_cart(&mut self, customer_id: Uuid) -> Result<u64, RewardsError>;

    /// Current points balance, if the customer has a balance row.
    async fn points_balance(&mut self, customer_id: Uuid) -> Result<Option<i64>, RewardsError>;

    /// Subtract `points` from the balance.
    async fn debit_balance(&mut self, customer_id: Uuid, points: i64) -> Result<u64, RewardsError>;

    /// Record an order line.
    async fn insert_order_item(&mut self, item: &OrderItem) -> Result<(), RewardsError>;

    /// Record a ledger entry. The store stamps the time.
    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<(), RewardsError>;

    /// Ledger entries in `[from, to]`, newest first.
    async fn ledger_entries(
        &mut self,
        customer_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, RewardsError>;

    /// One ledger entry of a customer with its order lines.
    async fn transaction_details(
        &mut self,
        customer_id: Uuid,
        tx_id: Uuid,
    ) -> Result<Option<TransactionDetails>, RewardsError>;
}

/// Resolve a username or fail with `NotFound`.
pub async fn resolve_customer<S: RewardsStore>(
    store: &mut S,
    username: &str,
) -> Result<Uuid, RewardsError> {
    store
        .customer_id(username)
        .await?
        .ok_or_else(|| RewardsError::not_found(format!("Customer {username} not found")))
}
