//! Service facade shared by request handlers.
//!
//! Owns the one executor (and so the one connection) of a process. Calls
//! are serialized through a tokio mutex so concurrent handlers never share
//! an open transaction.

use crate::error::{ClassifiedError, RewardsError};
use crate::models::{
    CartItem, CatalogItem, CatalogQuery, CheckoutOutcome, ClusterConfig, Customer, LedgerEntry,
    RetryPolicy, TransactionDetails,
};
use crate::services::{
    CartChange, Checkout, ConnectionManager, Connector, GetBalance, GetCatalogItem, GetCustomer,
    GetTransactionDetails, LedgerWindow, ListCart, ListCatalogItems, ListTransactions,
    RemoveCartItems, RewardsStore, TokenIssuer, TransactionExecutor, UnitOfWork, UpsertCartItem,
};

use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Rewards operations over one managed connection.
pub struct RewardsService<C: Connector> {
    executor: Mutex<TransactionExecutor<C>>,
}

impl<C> RewardsService<C>
where
    C: Connector,
    C::Session: RewardsStore,
{
    /// Create a service. No connection is opened until the first call or
    /// [`warm_up`](Self::warm_up).
    pub fn new(
        config: ClusterConfig,
        connector: C,
        issuer: Arc<dyn TokenIssuer>,
        policy: RetryPolicy,
    ) -> Self {
        tracing::info!(
            endpoint = %config.display_url(),
            max_attempts = policy.max_attempts,
            "Rewards service created"
        );
        let connections = ConnectionManager::new(Arc::new(config), connector, issuer, policy);
        Self::from_executor(TransactionExecutor::new(connections, policy))
    }

    /// Wrap an existing executor.
    pub fn from_executor(executor: TransactionExecutor<C>) -> Self {
        Self { executor: Mutex::new(executor) }
    }

    /// Open the connection ahead of the first request.
    pub async fn warm_up(&self) -> Result<(), ClassifiedError> {
        let mut executor = self.executor.lock().await;
        executor
            .connections_mut()
            .acquire(false)
            .await
            .map(|_| ())
            .map_err(|e| ClassifiedError::new(1, e))
    }

    /// Close the connection.
    pub async fn shutdown(&self) {
        self.executor.lock().await.connections_mut().invalidate().await;
        tracing::info!("Rewards service shut down");
    }

    /// Session id of the live connection.
    pub async fn session_id(&self) -> Option<String> {
        self.executor.lock().await.connections().session_id().map(str::to_string)
    }

    /// Sessions opened so far.
    pub async fn connections_opened(&self) -> u64 {
        self.executor.lock().await.connections().connections_opened()
    }

    /// Turn the caller's cart into an order.
    pub async fn checkout(&self, username: &str) -> Result<CheckoutOutcome, ClassifiedError> {
        require_identity(username)?;
        self.execute(Checkout::new(username)).await
    }

    /// The caller's profile.
    pub async fn customer(&self, username: &str) -> Result<Customer, ClassifiedError> {
        require_identity(username)?;
        self.execute(GetCustomer::new(username)).await
    }

    /// Current points balance.
    pub async fn balance(&self, username: &str) -> Result<i64, ClassifiedError> {
        require_identity(username)?;
        self.execute(GetBalance::new(username)).await
    }

    /// Change the quantity of a cart line by `quantity`.
    pub async fn upsert_cart_item(
        &self,
        username: &str,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartChange, ClassifiedError> {
        require_identity(username)?;
        if quantity == 0 {
            return Ok(CartChange::Unchanged);
        }
        self.execute(UpsertCartItem::new(username, item_id, quantity)).await
    }

    /// Remove one cart line, or the whole cart when `item_id` is `None`.
    pub async fn remove_cart_items(
        &self,
        username: &str,
        item_id: Option<Uuid>,
    ) -> Result<u64, ClassifiedError> {
        require_identity(username)?;
        self.execute(RemoveCartItems::new(username, item_id)).await
    }

    /// Cart contents ordered by item name.
    pub async fn cart(&self, username: &str) -> Result<Vec<CartItem>, ClassifiedError> {
        require_identity(username)?;
        self.execute(ListCart::new(username)).await
    }

    /// Ledger entries between `from` and `to` (epoch millis), newest first.
    pub async fn transactions(
        &self,
        username: &str,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<Vec<LedgerEntry>, ClassifiedError> {
        require_identity(username)?;
        let window = LedgerWindow::from_millis(from, to).map_err(ClassifiedError::rejected)?;
        self.execute(ListTransactions::new(username, window)).await
    }

    /// One of the caller's ledger entries with its order lines.
    pub async fn transaction_details(
        &self,
        username: &str,
        tx_id: Uuid,
    ) -> Result<TransactionDetails, ClassifiedError> {
        require_identity(username)?;
        self.execute(GetTransactionDetails::new(username, tx_id)).await
    }

    /// One catalog item.
    pub async fn catalog_item(&self, item_id: Uuid) -> Result<CatalogItem, ClassifiedError> {
        self.execute(GetCatalogItem::new(item_id)).await
    }

    /// Catalog listing. An unknown category lists nothing without a
    /// transaction.
    pub async fn catalog(&self, query: CatalogQuery) -> Result<Vec<CatalogItem>, ClassifiedError> {
        if query.matches_nothing() {
            return Ok(Vec::new());
        }
        self.execute(ListCatalogItems::new(query)).await
    }

    /// Run any unit of work through the shared executor.
    pub async fn execute<W>(&self, mut work: W) -> Result<W::Output, ClassifiedError>
    where
        W: UnitOfWork<C::Session>,
    {
        self.executor.lock().await.run(&mut work).await
    }
}

fn require_identity(username: &str) -> Result<(), ClassifiedError> {
    if username.trim().is_empty() {
        return Err(ClassifiedError::rejected(RewardsError::unauthorized(
            "Unable to determine username from request",
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::services::{MemoryConnector, MemoryDatabase, StaticTokenIssuer};

    fn service(db: &MemoryDatabase) -> RewardsService<MemoryConnector> {
        RewardsService::new(
            ClusterConfig::new("localhost", "us-east-1", "postgres", "admin"),
            db.connector(),
            Arc::new(StaticTokenIssuer::new("pw")),
            RetryPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_missing_identity_is_rejected_without_connecting() {
        let db = MemoryDatabase::new();
        let service = service(&db);

        let err = service.checkout("  ").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Fatal);
        assert_eq!(err.attempts(), 0);
        assert_eq!(err.cause().category(), "Unauthorized");
        assert_eq!(db.stats().opens, 0);
    }

    #[tokio::test]
    async fn test_zero_quantity_skips_the_transaction() {
        let db = MemoryDatabase::new();
        let service = service(&db);

        let change = service.upsert_cart_item("alice", Uuid::new_v4(), 0).await.unwrap();
        assert_eq!(change, CartChange::Unchanged);
        assert_eq!(db.stats().begins, 0);
    }

    #[tokio::test]
    async fn test_warm_up_opens_one_connection() {
        let db = MemoryDatabase::new();
        let service = service(&db);

        service.warm_up().await.unwrap();
        assert_eq!(service.session_id().await.as_deref(), Some("mem-1"));

        db.seed_customer("alice", 42);
        assert_eq!(service.balance("alice").await.unwrap(), 42);
        assert_eq!(service.connections_opened().await, 1);

        service.shutdown().await;
        assert_eq!(service.session_id().await, None);
        assert_eq!(db.stats().closes, 1);
    }

    #[tokio::test]
    async fn test_unknown_category_lists_nothing_without_a_transaction() {
        let db = MemoryDatabase::new();
        db.seed_catalog_item("Atlas", 40);
        let service = service(&db);

        let items = service.catalog(CatalogQuery::new(Some("Garden"), None, None)).await.unwrap();
        assert!(items.is_empty());
        assert_eq!(db.stats().begins, 0);

        let items = service.catalog(CatalogQuery::default()).await.unwrap();
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn test_profile_requires_identity() {
        let db = MemoryDatabase::new();
        db.seed_customer("alice", 5);
        let service = service(&db);

        assert_eq!(service.customer("alice").await.unwrap().username, "alice");
        let err = service.customer("").await.unwrap_err();
        assert_eq!(err.cause().category(), "Unauthorized");
    }

    #[tokio::test]
    async fn test_inverted_window_is_rejected() {
        let db = MemoryDatabase::new();
        let service = service(&db);

        let err = service.transactions("alice", Some(10), Some(5)).await.unwrap_err();
        assert_eq!(err.cause().category(), "InvalidInput");
        assert_eq!(db.stats().begins, 0);
    }
}
