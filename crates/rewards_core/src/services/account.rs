//! Customer profile, points balance and ledger queries.

use crate::error::RewardsError;
use crate::models::{Customer, LedgerEntry, TransactionDetails};
use crate::services::executor::UnitOfWork;
use crate::services::store::{resolve_customer, RewardsStore};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Default ledger window when the caller gives no start.
pub const DEFAULT_LEDGER_WINDOW_DAYS: i64 = 30;

/// Reads a customer's profile.
#[derive(Debug, Clone)]
pub struct GetCustomer {
    username: String,
}

impl GetCustomer {
    /// Read `username`'s profile.
    pub fn new(username: impl Into<String>) -> Self {
        Self { username: username.into() }
    }
}

#[async_trait]
impl<S: RewardsStore> UnitOfWork<S> for GetCustomer {
    type Output = Customer;

    fn name(&self) -> &'static str {
        "get_customer"
    }

    async fn run(&mut self, store: &mut S) -> Result<Customer, RewardsError> {
        store
            .customer(&self.username)
            .await?
            .ok_or_else(|| RewardsError::not_found(format!("Customer {} not found", self.username)))
    }
}

/// Reads a customer's points balance. No balance row reads as zero.
#[derive(Debug, Clone)]
pub struct GetBalance {
    username: String,
}

impl GetBalance {
    /// Read `username`'s balance.
    pub fn new(username: impl Into<String>) -> Self {
        Self { username: username.into() }
    }
}

#[async_trait]
impl<S: RewardsStore> UnitOfWork<S> for GetBalance {
    type Output = i64;

    fn name(&self) -> &'static str {
        "get_balance"
    }

    async fn run(&mut self, store: &mut S) -> Result<i64, RewardsError> {
        let customer_id = resolve_customer(store, &self.username).await?;
        Ok(store.points_balance(customer_id).await?.unwrap_or(0))
    }
}

/// A closed time range of ledger entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerWindow {
    /// Earliest entry time
    pub from: DateTime<Utc>,
    /// Latest entry time
    pub to: DateTime<Utc>,
}

impl LedgerWindow {
    /// Build a window; `to` defaults to now and `from` to 30 days before `to`.
    pub fn new(
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Self, RewardsError> {
        let to = to.unwrap_or_else(Utc::now);
        let from = from.unwrap_or(to - Duration::days(DEFAULT_LEDGER_WINDOW_DAYS));
        if from > to {
            return Err(RewardsError::invalid_input("'from' must not be after 'to'"));
        }
        Ok(Self { from, to })
    }

    /// Build a window from epoch milliseconds.
    pub fn from_millis(from: Option<i64>, to: Option<i64>) -> Result<Self, RewardsError> {
        let convert = |millis: i64| {
            DateTime::<Utc>::from_timestamp_millis(millis)
                .ok_or_else(|| RewardsError::invalid_input(format!("Invalid timestamp: {millis}")))
        };
        Self::new(from.map(convert).transpose()?, to.map(convert).transpose()?)
    }
}

/// Lists a customer's ledger entries in a window, newest first.
#[derive(Debug, Clone)]
pub struct ListTransactions {
    username: String,
    window: LedgerWindow,
}

impl ListTransactions {
    /// List `username`'s ledger entries inside `window`.
    pub fn new(username: impl Into<String>, window: LedgerWindow) -> Self {
        Self { username: username.into(), window }
    }
}

#[async_trait]
impl<S: RewardsStore> UnitOfWork<S> for ListTransactions {
    type Output = Vec<LedgerEntry>;

    fn name(&self) -> &'static str {
        "list_transactions"
    }

    async fn run(&mut self, store: &mut S) -> Result<Vec<LedgerEntry>, RewardsError> {
        let customer_id = resolve_customer(store, &self.username).await?;
        store.ledger_entries(customer_id, self.window.from, self.window.to).await
    }
}

/// Reads one of a customer's ledger entries with its order lines.
///
/// Entries of other customers read as not found.
#[derive(Debug, Clone)]
pub struct GetTransactionDetails {
    username: String,
    tx_id: Uuid,
}

impl GetTransactionDetails {
    /// Read `username`'s ledger entry `tx_id`.
    pub fn new(username: impl Into<String>, tx_id: Uuid) -> Self {
        Self { username: username.into(), tx_id }
    }
}

#[async_trait]
impl<S: RewardsStore> UnitOfWork<S> for GetTransactionDetails {
    type Output = TransactionDetails;

    fn name(&self) -> &'static str {
        "get_transaction_details"
    }

    async fn run(&mut self, store: &mut S) -> Result<TransactionDetails, RewardsError> {
        let customer_id = resolve_customer(store, &self.username).await?;
        store
            .transaction_details(customer_id, self.tx_id)
            .await?
            .ok_or_else(|| RewardsError::not_found(format!("Transaction {} not found", self.tx_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Address, ClusterConfig};
    use crate::services::connection::{Connector, Session};
    use crate::services::credentials::Credential;
    use crate::services::memory::{MemoryDatabase, MemorySession};
    use crate::services::Checkout;

    async fn session(db: &MemoryDatabase) -> MemorySession {
        let config = ClusterConfig::new("localhost", "us-east-1", "postgres", "admin");
        let credential = Credential::new("pw", std::time::Duration::from_secs(30));
        let mut session = db.connector().open(&config, &credential).await.unwrap();
        session.begin().await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_customer_profile() {
        let db = MemoryDatabase::new();
        let id = db.seed_customer_profile(
            Customer {
                username: "alice".to_string(),
                first_name: Some("Alice".to_string()),
                address: Address { city: Some("Seattle".to_string()), ..Default::default() },
                ..Default::default()
            },
            10,
        );
        let mut session = session(&db).await;

        let customer = GetCustomer::new("alice").run(&mut session).await.unwrap();
        assert_eq!(customer.id, id);
        assert_eq!(customer.first_name.as_deref(), Some("Alice"));
        assert_eq!(customer.address.city.as_deref(), Some("Seattle"));

        let err = GetCustomer::new("ghost").run(&mut session).await.unwrap_err();
        assert_eq!(err.category(), "NotFound");
    }

    #[tokio::test]
    async fn test_transaction_details_lists_order_lines_by_name() {
        let db = MemoryDatabase::new();
        let customer = db.seed_customer("alice", 1_000);
        let mug = db.seed_catalog_item("Mug", 150);
        let hat = db.seed_catalog_item("Hat", 75);
        db.seed_cart_line(customer, mug, 1);
        db.seed_cart_line(customer, hat, 2);

        let mut session = session(&db).await;
        let tx_id = Checkout::new("alice").run(&mut session).await.unwrap().transaction_id();
        let tx_id = tx_id.unwrap();

        let details = GetTransactionDetails::new("alice", tx_id).run(&mut session).await.unwrap();
        assert_eq!(details.entry.id, tx_id);
        assert_eq!(details.entry.points, -300);

        let names: Vec<&str> = details.order_items.iter().map(|line| line.name.as_str()).collect();
        assert_eq!(names, ["Hat", "Mug"]);
        assert_eq!(details.order_items[0].quantity, 2);
        assert_eq!(details.order_items[0].points_price, 75);
    }

    #[tokio::test]
    async fn test_transaction_of_another_customer_is_not_found() {
        let db = MemoryDatabase::new();
        let alice = db.seed_customer("alice", 1_000);
        db.seed_customer("bob", 1_000);
        let mug = db.seed_catalog_item("Mug", 150);
        db.seed_cart_line(alice, mug, 1);

        let mut session = session(&db).await;
        let tx_id = Checkout::new("alice").run(&mut session).await.unwrap().transaction_id();

        let err = GetTransactionDetails::new("bob", tx_id.unwrap())
            .run(&mut session)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "NotFound");
    }

    #[test]
    fn test_window_defaults_to_thirty_days() {
        let window = LedgerWindow::new(None, None).unwrap();
        assert_eq!(window.to - window.from, Duration::days(30));
    }

    #[test]
    fn test_window_rejects_inverted_range() {
        let err = LedgerWindow::from_millis(Some(2_000), Some(1_000)).unwrap_err();
        assert_eq!(err.category(), "InvalidInput");
    }

    #[test]
    fn test_window_from_millis() {
        let window = LedgerWindow::from_millis(Some(0), Some(86_400_000)).unwrap();
        assert_eq!(window.from, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(window.to - window.from, Duration::days(1));
    }
}
