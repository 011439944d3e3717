//! In-process store with optimistic concurrency control.
//!
//! Each transaction works on a snapshot of the tables. Commit publishes the
//! snapshot, or fails with SQLSTATE 40001 when another commit landed after
//! the snapshot was taken and this transaction wrote something. Faults can
//! be queued for opens, statements, commits and closes, and every session
//! lifecycle call is counted, so the retry core can be exercised without a
//! cluster.

use crate::error::{RewardsError, SERIALIZATION_FAILURE};
use crate::models::{
    CartItem, CartLine, CatalogItem, CatalogQuery, ClusterConfig, Customer, LedgerEntry,
    OrderItem, OrderLine, TransactionDetails,
};
use crate::services::connection::{Connector, Session};
use crate::services::credentials::Credential;
use crate::services::store::RewardsStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// SQLSTATE reported on a session the server dropped.
const CONNECTION_FAILURE: &str = "08006";

/// Table contents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tables {
    /// username -> customer profile
    pub customers: HashMap<String, Customer>,
    /// item id -> catalog item
    pub catalog: HashMap<Uuid, CatalogItem>,
    /// (customer id, item id) -> quantity
    pub carts: BTreeMap<(Uuid, Uuid), i32>,
    /// customer id -> points balance
    pub balances: HashMap<Uuid, i64>,
    /// Ledger rows in insertion order
    pub ledger: Vec<LedgerEntry>,
    /// Order rows in insertion order
    pub order_items: Vec<OrderItem>,
}

impl Tables {
    /// Cart lines of one customer.
    pub fn cart_of(&self, customer_id: Uuid) -> Vec<(Uuid, i32)> {
        self.carts
            .iter()
            .filter(|((customer, _), _)| *customer == customer_id)
            .map(|((_, item), quantity)| (*item, *quantity))
            .collect()
    }

    /// Ledger rows of one customer.
    pub fn ledger_of(&self, customer_id: Uuid) -> Vec<&LedgerEntry> {
        self.ledger.iter().filter(|entry| entry.customer_id == customer_id).collect()
    }
}

/// Session lifecycle counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Sessions opened
    pub opens: u64,
    /// Open attempts that failed
    pub open_failures: u64,
    /// Sessions closed
    pub closes: u64,
    /// Transactions started
    pub begins: u64,
    /// Transactions committed
    pub commits: u64,
    /// Commit calls that failed
    pub commit_failures: u64,
    /// Rollback calls
    pub rollbacks: u64,
}

#[derive(Default)]
struct Faults {
    open: VecDeque<RewardsError>,
    statement: VecDeque<RewardsError>,
    commit: VecDeque<RewardsError>,
    close: VecDeque<RewardsError>,
}

#[derive(Default)]
struct Shared {
    tables: Tables,
    version: u64,
    /// Sessions with a serial at or below this were dropped by the server.
    killed_through: u64,
    faults: Faults,
    stats: MemoryStats,
}

/// Handle to an in-memory database. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryDatabase {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector opening sessions on this database.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector { db: self.clone() }
    }

    // ========== Seeding ==========

    /// Add a customer with a points balance.
    pub fn seed_customer(&self, username: &str, balance: i64) -> Uuid {
        let customer = Customer { username: username.to_string(), ..Default::default() };
        self.seed_customer_profile(customer, balance)
    }

    /// Add a customer profile with a points balance. A nil id is replaced
    /// with a fresh one.
    pub fn seed_customer_profile(&self, mut customer: Customer, balance: i64) -> Uuid {
        if customer.id.is_nil() {
            customer.id = Uuid::new_v4();
        }
        let id = customer.id;
        let mut shared = self.shared.lock();
        shared.tables.customers.insert(customer.username.clone(), customer);
        shared.tables.balances.insert(id, balance);
        shared.version += 1;
        id
    }

    /// Add a catalog item with just a name and a points price.
    pub fn seed_catalog_item(&self, name: &str, points_price: i32) -> Uuid {
        self.seed_catalog(CatalogItem {
            name: name.to_string(),
            points_price,
            ..Default::default()
        })
    }

    /// Add a catalog item. A nil id is replaced with a fresh one.
    pub fn seed_catalog(&self, mut item: CatalogItem) -> Uuid {
        if item.id.is_nil() {
            item.id = Uuid::new_v4();
        }
        let id = item.id;
        let mut shared = self.shared.lock();
        shared.tables.catalog.insert(id, item);
        shared.version += 1;
        id
    }

    /// Put an item in a customer's cart.
    pub fn seed_cart_line(&self, customer_id: Uuid, item_id: Uuid, quantity: i32) {
        let mut shared = self.shared.lock();
        shared.tables.carts.insert((customer_id, item_id), quantity);
        shared.version += 1;
    }

    /// Overwrite a balance outside any session, as a concurrent writer would.
    pub fn set_balance(&self, customer_id: Uuid, balance: i64) {
        let mut shared = self.shared.lock();
        shared.tables.balances.insert(customer_id, balance);
        shared.version += 1;
    }

    // ========== Inspection ==========

    /// Copy of the committed tables.
    pub fn snapshot(&self) -> Tables {
        self.shared.lock().tables.clone()
    }

    /// Lifecycle counters.
    pub fn stats(&self) -> MemoryStats {
        self.shared.lock().stats
    }

    // ========== Fault injection ==========

    /// Fail the next open attempt with `err`.
    pub fn fail_next_open(&self, err: RewardsError) {
        self.shared.lock().faults.open.push_back(err);
    }

    /// Fail the next store statement with `err`.
    pub fn fail_next_statement(&self, err: RewardsError) {
        self.shared.lock().faults.statement.push_back(err);
    }

    /// Fail the next commit with `err`.
    pub fn fail_next_commit(&self, err: RewardsError) {
        self.shared.lock().faults.commit.push_back(err);
    }

    /// Fail the next close with `err`.
    pub fn fail_next_close(&self, err: RewardsError) {
        self.shared.lock().faults.close.push_back(err);
    }

    /// Drop every session opened so far, as a server restart would.
    pub fn kill_sessions(&self) {
        let mut shared = self.shared.lock();
        shared.killed_through = shared.stats.opens;
    }
}

/// Opens [`MemorySession`]s.
#[derive(Clone)]
pub struct MemoryConnector {
    db: MemoryDatabase,
}

impl MemoryConnector {
    /// The database behind this connector.
    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Session = MemorySession;

    async fn open(
        &self,
        _config: &ClusterConfig,
        credential: &Credential,
    ) -> Result<MemorySession, RewardsError> {
        let mut shared = self.db.shared.lock();
        if let Some(err) = shared.faults.open.pop_front() {
            shared.stats.open_failures += 1;
            return Err(err);
        }
        if credential.token().is_empty() {
            shared.stats.open_failures += 1;
            return Err(RewardsError::database("password authentication failed", "28P01"));
        }

        shared.stats.opens += 1;
        let serial = shared.stats.opens;
        Ok(MemorySession {
            db: self.db.clone(),
            serial,
            session_id: format!("mem-{serial}"),
            txn: None,
        })
    }
}

struct Txn {
    base_version: u64,
    working: Tables,
    dirty: bool,
}

/// A session on a [`MemoryDatabase`].
pub struct MemorySession {
    db: MemoryDatabase,
    serial: u64,
    session_id: String,
    txn: Option<Txn>,
}

impl fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySession")
            .field("session_id", &self.session_id)
            .field("in_transaction", &self.in_transaction())
            .finish_non_exhaustive()
    }
}

impl MemorySession {
    /// Open order of this session, starting at 1.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    fn check_alive(&self, shared: &Shared) -> Result<(), RewardsError> {
        if self.serial <= shared.killed_through {
            return Err(RewardsError::connection_with_code(
                "terminating connection due to administrator command",
                CONNECTION_FAILURE,
            ));
        }
        Ok(())
    }

    /// Run a statement against the transaction's working tables.
    fn statement<T>(
        &mut self,
        write: bool,
        f: impl FnOnce(&mut Tables) -> T,
    ) -> Result<T, RewardsError> {
        {
            let mut shared = self.db.shared.lock();
            self.check_alive(&shared)?;
            if let Some(err) = shared.faults.statement.pop_front() {
                return Err(err);
            }
        }
        let txn = self
            .txn
            .as_mut()
            .ok_or_else(|| RewardsError::internal("Statement issued outside a transaction"))?;
        txn.dirty |= write;
        Ok(f(&mut txn.working))
    }
}

#[async_trait]
impl Session for MemorySession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    async fn begin(&mut self) -> Result<(), RewardsError> {
        let mut shared = self.db.shared.lock();
        self.check_alive(&shared)?;
        shared.stats.begins += 1;
        if self.txn.is_some() {
            // Like PostgreSQL: warn and keep the open transaction
            tracing::warn!(
                session_id = %self.session_id,
                "There is already a transaction in progress"
            );
            return Ok(());
        }
        self.txn = Some(Txn {
            base_version: shared.version,
            working: shared.tables.clone(),
            dirty: false,
        });
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), RewardsError> {
        let txn = self.txn.take();
        let mut shared = self.db.shared.lock();
        if let Err(e) = self.check_alive(&shared) {
            shared.stats.commit_failures += 1;
            return Err(e);
        }
        if let Some(err) = shared.faults.commit.pop_front() {
            shared.stats.commit_failures += 1;
            return Err(err);
        }
        let Some(txn) = txn else {
            shared.stats.commit_failures += 1;
            return Err(RewardsError::internal("No transaction in progress"));
        };

        if txn.dirty {
            if shared.version != txn.base_version {
                shared.stats.commit_failures += 1;
                return Err(RewardsError::database(
                    "change conflicts with another transaction, please retry",
                    SERIALIZATION_FAILURE,
                ));
            }
            shared.tables = txn.working;
            shared.version += 1;
        }
        shared.stats.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), RewardsError> {
        self.txn = None;
        let mut shared = self.db.shared.lock();
        shared.stats.rollbacks += 1;
        self.check_alive(&shared)
    }

    async fn close(self) -> Result<(), RewardsError> {
        let mut shared = self.db.shared.lock();
        shared.stats.closes += 1;
        match shared.faults.close.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RewardsStore for MemorySession {
    async fn customer_id(&mut self, username: &str) -> Result<Option<Uuid>, RewardsError> {
        self.statement(false, |t| t.customers.get(username).map(|customer| customer.id))
    }

    async fn customer(&mut self, username: &str) -> Result<Option<Customer>, RewardsError> {
        self.statement(false, |t| t.customers.get(username).cloned())
    }

    async fn cart_lines(&mut self, customer_id: Uuid) -> Result<Vec<CartLine>, RewardsError> {
        self.statement(false, |t| {
            t.cart_of(customer_id)
                .into_iter()
                .filter_map(|(item_id, quantity)| {
                    t.catalog.get(&item_id).map(|entry| CartLine {
                        customer_id,
                        item_id,
                        quantity,
                        points_price: entry.points_price,
                    })
                })
                .collect()
        })
    }

    async fn cart_items(&mut self, customer_id: Uuid) -> Result<Vec<CartItem>, RewardsError> {
        self.statement(false, |t| {
            let mut items: Vec<CartItem> = t
                .cart_of(customer_id)
                .into_iter()
                .filter_map(|(item_id, quantity)| {
                    t.catalog.get(&item_id).map(|entry| CartItem {
                        item_id,
                        name: entry.name.clone(),
                        quantity,
                        points_price: entry.points_price,
                    })
                })
                .collect();
            items.sort_by(|a, b| a.name.cmp(&b.name));
            items
        })
    }

    async fn cart_quantity(
        &mut self,
        customer_id: Uuid,
        item_id: Uuid,
    ) -> Result<Option<i32>, RewardsError> {
        self.statement(false, |t| t.carts.get(&(customer_id, item_id)).copied())
    }

    async fn catalog_item_exists(&mut self, item_id: Uuid) -> Result<bool, RewardsError> {
        self.statement(false, |t| t.catalog.contains_key(&item_id))
    }

    async fn catalog_item(&mut self, item_id: Uuid) -> Result<Option<CatalogItem>, RewardsError> {
        self.statement(false, |t| t.catalog.get(&item_id).cloned())
    }

    async fn catalog_items(
        &mut self,
        query: &CatalogQuery,
    ) -> Result<Vec<CatalogItem>, RewardsError> {
        self.statement(false, |t| {
            let mut items: Vec<CatalogItem> =
                t.catalog.values().filter(|item| query.includes(item)).cloned().collect();
            items.sort_by(|a, b| query.compare(a, b));
            items
        })
    }

    async fn insert_cart_item(
        &mut self,
        customer_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<(), RewardsError> {
        let inserted = self.statement(true, |t| {
            if t.carts.contains_key(&(customer_id, item_id)) {
                return false;
            }
            t.carts.insert((customer_id, item_id), quantity);
            true
        })?;
        if inserted {
            Ok(())
        } else {
            Err(RewardsError::database("duplicate key value violates unique constraint", "23505"))
        }
    }

    async fn update_cart_quantity(
        &mut self,
        customer_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<u64, RewardsError> {
        self.statement(true, |t| match t.carts.get_mut(&(customer_id, item_id)) {
            Some(current) => {
                *current = quantity;
                1
            }
            None => 0,
        })
    }

    async fn delete_cart_item(
        &mut self,
        customer_id: Uuid,
        item_id: Uuid,
    ) -> Result<u64, RewardsError> {
        self.statement(true, |t| u64::from(t.carts.remove(&(customer_id, item_id)).is_some()))
    }

    async fn delete_cart(&mut self, customer_id: Uuid) -> Result<u64, RewardsError> {
        self.statement(true, |t| {
            let before = t.carts.len();
            t.carts.retain(|(customer, _), _| *customer != customer_id);
            (before - t.carts.len()) as u64
        })
    }

    async fn points_balance(&mut self, customer_id: Uuid) -> Result<Option<i64>, RewardsError> {
        self.statement(false, |t| t.balances.get(&customer_id).copied())
    }

    async fn debit_balance(&mut self, customer_id: Uuid, points: i64) -> Result<u64, RewardsError> {
        self.statement(true, |t| match t.balances.get_mut(&customer_id) {
            Some(balance) => {
                *balance -= points;
                1
            }
            None => 0,
        })
    }

    async fn insert_order_item(&mut self, item: &OrderItem) -> Result<(), RewardsError> {
        self.statement(true, |t| t.order_items.push(item.clone()))
    }

    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<(), RewardsError> {
        let mut entry = entry.clone();
        entry.timestamp = Some(Utc::now());
        self.statement(true, move |t| t.ledger.push(entry))
    }

    async fn ledger_entries(
        &mut self,
        customer_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, RewardsError> {
        self.statement(false, |t| {
            let mut entries: Vec<LedgerEntry> = t
                .ledger_of(customer_id)
                .into_iter()
                .filter(|entry| entry.timestamp.is_some_and(|ts| ts >= from && ts <= to))
                .cloned()
                .collect();
            entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            entries
        })
    }

    async fn transaction_details(
        &mut self,
        customer_id: Uuid,
        tx_id: Uuid,
    ) -> Result<Option<TransactionDetails>, RewardsError> {
        self.statement(false, |t| -> Option<TransactionDetails> {
            let entry = t
                .ledger
                .iter()
                .find(|entry| entry.id == tx_id && entry.customer_id == customer_id)?
                .clone();

            let mut order_items: Vec<OrderLine> = t
                .order_items
                .iter()
                .filter(|order| order.tx_id == tx_id)
                .filter_map(|order| {
                    t.catalog.get(&order.item_id).map(|item| OrderLine {
                        item_id: order.item_id,
                        name: item.name.clone(),
                        description: item.description.clone(),
                        quantity: order.quantity,
                        points_price: order.points_price,
                    })
                })
                .collect();
            order_items.sort_by(|a, b| a.name.cmp(&b.name));

            Some(TransactionDetails { entry, order_items })
        })
    }
}
