//! Data models for the rewards backend.
//!
//! - `catalog` - CatalogItem and listing options
//! - `cluster` - ClusterConfig, ClusterOptions, SslMode
//! - `retry` - RetryPolicy
//! - `rewards` - customer, cart, ledger and checkout rows

pub mod catalog;
pub mod cluster;
pub mod retry;
pub mod rewards;

pub use catalog::{CatalogItem, CatalogQuery, CatalogSort, SortOrder, CATALOG_CATEGORIES};
pub use cluster::{ClusterConfig, ClusterConfigBuilder, ClusterOptions, SslMode, ADMIN_USER};
pub use retry::RetryPolicy;
pub use rewards::{
    Address, CartItem, CartLine, CheckoutOutcome, Customer, LedgerEntry, OrderItem, OrderLine,
    TransactionDetails, TX_TYPE_SPEND,
};
