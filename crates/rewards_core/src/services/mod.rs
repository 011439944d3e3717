//! Backend services for the rewards backend.
//!
//! - `backoff` - Jittered exponential backoff between attempts
//! - `credentials` - Short-lived authentication tokens
//! - `connection` - Session/Connector seams and the single-connection manager
//! - `executor` - Retried transaction execution
//! - `store` - Statement-level rewards operations
//! - `postgres` - tokio-postgres sessions
//! - `memory` - In-process OCC store for tests and demos
//! - `checkout`, `cart`, `account`, `catalog` - Units of work

pub mod account;
pub mod backoff;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod connection;
pub mod credentials;
pub mod executor;
pub mod memory;
pub mod postgres;
pub mod store;

pub use account::{GetBalance, GetCustomer, GetTransactionDetails, LedgerWindow, ListTransactions};
pub use backoff::BackoffPolicy;
pub use cart::{CartChange, ListCart, RemoveCartItems, UpsertCartItem};
pub use catalog::{GetCatalogItem, ListCatalogItems};
pub use checkout::Checkout;
pub use connection::{ConnectionManager, Connector, Session};
pub use credentials::{Credential, SdkTokenIssuer, StaticTokenIssuer, TokenIssuer};
pub use executor::{next_step, Step, TransactionExecutor, UnitOfWork};
pub use memory::{MemoryConnector, MemoryDatabase, MemorySession};
pub use postgres::{PgConnector, PgSession};
pub use store::RewardsStore;
