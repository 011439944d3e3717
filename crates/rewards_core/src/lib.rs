//! Core types and services for the rewards backend.
//!
//! This crate runs rewards operations against an optimistic-concurrency
//! PostgreSQL-compatible cluster:
//!
//! - **error**: Error handling and retry classification
//! - **models**: Cluster configuration, retry policy, rewards and catalog rows
//! - **services**: Connection management, retried execution, units of work
//! - **state**: Service facade owning the executor
//! - **response**: API status and JSON rendering
//! - **logging**: Structured logging setup

pub mod error;
pub mod logging;
pub mod models;
pub mod response;
pub mod services;
pub mod state;


pub use error::{classify, ClassifiedError, ErrorClass, RewardsError};
pub use models::{
    CartItem, CartLine, CatalogItem, CatalogQuery, CheckoutOutcome, ClusterConfig, ClusterOptions,
    Customer, LedgerEntry, OrderItem, RetryPolicy, SslMode, TransactionDetails,
};
pub use response::Response;
pub use services::{
    BackoffPolicy, ConnectionManager, Connector, Credential, MemoryDatabase, PgConnector,
    RewardsStore, SdkTokenIssuer, Session, StaticTokenIssuer, TokenIssuer, TransactionExecutor,
    UnitOfWork,
};
pub use state::RewardsService;
