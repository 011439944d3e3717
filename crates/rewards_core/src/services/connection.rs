//! Single-connection lifecycle management.
//!
//! The store limits how long a session may live and authenticates with
//! short-lived tokens, so the [`ConnectionManager`] keeps at most one
//! connection, replaces it once it ages out or is invalidated, and issues a
//! fresh token for every connection attempt.

use crate::error::{classify, ErrorClass, RewardsError};
use crate::models::{ClusterConfig, RetryPolicy};
use crate::services::backoff::BackoffPolicy;
use crate::services::credentials::{Credential, TokenIssuer};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// An open, fully set up connection to the store.
///
/// Transaction boundaries are explicit: nothing a unit of work issues is
/// committed until [`Session::commit`] is called.
#[async_trait]
pub trait Session: Send {
    /// Store-assigned session identifier, for diagnostics.
    fn session_id(&self) -> &str;

    /// Whether a transaction was started and not yet ended.
    fn in_transaction(&self) -> bool;

    /// Start a transaction.
    async fn begin(&mut self) -> Result<(), RewardsError>;

    /// Commit the open transaction.
    async fn commit(&mut self) -> Result<(), RewardsError>;

    /// Roll back the open transaction.
    async fn rollback(&mut self) -> Result<(), RewardsError>;

    /// Close the connection.
    async fn close(self) -> Result<(), RewardsError>
    where
        Self: Sized;
}

/// Opens sessions.
///
/// `open` returns only after the handshake, session id lookup and
/// connection setup have all succeeded.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Session type this connector produces.
    type Session: Session;

    /// Open a new session authenticated with `credential`.
    async fn open(
        &self,
        config: &ClusterConfig,
        credential: &Credential,
    ) -> Result<Self::Session, RewardsError>;
}

/// The live connection and when it was opened.
struct ConnectionState<S> {
    session: S,
    created_at: Instant,
}

/// Owns at most one live session.
pub struct ConnectionManager<C: Connector> {
    config: Arc<ClusterConfig>,
    connector: C,
    issuer: Arc<dyn TokenIssuer>,
    policy: RetryPolicy,
    backoff: BackoffPolicy,
    state: Option<ConnectionState<C::Session>>,
    connections_opened: u64,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager. No connection is opened until the first acquire.
    pub fn new(
        config: Arc<ClusterConfig>,
        connector: C,
        issuer: Arc<dyn TokenIssuer>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            config,
            connector,
            issuer,
            backoff: BackoffPolicy::from_policy(&policy),
            policy,
            state: None,
            connections_opened: 0,
        }
    }

    /// Get the cluster configuration.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Get the connector.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Maximum age before a connection is replaced.
    pub fn max_connection_age(&self) -> Duration {
        self.config.max_connection_age()
    }

    /// Return the live session, opening a new one when there is none, it
    /// has aged out, or `force_reconnect` is set.
    ///
    /// A reused session never carries a transaction into the caller: one
    /// left open by an abandoned attempt is rolled back first, and the
    /// session is replaced if that rollback fails.
    ///
    /// Opening retries only on concurrency conflicts; any other failure is
    /// returned immediately.
    pub async fn acquire(
        &mut self,
        force_reconnect: bool,
    ) -> Result<&mut C::Session, RewardsError> {
        if force_reconnect || !self.is_fresh() {
            self.reconnect(force_reconnect).await?;
        } else if !self.discard_open_transaction().await {
            self.reconnect(true).await?;
        }

        match self.state.as_mut() {
            Some(state) => Ok(&mut state.session),
            None => Err(RewardsError::internal("Connection state missing after reconnect")),
        }
    }

    /// Close the live session, if any. Close failures are ignored.
    pub async fn invalidate(&mut self) {
        if let Some(state) = self.state.take() {
            let session_id = state.session.session_id().to_string();
            match state.session.close().await {
                Ok(()) => tracing::debug!(session_id = %session_id, "Connection closed"),
                Err(e) => {
                    tracing::debug!(session_id = %session_id, error = %e, "Ignoring close failure")
                }
            }
        }
    }

    /// Whether a session is open.
    pub fn is_connected(&self) -> bool {
        self.state.is_some()
    }

    /// Session identifier of the live session.
    pub fn session_id(&self) -> Option<&str> {
        self.state.as_ref().map(|state| state.session.session_id())
    }

    /// When the live session was opened.
    pub fn created_at(&self) -> Option<Instant> {
        self.state.as_ref().map(|state| state.created_at)
    }

    /// Sessions opened over the manager's lifetime.
    pub fn connections_opened(&self) -> u64 {
        self.connections_opened
    }

    fn is_fresh(&self) -> bool {
        let max_age = self.max_connection_age();
        self.state.as_ref().is_some_and(|state| state.created_at.elapsed() < max_age)
    }

    /// Roll back a transaction an abandoned attempt left open. Returns
    /// false when the session can't be reused.
    async fn discard_open_transaction(&mut self) -> bool {
        let Some(state) = self.state.as_mut() else {
            return true;
        };
        if !state.session.in_transaction() {
            return true;
        }

        tracing::warn!(
            session_id = %state.session.session_id(),
            "Rolling back transaction left open by an abandoned attempt"
        );
        match state.session.rollback().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    session_id = %state.session.session_id(),
                    error = %e,
                    "Rollback of abandoned transaction failed"
                );
                false
            }
        }
    }

    async fn reconnect(&mut self, forced: bool) -> Result<(), RewardsError> {
        if self.state.is_some() {
            tracing::debug!(
                forced,
                session_id = self.session_id().unwrap_or_default(),
                "Replacing connection"
            );
        }
        self.invalidate().await;

        let mut attempt = 1;
        loop {
            match self.open_once().await {
                Ok(session) => {
                    self.connections_opened += 1;
                    tracing::info!(
                        endpoint = %self.config.endpoint,
                        session_id = %session.session_id(),
                        attempt,
                        "Connection established"
                    );
                    self.state = Some(ConnectionState { session, created_at: Instant::now() });
                    return Ok(());
                }
                Err(e)
                    if classify(&e) == ErrorClass::ConcurrencyConflict
                        && self.policy.has_attempts_after(attempt) =>
                {
                    tracing::warn!(attempt, "Concurrency collision while connecting");
                    attempt += 1;
                    self.backoff.wait(attempt).await;
                }
                Err(e) => {
                    tracing::error!(
                        attempt,
                        endpoint = %self.config.endpoint,
                        sql_state = e.pg_code().unwrap_or_default(),
                        error = %e,
                        "Failed to establish connection"
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn open_once(&self) -> Result<C::Session, RewardsError> {
        // A fresh token per attempt: it only has to outlive the handshake
        let credential = self.issuer.issue(&self.config).await?;
        self.connector.open(&self.config, &credential).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::credentials::StaticTokenIssuer;
    use crate::services::store::RewardsStore;
    use crate::services::memory::{MemoryConnector, MemoryDatabase};

    fn new_manager(db: &MemoryDatabase) -> ConnectionManager<MemoryConnector> {
        let config = ClusterConfig::new("localhost", "us-east-1", "postgres", "admin");
        ConnectionManager::new(
            Arc::new(config),
            db.connector(),
            Arc::new(StaticTokenIssuer::new("pw")),
            RetryPolicy::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_reuses_fresh_connection() {
        let db = MemoryDatabase::new();
        let mut manager = new_manager(&db);

        let first = manager.acquire(false).await.unwrap().serial();
        let second = manager.acquire(false).await.unwrap().serial();

        assert_eq!(first, second);
        assert_eq!(manager.connections_opened(), 1);
        assert_eq!(db.stats().opens, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaces_aged_out_connection() {
        let db = MemoryDatabase::new();
        let mut manager = new_manager(&db);

        let first = manager.acquire(false).await.unwrap().serial();
        tokio::time::advance(Duration::from_secs(54 * 60)).await;
        assert_eq!(manager.acquire(false).await.unwrap().serial(), first);

        tokio::time::advance(Duration::from_secs(2 * 60)).await;
        let replaced = manager.acquire(false).await.unwrap().serial();

        assert!(replaced > first);
        assert_eq!(db.stats().closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_reconnect_closes_previous() {
        let db = MemoryDatabase::new();
        let mut manager = new_manager(&db);

        let first = manager.acquire(false).await.unwrap().serial();
        let second = manager.acquire(true).await.unwrap().serial();

        assert!(second > first);
        assert_eq!(db.stats().opens, 2);
        assert_eq!(db.stats().closes, 1);
        assert_eq!(manager.session_id(), Some(format!("mem-{second}").as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_only_conflicts() {
        let db = MemoryDatabase::new();
        db.fail_next_open(RewardsError::serialization_failure("conflict"));
        db.fail_next_open(RewardsError::serialization_failure("conflict"));
        let mut manager = new_manager(&db);

        assert!(manager.acquire(false).await.is_ok());
        assert_eq!(db.stats().open_failures, 2);

        let db = MemoryDatabase::new();
        db.fail_next_open(RewardsError::connection_with_code("refused", "08001"));
        let mut manager = new_manager(&db);

        let err = manager.acquire(false).await.unwrap_err();
        assert_eq!(classify(&err), ErrorClass::ConnectionError);
        assert_eq!(db.stats().open_failures, 1);
        assert!(!manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up_after_max_attempts() {
        let db = MemoryDatabase::new();
        for _ in 0..10 {
            db.fail_next_open(RewardsError::serialization_failure("conflict"));
        }
        let mut manager = new_manager(&db);

        let err = manager.acquire(false).await.unwrap_err();
        assert_eq!(classify(&err), ErrorClass::ConcurrencyConflict);
        assert_eq!(db.stats().open_failures, RetryPolicy::DEFAULT_MAX_ATTEMPTS as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_transaction_is_rolled_back_before_reuse() {
        let db = MemoryDatabase::new();
        let customer = db.seed_customer("alice", 500);
        let mut manager = new_manager(&db);

        let session = manager.acquire(false).await.unwrap();
        session.begin().await.unwrap();
        session.debit_balance(customer, 200).await.unwrap();

        let session = manager.acquire(false).await.unwrap();
        assert!(!session.in_transaction());
        assert_eq!(session.serial(), 1);
        assert_eq!(db.stats().rollbacks, 1);

        session.begin().await.unwrap();
        session.commit().await.unwrap();
        assert_eq!(db.snapshot().balances[&customer], 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_replaced_when_dangling_rollback_fails() {
        let db = MemoryDatabase::new();
        let mut manager = new_manager(&db);

        manager.acquire(false).await.unwrap().begin().await.unwrap();
        db.kill_sessions();

        let session = manager.acquire(false).await.unwrap();
        assert_eq!(session.serial(), 2);
        assert!(!session.in_transaction());
        assert_eq!(db.stats().closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_failure_is_swallowed() {
        let db = MemoryDatabase::new();
        let mut manager = new_manager(&db);

        manager.acquire(false).await.unwrap();
        db.fail_next_close(RewardsError::connection("already gone"));
        manager.invalidate().await;

        assert!(!manager.is_connected());
        assert!(manager.acquire(false).await.is_ok());
    }
}
