//! Retried execution of units of work under OCC.
//!
//! Each attempt runs the unit of work in a fresh transaction on the managed
//! connection. Conflicts retry on the same connection, connection failures
//! retry on a new one, and everything else ends the run. Every failed
//! attempt is rolled back before the next attempt or the terminal error, so
//! at most one attempt's writes are ever committed.

use crate::error::{classify, ClassifiedError, ErrorClass, RewardsError};
use crate::models::RetryPolicy;
use crate::services::backoff::BackoffPolicy;
use crate::services::connection::{ConnectionManager, Connector, Session};

use async_trait::async_trait;

/// Work executed inside one transaction attempt.
///
/// Implementations may issue any number of statements through the session
/// but must not commit or roll back; the executor owns the transaction
/// boundary. `run` may be called again after a failed attempt and must
/// start from scratch each time.
#[async_trait]
pub trait UnitOfWork<S: Session>: Send {
    /// Domain result of a successful attempt.
    type Output: Send;

    /// Name used in logs.
    fn name(&self) -> &'static str {
        "unit_of_work"
    }

    /// Run one attempt.
    async fn run(&mut self, session: &mut S) -> Result<Self::Output, RewardsError>;
}

/// What the executor does after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Back off, then run `attempt`.
    Retry {
        /// Number of the next attempt.
        attempt: u32,
        /// Whether the next acquire must open a new connection.
        force_reconnect: bool,
    },
    /// Give up and report the failure.
    Abort,
}

/// Transition after attempt `attempt` failed with `class`.
pub fn next_step(policy: &RetryPolicy, attempt: u32, class: ErrorClass) -> Step {
    match class {
        ErrorClass::Fatal => Step::Abort,
        _ if !policy.has_attempts_after(attempt) => Step::Abort,
        ErrorClass::ConcurrencyConflict => {
            Step::Retry { attempt: attempt + 1, force_reconnect: false }
        }
        ErrorClass::ConnectionError => Step::Retry { attempt: attempt + 1, force_reconnect: true },
    }
}

/// Runs units of work with bounded, jittered retries.
pub struct TransactionExecutor<C: Connector> {
    connections: ConnectionManager<C>,
    policy: RetryPolicy,
    backoff: BackoffPolicy,
}

impl<C: Connector> TransactionExecutor<C> {
    /// Create an executor over a connection manager.
    pub fn new(connections: ConnectionManager<C>, policy: RetryPolicy) -> Self {
        Self { connections, backoff: BackoffPolicy::from_policy(&policy), policy }
    }

    /// Get the connection manager.
    pub fn connections(&self) -> &ConnectionManager<C> {
        &self.connections
    }

    /// Get the connection manager mutably.
    pub fn connections_mut(&mut self) -> &mut ConnectionManager<C> {
        &mut self.connections
    }

    /// Get the retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `work` until it commits, fails fatally, or attempts run out.
    pub async fn run<W>(&mut self, work: &mut W) -> Result<W::Output, ClassifiedError>
    where
        W: UnitOfWork<C::Session>,
    {
        self.run_with(work, false).await
    }

    /// Like [`run`](Self::run), optionally replacing the connection before
    /// the first attempt.
    pub async fn run_with<W>(
        &mut self,
        work: &mut W,
        force_reconnect: bool,
    ) -> Result<W::Output, ClassifiedError>
    where
        W: UnitOfWork<C::Session>,
    {
        let mut attempt = 1;
        let mut force_reconnect = force_reconnect;

        loop {
            let err = match self.attempt(work, force_reconnect).await {
                Ok(output) => {
                    tracing::debug!(work = work.name(), attempt, "Transaction committed");
                    return Ok(output);
                }
                Err(e) => e,
            };

            let class = classify(&err);
            self.log_failure(work.name(), attempt, class, &err);

            match next_step(&self.policy, attempt, class) {
                Step::Retry { attempt: next, force_reconnect: reconnect } => {
                    attempt = next;
                    force_reconnect = reconnect;
                    self.backoff.wait(attempt).await;
                }
                Step::Abort => {
                    if class == ErrorClass::ConnectionError {
                        // Don't hand a dead link to the next caller
                        self.connections.invalidate().await;
                    }
                    return Err(ClassifiedError::new(attempt, err));
                }
            }
        }
    }

    /// One attempt: acquire, begin, run, commit. Rolls back on failure.
    async fn attempt<W>(
        &mut self,
        work: &mut W,
        force_reconnect: bool,
    ) -> Result<W::Output, RewardsError>
    where
        W: UnitOfWork<C::Session>,
    {
        let session = self.connections.acquire(force_reconnect).await?;

        let result = match session.begin().await {
            Ok(()) => match work.run(session).await {
                Ok(output) => session.commit().await.map(|()| output),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        if result.is_err() {
            if let Err(rollback_err) = session.rollback().await {
                tracing::warn!(
                    session_id = %session.session_id(),
                    error = %rollback_err,
                    "Rollback failed"
                );
            }
        }

        result
    }

    fn log_failure(&self, work: &str, attempt: u32, class: ErrorClass, err: &RewardsError) {
        let session_id = self.connections.session_id().unwrap_or_default();
        let max_attempts = self.policy.max_attempts;
        match class {
            ErrorClass::ConcurrencyConflict => {
                tracing::warn!(work, attempt, max_attempts, error = %err, "Concurrency conflict");
            }
            ErrorClass::ConnectionError => {
                tracing::error!(
                    work,
                    attempt,
                    max_attempts,
                    session_id,
                    sql_state = err.pg_code().unwrap_or_default(),
                    error = %err,
                    "Connection error"
                );
            }
            ErrorClass::Fatal if err.pg_code().is_some() => {
                tracing::error!(
                    work,
                    attempt,
                    session_id,
                    sql_state = err.pg_code().unwrap_or_default(),
                    error = %err,
                    "Database error"
                );
            }
            ErrorClass::Fatal => {
                tracing::debug!(
                    work,
                    attempt,
                    category = err.category(),
                    error = %err,
                    "Work failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_retries_on_same_connection() {
        let policy = RetryPolicy::default();
        assert_eq!(
            next_step(&policy, 1, ErrorClass::ConcurrencyConflict),
            Step::Retry { attempt: 2, force_reconnect: false }
        );
        assert_eq!(next_step(&policy, 5, ErrorClass::ConcurrencyConflict), Step::Abort);
    }

    #[test]
    fn test_connection_error_forces_reconnect() {
        let policy = RetryPolicy::default();
        assert_eq!(
            next_step(&policy, 4, ErrorClass::ConnectionError),
            Step::Retry { attempt: 5, force_reconnect: true }
        );
        assert_eq!(next_step(&policy, 5, ErrorClass::ConnectionError), Step::Abort);
    }

    #[test]
    fn test_fatal_never_retries() {
        let policy = RetryPolicy::default();
        for attempt in 1..=5 {
            assert_eq!(next_step(&policy, attempt, ErrorClass::Fatal), Step::Abort);
        }
    }

    #[test]
    fn test_single_attempt_policy_never_retries() {
        let policy = RetryPolicy::new(0, Default::default(), Default::default());
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(next_step(&policy, 1, ErrorClass::ConcurrencyConflict), Step::Abort);
    }
}
