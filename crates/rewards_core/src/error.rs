//! Error types for the rewards backend.
//!
//! [`RewardsError`] is what every store operation and unit of work raises.
//! The retry core never reasons about it directly: it reduces each failure to
//! an [`ErrorClass`] with [`classify`], and reports terminal failures as a
//! [`ClassifiedError`] that keeps the original cause for diagnostics.

use thiserror::Error;

/// SQLSTATE the store reports when optimistic concurrency control rejects a
/// transaction. The whole transaction has to be retried.
pub const SERIALIZATION_FAILURE: &str = "40001";

/// SQLSTATE class prefix for connection exceptions.
pub const CONNECTION_EXCEPTION_CLASS: &str = "08";

/// Main error type for the rewards backend.
#[derive(Debug, Error)]
pub enum RewardsError {
    /// The store rejected a statement with an SQLSTATE.
    #[error("{message}")]
    Database {
        /// Store error message.
        message: String,
        /// Additional detail from the store.
        detail: Option<String>,
        /// Hint from the store.
        hint: Option<String>,
        /// SQLSTATE (e.g., "40001").
        code: Option<String>,
    },

    /// The link to the store is unusable.
    #[error("Connection error: {message}")]
    Connection {
        /// Human-readable error message.
        message: String,
        /// SQLSTATE when the store reported one.
        code: Option<String>,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An authentication token could not be issued.
    #[error("Credential error: {message}")]
    Credential {
        /// Human-readable error message.
        message: String,
    },

    /// A referenced customer or catalog item does not exist.
    #[error("{message}")]
    NotFound {
        /// Human-readable error message.
        message: String,
    },

    /// The order total exceeds the customer's points balance.
    #[error("Insufficient points to complete order")]
    InsufficientBalance {
        /// Points the order needs.
        required: i64,
        /// Points the customer has.
        available: i64,
    },

    /// Caller input was rejected before any transaction started.
    #[error("{message}")]
    InvalidInput {
        /// Human-readable error message.
        message: String,
    },

    /// The caller's identity could not be determined.
    #[error("{message}")]
    Unauthorized {
        /// Human-readable error message.
        message: String,
    },

    /// Configuration error.
    #[error("Config error: {message}")]
    Config {
        /// Human-readable error message.
        message: String,
    },

    /// Unexpected internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl RewardsError {
    // ========== Constructors ==========

    /// Create a database error carrying an SQLSTATE.
    pub fn database(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            detail: None,
            hint: None,
            code: Some(code.into()),
        }
    }

    /// Create the error the store raises on an OCC conflict.
    pub fn serialization_failure(message: impl Into<String>) -> Self {
        Self::database(message, SERIALIZATION_FAILURE)
    }

    /// Create a new connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), code: None, source: None }
    }

    /// Create a connection error carrying an SQLSTATE from the 08 class.
    pub fn connection_with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), code: Some(code.into()), source: None }
    }

    /// Create a new connection error with source.
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), code: None, source: Some(Box::new(source)) }
    }

    /// Create a new credential error.
    pub fn credential(message: impl Into<String>) -> Self {
        Self::Credential { message: message.into() }
    }

    /// Create a new not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    /// Create an insufficient balance error.
    pub fn insufficient_balance(required: i64, available: i64) -> Self {
        Self::InsufficientBalance { required, available }
    }

    /// Create a new invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput { message: message.into() }
    }

    /// Create a new unauthorized error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized { message: message.into() }
    }

    /// Create a new config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Create a new internal error with source.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Box::new(source)) }
    }

    // ========== Methods ==========

    /// Get the error category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Database { .. } => "Database",
            Self::Connection { .. } => "Connection",
            Self::Credential { .. } => "Credential",
            Self::NotFound { .. } => "NotFound",
            Self::InsufficientBalance { .. } => "InsufficientBalance",
            Self::InvalidInput { .. } => "InvalidInput",
            Self::Unauthorized { .. } => "Unauthorized",
            Self::Config { .. } => "Config",
            Self::Internal { .. } => "Internal",
        }
    }

    /// Get actionable hint for the operator.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Database { hint, .. } => hint.as_deref(),
            Self::Connection { .. } => Some("Check the cluster endpoint and network reachability"),
            Self::Credential { .. } => {
                Some("Check AWS credentials and the dsql:DbConnect permission")
            }
            Self::Config { .. } => {
                Some("Check CLUSTER_ENDPOINT, DB_NAME, DB_USERNAME and AWS_REGION")
            }
            Self::Internal { .. } => Some("Please report this issue"),
            _ => None,
        }
    }

    /// Get the SQLSTATE (if the store reported one).
    pub fn pg_code(&self) -> Option<&str> {
        match self {
            Self::Database { code, .. } | Self::Connection { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Classify this error for the retry core.
    pub fn class(&self) -> ErrorClass {
        classify(self)
    }
}

/// How the retry core reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// OCC rejected the transaction; retry it from scratch.
    ConcurrencyConflict,
    /// The connection is unusable; retry on a fresh one.
    ConnectionError,
    /// Anything else. Never retried.
    Fatal,
}

/// Map an error to its retry class. Total over [`RewardsError`].
pub fn classify(err: &RewardsError) -> ErrorClass {
    match err {
        RewardsError::Database { code: Some(code), .. } if code == SERIALIZATION_FAILURE => {
            ErrorClass::ConcurrencyConflict
        }
        RewardsError::Database { code: Some(code), .. }
            if code.starts_with(CONNECTION_EXCEPTION_CLASS) =>
        {
            ErrorClass::ConnectionError
        }
        RewardsError::Connection { .. } => ErrorClass::ConnectionError,
        _ => ErrorClass::Fatal,
    }
}

/// Terminal failure of a retried operation.
#[derive(Debug, Error)]
pub enum ClassifiedError {
    /// Every attempt ended in an OCC conflict.
    #[error("Concurrency conflict persisted after {attempts} attempts")]
    ConcurrencyConflict {
        /// Attempts made.
        attempts: u32,
        /// Conflict raised by the last attempt.
        #[source]
        source: RewardsError,
    },

    /// Every attempt ended in a connection failure, or connecting failed.
    #[error("Connection failed after {attempts} attempts: {source}")]
    ConnectionError {
        /// Attempts made.
        attempts: u32,
        /// Failure raised by the last attempt.
        #[source]
        source: RewardsError,
    },

    /// A non-retryable failure.
    #[error("{source}")]
    Fatal {
        /// Attempt on which the failure occurred.
        attempt: u32,
        /// The failure.
        #[source]
        source: RewardsError,
    },
}

impl ClassifiedError {
    /// Wrap `source` as the terminal error of attempt `attempt`.
    pub fn new(attempt: u32, source: RewardsError) -> Self {
        match classify(&source) {
            ErrorClass::ConcurrencyConflict => {
                Self::ConcurrencyConflict { attempts: attempt, source }
            }
            ErrorClass::ConnectionError => Self::ConnectionError { attempts: attempt, source },
            ErrorClass::Fatal => Self::Fatal { attempt, source },
        }
    }

    /// Caller input rejected before any attempt was made.
    pub fn rejected(source: RewardsError) -> Self {
        Self::Fatal { attempt: 0, source }
    }

    /// Get the retry class of the terminal failure.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ConcurrencyConflict { .. } => ErrorClass::ConcurrencyConflict,
            Self::ConnectionError { .. } => ErrorClass::ConnectionError,
            Self::Fatal { .. } => ErrorClass::Fatal,
        }
    }

    /// Get the original cause.
    pub fn cause(&self) -> &RewardsError {
        match self {
            Self::ConcurrencyConflict { source, .. }
            | Self::ConnectionError { source, .. }
            | Self::Fatal { source, .. } => source,
        }
    }

    /// Consume and return the original cause.
    pub fn into_cause(self) -> RewardsError {
        match self {
            Self::ConcurrencyConflict { source, .. }
            | Self::ConnectionError { source, .. }
            | Self::Fatal { source, .. } => source,
        }
    }

    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::ConcurrencyConflict { attempts, .. } | Self::ConnectionError { attempts, .. } => {
                *attempts
            }
            Self::Fatal { attempt, .. } => *attempt,
        }
    }
}

impl From<RewardsError> for ClassifiedError {
    fn from(err: RewardsError) -> Self {
        Self::new(1, err)
    }
}

// ========== Error Conversions ==========

/// Convert from tokio_postgres::Error to RewardsError.
impl From<tokio_postgres::Error> for RewardsError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let message = db_err.message().to_string();
            let code = db_err.code().code().to_string();

            // Connection exceptions (08xxx)
            if code.starts_with(CONNECTION_EXCEPTION_CLASS) {
                return RewardsError::Connection {
                    message,
                    code: Some(code),
                    source: Some(Box::new(err)),
                };
            }

            return RewardsError::Database {
                message,
                detail: db_err.detail().map(String::from),
                hint: db_err.hint().map(String::from),
                code: Some(code),
            };
        }

        if err.is_closed() {
            return RewardsError::Connection {
                message: "Connection closed".to_string(),
                code: None,
                source: Some(Box::new(err)),
            };
        }

        // Socket-level failures surface as an io::Error source
        let is_io = std::error::Error::source(&err)
            .is_some_and(|source| source.downcast_ref::<std::io::Error>().is_some());
        if is_io {
            return RewardsError::Connection {
                message: err.to_string(),
                code: None,
                source: Some(Box::new(err)),
            };
        }

        // Row decoding and other client-side failures
        RewardsError::Internal { message: err.to_string(), source: Some(Box::new(err)) }
    }
}

/// Convert from std::io::Error to RewardsError.
impl From<std::io::Error> for RewardsError {
    fn from(err: std::io::Error) -> Self {
        RewardsError::Internal { message: err.to_string(), source: Some(Box::new(err)) }
    }
}

/// Convert from serde_json::Error to RewardsError.
impl From<serde_json::Error> for RewardsError {
    fn from(err: serde_json::Error) -> Self {
        RewardsError::Internal {
            message: format!("JSON error: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_failure_is_conflict() {
        let err = RewardsError::serialization_failure("change conflicts with another transaction");
        assert_eq!(classify(&err), ErrorClass::ConcurrencyConflict);
    }

    #[test]
    fn test_connection_class_codes_are_connection_errors() {
        for code in ["08000", "08003", "08006", "08P01"] {
            let err = RewardsError::database("link down", code);
            assert_eq!(classify(&err), ErrorClass::ConnectionError, "code {code}");
        }
        assert_eq!(classify(&RewardsError::connection("closed")), ErrorClass::ConnectionError);
    }

    #[test]
    fn test_everything_else_is_fatal() {
        let fatal = [
            RewardsError::database("duplicate key", "23505"),
            RewardsError::database("syntax error", "42601"),
            RewardsError::database("permission denied", "42501"),
            RewardsError::Database {
                message: "no code".into(),
                detail: None,
                hint: None,
                code: None,
            },
            RewardsError::not_found("Customer bob not found"),
            RewardsError::insufficient_balance(100, 50),
            RewardsError::credential("token"),
            RewardsError::internal("boom"),
        ];
        for err in &fatal {
            assert_eq!(classify(err), ErrorClass::Fatal, "{err:?}");
        }
    }

    #[test]
    fn test_classified_error_keeps_cause() {
        let err = ClassifiedError::new(5, RewardsError::serialization_failure("conflict"));
        assert_eq!(err.class(), ErrorClass::ConcurrencyConflict);
        assert_eq!(err.attempts(), 5);
        assert_eq!(err.cause().pg_code(), Some(SERIALIZATION_FAILURE));

        let err = ClassifiedError::new(2, RewardsError::insufficient_balance(100, 50));
        assert_eq!(err.class(), ErrorClass::Fatal);
        assert_eq!(err.to_string(), "Insufficient points to complete order");
    }
}
