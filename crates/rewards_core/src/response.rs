//! Rendering of service results as API responses.
//!
//! Success payloads are JSON objects. Failures use the envelope
//! `{"error": <message>}` with a status derived from the error class and
//! the underlying cause.

use crate::error::{ClassifiedError, RewardsError};
use crate::models::{
    CartItem, CatalogItem, CheckoutOutcome, Customer, LedgerEntry, TransactionDetails,
};
use crate::services::CartChange;

use serde::Serialize;
use serde_json::{json, Value};

/// Message returned when checking out an empty cart.
pub const EMPTY_CART_MESSAGE: &str = "Empty cart. Nothing to do.";

/// An API response: HTTP status plus JSON body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// JSON body; `Null` renders as an empty body
    pub body: Value,
}

impl Response {
    /// 200 with `body`.
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    /// 200 with no body.
    pub fn empty() -> Self {
        Self { status: 200, body: Value::Null }
    }

    /// Error envelope with `status`.
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self { status, body: json!({ "error": message.into() }) }
    }

    /// Serialize `payload` as a 200 response.
    pub fn json<T: Serialize>(payload: &T) -> Self {
        match serde_json::to_value(payload) {
            Ok(body) => Self::ok(body),
            Err(e) => Self::from_cause(&RewardsError::from(e), 500),
        }
    }

    /// Render a checkout result.
    pub fn checkout(result: Result<CheckoutOutcome, ClassifiedError>) -> Self {
        match result {
            Ok(CheckoutOutcome::EmptyCart) => Self::ok(json!({ "message": EMPTY_CART_MESSAGE })),
            Ok(CheckoutOutcome::Placed(tx_id)) => Self::ok(json!({ "txId": tx_id })),
            Err(e) => Self::from_error(&e),
        }
    }

    /// Render a balance lookup.
    pub fn balance(result: Result<i64, ClassifiedError>) -> Self {
        match result {
            Ok(balance) => Self::ok(json!({ "balance": balance })),
            Err(e) => Self::from_error(&e),
        }
    }

    /// Render a cart change. Success has no body.
    pub fn cart_change(result: Result<CartChange, ClassifiedError>) -> Self {
        match result {
            Ok(_) => Self::empty(),
            Err(e) => Self::from_error(&e),
        }
    }

    /// Render a cart removal. Success has no body.
    pub fn cart_removal(result: Result<u64, ClassifiedError>) -> Self {
        match result {
            Ok(_) => Self::empty(),
            Err(e) => Self::from_error(&e),
        }
    }

    /// Render a cart listing.
    pub fn cart(result: Result<Vec<CartItem>, ClassifiedError>) -> Self {
        match result {
            Ok(items) => Self::json(&items),
            Err(e) => Self::from_error(&e),
        }
    }

    /// Render a ledger listing.
    pub fn transactions(result: Result<Vec<LedgerEntry>, ClassifiedError>) -> Self {
        match result {
            Ok(entries) => Self::json(&entries),
            Err(e) => Self::from_error(&e),
        }
    }

    /// Render a customer profile.
    pub fn customer(result: Result<Customer, ClassifiedError>) -> Self {
        match result {
            Ok(customer) => Self::json(&customer),
            Err(e) => Self::from_error(&e),
        }
    }

    /// Render one ledger entry with its order lines.
    pub fn transaction_details(result: Result<TransactionDetails, ClassifiedError>) -> Self {
        match result {
            Ok(details) => Self::json(&details),
            Err(e) => Self::from_error(&e),
        }
    }

    /// Render one catalog item.
    pub fn catalog_item(result: Result<CatalogItem, ClassifiedError>) -> Self {
        match result {
            Ok(item) => Self::json(&item),
            Err(e) => Self::from_error(&e),
        }
    }

    /// Render a catalog listing as `{"products": [...]}`.
    pub fn catalog(result: Result<Vec<CatalogItem>, ClassifiedError>) -> Self {
        match result {
            Ok(products) => Self::json(&CatalogListing { products }),
            Err(e) => Self::from_error(&e),
        }
    }

    /// Render a terminal executor failure.
    pub fn from_error(err: &ClassifiedError) -> Self {
        Self::from_cause(err.cause(), status_for(err))
    }

    fn from_cause(cause: &RewardsError, status: u16) -> Self {
        if status >= 500 {
            tracing::error!(status, category = cause.category(), error = %cause, "Request failed");
        }
        Self::error(status, cause.to_string())
    }

    /// Body as a JSON string; empty when there is no body.
    pub fn body_string(&self) -> String {
        match &self.body {
            Value::Null => String::new(),
            body => body.to_string(),
        }
    }
}

#[derive(Serialize)]
struct CatalogListing {
    products: Vec<CatalogItem>,
}

/// HTTP status for a terminal executor failure.
pub fn status_for(err: &ClassifiedError) -> u16 {
    match err {
        ClassifiedError::ConcurrencyConflict { .. } => 409,
        ClassifiedError::ConnectionError { .. } => 503,
        ClassifiedError::Fatal { source, .. } => match source {
            RewardsError::NotFound { .. } => 404,
            RewardsError::InsufficientBalance { .. } | RewardsError::InvalidInput { .. } => 400,
            RewardsError::Unauthorized { .. } => 401,
            _ => 500,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_checkout_bodies() {
        let empty = Response::checkout(Ok(CheckoutOutcome::EmptyCart));
        assert_eq!(empty.status, 200);
        assert_eq!(empty.body_string(), r#"{"message":"Empty cart. Nothing to do."}"#);

        let tx_id = Uuid::new_v4();
        let placed = Response::checkout(Ok(CheckoutOutcome::Placed(tx_id)));
        assert_eq!(placed.status, 200);
        assert_eq!(placed.body, json!({ "txId": tx_id.to_string() }));
    }

    #[test]
    fn test_status_by_cause() {
        let cases = [
            (ClassifiedError::rejected(RewardsError::unauthorized("who?")), 401),
            (ClassifiedError::new(1, RewardsError::not_found("Customer x not found")), 404),
            (ClassifiedError::new(1, RewardsError::insufficient_balance(10, 5)), 400),
            (ClassifiedError::rejected(RewardsError::invalid_input("bad")), 400),
            (ClassifiedError::new(5, RewardsError::serialization_failure("conflict")), 409),
            (ClassifiedError::new(5, RewardsError::connection("gone")), 503),
            (ClassifiedError::new(1, RewardsError::database("syntax error", "42601")), 500),
        ];
        for (err, status) in cases {
            assert_eq!(status_for(&err), status, "{err}");
        }
    }

    #[test]
    fn test_error_envelope() {
        let err = ClassifiedError::new(1, RewardsError::insufficient_balance(10, 5));
        let response = Response::checkout(Err(err));
        assert_eq!(response.body, json!({ "error": "Insufficient points to complete order" }));
    }

    #[test]
    fn test_catalog_listing_is_wrapped() {
        let response = Response::catalog(Ok(Vec::new()));
        assert_eq!(response.status, 200);
        assert_eq!(response.body, json!({ "products": [] }));
    }

    #[test]
    fn test_transaction_details_flatten_the_entry() {
        let tx_id = Uuid::new_v4();
        let details = TransactionDetails {
            entry: LedgerEntry {
                id: tx_id,
                customer_id: Uuid::new_v4(),
                tx_type: "SPEND".to_string(),
                description: None,
                points: -50,
                timestamp: None,
            },
            order_items: Vec::new(),
        };

        let response = Response::transaction_details(Ok(details));
        assert_eq!(response.body["id"], json!(tx_id.to_string()));
        assert_eq!(response.body["type"], json!("SPEND"));
        assert_eq!(response.body["orderItems"], json!([]));
    }

    #[test]
    fn test_cart_change_has_empty_body() {
        let response = Response::cart_change(Ok(CartChange::Added));
        assert_eq!(response.status, 200);
        assert_eq!(response.body_string(), "");
    }
}
