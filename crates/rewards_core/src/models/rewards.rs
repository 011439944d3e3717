//! Rewards domain rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ledger entry type written by checkout.
pub const TX_TYPE_SPEND: &str = "SPEND";

/// Postal address of a customer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    /// Street address
    pub address: Option<String>,
    /// City
    pub city: Option<String>,
    /// State name
    pub state: Option<String>,
    /// Two-letter state code
    pub state_code: Option<String>,
    /// Postal code
    pub postal_code: Option<String>,
}

/// A customer profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    /// Internal customer id
    pub id: Uuid,
    /// Login name
    pub username: String,
    /// Given name
    pub first_name: Option<String>,
    /// Family name
    pub last_name: Option<String>,
    /// Maiden name
    pub maiden_name: Option<String>,
    /// Email address
    pub email: Option<String>,
    /// Phone number
    pub phone: Option<String>,
    /// Postal address
    pub address: Address,
}

/// A cart line joined with the current catalog price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// Owning customer
    pub customer_id: Uuid,
    /// Catalog item
    pub item_id: Uuid,
    /// Units in the cart
    pub quantity: i32,
    /// Current unit price in points
    pub points_price: i32,
}

impl CartLine {
    /// Points this line costs.
    pub fn total(&self) -> i64 {
        i64::from(self.points_price) * i64::from(self.quantity)
    }
}

/// A cart line as shown to the customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    /// Catalog item
    pub item_id: Uuid,
    /// Catalog item name
    pub name: String,
    /// Units in the cart
    pub quantity: i32,
    /// Current unit price in points
    pub points_price: i32,
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// Transaction identifier
    pub id: Uuid,
    /// Owning customer
    pub customer_id: Uuid,
    /// Entry type (e.g. "SPEND")
    #[serde(rename = "type")]
    pub tx_type: String,
    /// Free-form description
    pub description: Option<String>,
    /// Signed point delta
    pub points: i64,
    /// When the entry was written
    pub timestamp: Option<DateTime<Utc>>,
}

/// One order-item row written by checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Checkout transaction
    pub tx_id: Uuid,
    /// Catalog item
    pub item_id: Uuid,
    /// Units ordered
    pub quantity: i32,
    /// Unit price at checkout
    pub points_price: i32,
}

/// An order line as shown with its transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    /// Catalog item
    pub item_id: Uuid,
    /// Catalog item name
    pub name: String,
    /// Catalog item description
    pub description: Option<String>,
    /// Units ordered
    pub quantity: i32,
    /// Unit price at checkout
    pub points_price: i32,
}

/// A ledger entry with the order lines it paid for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDetails {
    /// The ledger row
    #[serde(flatten)]
    pub entry: LedgerEntry,
    /// Order lines, ordered by item name; empty for non-order entries
    pub order_items: Vec<OrderLine>,
}

/// Result of a checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutOutcome {
    /// The cart was empty; nothing was written.
    EmptyCart,
    /// The order was placed under this transaction id.
    Placed(Uuid),
}

impl CheckoutOutcome {
    /// Transaction id, if an order was placed.
    pub fn transaction_id(&self) -> Option<Uuid> {
        match self {
            Self::EmptyCart => None,
            Self::Placed(id) => Some(*id),
        }
    }
}
