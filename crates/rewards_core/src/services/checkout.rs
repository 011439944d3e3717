//! Shopping cart checkout.

use crate::error::RewardsError;
use crate::models::{CartLine, CheckoutOutcome, LedgerEntry, OrderItem, TX_TYPE_SPEND};
use crate::services::executor::UnitOfWork;
use crate::services::store::{resolve_customer, RewardsStore};

use async_trait::async_trait;
use uuid::Uuid;

/// Turns a customer's cart into an order paid with points.
///
/// All writes happen in one attempt's transaction. A conflict at commit
/// discards them and the next attempt recomputes the order from the cart
/// and balance it reads.
#[derive(Debug, Clone)]
pub struct Checkout {
    username: String,
}

impl Checkout {
    /// Check out `username`'s cart.
    pub fn new(username: impl Into<String>) -> Self {
        Self { username: username.into() }
    }
}

#[async_trait]
impl<S: RewardsStore> UnitOfWork<S> for Checkout {
    type Output = CheckoutOutcome;

    fn name(&self) -> &'static str {
        "checkout"
    }

    async fn run(&mut self, store: &mut S) -> Result<CheckoutOutcome, RewardsError> {
        let customer_id = resolve_customer(store, &self.username).await?;

        let lines = store.cart_lines(customer_id).await?;
        if lines.is_empty() {
            // Nothing to write, but the transaction still commits
            return Ok(CheckoutOutcome::EmptyCart);
        }

        let total: i64 = lines.iter().map(CartLine::total).sum();
        let balance = store.points_balance(customer_id).await?.unwrap_or(0);
        if total > balance {
            return Err(RewardsError::insufficient_balance(total, balance));
        }

        let tx_id = Uuid::new_v4();
        for line in &lines {
            store
                .insert_order_item(&OrderItem {
                    tx_id,
                    item_id: line.item_id,
                    quantity: line.quantity,
                    points_price: line.points_price,
                })
                .await?;
            store.delete_cart_item(customer_id, line.item_id).await?;
        }

        store
            .insert_ledger_entry(&LedgerEntry {
                id: tx_id,
                customer_id,
                tx_type: TX_TYPE_SPEND.to_string(),
                description: None,
                points: -total,
                timestamp: None,
            })
            .await?;
        store.debit_balance(customer_id, total).await?;

        tracing::debug!(
            tx_id = %tx_id,
            customer_id = %customer_id,
            lines = lines.len(),
            total,
            "Checkout staged"
        );

        Ok(CheckoutOutcome::Placed(tx_id))
    }
}
