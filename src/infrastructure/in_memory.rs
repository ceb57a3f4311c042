use crate::domain::balance::Balance;
use crate::domain::order::{Order, OrderNumber, OrderUpdate, UserId};
use crate::domain::outcome::{ClaimOutcome, UpdateOutcome, WithdrawOutcome};
use crate::domain::ports::OrderStore;
use crate::domain::withdrawal::{Amount, Withdrawal};
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Ledger {
    orders: HashMap<OrderNumber, Order>,
    /// Order numbers in upload order.
    arrivals: Vec<OrderNumber>,
    /// Withdrawals in creation order.
    withdrawals: Vec<Withdrawal>,
}

impl Ledger {
    fn balance(&self, user: &UserId) -> Result<Balance> {
        Balance::tally(
            self.orders
                .values()
                .filter(|o| &o.owner == user)
                .map(Order::credited),
            self.withdrawals
                .iter()
                .filter(|w| &w.user == user)
                .map(|w| w.amount.value()),
        )
    }
}

/// A thread-safe in-memory order store.
///
/// All state lives behind one `Arc<RwLock<..>>`. Holding the write guard for
/// the whole check-then-write sequence makes every mutation serializable.
/// Ideal for testing or single-process runs where persistence is not required.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    inner: Arc<RwLock<Ledger>>,
}

impl InMemoryOrderStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn claim_order(&self, user: &UserId, number: &OrderNumber) -> Result<ClaimOutcome> {
        let mut ledger = self.inner.write().await;
        if let Some(existing) = ledger.orders.get(number) {
            return Ok(if &existing.owner == user {
                ClaimOutcome::AlreadyClaimedBySameUser
            } else {
                ClaimOutcome::ClaimedByOtherUser
            });
        }

        let order = Order::new(number.clone(), user.clone(), Utc::now());
        ledger.orders.insert(number.clone(), order);
        ledger.arrivals.push(number.clone());
        Ok(ClaimOutcome::Claimed)
    }

    async fn fetch_pending(&self, limit: usize) -> Result<Vec<Order>> {
        let ledger = self.inner.read().await;
        Ok(ledger
            .arrivals
            .iter()
            .filter_map(|number| ledger.orders.get(number))
            .filter(|o| o.status.is_pending())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_order_outcome(
        &self,
        number: &OrderNumber,
        update: OrderUpdate,
    ) -> Result<UpdateOutcome> {
        let mut ledger = self.inner.write().await;
        Ok(match ledger.orders.get_mut(number) {
            Some(order) => order.apply(update),
            None => UpdateOutcome::NotFound,
        })
    }

    async fn compute_balance(&self, user: &UserId) -> Result<Balance> {
        let ledger = self.inner.read().await;
        ledger.balance(user)
    }

    async fn insert_withdrawal(
        &self,
        user: &UserId,
        order_ref: &str,
        amount: Amount,
    ) -> Result<WithdrawOutcome> {
        let mut ledger = self.inner.write().await;
        if !ledger.balance(user)?.covers(amount.value()) {
            return Ok(WithdrawOutcome::InsufficientFunds);
        }
        if ledger.withdrawals.iter().any(|w| w.order == order_ref) {
            return Ok(WithdrawOutcome::DuplicateWithdrawalRef);
        }

        ledger.withdrawals.push(Withdrawal {
            order: order_ref.to_string(),
            user: user.clone(),
            amount,
            processed_at: Utc::now(),
        });
        Ok(WithdrawOutcome::Accepted)
    }

    async fn list_orders(&self, user: &UserId) -> Result<Vec<Order>> {
        let ledger = self.inner.read().await;
        Ok(ledger
            .arrivals
            .iter()
            .filter_map(|number| ledger.orders.get(number))
            .filter(|o| &o.owner == user)
            .cloned()
            .collect())
    }

    async fn list_withdrawals(&self, user: &UserId) -> Result<Vec<Withdrawal>> {
        let ledger = self.inner.read().await;
        Ok(ledger
            .withdrawals
            .iter()
            .filter(|w| &w.user == user)
            .cloned()
            .collect())
    }
}
