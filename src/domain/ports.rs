use super::accrual::{AccrualError, AccrualReport};
use super::balance::Balance;
use super::order::{Order, OrderNumber, OrderUpdate, UserId};
use super::outcome::{ClaimOutcome, UpdateOutcome, WithdrawOutcome};
use super::withdrawal::{Amount, Withdrawal};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Persistent record of orders and withdrawals.
///
/// Every method is atomic: it either fully applies or leaves the store
/// untouched. Implementations must serialize `claim_order` against other claims
/// of the same number and `insert_withdrawal` against other withdrawals of the
/// same user.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Looks up the owner of `number` and inserts a `NEW` order if there is none.
    async fn claim_order(&self, user: &UserId, number: &OrderNumber) -> Result<ClaimOutcome>;

    /// Oldest-uploaded orders still in `NEW` or `PROCESSING`, at most `limit`.
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<Order>>;

    async fn update_order_outcome(
        &self,
        number: &OrderNumber,
        update: OrderUpdate,
    ) -> Result<UpdateOutcome>;

    /// Accrued and withdrawn totals for `user`, read from a single snapshot.
    async fn compute_balance(&self, user: &UserId) -> Result<Balance>;

    /// Recomputes the balance and, when it covers `amount` and `order_ref` is
    /// unused, records the withdrawal, all in one transaction.
    async fn insert_withdrawal(
        &self,
        user: &UserId,
        order_ref: &str,
        amount: Amount,
    ) -> Result<WithdrawOutcome>;

    /// Orders of `user`, oldest first.
    async fn list_orders(&self, user: &UserId) -> Result<Vec<Order>>;

    /// Withdrawals of `user`, oldest first.
    async fn list_withdrawals(&self, user: &UserId) -> Result<Vec<Withdrawal>>;
}

/// Queries the external accrual provider for a single order.
///
/// Implementations do not retry; retry policy belongs to the worker pool.
#[async_trait]
pub trait AccrualProvider: Send + Sync {
    async fn fetch_accrual(
        &self,
        number: &OrderNumber,
    ) -> std::result::Result<AccrualReport, AccrualError>;
}

pub type OrderStoreRef = Arc<dyn OrderStore>;
pub type AccrualProviderRef = Arc<dyn AccrualProvider>;
