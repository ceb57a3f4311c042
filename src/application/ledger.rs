use crate::domain::balance::Balance;
use crate::domain::order::{Order, OrderNumber, UserId};
use crate::domain::outcome::{ClaimOutcome, WithdrawOutcome};
use crate::domain::ports::OrderStoreRef;
use crate::domain::withdrawal::{Amount, Withdrawal};
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

/// The transactional entry point used by the API layer.
///
/// `Ledger` owns no state of its own: every operation is a single atomic call
/// into the [`OrderStore`](crate::domain::ports::OrderStore), which guarantees
/// that claims are unique and that withdrawals never overdraw a balance, even
/// under concurrent callers.
#[derive(Clone)]
pub struct Ledger {
    store: OrderStoreRef,
}

impl Ledger {
    /// Creates a new `Ledger` over the given store.
    pub fn new(store: OrderStoreRef) -> Self {
        Self { store }
    }

    /// Associates `number` with `user`, permanently.
    #[instrument(skip_all, fields(user = %user, order = %number))]
    pub async fn claim_order(&self, user: &UserId, number: &OrderNumber) -> Result<ClaimOutcome> {
        let outcome = self.store.claim_order(user, number).await?;
        match outcome {
            ClaimOutcome::Claimed => info!("order claimed"),
            ClaimOutcome::AlreadyClaimedBySameUser => info!("order already claimed by this user"),
            ClaimOutcome::ClaimedByOtherUser => warn!("order belongs to another user"),
        }
        Ok(outcome)
    }

    /// Withdraws `amount` points from `user` against the reference `order_ref`.
    ///
    /// A non-positive amount or an empty reference is rejected before the
    /// store is touched.
    #[instrument(skip_all, fields(user = %user, order_ref = %order_ref, amount = %amount))]
    pub async fn withdraw(
        &self,
        user: &UserId,
        order_ref: &str,
        amount: Decimal,
    ) -> Result<WithdrawOutcome> {
        if order_ref.trim().is_empty() {
            return Err(LedgerError::ValidationError(
                "Withdrawal reference must not be empty".to_string(),
            ));
        }
        let amount = Amount::new(amount)?;

        let outcome = self.store.insert_withdrawal(user, order_ref, amount).await?;
        match outcome {
            WithdrawOutcome::Accepted => info!(amount = %amount.value(), "withdrawal accepted"),
            WithdrawOutcome::InsufficientFunds => {
                warn!(amount = %amount.value(), "insufficient funds")
            }
            WithdrawOutcome::DuplicateWithdrawalRef => warn!("withdrawal reference already used"),
        }
        Ok(outcome)
    }

    #[instrument(skip_all, fields(user = %user))]
    pub async fn balance(&self, user: &UserId) -> Result<Balance> {
        self.store.compute_balance(user).await
    }

    pub async fn orders(&self, user: &UserId) -> Result<Vec<Order>> {
        self.store.list_orders(user).await
    }

    pub async fn withdrawals(&self, user: &UserId) -> Result<Vec<Withdrawal>> {
        self.store.list_withdrawals(user).await
    }
}
