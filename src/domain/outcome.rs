//! Closed result types for the ledger's transactional operations.
//!
//! Each variant is a legitimate business answer; storage failures travel
//! separately as [`crate::error::LedgerError`].

/// Result of claiming an order number for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The number was free and now belongs to the caller.
    Claimed,
    /// The caller already owns the number. Callers treat this as success.
    AlreadyClaimedBySameUser,
    /// Another user owns the number.
    ClaimedByOtherUser,
}

impl ClaimOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::ClaimedByOtherUser)
    }
}

/// Result of a withdrawal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawOutcome {
    Accepted,
    /// The amount exceeds the current balance; nothing was written.
    InsufficientFunds,
    /// A withdrawal with the same order reference already exists; nothing was written.
    DuplicateWithdrawalRef,
}

/// Result of applying an [`OrderUpdate`](crate::domain::order::OrderUpdate) to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The order advanced to the new status.
    Applied,
    /// The order already had the requested status.
    Unchanged,
    /// The update would move the order backwards or out of a terminal state.
    Stale,
    /// No order with that number exists.
    NotFound,
}
