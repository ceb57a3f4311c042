use super::outcome::UpdateOutcome;
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the user owning orders and withdrawals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A purchase order number.
///
/// Only non-empty strings of ASCII digits passing the Luhn checksum can be
/// constructed, so every `OrderNumber` in the system is known to be valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderNumber(String);

impl OrderNumber {
    pub fn parse(number: impl Into<String>) -> Result<Self> {
        let number = number.into();
        if luhn_valid(&number) {
            Ok(Self(number))
        } else {
            Err(LedgerError::ValidationError(format!(
                "Order number {number:?} fails the Luhn check"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OrderNumber {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<OrderNumber> for String {
    fn from(number: OrderNumber) -> Self {
        number.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Luhn checksum over a string of decimal digits.
pub fn luhn_valid(number: &str) -> bool {
    if number.is_empty() {
        return false;
    }

    let mut sum = 0u32;
    for (i, c) in number.chars().rev().enumerate() {
        let Some(mut digit) = c.to_digit(10) else {
            return false;
        };
        if i % 2 == 1 {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
    }
    sum % 10 == 0
}

/// Processing state of an order.
///
/// Transitions only move forward: `New -> Processing -> {Processed, Invalid}`.
/// A provider answer may skip `Processing`, so `New` can move straight to a
/// terminal state.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    Processing,
    Processed,
    Invalid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Processing => "PROCESSING",
            Self::Processed => "PROCESSED",
            Self::Invalid => "INVALID",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Invalid)
    }

    pub fn is_pending(&self) -> bool {
        !self.is_terminal()
    }

    fn rank(&self) -> u8 {
        match self {
            Self::New => 0,
            Self::Processing => 1,
            Self::Processed | Self::Invalid => 2,
        }
    }

    /// Whether moving from `self` to `next` goes strictly forward.
    pub fn can_advance_to(&self, next: OrderStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NEW" => Ok(Self::New),
            "PROCESSING" => Ok(Self::Processing),
            "PROCESSED" => Ok(Self::Processed),
            "INVALID" => Ok(Self::Invalid),
            other => Err(LedgerError::StorageError(format!(
                "Unknown order status {other:?}"
            ))),
        }
    }
}

/// Status and accrual reported for an order, ready to be written to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderUpdate {
    pub status: OrderStatus,
    pub accrual: Option<Decimal>,
}

impl OrderUpdate {
    /// Builds an update, enforcing that an accrual is present exactly when the
    /// order is `Processed` and that it is never negative.
    pub fn new(status: OrderStatus, accrual: Option<Decimal>) -> Result<Self> {
        match (status, accrual) {
            (OrderStatus::New, _) => Err(LedgerError::ValidationError(
                "An order cannot be moved back to NEW".to_string(),
            )),
            (OrderStatus::Processed, None) => Err(LedgerError::ValidationError(
                "A PROCESSED order requires an accrual".to_string(),
            )),
            (OrderStatus::Processed, Some(amount)) if amount.is_sign_negative() => Err(
                LedgerError::ValidationError("Accrual must not be negative".to_string()),
            ),
            (OrderStatus::Processed, Some(_)) => Ok(Self { status, accrual }),
            (_, _) => Ok(Self {
                status,
                accrual: None,
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Order {
    pub number: OrderNumber,
    pub owner: UserId,
    pub status: OrderStatus,
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

impl Order {
    pub fn new(number: OrderNumber, owner: UserId, uploaded_at: DateTime<Utc>) -> Self {
        Self {
            number,
            owner,
            status: OrderStatus::New,
            accrual: None,
            uploaded_at,
        }
    }

    /// Applies an update in place if it moves the order forward.
    pub fn apply(&mut self, update: OrderUpdate) -> UpdateOutcome {
        if self.status == update.status {
            UpdateOutcome::Unchanged
        } else if self.status.can_advance_to(update.status) {
            self.status = update.status;
            self.accrual = update.accrual;
            UpdateOutcome::Applied
        } else {
            UpdateOutcome::Stale
        }
    }

    /// Accrual counted towards the owner's balance.
    pub fn credited(&self) -> Decimal {
        match self.status {
            OrderStatus::Processed => self.accrual.unwrap_or(Decimal::ZERO),
            _ => Decimal::ZERO,
        }
    }
}
