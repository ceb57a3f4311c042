use super::order::UserId;
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Represents a positive amount of points to withdraw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(LedgerError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = LedgerError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// A withdrawal of points, created once and never mutated.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Withdrawal {
    /// Client-supplied reference, unique across all withdrawals.
    pub order: String,
    pub user: UserId,
    pub amount: Amount,
    pub processed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(0.01)).is_ok());
        assert!(matches!(
            Amount::new(dec!(0.0)),
            Err(LedgerError::ValidationError(_))
        ));
        assert!(matches!(
            Amount::new(dec!(-1.0)),
            Err(LedgerError::ValidationError(_))
        ));
    }

    #[test]
    fn test_withdrawal_json_rejects_non_positive_amount() {
        let json = r#"{"order":"2377225624","user":"u1","amount":"0","processed_at":"2024-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<Withdrawal>(json).is_err());
    }
}
