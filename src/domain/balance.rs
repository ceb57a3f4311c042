use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A user's points position, derived from processed orders and withdrawals.
///
/// `current` is never stored; it is always `accrued - withdrawn` computed from
/// the same consistent read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    pub current: Decimal,
    pub withdrawn: Decimal,
}

impl Balance {
    pub const ZERO: Self = Self {
        current: Decimal::ZERO,
        withdrawn: Decimal::ZERO,
    };

    pub fn from_totals(accrued: Decimal, withdrawn: Decimal) -> Self {
        Self {
            current: accrued - withdrawn,
            withdrawn,
        }
    }

    /// Sums credited accruals and withdrawn amounts, failing instead of
    /// overflowing.
    pub fn tally(
        accruals: impl IntoIterator<Item = Decimal>,
        withdrawals: impl IntoIterator<Item = Decimal>,
    ) -> Result<Self> {
        let accrued = checked_sum(accruals, "accrued")?;
        let withdrawn = checked_sum(withdrawals, "withdrawn")?;
        Ok(Self::from_totals(accrued, withdrawn))
    }

    pub fn accrued(&self) -> Decimal {
        self.current + self.withdrawn
    }

    pub fn covers(&self, amount: Decimal) -> bool {
        amount <= self.current
    }
}

fn checked_sum(values: impl IntoIterator<Item = Decimal>, what: &str) -> Result<Decimal> {
    values.into_iter().try_fold(Decimal::ZERO, |total, value| {
        total
            .checked_add(value)
            .ok_or_else(|| LedgerError::StorageError(format!("{what} total overflows")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_from_totals() {
        let balance = Balance::from_totals(dec!(729.98), dec!(229.98));
        assert_eq!(balance.current, dec!(500));
        assert_eq!(balance.withdrawn, dec!(229.98));
        assert_eq!(balance.accrued(), dec!(729.98));
    }

    #[test]
    fn test_balance_covers_exact_amount() {
        let balance = Balance::from_totals(dec!(500), dec!(0));
        assert!(balance.covers(dec!(500)));
        assert!(!balance.covers(dec!(500.01)));
    }

    #[test]
    fn test_tally_sums_both_sides() {
        let balance = Balance::tally([dec!(500), dec!(229.98)], [dec!(29.98)]).unwrap();
        assert_eq!(balance.current, dec!(700));
        assert_eq!(balance.withdrawn, dec!(29.98));
    }

    #[test]
    fn test_tally_rejects_overflowing_accruals() {
        let result = Balance::tally([Decimal::MAX, dec!(1)], []);
        assert!(matches!(result, Err(LedgerError::StorageError(_))));
    }
}
