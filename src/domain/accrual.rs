use super::order::{OrderNumber, OrderStatus, OrderUpdate};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Pause applied when a throttled response carries no usable `Retry-After`.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Order status vocabulary of the accrual provider.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccrualStatus {
    Registered,
    Invalid,
    Processing,
    Processed,
}

impl From<AccrualStatus> for OrderStatus {
    fn from(status: AccrualStatus) -> Self {
        match status {
            AccrualStatus::Registered | AccrualStatus::Processing => OrderStatus::Processing,
            AccrualStatus::Processed => OrderStatus::Processed,
            AccrualStatus::Invalid => OrderStatus::Invalid,
        }
    }
}

/// Body of a successful provider response.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct AccrualReport {
    pub order: String,
    pub status: AccrualStatus,
    #[serde(default)]
    pub accrual: Option<Decimal>,
}

impl AccrualReport {
    /// Translates the report into a local update for `number`.
    pub fn into_update(self, number: &OrderNumber) -> Result<OrderUpdate, AccrualError> {
        if self.order != number.as_str() {
            return Err(AccrualError::Decode(format!(
                "report for order {} answered a request for {}",
                self.order, number
            )));
        }
        OrderUpdate::new(self.status.into(), self.accrual)
            .map_err(|e| AccrualError::Decode(e.to_string()))
    }
}

/// Failures of a single provider lookup. None of them closes an order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccrualError {
    #[error("order is not registered with the accrual provider")]
    NotRegistered,
    #[error("accrual provider throttled requests for {retry_after:?}")]
    Throttled { retry_after: Duration },
    #[error("accrual provider internal error")]
    ServerError,
    #[error("unexpected accrual provider status {0}")]
    UnexpectedStatus(u16),
    #[error("accrual provider transport error: {0}")]
    Transport(String),
    #[error("malformed accrual provider response: {0}")]
    Decode(String),
}

impl AccrualError {
    /// Parses a `Retry-After` header value given in whole seconds.
    pub fn throttled_from_header(value: Option<&str>) -> Self {
        let retry_after = value
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_AFTER);
        Self::Throttled { retry_after }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn number() -> OrderNumber {
        OrderNumber::parse("12345678903").unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(OrderStatus::from(AccrualStatus::Registered), OrderStatus::Processing);
        assert_eq!(OrderStatus::from(AccrualStatus::Processing), OrderStatus::Processing);
        assert_eq!(OrderStatus::from(AccrualStatus::Processed), OrderStatus::Processed);
        assert_eq!(OrderStatus::from(AccrualStatus::Invalid), OrderStatus::Invalid);
    }

    #[test]
    fn test_report_decodes_float_accrual() {
        let report: AccrualReport =
            serde_json::from_str(r#"{"order":"12345678903","status":"PROCESSED","accrual":729.98}"#)
                .unwrap();
        let update = report.into_update(&number()).unwrap();
        assert_eq!(update.status, OrderStatus::Processed);
        assert_eq!(update.accrual, Some(dec!(729.98)));
    }

    #[test]
    fn test_report_without_accrual() {
        let report: AccrualReport =
            serde_json::from_str(r#"{"order":"12345678903","status":"REGISTERED"}"#).unwrap();
        let update = report.into_update(&number()).unwrap();
        assert_eq!(update.status, OrderStatus::Processing);
        assert_eq!(update.accrual, None);
    }

    #[test]
    fn test_processed_report_requires_accrual() {
        let report = AccrualReport {
            order: "12345678903".to_string(),
            status: AccrualStatus::Processed,
            accrual: None,
        };
        assert!(matches!(report.into_update(&number()), Err(AccrualError::Decode(_))));
    }

    #[test]
    fn test_report_for_other_order_is_rejected() {
        let report = AccrualReport {
            order: "79927398713".to_string(),
            status: AccrualStatus::Invalid,
            accrual: None,
        };
        assert!(matches!(report.into_update(&number()), Err(AccrualError::Decode(_))));
    }

    #[test]
    fn test_unknown_status_fails_to_decode() {
        let result: Result<AccrualReport, _> =
            serde_json::from_str(r#"{"order":"12345678903","status":"DONE"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_retry_after_parsing() {
        assert_eq!(
            AccrualError::throttled_from_header(Some("60")),
            AccrualError::Throttled {
                retry_after: Duration::from_secs(60)
            }
        );
        assert_eq!(
            AccrualError::throttled_from_header(Some("soon")),
            AccrualError::Throttled {
                retry_after: DEFAULT_RETRY_AFTER
            }
        );
        assert_eq!(
            AccrualError::throttled_from_header(None),
            AccrualError::Throttled {
                retry_after: DEFAULT_RETRY_AFTER
            }
        );
    }
}
