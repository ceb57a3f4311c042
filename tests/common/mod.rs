#![allow(dead_code)]

use accrual_ledger::domain::accrual::{AccrualError, AccrualReport, AccrualStatus};
use accrual_ledger::domain::order::OrderNumber;
use accrual_ledger::domain::ports::AccrualProvider;
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::Instant;

pub type Answer = Result<AccrualReport, AccrualError>;

/// Luhn-valid order numbers.
pub const ORDERS: [&str; 6] = [
    "12345678903",
    "79927398713",
    "2377225624",
    "9278923470",
    "40000000006",
    "51000000003",
];

pub fn number(n: &str) -> OrderNumber {
    OrderNumber::parse(n).unwrap()
}

/// Appends the Luhn check digit to `payload`.
pub fn luhn_number(payload: u128) -> OrderNumber {
    let digits = payload.to_string();
    let sum: u32 = digits
        .chars()
        .rev()
        .enumerate()
        .map(|(i, c)| {
            let mut digit = c.to_digit(10).unwrap();
            if i % 2 == 0 {
                digit *= 2;
                if digit > 9 {
                    digit -= 9;
                }
            }
            digit
        })
        .sum();
    number(&format!("{digits}{}", (10 - sum % 10) % 10))
}

/// A per-run prefix for keys in stores that outlive a test run.
pub fn run_seed() -> u128 {
    chrono::Utc::now().timestamp_micros().unsigned_abs().into()
}

pub fn processed(order: &str, accrual: Decimal) -> Answer {
    Ok(AccrualReport {
        order: order.to_string(),
        status: AccrualStatus::Processed,
        accrual: Some(accrual),
    })
}

pub fn status(order: &str, status: AccrualStatus) -> Answer {
    Ok(AccrualReport {
        order: order.to_string(),
        status,
        accrual: None,
    })
}

#[derive(Debug, Clone)]
pub struct Call {
    pub order: String,
    pub at: Instant,
}

/// Accrual provider replaying a per-order script of answers.
///
/// Once an order's script runs out it answers `NotRegistered`.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    scripts: Arc<Mutex<HashMap<String, VecDeque<Answer>>>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, order: &str, answers: impl IntoIterator<Item = Answer>) {
        self.scripts
            .lock()
            .entry(order.to_string())
            .or_default()
            .extend(answers);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl AccrualProvider for ScriptedProvider {
    async fn fetch_accrual(&self, number: &OrderNumber) -> Answer {
        self.calls.lock().push(Call {
            order: number.to_string(),
            at: Instant::now(),
        });
        self.scripts
            .lock()
            .get_mut(number.as_str())
            .and_then(VecDeque::pop_front)
            .unwrap_or(Err(AccrualError::NotRegistered))
    }
}

/// Accrual provider whose lookups never complete.
#[derive(Clone, Default)]
pub struct HangingProvider {
    calls: Arc<AtomicUsize>,
}

impl HangingProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccrualProvider for HangingProvider {
    async fn fetch_accrual(&self, _number: &OrderNumber) -> Answer {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}
