//! Application layer: the user-facing ledger and the background
//! reconciliation loop.
//!
//! [`ledger::Ledger`] serves order claims, withdrawals and balance reads. The
//! [`dispatcher::Dispatcher`] polls pending orders and hands them to a pool of
//! [`worker::Worker`]s over a bounded `flume` queue; the workers query the
//! accrual provider and write the answers back to the store, pausing together
//! through the shared [`throttle::ThrottleGate`] when the provider rate-limits.

pub mod dispatcher;
pub mod ledger;
pub mod throttle;
pub mod worker;
