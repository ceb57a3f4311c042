//! Domain model: orders, withdrawals, balances and the ports the
//! application layer depends on.

pub mod accrual;
pub mod balance;
pub mod order;
pub mod outcome;
pub mod ports;
pub mod withdrawal;
