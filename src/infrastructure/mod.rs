//! Adapters implementing the domain ports.

pub mod accrual_http;
pub mod in_memory;
#[cfg(feature = "storage-postgres")]
pub mod postgres;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
