use crate::domain::balance::Balance;
use crate::domain::order::{Order, OrderNumber, OrderUpdate, UserId};
use crate::domain::outcome::{ClaimOutcome, UpdateOutcome, WithdrawOutcome};
use crate::domain::ports::OrderStore;
use crate::domain::withdrawal::{Amount, Withdrawal};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, Snapshot};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for orders, keyed by order number.
pub const CF_ORDERS: &str = "orders";
/// Column Family for withdrawals, keyed by the withdrawal order reference.
pub const CF_WITHDRAWALS: &str = "withdrawals";

/// A persistent order store using RocksDB.
///
/// Orders and withdrawals live in separate Column Families as JSON values.
/// All read-check-write sequences run under a single writer lock, and reads
/// that aggregate several rows go through a RocksDB snapshot so that a
/// concurrent commit is never half-observed. RocksDB locks its directory, so
/// the writer lock covers every writer of the database.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    writer: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families ("orders" and "withdrawals") exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_orders = ColumnFamilyDescriptor::new(CF_ORDERS, Options::default());
        let cf_withdrawals = ColumnFamilyDescriptor::new(CF_WITHDRAWALS, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_orders, cf_withdrawals])?;

        Ok(Self {
            db: Arc::new(db),
            writer: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LedgerError::StorageError(format!("{name} column family not found")))
    }

    fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &str) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_pinned_cf(cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put<T: serde::Serialize>(&self, cf_name: &str, key: &str, value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(cf, key.as_bytes(), bytes)?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, snapshot: &Snapshot<'_>, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        for item in snapshot.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn balance_at(&self, snapshot: &Snapshot<'_>, user: &UserId) -> Result<Balance> {
        let orders: Vec<Order> = self.scan(snapshot, CF_ORDERS)?;
        let withdrawals: Vec<Withdrawal> = self.scan(snapshot, CF_WITHDRAWALS)?;

        Balance::tally(
            orders
                .iter()
                .filter(|o| &o.owner == user)
                .map(Order::credited),
            withdrawals
                .iter()
                .filter(|w| &w.user == user)
                .map(|w| w.amount.value()),
        )
    }
}

#[async_trait]
impl OrderStore for RocksDBStore {
    async fn claim_order(&self, user: &UserId, number: &OrderNumber) -> Result<ClaimOutcome> {
        let _guard = self.writer.lock().await;

        if let Some(existing) = self.get::<Order>(CF_ORDERS, number.as_str())? {
            return Ok(if &existing.owner == user {
                ClaimOutcome::AlreadyClaimedBySameUser
            } else {
                ClaimOutcome::ClaimedByOtherUser
            });
        }

        let order = Order::new(number.clone(), user.clone(), Utc::now());
        self.put(CF_ORDERS, number.as_str(), &order)?;
        Ok(ClaimOutcome::Claimed)
    }

    async fn fetch_pending(&self, limit: usize) -> Result<Vec<Order>> {
        let snapshot = self.db.snapshot();
        let mut pending: Vec<Order> = self
            .scan::<Order>(&snapshot, CF_ORDERS)?
            .into_iter()
            .filter(|o| o.status.is_pending())
            .collect();
        pending.sort_by(|a, b| {
            a.uploaded_at
                .cmp(&b.uploaded_at)
                .then_with(|| a.number.cmp(&b.number))
        });
        pending.truncate(limit);
        Ok(pending)
    }

    async fn update_order_outcome(
        &self,
        number: &OrderNumber,
        update: OrderUpdate,
    ) -> Result<UpdateOutcome> {
        let _guard = self.writer.lock().await;

        let Some(mut order) = self.get::<Order>(CF_ORDERS, number.as_str())? else {
            return Ok(UpdateOutcome::NotFound);
        };
        let outcome = order.apply(update);
        if outcome == UpdateOutcome::Applied {
            self.put(CF_ORDERS, number.as_str(), &order)?;
        }
        Ok(outcome)
    }

    async fn compute_balance(&self, user: &UserId) -> Result<Balance> {
        let snapshot = self.db.snapshot();
        self.balance_at(&snapshot, user)
    }

    async fn insert_withdrawal(
        &self,
        user: &UserId,
        order_ref: &str,
        amount: Amount,
    ) -> Result<WithdrawOutcome> {
        let _guard = self.writer.lock().await;

        let snapshot = self.db.snapshot();
        if !self.balance_at(&snapshot, user)?.covers(amount.value()) {
            return Ok(WithdrawOutcome::InsufficientFunds);
        }
        if self.get::<Withdrawal>(CF_WITHDRAWALS, order_ref)?.is_some() {
            return Ok(WithdrawOutcome::DuplicateWithdrawalRef);
        }

        let withdrawal = Withdrawal {
            order: order_ref.to_string(),
            user: user.clone(),
            amount,
            processed_at: Utc::now(),
        };
        self.put(CF_WITHDRAWALS, order_ref, &withdrawal)?;
        Ok(WithdrawOutcome::Accepted)
    }

    async fn list_orders(&self, user: &UserId) -> Result<Vec<Order>> {
        let snapshot = self.db.snapshot();
        let mut orders: Vec<Order> = self
            .scan::<Order>(&snapshot, CF_ORDERS)?
            .into_iter()
            .filter(|o| &o.owner == user)
            .collect();
        orders.sort_by_key(|o| o.uploaded_at);
        Ok(orders)
    }

    async fn list_withdrawals(&self, user: &UserId) -> Result<Vec<Withdrawal>> {
        let snapshot = self.db.snapshot();
        let mut withdrawals: Vec<Withdrawal> = self
            .scan::<Withdrawal>(&snapshot, CF_WITHDRAWALS)?
            .into_iter()
            .filter(|w| &w.user == user)
            .collect();
        withdrawals.sort_by_key(|w| w.processed_at);
        Ok(withdrawals)
    }
}
