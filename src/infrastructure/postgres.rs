use crate::domain::balance::Balance;
use crate::domain::order::{Order, OrderNumber, OrderStatus, OrderUpdate, UserId};
use crate::domain::outcome::{ClaimOutcome, UpdateOutcome, WithdrawOutcome};
use crate::domain::ports::OrderStore;
use crate::domain::withdrawal::{Amount, Withdrawal};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        number      TEXT PRIMARY KEY,
        user_id     TEXT NOT NULL,
        status      TEXT NOT NULL DEFAULT 'NEW',
        accrual     NUMERIC,
        uploaded_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS orders_user_idx ON orders (user_id, uploaded_at)",
    r#"
    CREATE INDEX IF NOT EXISTS orders_pending_idx ON orders (uploaded_at)
        WHERE status IN ('NEW', 'PROCESSING')
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS withdrawals (
        order_ref    TEXT PRIMARY KEY,
        user_id      TEXT NOT NULL,
        amount       NUMERIC NOT NULL CHECK (amount > 0),
        processed_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS withdrawals_user_idx ON withdrawals (user_id, processed_at)",
];

const BALANCE_QUERY: &str = r#"
    SELECT
        COALESCE((SELECT SUM(accrual) FROM orders
                  WHERE user_id = $1 AND status = 'PROCESSED'), 0) AS accrued,
        COALESCE((SELECT SUM(amount) FROM withdrawals WHERE user_id = $1), 0) AS withdrawn
"#;

const ORDER_COLUMNS: &str = "number, user_id, status, accrual, uploaded_at";

/// Order store backed by PostgreSQL.
///
/// Claims rely on the primary key of `orders` inside one transaction.
/// Withdrawals take a per-user transaction-scoped advisory lock before
/// recomputing the balance, which serializes concurrent withdrawals of the
/// same user. Balance reads run in a `REPEATABLE READ` snapshot.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_uri: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_uri)
            .await?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Creates the tables and indexes if they are missing.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("postgres schema ready");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn balance_in(tx: &mut Transaction<'_, Postgres>, user: &UserId) -> Result<Balance> {
        let row = sqlx::query(BALANCE_QUERY)
            .bind(user.as_str())
            .fetch_one(&mut **tx)
            .await?;
        let accrued: Decimal = row.try_get("accrued")?;
        let withdrawn: Decimal = row.try_get("withdrawn")?;
        Ok(Balance::from_totals(accrued, withdrawn))
    }
}

fn order_from_row(row: &PgRow) -> Result<Order> {
    let number: String = row.try_get("number")?;
    let status: String = row.try_get("status")?;
    let uploaded_at: DateTime<Utc> = row.try_get("uploaded_at")?;
    Ok(Order {
        number: OrderNumber::parse(number)
            .map_err(|e| LedgerError::StorageError(e.to_string()))?,
        owner: UserId::new(row.try_get::<String, _>("user_id")?),
        status: status.parse()?,
        accrual: row.try_get("accrual")?,
        uploaded_at,
    })
}

fn withdrawal_from_row(row: &PgRow) -> Result<Withdrawal> {
    let amount: Decimal = row.try_get("amount")?;
    Ok(Withdrawal {
        order: row.try_get("order_ref")?,
        user: UserId::new(row.try_get::<String, _>("user_id")?),
        amount: Amount::new(amount).map_err(|e| LedgerError::StorageError(e.to_string()))?,
        processed_at: row.try_get("processed_at")?,
    })
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn claim_order(&self, user: &UserId, number: &OrderNumber) -> Result<ClaimOutcome> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO orders (number, user_id, status, uploaded_at)
            VALUES ($1, $2, 'NEW', $3)
            ON CONFLICT (number) DO NOTHING
            "#,
        )
        .bind(number.as_str())
        .bind(user.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let outcome = if inserted == 1 {
            ClaimOutcome::Claimed
        } else {
            let owner: String = sqlx::query_scalar("SELECT user_id FROM orders WHERE number = $1")
                .bind(number.as_str())
                .fetch_one(&mut *tx)
                .await?;
            if owner == user.as_str() {
                ClaimOutcome::AlreadyClaimedBySameUser
            } else {
                ClaimOutcome::ClaimedByOtherUser
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn fetch_pending(&self, limit: usize) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE status IN ('NEW', 'PROCESSING') \
             ORDER BY uploaded_at ASC LIMIT $1"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn update_order_outcome(
        &self,
        number: &OrderNumber,
        update: OrderUpdate,
    ) -> Result<UpdateOutcome> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM orders WHERE number = $1 FOR UPDATE")
                .bind(number.as_str())
                .fetch_optional(&mut *tx)
                .await?;
        let Some(current) = current else {
            return Ok(UpdateOutcome::NotFound);
        };
        let current: OrderStatus = current.parse()?;

        if current == update.status {
            return Ok(UpdateOutcome::Unchanged);
        }
        if !current.can_advance_to(update.status) {
            debug!(order = %number, from = %current, to = %update.status, "refusing stale update");
            return Ok(UpdateOutcome::Stale);
        }

        sqlx::query("UPDATE orders SET status = $2, accrual = $3 WHERE number = $1")
            .bind(number.as_str())
            .bind(update.status.as_str())
            .bind(update.accrual)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(UpdateOutcome::Applied)
    }

    async fn compute_balance(&self, user: &UserId) -> Result<Balance> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;
        let balance = Self::balance_in(&mut tx, user).await?;
        tx.commit().await?;
        Ok(balance)
    }

    async fn insert_withdrawal(
        &self,
        user: &UserId,
        order_ref: &str,
        amount: Amount,
    ) -> Result<WithdrawOutcome> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(user.as_str())
            .execute(&mut *tx)
            .await?;

        let balance = Self::balance_in(&mut tx, user).await?;
        if !balance.covers(amount.value()) {
            return Ok(WithdrawOutcome::InsufficientFunds);
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO withdrawals (order_ref, user_id, amount, processed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (order_ref) DO NOTHING
            "#,
        )
        .bind(order_ref)
        .bind(user.as_str())
        .bind(amount.value())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Ok(WithdrawOutcome::DuplicateWithdrawalRef);
        }

        tx.commit().await?;
        Ok(WithdrawOutcome::Accepted)
    }

    async fn list_orders(&self, user: &UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY uploaded_at ASC"
        ))
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn list_withdrawals(&self, user: &UserId) -> Result<Vec<Withdrawal>> {
        let rows = sqlx::query(
            "SELECT order_ref, user_id, amount, processed_at FROM withdrawals \
             WHERE user_id = $1 ORDER BY processed_at ASC",
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(withdrawal_from_row).collect()
    }
}
