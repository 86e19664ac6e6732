use crate::config::DatabaseConfig;
use crate::ledger::{LedgerConnection, LedgerSummary, LedgerTransaction, LockedOrder};
use crate::pool::ManageConnection;
use crate::repositories::{FillRepository, OrderRepository};
use crate::{DatabaseError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filler_core::{Fill, NewFill, Order};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnectOptions, PgConnection, Postgres};
use sqlx::{Connection, Transaction};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

const APPLICATION_NAME: &str = "order-filler";

/// Opens Postgres sessions for the connection pool
#[derive(Clone)]
pub struct PgConnectionManager {
    options: PgConnectOptions,
}

impl PgConnectionManager {
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let mut options = PgConnectOptions::from_str(&config.url)
            .map_err(|e| DatabaseError::Connection(e.to_string()))?
            .application_name(APPLICATION_NAME);

        if let Some(timeout) = config.statement_timeout() {
            options = options.options([(
                "statement_timeout",
                format!("{}ms", timeout.as_millis()),
            )]);
        }

        Ok(Self { options })
    }
}

#[async_trait]
impl ManageConnection for PgConnectionManager {
    type Connection = PgLedgerConnection;

    async fn connect(&self) -> Result<PgLedgerConnection> {
        let conn = PgConnection::connect_with(&self.options).await?;
        debug!("Opened database connection");
        Ok(PgLedgerConnection {
            conn,
            broken: false,
            open_transaction: false,
        })
    }

    async fn is_valid(&self, conn: &mut PgLedgerConnection) -> Result<()> {
        let result = sqlx::query("SELECT 1")
            .execute(&mut conn.conn)
            .await
            .map(|_| ())
            .map_err(DatabaseError::from);
        track(&mut conn.broken, result)
    }

    fn has_broken(&self, conn: &PgLedgerConnection) -> bool {
        // a session dropped mid-transaction may still hold row locks
        conn.broken || conn.open_transaction
    }

    async fn close(&self, conn: PgLedgerConnection) {
        if let Err(e) = conn.conn.close().await {
            debug!(error = %e, "Error closing database connection");
        }
    }
}

/// Mark the session broken when `result` is a connectivity failure
fn track<T>(broken: &mut bool, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        if e.is_connection_error() {
            *broken = true;
        }
    }
    result
}

/// A Postgres session handing out sqlx transactions
pub struct PgLedgerConnection {
    conn: PgConnection,
    broken: bool,
    /// Set from BEGIN until COMMIT or ROLLBACK succeeds
    open_transaction: bool,
}

impl PgLedgerConnection {
    pub async fn order(&mut self, order_id: Uuid) -> Result<Option<Order>> {
        let result = OrderRepository::get_by_id(&mut self.conn, order_id).await;
        track(&mut self.broken, result).map(|row| row.map(Order::from))
    }

    pub async fn fills_for(&mut self, order_id: Uuid) -> Result<Vec<Fill>> {
        let result = FillRepository::for_order(&mut self.conn, order_id).await;
        track(&mut self.broken, result).map(|rows| rows.into_iter().map(Fill::from).collect())
    }
}

#[async_trait]
impl LedgerConnection for PgLedgerConnection {
    async fn begin<'c>(&'c mut self) -> Result<Box<dyn LedgerTransaction + 'c>> {
        let PgLedgerConnection {
            conn,
            broken,
            open_transaction,
        } = self;

        let result = conn.begin().await.map_err(DatabaseError::from);
        let tx = track(broken, result)?;
        *open_transaction = true;
        Ok(Box::new(PgLedgerTransaction {
            tx,
            broken,
            open_transaction,
        }))
    }

    async fn ensure_schema(&mut self) -> Result<()> {
        info!("Running database migrations");
        let result = sqlx::migrate!("./src/migrations")
            .run_direct(&mut self.conn)
            .await
            .map_err(DatabaseError::from);
        track(&mut self.broken, result)?;
        info!("Migrations completed");
        Ok(())
    }

    async fn summary(&mut self) -> Result<LedgerSummary> {
        let counts = OrderRepository::counts(&mut self.conn).await;
        let (orders, open_orders, completed_orders) = track(&mut self.broken, counts)?;
        let totals = FillRepository::totals(&mut self.conn).await;
        let (fills, shares_filled) = track(&mut self.broken, totals)?;

        Ok(LedgerSummary {
            orders,
            open_orders,
            completed_orders,
            fills,
            shares_filled,
        })
    }
}

/// An open sqlx transaction; rolled back by sqlx if dropped uncommitted
pub struct PgLedgerTransaction<'c> {
    tx: Transaction<'c, Postgres>,
    broken: &'c mut bool,
    open_transaction: &'c mut bool,
}

#[async_trait]
impl<'c> LedgerTransaction for PgLedgerTransaction<'c> {
    async fn lock_order(&mut self, order_id: Uuid) -> Result<Option<LockedOrder>> {
        let result = OrderRepository::lock_for_fill(&mut *self.tx, order_id).await;
        track(self.broken, result).map(|row| {
            row.map(|(remaining_shares, symbol)| LockedOrder {
                remaining_shares,
                symbol,
            })
        })
    }

    async fn insert_fill(&mut self, fill: &NewFill) -> Result<Uuid> {
        let result = FillRepository::insert(&mut *self.tx, fill).await;
        track(self.broken, result)
    }

    async fn apply_fill(
        &mut self,
        order_id: Uuid,
        shares: i32,
        cost: Decimal,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let result = OrderRepository::apply_fill(&mut *self.tx, order_id, shares, cost, at).await;
        track(self.broken, result)
    }

    async fn insert_orders(&mut self, orders: &[Order]) -> Result<usize> {
        let result = OrderRepository::insert_batch(&mut *self.tx, orders).await;
        track(self.broken, result)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let PgLedgerTransaction {
            tx,
            broken,
            open_transaction,
        } = *self;
        let result = tx.commit().await.map_err(DatabaseError::from);
        if result.is_ok() {
            *open_transaction = false;
        }
        track(broken, result)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let PgLedgerTransaction {
            tx,
            broken,
            open_transaction,
        } = *self;
        let result = tx.rollback().await.map_err(DatabaseError::from);
        if result.is_ok() {
            *open_transaction = false;
        }
        track(broken, result)
    }
}
