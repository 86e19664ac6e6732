use crate::pool::{ConnectionPool, ManageConnection};
use crate::retry::{run_with_retries, RetryPolicy};
use crate::{DatabaseError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filler_core::types::now_utc;
use filler_core::{FillOutcome, FillSizer, NewFill, Order, SkipReason, WorkItem};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Columns of a row-locked order the fill needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedOrder {
    pub remaining_shares: i32,
    pub symbol: String,
}

impl From<&Order> for LockedOrder {
    fn from(order: &Order) -> Self {
        Self {
            remaining_shares: order.total_shares_purchased,
            symbol: order.symbol.clone(),
        }
    }
}

/// Row counts across both tables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSummary {
    pub orders: i64,
    pub open_orders: i64,
    pub completed_orders: i64,
    pub fills: i64,
    pub shares_filled: i64,
}

/// A single session against the orders store
#[async_trait]
pub trait LedgerConnection: Send {
    /// Open a transaction on this session.
    ///
    /// Dropping the returned transaction without `commit` rolls it back.
    async fn begin<'c>(&'c mut self) -> Result<Box<dyn LedgerTransaction + 'c>>;

    async fn ensure_schema(&mut self) -> Result<()>;

    async fn summary(&mut self) -> Result<LedgerSummary>;
}

/// Statements inside one open transaction.
///
/// `lock_order` holds the row lock until the transaction ends.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Lock the order row and read what a fill needs; `None` if absent
    async fn lock_order(&mut self, order_id: Uuid) -> Result<Option<LockedOrder>>;

    /// Insert a fill row, returning the generated `fill_id`
    async fn insert_fill(&mut self, fill: &NewFill) -> Result<Uuid>;

    /// Subtract a fill from a locked order, stamping completion on the
    /// transition to zero shares
    async fn apply_fill(
        &mut self,
        order_id: Uuid,
        shares: i32,
        cost: Decimal,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Insert orders, skipping ids that already exist; returns rows written
    async fn insert_orders(&mut self, orders: &[Order]) -> Result<usize>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

async fn rollback_quietly(tx: Box<dyn LedgerTransaction + '_>, cause: &DatabaseError) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, cause = %cause, "Rollback failed");
    }
}

/// One order fill inside one transaction
pub struct FillTransaction;

impl FillTransaction {
    /// Lock the order, apply one randomly sized fill and commit.
    ///
    /// Missing or fully filled orders commit without writes and come back as
    /// [`FillOutcome::Skipped`]. Any error rolls the transaction back before
    /// it is returned.
    pub async fn execute<C>(conn: &mut C, item: &WorkItem, sizer: &dyn FillSizer) -> Result<FillOutcome>
    where
        C: LedgerConnection + ?Sized,
    {
        let mut tx = conn.begin().await?;
        match Self::run(&mut *tx, item, sizer).await {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                rollback_quietly(tx, &e).await;
                Err(e)
            }
        }
    }

    async fn run<T>(tx: &mut T, item: &WorkItem, sizer: &dyn FillSizer) -> Result<FillOutcome>
    where
        T: LedgerTransaction + ?Sized,
    {
        let Some(locked) = tx.lock_order(item.order_id).await? else {
            debug!(order_id = %item.order_id, "Order not found, skipping");
            return Ok(FillOutcome::Skipped(SkipReason::NotFound));
        };

        if locked.remaining_shares <= 0 {
            debug!(order_id = %item.order_id, "Order already filled, skipping");
            return Ok(FillOutcome::Skipped(SkipReason::AlreadyFilled));
        }

        let plan = sizer.plan(locked.remaining_shares);
        if !plan.fits(locked.remaining_shares) {
            return Err(DatabaseError::InvalidFill(format!(
                "{} shares at {} against {} remaining",
                plan.shares, plan.cost, locked.remaining_shares
            )));
        }

        let fill_time = now_utc();
        let fill = NewFill::with_default_attrs(
            item.order_id,
            item.account_id,
            locked.symbol,
            fill_time,
            plan.shares,
            plan.cost,
            plan.price(),
        );

        let fill_id = tx.insert_fill(&fill).await?;
        tx.apply_fill(item.order_id, plan.shares, plan.cost, fill_time)
            .await?;

        Ok(FillOutcome::Filled(fill.into_fill(fill_id)))
    }
}

async fn insert_in_transaction<C>(conn: &mut C, orders: &[Order]) -> Result<usize>
where
    C: LedgerConnection + ?Sized,
{
    let mut tx = conn.begin().await?;
    match tx.insert_orders(orders).await {
        Ok(count) => {
            tx.commit().await?;
            Ok(count)
        }
        Err(e) => {
            rollback_quietly(tx, &e).await;
            Err(e)
        }
    }
}

/// Pooled, retrying access to the orders store
pub struct FillService<M: ManageConnection> {
    pool: ConnectionPool<M>,
    retry: RetryPolicy,
    sizer: Arc<dyn FillSizer>,
}

impl<M> FillService<M>
where
    M: ManageConnection,
    M::Connection: LedgerConnection,
{
    pub fn new(pool: ConnectionPool<M>, retry: RetryPolicy, sizer: Arc<dyn FillSizer>) -> Self {
        Self { pool, retry, sizer }
    }

    pub fn pool(&self) -> &ConnectionPool<M> {
        &self.pool
    }

    /// Fill one order, retrying transient failures with a fresh transaction
    pub async fn fill(&self, item: &WorkItem) -> Result<FillOutcome> {
        let started = Instant::now();
        let result = run_with_retries(&self.retry, "fill_order", || self.attempt_fill(item)).await;

        match &result {
            Ok(FillOutcome::Filled(fill)) => {
                filler_metrics::counters::fills(1);
                filler_metrics::histograms::fill_duration(started.elapsed());
                debug!(
                    order_id = %item.order_id,
                    fill_id = %fill.fill_id,
                    shares = fill.shares_filled,
                    cost = %fill.total_cost_of_fill,
                    "Order filled"
                );
            }
            Ok(FillOutcome::Skipped(reason)) => {
                filler_metrics::counters::fill_skips(1, reason.as_str());
            }
            Err(e) => {
                filler_metrics::counters::fill_failures(1);
                warn!(order_id = %item.order_id, error = %e, "Fill failed");
            }
        }

        result
    }

    async fn attempt_fill(&self, item: &WorkItem) -> Result<FillOutcome> {
        let mut conn = self.pool.acquire().await?;
        let result = FillTransaction::execute(&mut *conn, item, self.sizer.as_ref()).await;
        if matches!(&result, Err(e) if e.is_connection_error()) {
            conn.mark_broken();
        }
        result
    }

    /// Insert one batch of orders in a single transaction
    pub async fn insert_batch(&self, orders: &[Order]) -> Result<usize> {
        let started = Instant::now();
        let inserted =
            run_with_retries(&self.retry, "insert_orders", || self.attempt_insert(orders)).await?;
        filler_metrics::counters::orders_inserted(inserted as u64);
        filler_metrics::histograms::insert_batch_duration(started.elapsed());
        Ok(inserted)
    }

    async fn attempt_insert(&self, orders: &[Order]) -> Result<usize> {
        let mut conn = self.pool.acquire().await?;
        let result = insert_in_transaction(&mut *conn, orders).await;
        if matches!(&result, Err(e) if e.is_connection_error()) {
            conn.mark_broken();
        }
        result
    }

    /// Create the tables if they do not exist yet
    pub async fn ensure_schema(&self) -> Result<()> {
        info!("Ensuring orders schema");
        run_with_retries(&self.retry, "ensure_schema", || async move {
            let mut conn = self.pool.acquire().await?;
            let result = conn.ensure_schema().await;
            if matches!(&result, Err(e) if e.is_connection_error()) {
                conn.mark_broken();
            }
            result
        })
        .await
    }

    pub async fn summary(&self) -> Result<LedgerSummary> {
        run_with_retries(&self.retry, "summary", || async move {
            let mut conn = self.pool.acquire().await?;
            conn.summary().await
        })
        .await
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
