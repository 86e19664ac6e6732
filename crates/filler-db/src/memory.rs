//! In-process ledger with row-level locking.
//!
//! Used by `--dry-run` and as the store behind the fill and driver tests.
//! Each order sits behind its own async mutex; a transaction holds the guard
//! for every order it locked until it ends or is dropped, so concurrent fills of
//! one order serialise the same way `SELECT ... FOR UPDATE` does.

use crate::ledger::{LedgerConnection, LedgerSummary, LedgerTransaction, LockedOrder};
use crate::pool::ManageConnection;
use crate::{DatabaseError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use filler_core::{Fill, NewFill, Order};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;
use uuid::Uuid;

/// Failure injected into the next data statement on any connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    SerializationFailure,
    Deadlock,
    /// Server closed the connection; the connection is unusable afterwards
    ConnectionLost,
    /// TLS stream ended mid-statement; the connection is unusable afterwards
    TransportEof,
    UniqueViolation,
}

impl Fault {
    fn into_error(self) -> DatabaseError {
        match self {
            Fault::SerializationFailure => DatabaseError::sqlstate(
                "40001",
                "could not serialize access due to concurrent update",
            ),
            Fault::Deadlock => DatabaseError::sqlstate("40P01", "deadlock detected"),
            Fault::ConnectionLost => DatabaseError::sqlstate(
                "08006",
                "server closed the connection unexpectedly",
            ),
            Fault::TransportEof => DatabaseError::Io {
                kind: ErrorKind::UnexpectedEof,
                message: "SSL SYSCALL error: EOF detected".to_string(),
            },
            Fault::UniqueViolation => DatabaseError::sqlstate(
                "23505",
                "duplicate key value violates unique constraint \"order_fills_pkey\"",
            ),
        }
    }

    fn kills_connection(self) -> bool {
        matches!(self, Fault::ConnectionLost | Fault::TransportEof)
    }
}

type OrderRow = Arc<tokio::sync::Mutex<Order>>;

#[derive(Default)]
struct LedgerState {
    orders: DashMap<Uuid, OrderRow>,
    fills: Mutex<Vec<Fill>>,
    /// Pending faults with the number of statements to let through first
    faults: Mutex<VecDeque<(u32, Fault)>>,
    failing_checks: AtomicU32,
    connections_opened: AtomicU32,
}

/// Shared in-memory orders and fills tables
#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger pre-loaded with `orders`
    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let ledger = Self::new();
        ledger.seed(orders);
        ledger
    }

    /// Insert orders outside any transaction, replacing existing ids
    pub fn seed(&self, orders: impl IntoIterator<Item = Order>) {
        for order in orders {
            self.state
                .orders
                .insert(order.order_id, Arc::new(tokio::sync::Mutex::new(order)));
        }
    }

    /// Committed state of one order
    pub async fn order(&self, order_id: Uuid) -> Option<Order> {
        let row = self.row(order_id)?;
        let order = row.lock().await;
        Some(order.clone())
    }

    pub fn order_count(&self) -> usize {
        self.state.orders.len()
    }

    /// Every committed fill, in commit order
    pub fn fills(&self) -> Vec<Fill> {
        self.state.fills.lock().clone()
    }

    pub fn fills_for(&self, order_id: Uuid) -> Vec<Fill> {
        self.state
            .fills
            .lock()
            .iter()
            .filter(|f| f.order_id == order_id)
            .cloned()
            .collect()
    }

    /// Queue `fault` to fail the next data statement
    pub fn inject_fault(&self, fault: Fault) {
        self.inject_fault_after(0, fault);
    }

    /// Queue `fault` to fail a data statement after `statements` succeed
    pub fn inject_fault_after(&self, statements: u32, fault: Fault) {
        self.state.faults.lock().push_back((statements, fault));
    }

    /// Fail the next `count` liveness checks
    pub fn fail_next_liveness_checks(&self, count: u32) {
        self.state.failing_checks.store(count, Ordering::SeqCst);
    }

    pub fn connections_opened(&self) -> u32 {
        self.state.connections_opened.load(Ordering::SeqCst)
    }

    pub async fn summary(&self) -> LedgerSummary {
        let rows: Vec<OrderRow> = self
            .state
            .orders
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut summary = LedgerSummary::default();
        for row in rows {
            let order = row.lock().await;
            summary.orders += 1;
            if !order.is_exhausted() {
                summary.open_orders += 1;
            }
            if order.is_completed() {
                summary.completed_orders += 1;
            }
        }

        let fills = self.state.fills.lock();
        summary.fills = fills.len() as i64;
        summary.shares_filled = fills.iter().map(|f| f.shares_filled as i64).sum();
        summary
    }

    fn row(&self, order_id: Uuid) -> Option<OrderRow> {
        self.state
            .orders
            .get(&order_id)
            .map(|entry| entry.value().clone())
    }

    fn take_fault(&self) -> Option<Fault> {
        let mut faults = self.state.faults.lock();
        match faults.front_mut() {
            Some((0, _)) => faults.pop_front().map(|(_, fault)| fault),
            Some((remaining, _)) => {
                *remaining -= 1;
                None
            }
            None => None,
        }
    }

    fn take_failing_check(&self) -> bool {
        self.state
            .failing_checks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// One session against a [`MemoryLedger`]
pub struct MemoryConnection {
    ledger: MemoryLedger,
    closed: bool,
}

impl MemoryConnection {
    pub fn new(ledger: MemoryLedger) -> Self {
        Self {
            ledger,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(DatabaseError::Connection("connection is closed".to_string()));
        }
        Ok(())
    }

    /// Fail the statement if a fault is queued; connection-killing faults
    /// close the session
    fn statement(&mut self) -> Result<()> {
        self.ensure_open()?;
        if let Some(fault) = self.ledger.take_fault() {
            debug!(?fault, "Injected fault");
            if fault.kills_connection() {
                self.closed = true;
            }
            return Err(fault.into_error());
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerConnection for MemoryConnection {
    async fn begin<'c>(&'c mut self) -> Result<Box<dyn LedgerTransaction + 'c>> {
        self.ensure_open()?;
        Ok(Box::new(MemoryTransaction {
            conn: self,
            locks: HashMap::new(),
            staged: HashMap::new(),
            fills: Vec::new(),
            new_orders: Vec::new(),
        }))
    }

    async fn ensure_schema(&mut self) -> Result<()> {
        self.ensure_open()
    }

    async fn summary(&mut self) -> Result<LedgerSummary> {
        self.ensure_open()?;
        Ok(self.ledger.summary().await)
    }
}

/// Open transaction on a [`MemoryConnection`].
///
/// Writes are staged and only reach the ledger on commit. Row locks are
/// released when the transaction is committed, rolled back or dropped.
pub struct MemoryTransaction<'c> {
    conn: &'c mut MemoryConnection,
    locks: HashMap<Uuid, OwnedMutexGuard<Order>>,
    /// Working copies of locked orders
    staged: HashMap<Uuid, Order>,
    fills: Vec<Fill>,
    new_orders: Vec<Order>,
}

impl MemoryTransaction<'_> {
    fn statement(&mut self) -> Result<()> {
        let result = self.conn.statement();
        if self.conn.closed {
            self.locks.clear();
            self.staged.clear();
        }
        result
    }
}

#[async_trait]
impl<'c> LedgerTransaction for MemoryTransaction<'c> {
    async fn lock_order(&mut self, order_id: Uuid) -> Result<Option<LockedOrder>> {
        self.statement()?;

        if let Some(order) = self.staged.get(&order_id) {
            return Ok(Some(LockedOrder::from(order)));
        }

        let Some(row) = self.conn.ledger.row(order_id) else {
            return Ok(None);
        };
        let guard = row.lock_owned().await;
        let locked = LockedOrder::from(&*guard);
        self.staged.insert(order_id, guard.clone());
        self.locks.insert(order_id, guard);
        Ok(Some(locked))
    }

    async fn insert_fill(&mut self, fill: &NewFill) -> Result<Uuid> {
        self.statement()?;
        let fill_id = Uuid::new_v4();
        self.fills.push(fill.clone().into_fill(fill_id));
        Ok(fill_id)
    }

    async fn apply_fill(
        &mut self,
        order_id: Uuid,
        shares: i32,
        cost: Decimal,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.statement()?;
        let order = self.staged.get_mut(&order_id).ok_or_else(|| {
            DatabaseError::Query(format!("order {order_id} is not locked by this transaction"))
        })?;
        order.apply_fill(shares, cost, at);
        Ok(())
    }

    async fn insert_orders(&mut self, orders: &[Order]) -> Result<usize> {
        self.statement()?;

        let mut inserted = 0;
        for order in orders {
            let duplicate = self.conn.ledger.state.orders.contains_key(&order.order_id)
                || self.new_orders.iter().any(|o| o.order_id == order.order_id);
            if !duplicate {
                self.new_orders.push(order.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            conn,
            locks,
            mut staged,
            mut fills,
            new_orders,
        } = *self;
        conn.ensure_open()?;

        let state = &conn.ledger.state;
        for order in new_orders {
            state
                .orders
                .entry(order.order_id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(order)));
        }
        state.fills.lock().append(&mut fills);
        for (order_id, mut guard) in locks {
            if let Some(order) = staged.remove(&order_id) {
                *guard = order;
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.conn.ensure_open()
    }
}

/// Opens [`MemoryConnection`]s for a [`crate::ConnectionPool`]
#[derive(Clone)]
pub struct MemoryManager {
    ledger: MemoryLedger,
}

impl MemoryManager {
    pub fn new(ledger: MemoryLedger) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &MemoryLedger {
        &self.ledger
    }
}

#[async_trait]
impl ManageConnection for MemoryManager {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection> {
        self.ledger
            .state
            .connections_opened
            .fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection::new(self.ledger.clone()))
    }

    async fn is_valid(&self, conn: &mut MemoryConnection) -> Result<()> {
        conn.ensure_open()?;
        if self.ledger.take_failing_check() {
            return Err(DatabaseError::sqlstate(
                "08006",
                "server closed the connection unexpectedly",
            ));
        }
        Ok(())
    }

    fn has_broken(&self, conn: &MemoryConnection) -> bool {
        conn.closed
    }
}
