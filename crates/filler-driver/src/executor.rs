use async_trait::async_trait;
use filler_core::{FillOutcome, Order, WorkItem};
use filler_db::{FillService, LedgerConnection, ManageConnection};

/// Performs one retried fill for a work item
#[async_trait]
pub trait FillExecutor: Send + Sync + 'static {
    async fn fill(&self, item: &WorkItem) -> filler_db::Result<FillOutcome>;
}

/// Writes one batch of orders atomically
#[async_trait]
pub trait OrderSink: Send + Sync + 'static {
    async fn insert_batch(&self, orders: &[Order]) -> filler_db::Result<usize>;
}

#[async_trait]
impl<M> FillExecutor for FillService<M>
where
    M: ManageConnection,
    M::Connection: LedgerConnection,
{
    async fn fill(&self, item: &WorkItem) -> filler_db::Result<FillOutcome> {
        FillService::fill(self, item).await
    }
}

#[async_trait]
impl<M> OrderSink for FillService<M>
where
    M: ManageConnection,
    M::Connection: LedgerConnection,
{
    async fn insert_batch(&self, orders: &[Order]) -> filler_db::Result<usize> {
        FillService::insert_batch(self, orders).await
    }
}
