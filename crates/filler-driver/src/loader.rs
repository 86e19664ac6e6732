use crate::executor::OrderSink;
use crate::{DriverError, Result};
use filler_core::{LoaderConfig, Order};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Bulk-inserts orders in small transactional batches across workers
pub struct OrderLoader<S: OrderSink> {
    sink: Arc<S>,
    batch_size: usize,
    workers: usize,
}

impl<S: OrderSink> OrderLoader<S> {
    pub fn new(sink: Arc<S>, config: &LoaderConfig, workers: usize) -> Self {
        Self {
            sink,
            batch_size: config.batch_size.max(1),
            workers: workers.max(1),
        }
    }

    /// Insert every order, returning how many rows were written.
    ///
    /// Batches are dealt to workers round-robin. A batch that still fails
    /// after retries stops its worker; the first such error is returned once
    /// all workers have finished.
    pub async fn load(&self, orders: Vec<Order>) -> Result<usize> {
        let batches = orders.len().div_ceil(self.batch_size);
        info!(
            orders = orders.len(),
            batches,
            batch_size = self.batch_size,
            workers = self.workers,
            "Inserting orders"
        );

        let orders = Arc::new(orders);
        let handles: Vec<_> = (0..self.workers)
            .map(|worker| {
                let sink = self.sink.clone();
                let orders = orders.clone();
                let batch_size = self.batch_size;
                let stride = self.workers;
                tokio::spawn(async move {
                    let mut inserted = 0;
                    for (batch, chunk) in orders.chunks(batch_size).enumerate() {
                        if batch % stride != worker {
                            continue;
                        }
                        inserted += sink.insert_batch(chunk).await?;
                        debug!(worker, batch, inserted, "Inserted order batch");
                    }
                    Ok::<usize, filler_db::DatabaseError>(inserted)
                })
            })
            .collect();

        let mut inserted = 0;
        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(count)) => inserted += count,
                Ok(Err(e)) => {
                    error!(error = %e, "Order insert worker failed");
                    first_error.get_or_insert(DriverError::Database(e));
                }
                Err(e) => {
                    error!(error = %e, "Order insert worker aborted");
                    first_error.get_or_insert(DriverError::Worker(e.to_string()));
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        info!(inserted, "Orders inserted");
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use filler_core::RandomFillSizer;
    use filler_db::{
        ConnectionPool, Fault, FillService, MemoryLedger, MemoryManager, PoolConfig, RetryPolicy,
    };
    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use std::time::Duration;
    use uuid::Uuid;

    fn orders(count: usize) -> Vec<Order> {
        (0..count)
            .map(|n| Order {
                account_id: n as i64,
                order_id: Uuid::new_v4(),
                symbol: "def".to_string(),
                order_started: Utc::now(),
                order_completed: None,
                total_shares_purchased: 10,
                total_cost_of_order: Decimal::new(1234, 2),
                attr_0: "foo".to_string(),
                attr_1: "bar".to_string(),
                attr_2: "baz".to_string(),
            })
            .collect()
    }

    fn service(ledger: &MemoryLedger) -> Arc<FillService<MemoryManager>> {
        let pool = ConnectionPool::new(MemoryManager::new(ledger.clone()), PoolConfig::default());
        Arc::new(FillService::new(
            pool,
            RetryPolicy::new(5, Duration::from_millis(100)),
            Arc::new(RandomFillSizer::seeded(3)),
        ))
    }

    #[derive(Default)]
    struct BatchRecorder {
        sizes: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl OrderSink for BatchRecorder {
        async fn insert_batch(&self, orders: &[Order]) -> filler_db::Result<usize> {
            self.sizes.lock().push(orders.len());
            Ok(orders.len())
        }
    }

    #[tokio::test]
    async fn test_orders_split_into_batches() {
        let sink = Arc::new(BatchRecorder::default());
        let loader = OrderLoader::new(sink.clone(), &LoaderConfig { batch_size: 8 }, 3);

        assert_eq!(loader.load(orders(20)).await.unwrap(), 20);

        let mut sizes = sink.sizes.lock().clone();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![4, 8, 8]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_into_memory_ledger_survives_transient_fault() {
        let ledger = MemoryLedger::new();
        let loader = OrderLoader::new(service(&ledger), &LoaderConfig::default(), 2);
        ledger.inject_fault(Fault::Deadlock);

        assert_eq!(loader.load(orders(50)).await.unwrap(), 50);
        assert_eq!(ledger.order_count(), 50);
    }

    #[tokio::test]
    async fn test_fatal_insert_error_is_returned() {
        let ledger = MemoryLedger::new();
        let loader = OrderLoader::new(service(&ledger), &LoaderConfig::default(), 1);
        ledger.inject_fault(Fault::UniqueViolation);

        let err = loader.load(orders(16)).await.unwrap_err();
        match err {
            DriverError::Database(e) => assert_eq!(e.code(), Some("23505")),
            other => panic!("expected database error, got {other:?}"),
        }
    }
}
