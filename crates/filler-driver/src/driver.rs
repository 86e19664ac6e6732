use crate::executor::FillExecutor;
use crate::progress::{ProgressReporter, ProgressTracker};
use crate::{DriverError, Result};
use filler_core::{DriverConfig, FillOutcome, WorkItem};
use filler_db::DatabaseError;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// A work item that exhausted its retries or failed fatally
#[derive(Debug)]
pub struct ItemFailure {
    pub item: WorkItem,
    pub error: DatabaseError,
}

/// Aggregated outcome of a fill run
#[derive(Debug, Default)]
pub struct FillReport {
    pub total: usize,
    pub filled: usize,
    pub skipped: usize,
    pub failures: Vec<ItemFailure>,
}

impl FillReport {
    fn empty(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Items that completed, filled or skipped
    pub fn processed(&self) -> usize {
        self.filled + self.skipped
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fail the run if any item failed
    pub fn into_result(self) -> Result<Self> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(DriverError::ItemsFailed {
                failed: self.failures.len(),
                total: self.total,
            })
        }
    }

    fn record(&mut self, item: WorkItem, result: filler_db::Result<FillOutcome>) {
        match result {
            Ok(FillOutcome::Filled(_)) => self.filled += 1,
            Ok(FillOutcome::Skipped(_)) => self.skipped += 1,
            Err(error) => self.failures.push(ItemFailure { item, error }),
        }
    }

    fn merge(&mut self, other: FillReport) {
        self.filled += other.filled;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }
}

/// Fans work items out over a fixed set of worker tasks
pub struct ParallelFillDriver<F: FillExecutor> {
    executor: Arc<F>,
    config: DriverConfig,
}

impl<F: FillExecutor> ParallelFillDriver<F> {
    pub fn new(executor: Arc<F>, config: DriverConfig) -> Self {
        Self { executor, config }
    }

    /// Fill every item once and wait for all workers.
    ///
    /// Worker `w` of `n` takes items `w, w + n, w + 2n, ...`. A failed item
    /// is recorded and the worker moves on; failures are reported in the
    /// returned [`FillReport`].
    pub async fn run(&self, items: Vec<WorkItem>) -> Result<FillReport> {
        let total = items.len();
        let workers = self.config.workers.max(1);
        let items = Arc::new(items);
        let tracker = Arc::new(ProgressTracker::new(total as u64));

        info!(total, workers, "Starting fill workers");

        let (done_tx, done_rx) = mpsc::channel(1);
        let reporter =
            ProgressReporter::new(tracker.clone(), self.config.report_interval()).spawn(done_rx);

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                tokio::spawn(fill_worker(
                    worker,
                    workers,
                    items.clone(),
                    self.executor.clone(),
                    tracker.clone(),
                ))
            })
            .collect();

        let mut report = FillReport::empty(total);
        let mut worker_error = None;
        for handle in handles {
            match handle.await {
                Ok(partial) => report.merge(partial),
                Err(e) => {
                    error!(error = %e, "Fill worker aborted");
                    worker_error.get_or_insert_with(|| e.to_string());
                }
            }
        }

        let _ = done_tx.send(()).await;
        if let Err(e) = reporter.await {
            warn!(error = %e, "Progress reporter aborted");
        }

        tracker.report();
        info!(
            total,
            filled = report.filled,
            skipped = report.skipped,
            failed = report.failures.len(),
            elapsed_secs = tracker.elapsed().as_secs(),
            "Fill run finished"
        );

        match worker_error {
            Some(message) => Err(DriverError::Worker(message)),
            None => Ok(report),
        }
    }
}

async fn fill_worker<F: FillExecutor>(
    worker: usize,
    stride: usize,
    items: Arc<Vec<WorkItem>>,
    executor: Arc<F>,
    tracker: Arc<ProgressTracker>,
) -> FillReport {
    let mut report = FillReport::empty(0);
    debug!(worker, "Fill worker started");

    for item in items.iter().skip(worker).step_by(stride) {
        report.total += 1;
        let result = executor.fill(item).await;
        if result.is_ok() {
            tracker.record();
        }
        report.record(*item, result);
    }

    debug!(
        worker,
        items = report.total,
        filled = report.filled,
        skipped = report.skipped,
        failed = report.failures.len(),
        "Fill worker finished"
    );
    report
}
