use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::info;

/// Shared count of work items that completed (filled or skipped)
#[derive(Debug)]
pub struct ProgressTracker {
    total: u64,
    processed: Mutex<u64>,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            processed: Mutex::new(0),
            started: Instant::now(),
        }
    }

    /// Count one processed item, returning the new total
    pub fn record(&self) -> u64 {
        let mut processed = self.processed.lock();
        *processed += 1;
        *processed
    }

    pub fn processed(&self) -> u64 {
        *self.processed.lock()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.processed())
    }

    pub fn is_done(&self) -> bool {
        self.processed() >= self.total
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Items processed per second since the tracker was created
    pub fn per_second(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.processed() as f64 / secs
        } else {
            0.0
        }
    }

    /// Log and publish the current figures
    pub fn report(&self) {
        let processed = self.processed();
        let remaining = self.total.saturating_sub(processed);
        let per_second = self.per_second();

        info!(
            processed,
            remaining,
            tps = %format_args!("{per_second:.1}"),
            "Fill progress"
        );
        filler_metrics::gauges::set_progress(processed, remaining, per_second);
    }
}

/// Background task that reports progress on a fixed interval
pub struct ProgressReporter {
    tracker: Arc<ProgressTracker>,
    interval: Duration,
}

impl ProgressReporter {
    pub fn new(tracker: Arc<ProgressTracker>, interval: Duration) -> Self {
        Self {
            tracker,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Spawn the reporting loop.
    ///
    /// It stops once every item is processed or when `shutdown` fires or is
    /// dropped.
    pub fn spawn(self, shutdown: mpsc::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    self.tracker.report();
                    if self.tracker.is_done() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_tracker_counts_and_rates() {
        let tracker = ProgressTracker::new(10);
        for _ in 0..4 {
            tracker.record();
        }
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(tracker.processed(), 4);
        assert_eq!(tracker.remaining(), 6);
        assert!(!tracker.is_done());
        assert!((tracker.per_second() - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_concurrent_records_are_not_lost() {
        let tracker = Arc::new(ProgressTracker::new(8000));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let tracker = tracker.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..1000 {
                    tracker.record();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(tracker.processed(), 8000);
        assert!(tracker.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_stops_when_all_processed() {
        let tracker = Arc::new(ProgressTracker::new(2));
        let (_done_tx, done_rx) = mpsc::channel(1);
        let handle = ProgressReporter::new(tracker.clone(), Duration::from_secs(30)).spawn(done_rx);

        tracker.record();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!handle.is_finished());

        tracker.record();
        tokio::time::sleep(Duration::from_secs(30)).await;
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_stops_on_completion_signal() {
        let tracker = Arc::new(ProgressTracker::new(100));
        let (done_tx, done_rx) = mpsc::channel(1);
        let handle = ProgressReporter::new(tracker, Duration::from_secs(30)).spawn(done_rx);

        done_tx.send(()).await.unwrap();
        handle.await.unwrap();
    }
}
