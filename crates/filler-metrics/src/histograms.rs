use metrics::{describe_histogram, histogram};
use std::time::Duration;

/// Initialize histogram descriptions
pub fn init() {
    describe_histogram!(
        "filler_fill_duration_seconds",
        "Time for one work item including retries"
    );
    describe_histogram!(
        "filler_pool_acquire_duration_seconds",
        "Time to check out a healthy pooled connection"
    );
    describe_histogram!(
        "filler_insert_batch_duration_seconds",
        "Time to insert one batch of orders"
    );
}

pub fn fill_duration(duration: Duration) {
    histogram!("filler_fill_duration_seconds").record(duration.as_secs_f64());
}

pub fn pool_acquire_duration(duration: Duration) {
    histogram!("filler_pool_acquire_duration_seconds").record(duration.as_secs_f64());
}

pub fn insert_batch_duration(duration: Duration) {
    histogram!("filler_insert_batch_duration_seconds").record(duration.as_secs_f64());
}
