use metrics::{describe_gauge, gauge};

/// Initialize gauge descriptions
pub fn init() {
    describe_gauge!("filler_progress_processed", "Work items processed so far");
    describe_gauge!("filler_progress_remaining", "Work items not yet processed");
    describe_gauge!("filler_throughput_per_second", "Work items processed per second");
    describe_gauge!("filler_pool_connections", "Live pooled database connections");
    describe_gauge!("filler_pool_idle_connections", "Idle pooled database connections");
}

/// Set progress gauges
pub fn set_progress(processed: u64, remaining: u64, per_second: f64) {
    gauge!("filler_progress_processed").set(processed as f64);
    gauge!("filler_progress_remaining").set(remaining as f64);
    gauge!("filler_throughput_per_second").set(per_second);
}

/// Set connection pool gauges
pub fn set_pool_connections(live: u32, idle: usize) {
    gauge!("filler_pool_connections").set(live as f64);
    gauge!("filler_pool_idle_connections").set(idle as f64);
}
