use metrics::{counter, describe_counter};

/// Initialize counter descriptions
pub fn init() {
    describe_counter!("filler_fills_total", "Fill transactions that wrote a fill row");
    describe_counter!(
        "filler_fill_skips_total",
        "Fill attempts that found the order absent or already filled"
    );
    describe_counter!(
        "filler_fill_failures_total",
        "Work items that ended in a fatal error"
    );
    describe_counter!(
        "filler_retries_total",
        "Retries of retryable database errors, by reason"
    );
    describe_counter!(
        "filler_retries_exhausted_total",
        "Operations that failed after exhausting their retries"
    );
    describe_counter!(
        "filler_pool_discarded_total",
        "Pooled connections discarded as closed or unresponsive"
    );
    describe_counter!("filler_orders_inserted_total", "Orders inserted by the loader");
}

pub fn fills(count: u64) {
    counter!("filler_fills_total").increment(count);
}

pub fn fill_skips(count: u64, reason: &'static str) {
    counter!("filler_fill_skips_total", "reason" => reason).increment(count);
}

pub fn fill_failures(count: u64) {
    counter!("filler_fill_failures_total").increment(count);
}

pub fn retries(reason: &'static str) {
    counter!("filler_retries_total", "reason" => reason).increment(1);
}

pub fn retries_exhausted(operation: &'static str) {
    counter!("filler_retries_exhausted_total", "operation" => operation).increment(1);
}

pub fn pool_discarded(count: u64) {
    counter!("filler_pool_discarded_total").increment(count);
}

pub fn orders_inserted(count: u64) {
    counter!("filler_orders_inserted_total").increment(count);
}
