mod fill;
mod order;
mod work_item;

pub use fill::{Fill, FillOutcome, NewFill, SkipReason};
pub use order::Order;
pub use work_item::WorkItem;

use chrono::{DateTime, Utc};

/// Current wall-clock time in UTC
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}
