use std::fmt;
use uuid::Uuid;

/// One fill attempt against one order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub order_id: Uuid,
    pub account_id: i64,
}

impl WorkItem {
    pub fn new(order_id: Uuid, account_id: i64) -> Self {
        Self {
            order_id,
            account_id,
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.order_id, self.account_id)
    }
}
