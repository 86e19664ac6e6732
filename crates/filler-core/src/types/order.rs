use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::WorkItem;

/// A purchase request that is filled incrementally.
///
/// `total_shares_purchased` and `total_cost_of_order` hold what is still
/// outstanding: every fill subtracts from them, so they only ever decrease.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub account_id: i64,
    pub order_id: Uuid,
    pub symbol: String,
    pub order_started: DateTime<Utc>,
    /// Set once, when the remaining shares first reach zero
    pub order_completed: Option<DateTime<Utc>>,
    pub total_shares_purchased: i32,
    pub total_cost_of_order: Decimal,
    pub attr_0: String,
    pub attr_1: String,
    pub attr_2: String,
}

impl Order {
    /// Work item that targets this order
    pub fn work_item(&self) -> WorkItem {
        WorkItem::new(self.order_id, self.account_id)
    }

    /// Whether a fill against this order would be a no-op
    pub fn is_exhausted(&self) -> bool {
        self.total_shares_purchased <= 0
    }

    pub fn is_completed(&self) -> bool {
        self.order_completed.is_some()
    }

    /// Apply a committed fill in place.
    ///
    /// Shares and cost are decremented (cost floored at zero) and the
    /// completion timestamp is stamped only on the transition to zero shares.
    pub fn apply_fill(&mut self, shares: i32, cost: Decimal, at: DateTime<Utc>) {
        self.total_shares_purchased -= shares;
        self.total_cost_of_order = (self.total_cost_of_order - cost).max(Decimal::ZERO);
        if self.total_shares_purchased <= 0 && self.order_completed.is_none() {
            self.order_completed = Some(at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn order(shares: i32, cost: Decimal) -> Order {
        Order {
            account_id: 7,
            order_id: Uuid::new_v4(),
            symbol: "abc".to_string(),
            order_started: Utc::now(),
            order_completed: None,
            total_shares_purchased: shares,
            total_cost_of_order: cost,
            attr_0: "foo".to_string(),
            attr_1: "bar".to_string(),
            attr_2: "baz".to_string(),
        }
    }

    #[test]
    fn test_apply_fill_completes_on_transition_only() {
        let mut o = order(50, Decimal::new(5000, 2));
        let first = Utc::now();

        o.apply_fill(30, Decimal::new(1000, 2), first);
        assert_eq!(o.total_shares_purchased, 20);
        assert_eq!(o.total_cost_of_order, Decimal::new(4000, 2));
        assert!(o.order_completed.is_none());

        o.apply_fill(20, Decimal::new(1000, 2), first);
        assert_eq!(o.total_shares_purchased, 0);
        assert_eq!(o.order_completed, Some(first));

        // A later stamp never overwrites the completion time
        let later = first + chrono::Duration::seconds(5);
        o.apply_fill(0, Decimal::ZERO, later);
        assert_eq!(o.order_completed, Some(first));
    }

    #[test]
    fn test_apply_fill_floors_cost_at_zero() {
        let mut o = order(10, Decimal::new(150, 2));
        o.apply_fill(1, Decimal::new(9999, 2), Utc::now());
        assert_eq!(o.total_cost_of_order, Decimal::ZERO);
        assert_eq!(o.total_shares_purchased, 9);
    }
}
