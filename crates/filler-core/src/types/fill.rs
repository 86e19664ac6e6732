use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Opaque attributes stamped on every fill row
pub const FILL_ATTRS: [&str; 3] = ["x", "y", "z"];

/// A fill ready to be written; the store assigns `fill_id`
#[derive(Debug, Clone, PartialEq)]
pub struct NewFill {
    pub order_id: Uuid,
    pub account_id: i64,
    pub symbol: String,
    pub fill_time: DateTime<Utc>,
    pub shares_filled: i32,
    pub total_cost_of_fill: Decimal,
    pub price_at_time_of_fill: Decimal,
    pub fill_attr_0: String,
    pub fill_attr_1: String,
    pub fill_attr_2: String,
}

impl NewFill {
    pub fn with_default_attrs(
        order_id: Uuid,
        account_id: i64,
        symbol: String,
        fill_time: DateTime<Utc>,
        shares_filled: i32,
        total_cost_of_fill: Decimal,
        price_at_time_of_fill: Decimal,
    ) -> Self {
        Self {
            order_id,
            account_id,
            symbol,
            fill_time,
            shares_filled,
            total_cost_of_fill,
            price_at_time_of_fill,
            fill_attr_0: FILL_ATTRS[0].to_string(),
            fill_attr_1: FILL_ATTRS[1].to_string(),
            fill_attr_2: FILL_ATTRS[2].to_string(),
        }
    }

    /// Attach the store-generated identifier
    pub fn into_fill(self, fill_id: Uuid) -> Fill {
        Fill {
            fill_id,
            order_id: self.order_id,
            account_id: self.account_id,
            symbol: self.symbol,
            fill_time: self.fill_time,
            shares_filled: self.shares_filled,
            total_cost_of_fill: self.total_cost_of_fill,
            price_at_time_of_fill: self.price_at_time_of_fill,
            fill_attr_0: self.fill_attr_0,
            fill_attr_1: self.fill_attr_1,
            fill_attr_2: self.fill_attr_2,
        }
    }
}

/// An immutable, committed partial execution of an order
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub fill_id: Uuid,
    pub order_id: Uuid,
    pub account_id: i64,
    pub symbol: String,
    pub fill_time: DateTime<Utc>,
    pub shares_filled: i32,
    pub total_cost_of_fill: Decimal,
    pub price_at_time_of_fill: Decimal,
    pub fill_attr_0: String,
    pub fill_attr_1: String,
    pub fill_attr_2: String,
}

/// Why a fill attempt wrote nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    AlreadyFilled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotFound => "not_found",
            SkipReason::AlreadyFilled => "already_filled",
        }
    }
}

/// Result of one fill attempt
#[derive(Debug, Clone, PartialEq)]
pub enum FillOutcome {
    Filled(Fill),
    Skipped(SkipReason),
}

impl FillOutcome {
    pub fn is_filled(&self) -> bool {
        matches!(self, FillOutcome::Filled(_))
    }

    pub fn fill(&self) -> Option<&Fill> {
        match self {
            FillOutcome::Filled(fill) => Some(fill),
            FillOutcome::Skipped(_) => None,
        }
    }
}
