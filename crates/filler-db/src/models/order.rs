use chrono::{DateTime, Utc};
use filler_core::Order;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Database model for the orders table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbOrder {
    pub account_id: i64,
    /// Primary key
    pub order_id: Uuid,
    pub symbol: String,
    pub order_started: DateTime<Utc>,
    /// Null until the order is fully filled
    pub order_completed: Option<DateTime<Utc>>,
    /// Shares still to be filled
    pub total_shares_purchased: i32,
    /// Cost still outstanding, never negative
    pub total_cost_of_order: Decimal,
    pub attr_0: String,
    pub attr_1: String,
    pub attr_2: String,
}

impl From<DbOrder> for Order {
    fn from(row: DbOrder) -> Self {
        Order {
            account_id: row.account_id,
            order_id: row.order_id,
            symbol: row.symbol,
            order_started: row.order_started,
            order_completed: row.order_completed,
            total_shares_purchased: row.total_shares_purchased,
            total_cost_of_order: row.total_cost_of_order,
            attr_0: row.attr_0,
            attr_1: row.attr_1,
            attr_2: row.attr_2,
        }
    }
}
