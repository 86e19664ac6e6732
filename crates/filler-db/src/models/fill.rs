use chrono::{DateTime, Utc};
use filler_core::Fill;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Database model for the order_fills table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbFill {
    /// Primary key, generated by the server
    pub fill_id: Uuid,
    pub order_id: Uuid,
    pub account_id: i64,
    pub symbol: String,
    pub fill_time: DateTime<Utc>,
    pub shares_filled: i32,
    pub total_cost_of_fill: Decimal,
    /// Cost per share rounded to cents
    pub price_at_time_of_fill: Decimal,
    pub fill_attr_0: String,
    pub fill_attr_1: String,
    pub fill_attr_2: String,
}

impl From<DbFill> for Fill {
    fn from(row: DbFill) -> Self {
        Fill {
            fill_id: row.fill_id,
            order_id: row.order_id,
            account_id: row.account_id,
            symbol: row.symbol,
            fill_time: row.fill_time,
            shares_filled: row.shares_filled,
            total_cost_of_fill: row.total_cost_of_fill,
            price_at_time_of_fill: row.price_at_time_of_fill,
            fill_attr_0: row.fill_attr_0,
            fill_attr_1: row.fill_attr_1,
            fill_attr_2: row.fill_attr_2,
        }
    }
}
