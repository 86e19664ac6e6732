use crate::models::DbOrder;
use crate::Result;
use chrono::{DateTime, Utc};
use filler_core::Order;
use rust_decimal::Decimal;
use sqlx::{PgConnection, Row};
use uuid::Uuid;

pub struct OrderRepository;

impl OrderRepository {
    /// Lock an order row for the rest of the transaction.
    ///
    /// Returns remaining shares and symbol, or `None` when the order does not
    /// exist.
    pub async fn lock_for_fill(conn: &mut PgConnection, order_id: Uuid) -> Result<Option<(i32, String)>> {
        let row = sqlx::query(
            "SELECT total_shares_purchased, symbol FROM orders WHERE order_id = $1 FOR UPDATE",
        )
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => Ok(Some((
                row.try_get("total_shares_purchased")?,
                row.try_get("symbol")?,
            ))),
            None => Ok(None),
        }
    }

    /// Subtract a fill; completion is stamped only on the transition to zero
    pub async fn apply_fill(
        conn: &mut PgConnection,
        order_id: Uuid,
        shares: i32,
        cost: Decimal,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE orders SET
                total_shares_purchased = total_shares_purchased - $2,
                total_cost_of_order = GREATEST(total_cost_of_order - $3, 0),
                order_completed = CASE
                    WHEN total_shares_purchased - $2 <= 0 AND order_completed IS NULL THEN $4
                    ELSE order_completed
                END
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .bind(shares)
        .bind(cost)
        .bind(at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Get order by ID
    pub async fn get_by_id(conn: &mut PgConnection, order_id: Uuid) -> Result<Option<DbOrder>> {
        let result = sqlx::query_as::<_, DbOrder>("SELECT * FROM orders WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(result)
    }

    /// Bulk insert orders, ignoring ids already present
    pub async fn insert_batch(conn: &mut PgConnection, orders: &[Order]) -> Result<usize> {
        if orders.is_empty() {
            return Ok(0);
        }

        let account_ids: Vec<i64> = orders.iter().map(|o| o.account_id).collect();
        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.order_id).collect();
        let symbols: Vec<&str> = orders.iter().map(|o| o.symbol.as_str()).collect();
        let started: Vec<DateTime<Utc>> = orders.iter().map(|o| o.order_started).collect();
        let completed: Vec<Option<DateTime<Utc>>> =
            orders.iter().map(|o| o.order_completed).collect();
        let shares: Vec<i32> = orders.iter().map(|o| o.total_shares_purchased).collect();
        let costs: Vec<Decimal> = orders.iter().map(|o| o.total_cost_of_order).collect();
        let attr_0s: Vec<&str> = orders.iter().map(|o| o.attr_0.as_str()).collect();
        let attr_1s: Vec<&str> = orders.iter().map(|o| o.attr_1.as_str()).collect();
        let attr_2s: Vec<&str> = orders.iter().map(|o| o.attr_2.as_str()).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO orders (account_id, order_id, symbol, order_started, order_completed,
                                total_shares_purchased, total_cost_of_order, attr_0, attr_1, attr_2)
            SELECT * FROM UNNEST(
                $1::bigint[], $2::uuid[], $3::text[], $4::timestamptz[], $5::timestamptz[],
                $6::int[], $7::numeric[], $8::text[], $9::text[], $10::text[]
            )
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(&account_ids)
        .bind(&order_ids)
        .bind(&symbols)
        .bind(&started)
        .bind(&completed)
        .bind(&shares)
        .bind(&costs)
        .bind(&attr_0s)
        .bind(&attr_1s)
        .bind(&attr_2s)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() as usize)
    }

    /// Order counts: (total, open, completed)
    pub async fn counts(conn: &mut PgConnection) -> Result<(i64, i64, i64)> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE total_shares_purchased > 0) AS open,
                   COUNT(order_completed) AS completed
            FROM orders
            "#,
        )
        .fetch_one(&mut *conn)
        .await?;

        Ok((
            row.try_get("total")?,
            row.try_get("open")?,
            row.try_get("completed")?,
        ))
    }
}
