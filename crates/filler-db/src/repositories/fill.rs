use crate::models::DbFill;
use crate::Result;
use filler_core::NewFill;
use sqlx::{PgConnection, Row};
use uuid::Uuid;

pub struct FillRepository;

impl FillRepository {
    /// Insert a fill, returning the generated `fill_id`
    pub async fn insert(conn: &mut PgConnection, fill: &NewFill) -> Result<Uuid> {
        let fill_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO order_fills (order_id, account_id, symbol, fill_time, shares_filled,
                                     total_cost_of_fill, price_at_time_of_fill,
                                     fill_attr_0, fill_attr_1, fill_attr_2)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING fill_id
            "#,
        )
        .bind(fill.order_id)
        .bind(fill.account_id)
        .bind(&fill.symbol)
        .bind(fill.fill_time)
        .bind(fill.shares_filled)
        .bind(fill.total_cost_of_fill)
        .bind(fill.price_at_time_of_fill)
        .bind(&fill.fill_attr_0)
        .bind(&fill.fill_attr_1)
        .bind(&fill.fill_attr_2)
        .fetch_one(&mut *conn)
        .await?;
        Ok(fill_id)
    }

    /// Fills of one order, oldest first
    pub async fn for_order(conn: &mut PgConnection, order_id: Uuid) -> Result<Vec<DbFill>> {
        let results = sqlx::query_as::<_, DbFill>(
            "SELECT * FROM order_fills WHERE order_id = $1 ORDER BY fill_time ASC",
        )
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(results)
    }

    /// Fill count and total shares filled
    pub async fn totals(conn: &mut PgConnection) -> Result<(i64, i64)> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS fills, COALESCE(SUM(shares_filled), 0)::bigint AS shares FROM order_fills",
        )
        .fetch_one(&mut *conn)
        .await?;
        Ok((row.try_get("fills")?, row.try_get("shares")?))
    }
}
