//! Runs against a real server only when `TEST_DATABASE_URL` is set.

use chrono::Utc;
use filler_core::{FillOutcome, Order, RandomFillSizer, SkipReason, WorkItem};
use filler_db::{
    ConnectionPool, DatabaseConfig, FillService, LedgerConnection, PgConnectionManager,
    RetryPolicy,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn test_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL").ok()
}

fn order(shares: i32) -> Order {
    Order {
        account_id: 314,
        order_id: Uuid::new_v4(),
        symbol: "tst".to_string(),
        order_started: Utc::now(),
        order_completed: None,
        total_shares_purchased: shares,
        total_cost_of_order: Decimal::new(2500, 2),
        attr_0: "foo".to_string(),
        attr_1: "bar".to_string(),
        attr_2: "baz".to_string(),
    }
}

async fn service(url: String) -> FillService<PgConnectionManager> {
    let config = DatabaseConfig::new(url).sized_for_workers(2);
    let manager = PgConnectionManager::from_config(&config).unwrap();
    let pool = ConnectionPool::connect(manager, config.pool_config())
        .await
        .unwrap();
    let service = FillService::new(
        pool,
        RetryPolicy::default(),
        Arc::new(RandomFillSizer::seeded(11)),
    );
    service.ensure_schema().await.unwrap();
    service
}

#[tokio::test]
async fn test_fills_exhaust_order_in_postgres() {
    let Some(url) = test_url() else {
        return;
    };
    let svc = service(url).await;
    let target = order(150);

    assert_eq!(svc.insert_batch(&[target.clone()]).await.unwrap(), 1);

    let mut filled = 0;
    loop {
        match svc.fill(&target.work_item()).await.unwrap() {
            FillOutcome::Filled(fill) => {
                assert_eq!(fill.symbol, "tst");
                filled += fill.shares_filled;
            }
            FillOutcome::Skipped(reason) => {
                assert_eq!(reason, SkipReason::AlreadyFilled);
                break;
            }
        }
    }
    assert_eq!(filled, 150);

    let mut conn = svc.pool().acquire().await.unwrap();
    let stored = conn.order(target.order_id).await.unwrap().unwrap();
    let fills = conn.fills_for(target.order_id).await.unwrap();
    assert_eq!(stored.total_shares_purchased, 0);
    assert!(stored.total_cost_of_order >= Decimal::ZERO);
    assert_eq!(
        stored.order_completed.map(|t| t.timestamp_micros()),
        fills.last().map(|f| f.fill_time.timestamp_micros())
    );
    assert!(conn.summary().await.unwrap().fills >= fills.len() as i64);
    conn.release();

    svc.shutdown().await;
}

#[tokio::test]
async fn test_unknown_order_is_skipped_in_postgres() {
    let Some(url) = test_url() else {
        return;
    };
    let svc = service(url).await;

    let outcome = svc.fill(&WorkItem::new(Uuid::new_v4(), 1)).await.unwrap();

    assert_eq!(outcome, FillOutcome::Skipped(SkipReason::NotFound));
    svc.shutdown().await;
}

#[tokio::test]
async fn test_abandoned_transaction_discards_session() {
    let Some(url) = test_url() else {
        return;
    };
    let svc = service(url).await;
    let target = order(20);
    svc.insert_batch(&[target.clone()]).await.unwrap();
    let live_before = svc.pool().status().live;

    {
        let mut conn = svc.pool().acquire().await.unwrap();
        let mut tx = conn.begin().await.unwrap();
        assert!(tx.lock_order(target.order_id).await.unwrap().is_some());
        // dropped without commit or rollback
    }
    assert_eq!(svc.pool().status().live, live_before - 1);

    // the row lock went with the session
    let outcome = tokio::time::timeout(Duration::from_secs(10), svc.fill(&target.work_item()))
        .await
        .expect("order row still locked")
        .unwrap();
    assert!(outcome.is_filled());
    svc.shutdown().await;
}
