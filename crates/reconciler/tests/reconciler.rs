//! Integration tests for the reconciliation loop.

use std::time::Duration;

use reconciler::Reconciler;
use saga::OrderCancellation;
use store::{
    CompensationState, CustomerId, Database, InMemoryStore, Money, NewCompensation, NewOrder,
    NewOrderedItem, OrderId, OrderStatus, ProductId, StockKey, StoreTransaction, WarehouseId,
};

const INTERVAL: Duration = Duration::from_secs(30);

fn key() -> StockKey {
    StockKey::new(ProductId::new(101), WarehouseId::new(1))
}

/// An order of 3 units whose deletion committed but whose stock was never
/// returned, as left behind by a crash between the two saga phases.
async fn interrupted_deletion(store: &InMemoryStore) -> OrderId {
    let mut tx = store.begin().await.unwrap();
    tx.insert_inventory(key(), 2).await.unwrap();
    let order = tx
        .insert_order(NewOrder {
            customer_id: CustomerId::new(1),
            warehouse_id: WarehouseId::new(1),
            status: OrderStatus::Pending,
            total_cost: Money::from_cents(3000),
            total_fees: Money::zero(),
            total_checkout: Money::from_cents(3000),
        })
        .await
        .unwrap();
    tx.insert_ordered_item(NewOrderedItem {
        order_id: order.id,
        product_id: ProductId::new(101),
        quantity: 3,
        unit_price: Money::from_cents(1000),
        total_price: Money::from_cents(3000),
    })
    .await
    .unwrap();
    tx.insert_compensation(NewCompensation {
        order_id: order.id,
        warehouse_id: WarehouseId::new(1),
        items: vec![(ProductId::new(101), 3)],
    })
    .await
    .unwrap();
    tx.soft_delete_order(order.id, OrderStatus::Cancelled)
        .await
        .unwrap();
    tx.soft_delete_ordered_items(order.id).await.unwrap();
    tx.commit().await.unwrap();
    order.id
}

fn reconciler(store: &InMemoryStore) -> Reconciler<InMemoryStore> {
    Reconciler::new(OrderCancellation::new(store.clone()), INTERVAL)
}

async fn stock(store: &InMemoryStore) -> i64 {
    store.get_inventory(key()).await.unwrap().unwrap().stock
}

#[tokio::test]
async fn test_run_once_finishes_interrupted_deletions() {
    let store = InMemoryStore::new();
    interrupted_deletion(&store).await;

    let summary = reconciler(&store).run_once().await.unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(stock(&store).await, 5);
    assert!(store.list_open_compensations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_second_pass_has_nothing_to_do() {
    let store = InMemoryStore::new();
    interrupted_deletion(&store).await;
    let reconciler = reconciler(&store);

    reconciler.run_once().await.unwrap();
    let summary = reconciler.run_once().await.unwrap();

    assert_eq!(summary.total(), 0);
    assert_eq!(stock(&store).await, 5);
}

#[tokio::test]
async fn test_failed_release_stays_open_for_next_pass() {
    let store = InMemoryStore::new();
    interrupted_deletion(&store).await;
    let reconciler = reconciler(&store);

    store.set_fail_on_increment(ProductId::new(101), true);
    let summary = reconciler.run_once().await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(stock(&store).await, 2);

    let open = store.list_open_compensations().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].state, CompensationState::Failed);

    store.set_fail_on_increment(ProductId::new(101), false);
    let summary = reconciler.run_once().await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(stock(&store).await, 5);
}

#[tokio::test(start_paused = true)]
async fn test_run_ticks_until_shutdown() {
    let store = InMemoryStore::new();
    interrupted_deletion(&store).await;

    // Ticks at 0s, 30s and 60s; shutdown lands between the third and fourth.
    let shutdown = tokio::time::sleep(INTERVAL * 2 + Duration::from_secs(5));
    let passes = reconciler(&store).run(shutdown).await;

    assert_eq!(passes, 3);
    assert_eq!(stock(&store).await, 5);
}

#[tokio::test]
async fn test_run_stops_immediately_when_already_shut_down() {
    let store = InMemoryStore::new();
    interrupted_deletion(&store).await;

    let passes = reconciler(&store).run(std::future::ready(())).await;

    assert_eq!(passes, 0);
    assert_eq!(stock(&store).await, 2);
}
