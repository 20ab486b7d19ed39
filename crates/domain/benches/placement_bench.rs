use common::{CustomerId, Money, ProductId, WarehouseId};
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use domain::{InventoryLedger, OrderCoordinator, RawOrder};
use store::{InMemoryProductCatalog, InMemoryStore, Product, StockKey};

const WAREHOUSE: WarehouseId = WarehouseId::new(1);

async fn coordinator_with_stock(
    products: i64,
    stock: i64,
) -> OrderCoordinator<InMemoryStore, InMemoryProductCatalog> {
    let store = InMemoryStore::new();
    let catalog = InMemoryProductCatalog::new();
    for id in 1..=products {
        catalog.insert(Product::new(
            ProductId::new(id),
            format!("Product {id}"),
            Money::from_cents(100 * id),
        ));
    }

    let coordinator = OrderCoordinator::new(store, catalog);
    for id in 1..=products {
        coordinator
            .ledger()
            .register(StockKey::new(ProductId::new(id), WAREHOUSE), stock)
            .await
            .unwrap();
    }
    coordinator
}

fn cart(products: i64) -> RawOrder {
    (1..=products).fold(RawOrder::new(CustomerId::new(1), WAREHOUSE), |raw, id| {
        raw.with_product(ProductId::new(id), 1)
    })
}

fn bench_place_single_line(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("placement/single_line", |b| {
        b.iter_batched(
            || rt.block_on(coordinator_with_stock(1, 100)),
            |coordinator| {
                rt.block_on(async move {
                    coordinator.place_order(cart(1)).await.unwrap();
                });
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_place_ten_lines(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("placement/ten_lines", |b| {
        b.iter_batched(
            || rt.block_on(coordinator_with_stock(10, 100)),
            |coordinator| {
                rt.block_on(async move {
                    coordinator.place_order(cart(10)).await.unwrap();
                });
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_rejected_placement(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let coordinator = rt.block_on(coordinator_with_stock(1, 0));

    // Rejections leave no rows behind, so one fixture serves every iteration.
    c.bench_function("placement/insufficient_stock", |b| {
        b.iter(|| {
            rt.block_on(async {
                coordinator.place_order(cart(1)).await.unwrap_err();
            });
        });
    });
}

fn bench_standalone_reduce(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let key = StockKey::new(ProductId::new(1), WAREHOUSE);

    c.bench_function("ledger/reduce", |b| {
        b.iter_batched(
            || {
                let ledger = InventoryLedger::new(InMemoryStore::new());
                rt.block_on(ledger.register(key, 100)).unwrap();
                ledger
            },
            |ledger| {
                rt.block_on(async move {
                    ledger.reduce(key, 1).await.unwrap();
                });
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_place_single_line,
    bench_place_ten_lines,
    bench_rejected_placement,
    bench_standalone_reduce
);
criterion_main!(benches);
