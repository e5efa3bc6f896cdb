use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;

use gascyl_infra::cache::InventoryCache;
use gascyl_infra::store::InMemoryInventoryStore;
use gascyl_infra::{InventoryConfig, InventoryServices};
use gascyl_inventory::{Category, CategoryStatus, MovementContext, NewCategory};

use tokio::runtime::Runtime;

type Services = InventoryServices<InMemoryInventoryStore>;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

fn setup() -> Services {
    setup_with_ttl(Duration::from_secs(600))
}

/// A zero TTL makes every read fall through to the store.
fn setup_with_ttl(ttl: Duration) -> Services {
    InventoryServices::new(
        Arc::new(InMemoryInventoryStore::new()),
        InventoryCache::in_memory(ttl),
        &InventoryConfig::default(),
    )
}

async fn seed(services: &Services, n: usize) -> Vec<Category> {
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let filled = (i % 50) as i64;
        let category = services
            .catalog
            .create_category(NewCategory {
                name: format!("Category {i}"),
                description: None,
                gas_type: ["Oxygen", "Argon", "CO2", "Nitrogen"][i % 4].to_string(),
                location: format!("Depot {}", i % 7),
                status: CategoryStatus::Active,
                total_quantity: 100,
                filled_quantity: filled,
                empty_quantity: 100 - filled,
                price_cents: 0,
                deposit_cents: 0,
            })
            .await
            .unwrap();
        out.push(category);
    }
    out
}

/// Restock one then sell one, so counters stay stable across iterations.
fn bench_movement_latency(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("movement_latency");

    group.bench_function("restock_then_sale", |b| {
        let services = setup();
        let category = rt.block_on(seed(&services, 1)).remove(0);
        b.iter(|| {
            rt.block_on(async {
                services
                    .movements
                    .restock(category.id, black_box(1), 0, MovementContext::default())
                    .await
                    .unwrap();
                services
                    .movements
                    .sale(category.id, black_box(1), MovementContext::default())
                    .await
                    .unwrap();
            })
        });
    });

    group.finish();
}

fn bench_category_lookup(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("category_lookup");

    group.bench_function("cached", |b| {
        let services = setup();
        let category = rt.block_on(seed(&services, 1)).remove(0);
        rt.block_on(services.queries.category(category.id)).unwrap();
        b.iter(|| rt.block_on(services.queries.category(black_box(category.id))).unwrap());
    });

    group.bench_function("uncached", |b| {
        let services = setup_with_ttl(Duration::ZERO);
        let category = rt.block_on(seed(&services, 1)).remove(0);
        b.iter(|| rt.block_on(services.queries.category(black_box(category.id))).unwrap());
    });

    group.finish();
}

fn bench_summary_rebuild(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("category_summary_rebuild");

    for count in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let services = setup();
            let categories = rt.block_on(seed(&services, count));
            let target = categories[0].id;
            b.iter(|| {
                rt.block_on(async {
                    // each movement invalidates the cached summary
                    services
                        .movements
                        .return_cylinders(target, 1, MovementContext::default())
                        .await
                        .unwrap();
                    black_box(services.queries.category_summary().await.unwrap());
                })
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_movement_latency,
    bench_category_lookup,
    bench_summary_rebuild
);
criterion_main!(benches);
