//! Performance benchmarks for stash-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use stash_engine::{
    BackendKind, BackupConfig, BackupCoordinator, BackupOptions, CacheConfig, CacheOptions,
    Database, DbConfig, IndexDefinition, IndexEngine, QueryOptions, Record, SearchOptions,
    SortDirection, StoreDefinition,
};
use std::sync::Arc;

fn create_test_config() -> DbConfig {
    DbConfig::new("bench", 1).with_store(
        StoreDefinition::new("users")
            .index(IndexDefinition::new("by_email", "email").unique())
            .index(IndexDefinition::new("by_city", "city")),
    )
}

fn populated(kind: BackendKind, n: usize) -> Arc<Database> {
    let db = Database::open(create_test_config(), kind).unwrap();
    for i in 0..n {
        let record = Record::from_value(json!({
            "id": format!("user_{}", i),
            "name": format!("User {}", i),
            "email": format!("user{}@example.com", i),
            "city": format!("city_{}", i % 10),
            "bio": "enjoys cars, carpentry and card games",
        }))
        .unwrap();
        db.add("users", record).unwrap();
    }
    db
}

fn bench_store_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_operations");

    for kind in [BackendKind::Indexed, BackendKind::Flat] {
        group.bench_with_input(BenchmarkId::new("add", format!("{:?}", kind)), &kind, |b, &kind| {
            let db = Database::open(create_test_config(), kind).unwrap();
            b.iter(|| {
                let record = Record::from_value(json!({"name": "Test User"})).unwrap();
                db.add("users", black_box(record))
            })
        });

        group.bench_with_input(BenchmarkId::new("get", format!("{:?}", kind)), &kind, |b, &kind| {
            let db = populated(kind, 1000);
            b.iter(|| db.get(black_box("users"), black_box("user_500")))
        });

        group.bench_with_input(
            BenchmarkId::new("find_by_index", format!("{:?}", kind)),
            &kind,
            |b, &kind| {
                let db = populated(kind, 1000);
                let value = json!("city_3");
                let options = QueryOptions::default();
                b.iter(|| db.find_by_index("users", "by_city", black_box(&value), &options))
            },
        );
    }

    group.bench_function("get_all_sorted_page", |b| {
        let db = populated(BackendKind::Indexed, 1000);
        let options = QueryOptions::new()
            .order_by("name", SortDirection::Desc)
            .offset(100)
            .limit(20);
        b.iter(|| db.get_all("users", black_box(&options)))
    });

    group.finish();
}

fn bench_index_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_engine");

    for size in [100, 1000, 5000].iter() {
        group.bench_with_input(BenchmarkId::new("build_index", size), size, |b, &size| {
            let db = populated(BackendKind::Indexed, size);
            let engine = IndexEngine::new(db, CacheConfig::default());
            b.iter(|| engine.build_index("users", black_box("city")))
        });
    }

    group.bench_function("optimized_search", |b| {
        let db = populated(BackendKind::Indexed, 1000);
        let engine = IndexEngine::new(db, CacheConfig::default());
        let value = json!("city_7");
        b.iter(|| engine.optimized_search("users", "city", black_box(&value)))
    });

    group.bench_function("cached_query", |b| {
        let db = populated(BackendKind::Indexed, 1000);
        let engine = IndexEngine::new(db.clone(), CacheConfig::default());
        b.iter(|| {
            engine.optimized_query("users:count", CacheOptions::default(), || db.count("users"))
        })
    });

    group.bench_function("full_text_search_fuzzy", |b| {
        let db = populated(BackendKind::Indexed, 1000);
        let engine = IndexEngine::new(db, CacheConfig::default());
        let options = SearchOptions::default().fuzzy().limit(10);
        b.iter(|| engine.full_text_search("users", black_box("card user"), &["name", "bio"], &options))
    });

    group.finish();
}

fn bench_backup(c: &mut Criterion) {
    let mut group = c.benchmark_group("backup");

    for size in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("full_backup", size), size, |b, &size| {
            let db = populated(BackendKind::Indexed, size);
            let backups = BackupCoordinator::new(db, BackupConfig::default());
            let options = BackupOptions::default();
            b.iter(|| backups.create_full_backup(black_box(&options)))
        });
    }

    group.bench_function("verify_1000", |b| {
        let db = populated(BackendKind::Indexed, 1000);
        let backups = BackupCoordinator::new(db, BackupConfig::default());
        let snapshot = backups.create_full_backup(&BackupOptions::default()).unwrap();
        b.iter(|| black_box(&snapshot).verify())
    });

    group.finish();
}

criterion_group!(benches, bench_store_operations, bench_index_engine, bench_backup);
criterion_main!(benches);
