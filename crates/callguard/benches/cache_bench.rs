//! Cache hot-path benchmarks
//!
//! Benchmarks lookups, inserts under eviction pressure for each strategy,
//! key fingerprinting and the cached path of the full pipeline.
//!
//! Run with: `cargo bench --bench cache_bench -p callguard`

use std::time::Duration;

use callguard::{
    cache_key, CacheConfig, CallError, CallRequest, CallguardConfig, EvictionStrategy,
    ResilientExecutor, ResponseCache,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

fn cache_with(strategy: EvictionStrategy, max_bytes: usize) -> ResponseCache<String> {
    let config = CacheConfig::builder()
        .strategy(strategy)
        .max_size_bytes(max_bytes)
        .ttl(Duration::from_secs(3600))
        .build()
        .expect("valid config");
    ResponseCache::new(config).expect("cache")
}

// ============================================================================
// Lookups
// ============================================================================

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_get");

    for size in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("hit", size), &size, |b, &size| {
            let cache = cache_with(EvictionStrategy::Lru, usize::MAX);
            for i in 0..size {
                cache.set(format!("key_{i}"), format!("value_{i}"), None, None).expect("set");
            }
            let keys: Vec<String> = (0..size).map(|i| format!("key_{i}")).collect();
            let mut counter = 0usize;
            b.iter(|| {
                let key = &keys[counter % size];
                black_box(cache.get(black_box(key)));
                counter = counter.wrapping_add(1);
            });
        });

        group.bench_with_input(BenchmarkId::new("miss", size), &size, |b, &size| {
            let cache = cache_with(EvictionStrategy::Lru, usize::MAX);
            for i in 0..size {
                cache.set(format!("key_{i}"), format!("value_{i}"), None, None).expect("set");
            }
            b.iter(|| black_box(cache.get(black_box("absent"))));
        });
    }

    group.finish();
}

// ============================================================================
// Inserts under eviction pressure
// ============================================================================

fn bench_set_with_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_set_evicting");

    for strategy in [EvictionStrategy::Lru, EvictionStrategy::Lfu, EvictionStrategy::Fifo] {
        group.throughput(Throughput::Elements(1));
        group.bench_function(BenchmarkId::from_parameter(format!("{strategy:?}")), |b| {
            // Room for roughly 1000 entries of ~20 bytes
            let cache = cache_with(strategy, 20_000);
            let mut counter = 0u64;
            b.iter(|| {
                cache
                    .set(format!("key_{counter}"), format!("value_{counter:010}"), None, None)
                    .expect("set");
                counter = counter.wrapping_add(1);
            });
        });
    }

    group.finish();
}

// ============================================================================
// Key fingerprinting
// ============================================================================

fn bench_generate_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate_key");

    group.bench_function("scalar_parts", |b| {
        b.iter(|| black_box(cache_key!("quote", black_box("AAPL"), 42)));
    });

    let params = json!({
        "symbols": ["AAPL", "MSFT", "GOOG"],
        "range": {"from": "2024-01-01", "to": "2024-12-31"},
        "fields": ["open", "close", "volume"],
    });
    group.bench_function("nested_object", |b| {
        b.iter(|| black_box(cache_key!("history", black_box(&params))));
    });

    group.finish();
}

// ============================================================================
// Pipeline cached path
// ============================================================================

fn bench_executor_cached(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let executor: ResilientExecutor<String> = runtime
        .block_on(ResilientExecutor::from_config(CallguardConfig::default()))
        .expect("executor");

    runtime
        .block_on(executor.execute(CallRequest::cached("hot"), || async {
            Ok::<_, CallError>("cached".to_string())
        }))
        .expect("warm cache");

    c.bench_function("executor_cached_hit", |b| {
        b.to_async(&runtime).iter(|| async {
            executor
                .execute(CallRequest::cached("hot"), || async {
                    Err::<String, _>(CallError::other("not reached"))
                })
                .await
                .expect("hit")
        });
    });

    runtime.block_on(executor.shutdown());
}

criterion_group!(
    benches,
    bench_get,
    bench_set_with_eviction,
    bench_generate_key,
    bench_executor_cached
);
criterion_main!(benches);
