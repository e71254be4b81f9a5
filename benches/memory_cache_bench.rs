//! # 内存缓存性能基准测试
//!
//! 测试内存后端与缓存管理器热点路径的性能

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use electric_bot_cache::cache::{CacheBackend, CacheKeyDeriver, CacheManager, CacheType, MemoryCache};
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

/// 创建测试用的缓存管理器
fn create_cache_manager(rt: &Runtime, max_size: usize) -> CacheManager {
    rt.block_on(async {
        let manager = CacheManager::new(Arc::new(MemoryCache::new(max_size)), "bench");
        manager.initialize().await.expect("初始化内存缓存失败");
        manager
    })
}

/// 缓存设置操作基准测试
fn bench_cache_set(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let manager = create_cache_manager(&rt, 10_000);

    let test_data = json!({
        "id": 12345,
        "name": "ТП-12345",
        "objects": (1..=10).collect::<Vec<_>>(),
        "updated_at": chrono::Utc::now().to_rfc3339()
    });

    c.bench_function("manager_set_json", |b| {
        b.to_async(&rt).iter(|| async {
            let key = format!("service:object:{}", fastrand::u32(..));
            black_box(
                manager
                    .set(&key, &test_data, Some(Duration::from_secs(3600)), CacheType::Json)
                    .await,
            );
        });
    });
}

/// 缓存命中读取基准测试
fn bench_cache_get(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let manager = create_cache_manager(&rt, 10_000);

    rt.block_on(async {
        for i in 0..1000 {
            manager
                .put(&format!("user:{i}"), &json!({"id": i, "lang": "ru"}))
                .await;
        }
    });

    c.bench_function("manager_get_hit", |b| {
        b.to_async(&rt).iter(|| async {
            let key = format!("user:{}", fastrand::u32(..1000));
            black_box(manager.get(&key, CacheType::Json).await);
        });
    });
}

/// 容量满时的淘汰开销
fn bench_eviction(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("memory_eviction");

    for size in [100_usize, 1_000, 10_000] {
        let cache = MemoryCache::new(size);
        rt.block_on(async {
            for i in 0..size {
                cache.set_raw(&format!("k:{i}"), "v".into(), None).await.unwrap();
            }
        });

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.to_async(&rt).iter(|| async {
                let key = format!("new:{}", fastrand::u64(..));
                black_box(cache.set_raw(&key, "v".into(), None).await.unwrap());
            });
        });
    }
    group.finish();
}

/// 按模式清理基准测试
fn bench_clear_by_pattern(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let manager = create_cache_manager(&rt, 100_000);

    c.bench_function("manager_clear_by_pattern_500", |b| {
        b.to_async(&rt).iter(|| async {
            for i in 0..500 {
                manager.put(&format!("search:{i}"), &json!(i)).await;
            }
            black_box(manager.clear_by_pattern("search:*").await);
        });
    });
}

/// 缓存键派生基准测试
fn bench_key_derivation(c: &mut Criterion) {
    c.bench_function("derive_cached_key", |b| {
        b.iter(|| {
            black_box(
                CacheKeyDeriver::new("electric_bot::services::objects::by_region")
                    .arg(42)
                    .kwarg("region", "Чуй")
                    .kwarg("limit", 20)
                    .derive(),
            )
        });
    });
}

criterion_group!(
    benches,
    bench_cache_set,
    bench_cache_get,
    bench_eviction,
    bench_clear_by_pattern,
    bench_key_derivation
);
criterion_main!(benches);
