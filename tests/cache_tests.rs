//! # 缓存系统集成测试
//!
//! 使用内存后端验证管理器的对外行为，不依赖外部 Redis

use electric_bot_cache::cache::{
    CacheBackend, CacheGroup, CacheKeyDeriver, CacheManager, CacheStrategy, CacheType,
    CachedOperation, InvalidateCache, MemoryCache, RedisClient,
};
use electric_bot_cache::testing::{
    TEST_PREFIX, memory_manager, service_objects, unreachable_redis_config,
};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_ttl_end_to_end() {
    let manager = memory_manager(100).await;

    assert!(
        manager
            .set("a", &json!({"x": 1}), Some(Duration::from_secs(1)), CacheType::Json)
            .await
    );
    assert_eq!(manager.get("a", CacheType::Json).await, Some(json!({"x": 1})));
    assert_eq!(manager.ttl("a").await, Some(1));

    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert_eq!(
        manager.get_or("a", CacheType::Json, json!("default")).await,
        json!("default")
    );
    assert_eq!(manager.ttl("a").await, None);
    assert!(!manager.exists("a").await);
}

#[tokio::test(start_paused = true)]
async fn test_keys_without_ttl_persist() {
    let manager = memory_manager(100).await;
    manager.set("forever", &json!("v"), None, CacheType::Json).await;
    manager
        .set("zero", &json!("v"), Some(Duration::ZERO), CacheType::Json)
        .await;

    tokio::time::sleep(Duration::from_secs(7 * 86_400)).await;

    assert_eq!(manager.get("forever", CacheType::Json).await, Some(json!("v")));
    assert_eq!(manager.ttl("forever").await, Some(-1));
    assert_eq!(manager.ttl("zero").await, Some(-1));
}

#[tokio::test(start_paused = true)]
async fn test_reinitialized_manager_keeps_sweeping_expired_keys() {
    let cache = Arc::new(MemoryCache::with_sweep_interval(100, Duration::from_secs(10)));
    let manager = CacheManager::new(cache.clone(), TEST_PREFIX);
    manager.initialize().await.unwrap();
    manager.close().await;
    manager.initialize().await.unwrap();

    assert!(
        manager
            .set("a", &json!(1), Some(Duration::from_secs(1)), CacheType::Json)
            .await
    );
    assert_eq!(cache.len().await, 1);

    // 没有任何读取，只能靠后台清扫移除
    tokio::time::sleep(Duration::from_secs(35)).await;
    tokio::task::yield_now().await;
    assert_eq!(cache.len().await, 0);
}

#[tokio::test]
async fn test_stats_count_every_get_once() {
    let manager = memory_manager(100).await;

    for _ in 0..3 {
        assert_eq!(manager.get("counter", CacheType::Json).await, None);
    }
    manager.put("counter", &json!(1)).await;
    for _ in 0..7 {
        assert!(manager.get("counter", CacheType::Json).await.is_some());
    }

    let stats = manager.get_stats().await;
    assert_eq!(stats.misses, 3);
    assert_eq!(stats.hits, 7);
    assert_eq!(stats.sets, 1);
    assert_eq!(stats.backend, "memory");
    assert!((stats.hit_rate() - 0.7).abs() < 1e-9);
}

#[tokio::test]
async fn test_pagination_covers_list_exactly_once() {
    let manager = memory_manager(100).await;
    let items = service_objects(25);

    let handle = manager
        .cache_pagination("objects", &items, 10, Duration::from_secs(600))
        .await
        .expect("分页缓存失败");
    assert_eq!(handle.metadata.total_pages, 3);
    assert_eq!(handle.metadata.total_items, 25);

    let mut collected = Vec::new();
    for (page, expected_len) in [(1, 10), (2, 10), (3, 5)] {
        let items = manager
            .get_pagination_page(&handle.base_key, page)
            .await
            .expect("页不存在");
        assert_eq!(items.len(), expected_len);
        collected.extend(items);
    }
    assert_eq!(collected, items);
    assert_eq!(manager.get_pagination_page(&handle.base_key, 4).await, None);
}

#[tokio::test]
async fn test_memory_eviction_bound() {
    let cache = MemoryCache::new(50);
    for i in 0..500 {
        cache
            .set_raw(&format!("key:{i}"), i.to_string(), None)
            .await
            .unwrap();
        assert!(cache.len().await <= 50);
    }
    assert_eq!(cache.len().await, 50);
    // 最近写入的键保留
    assert!(cache.exists("key:499").await.unwrap());
    assert!(!cache.exists("key:0").await.unwrap());
}

#[tokio::test]
async fn test_clear_by_pattern_only_touches_matches() {
    let manager = memory_manager(1000).await;
    for i in 0..20 {
        manager.put(&format!("search:{i}"), &json!(i)).await;
        manager.put(&format!("user:{i}"), &json!(i)).await;
    }

    assert_eq!(manager.clear_by_pattern("search:*").await, 20);
    for i in 0..20 {
        assert!(!manager.exists(&format!("search:{i}")).await);
        assert!(manager.exists(&format!("user:{i}")).await);
    }
}

#[rstest]
#[case(json!({"name": "Подстанция №5", "nested": {"list": [1, 2, {"k": null}]}}))]
#[case(json!([true, 1.5, "электричество", []]))]
#[case(json!({"emoji": "⚡", "empty": {}}))]
#[tokio::test]
async fn test_structured_values_round_trip(#[case] value: serde_json::Value) {
    let manager = memory_manager(100).await;
    assert!(manager.set("value", &value, None, CacheType::Json).await);
    assert_eq!(manager.get("value", CacheType::Json).await, Some(value));
}

#[tokio::test]
async fn test_disconnected_redis_is_fail_soft() {
    let client = RedisClient::new(unreachable_redis_config()).expect("URL 合法");
    let manager = CacheManager::new(Arc::new(client), TEST_PREFIX);

    assert!(manager.initialize().await.is_err());
    assert_eq!(
        manager.get_or("k", CacheType::Json, json!("default")).await,
        json!("default")
    );
    assert!(!manager.set("k", &json!(1), None, CacheType::Json).await);
    assert_eq!(manager.clear_by_pattern("*").await, 0);
    assert!(manager.keys("*").await.is_empty());
}

#[tokio::test]
async fn test_cached_operation_with_group_invalidation() {
    let manager = memory_manager(1000).await;
    let calls = Arc::new(AtomicUsize::new(0));

    let load = |region: &'static str| {
        let calls = calls.clone();
        let manager = manager.clone();
        async move {
            CachedOperation::new(
                CacheKeyDeriver::new("electric_bot::services::objects::by_region").arg(region),
            )
            .namespace("objects")
            .strategy(CacheStrategy::ReadWrite)
            .on(&manager)
            .execute(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::convert::Infallible>(vec![format!("{region}-1")])
            })
            .await
        }
    };

    assert_eq!(load("Чуй").await.unwrap(), vec!["Чуй-1"]);
    assert_eq!(load("Чуй").await.unwrap(), vec!["Чуй-1"]);
    assert_eq!(load("Ош").await.unwrap(), vec!["Ош-1"]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let removed = InvalidateCache::whole_namespace("objects")
        .on(&manager)
        .invalidate()
        .await;
    assert_eq!(removed, 2);

    load("Чуй").await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let group = CacheGroup::new("reports", manager.clone());
    manager.put("report:daily", &json!({"rows": 1})).await;
    group.add_key("report:daily").await;
    assert!(group.invalidate_group().await >= 1);
    assert!(!manager.exists("report:daily").await);
}

#[tokio::test]
async fn test_memory_pipeline_executes_in_order() {
    let cache = MemoryCache::new(100);
    let results = cache
        .pipeline()
        .set("a", json!({"v": 1}), None)
        .get("a")
        .delete("a")
        .get("a")
        .execute()
        .await
        .unwrap();

    assert_eq!(
        results,
        vec![json!(true), json!({"v": 1}), json!(true), serde_json::Value::Null]
    );
}
