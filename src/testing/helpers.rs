//! # 测试辅助函数
//!
//! 提供通用的测试工具和辅助函数

use std::sync::{Arc, Once};
use tracing::Level;

use crate::cache::{CacheManager, MemoryCache};
use crate::config::RedisConfig;

static INIT: Once = Once::new();

/// 测试用命名空间前缀
pub const TEST_PREFIX: &str = "test_bot";

/// 初始化测试环境
pub fn init_test_env() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// 创建已初始化的内存缓存管理器
pub async fn memory_manager(max_size: usize) -> CacheManager {
    init_test_env();
    let manager = CacheManager::new(Arc::new(MemoryCache::new(max_size)), TEST_PREFIX);
    if let Err(e) = manager.initialize().await {
        panic!("内存缓存初始化失败: {e}");
    }
    manager
}

/// 指向不可达地址的 Redis 配置
#[must_use]
pub fn unreachable_redis_config() -> RedisConfig {
    RedisConfig {
        url: Some("redis://127.0.0.1:1/0".to_string()),
        max_connections: 1,
        connection_timeout: 1,
        connection_retries: 0,
        ..RedisConfig::default()
    }
}

/// 本机测试 Redis 配置，默认使用 15 号库，可用 `TEST_REDIS_URL` 覆盖
#[must_use]
pub fn live_redis_config() -> RedisConfig {
    RedisConfig {
        url: Some(
            std::env::var("TEST_REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string()),
        ),
        database: 15,
        max_connections: 2,
        connection_timeout: 2,
        ..RedisConfig::default()
    }
}
