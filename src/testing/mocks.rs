//! # 测试 Mock 对象
//!
//! `MockBackend` 由 mockall 生成，用于精确控制后端返回值；
//! `FlakyBackend` 包装真实的内存后端，可随时切换为故障状态。

use async_trait::async_trait;
use mockall::mock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::cache::{BackendInfo, CacheBackend, KeyKind, MemoryCache};
use crate::error::{CacheError, Result};

mock! {
    pub Backend {}

    #[async_trait]
    impl CacheBackend for Backend {
        fn name(&self) -> &'static str;
        async fn ping(&self) -> Result<bool>;
        async fn get_raw(&self, key: &str) -> Result<Option<String>>;
        async fn set_raw(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool>;
        async fn set_raw_nx(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool>;
        async fn delete(&self, key: &str) -> Result<bool>;
        async fn delete_many(&self, keys: &[String]) -> Result<u64>;
        async fn delete_pattern(&self, pattern: &str) -> Result<u64>;
        async fn exists(&self, key: &str) -> Result<bool>;
        async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
        async fn ttl(&self, key: &str) -> Result<Option<i64>>;
        async fn keys(&self, pattern: &str) -> Result<Vec<String>>;
        async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)>;
        async fn incr(&self, key: &str, amount: i64) -> Result<Option<i64>>;
        async fn hset_raw(&self, key: &str, field: &str, value: String) -> Result<bool>;
        async fn hget_raw(&self, key: &str, field: &str) -> Result<Option<String>>;
        async fn hgetall_raw(&self, key: &str) -> Result<HashMap<String, String>>;
        async fn hincrby(&self, key: &str, field: &str, amount: i64) -> Result<Option<i64>>;
        async fn key_type(&self, key: &str) -> Result<Option<KeyKind>>;
        async fn memory_usage(&self, key: &str) -> Result<Option<u64>>;
        async fn flushdb(&self) -> Result<bool>;
        async fn info(&self) -> Result<BackendInfo>;
    }
}

/// 可模拟故障的后端
///
/// 正常状态下所有调用转发给内部的 [`MemoryCache`]；
/// 故障状态下每个调用都返回 [`CacheError::Unavailable`]。
/// 还可以为写入设置固定延迟，模拟慢速网络。
#[derive(Default)]
pub struct FlakyBackend {
    inner: MemoryCache,
    down: AtomicBool,
    failed_calls: AtomicUsize,
    write_delay_ms: AtomicU64,
}

impl FlakyBackend {
    /// 创建包装指定容量内存缓存的后端
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: MemoryCache::new(max_size),
            down: AtomicBool::new(false),
            failed_calls: AtomicUsize::new(0),
            write_delay_ms: AtomicU64::new(0),
        }
    }

    /// 设置每次写入前的延迟
    pub fn set_write_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.write_delay_ms.store(millis, Ordering::SeqCst);
    }

    async fn delay_write(&self) {
        let millis = self.write_delay_ms.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    /// 切换故障状态
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// 故障期间被拒绝的调用数
    #[must_use]
    pub fn failed_calls(&self) -> usize {
        self.failed_calls.load(Ordering::SeqCst)
    }

    fn guard(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            self.failed_calls.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::unavailable("模拟后端故障"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheBackend for FlakyBackend {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn ping(&self) -> Result<bool> {
        self.guard()?;
        self.inner.ping().await
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        self.guard()?;
        self.inner.get_raw(key).await
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool> {
        self.guard()?;
        self.delay_write().await;
        self.inner.set_raw(key, value, ttl).await
    }

    async fn set_raw_nx(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool> {
        self.guard()?;
        self.delay_write().await;
        self.inner.set_raw_nx(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.guard()?;
        self.inner.delete(key).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        self.guard()?;
        self.inner.delete_many(keys).await
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        self.guard()?;
        self.inner.delete_pattern(pattern).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.guard()?;
        self.inner.exists(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.guard()?;
        self.inner.expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<i64>> {
        self.guard()?;
        self.inner.ttl(key).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.guard()?;
        self.inner.keys(pattern).await
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        self.guard()?;
        self.inner.scan(cursor, pattern, count).await
    }

    async fn incr(&self, key: &str, amount: i64) -> Result<Option<i64>> {
        self.guard()?;
        self.inner.incr(key, amount).await
    }

    async fn hset_raw(&self, key: &str, field: &str, value: String) -> Result<bool> {
        self.guard()?;
        self.inner.hset_raw(key, field, value).await
    }

    async fn hget_raw(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.guard()?;
        self.inner.hget_raw(key, field).await
    }

    async fn hgetall_raw(&self, key: &str) -> Result<HashMap<String, String>> {
        self.guard()?;
        self.inner.hgetall_raw(key).await
    }

    async fn hincrby(&self, key: &str, field: &str, amount: i64) -> Result<Option<i64>> {
        self.guard()?;
        self.inner.hincrby(key, field, amount).await
    }

    async fn key_type(&self, key: &str) -> Result<Option<KeyKind>> {
        self.guard()?;
        self.inner.key_type(key).await
    }

    async fn memory_usage(&self, key: &str) -> Result<Option<u64>> {
        self.guard()?;
        self.inner.memory_usage(key).await
    }

    async fn flushdb(&self) -> Result<bool> {
        self.guard()?;
        self.inner.flushdb().await
    }

    async fn info(&self) -> Result<BackendInfo> {
        self.guard()?;
        let mut info = self.inner.info().await?;
        info.backend = self.name().to_string();
        Ok(info)
    }
}
