//! # 缓存管理器
//!
//! 业务代码使用的主要入口：在键前自动加命名空间前缀、维护命中统计，
//! 并在后端原语之上提供 get-or-set、按模式批量清理、命名空间清空和分页缓存。
//!
//! 所有公开操作都是“失败即降级”的：后端错误会被记录并转换为文档约定的默认值
//! （`None`、`false`、`0` 或空集合），不会传播给调用方。只有
//! [`CacheManager::initialize`] 会返回错误。

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::backend::CacheBackend;
use super::codec::CacheType;
use super::stats::{CacheStatsReport, LAST_CLEAR_FIELD, STATS_KEY, StatsCounter};
use crate::error::{CacheError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, lerror, linfo, lwarn};

/// 默认过期时间
pub const DEFAULT_EXPIRE: Duration = Duration::from_secs(3600);

/// 游标扫描每批的键数
pub const SCAN_BATCH: usize = 500;

/// 带命名空间的缓存管理器
#[derive(Clone)]
pub struct CacheManager {
    backend: Arc<dyn CacheBackend>,
    prefix: Arc<str>,
    default_ttl: Duration,
    initialized: Arc<AtomicBool>,
    inflight: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("backend", &self.backend.name())
            .field("prefix", &self.prefix)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl CacheManager {
    /// 创建管理器（需调用 [`initialize`](Self::initialize) 后使用）
    pub fn new(backend: Arc<dyn CacheBackend>, prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self {
            backend,
            prefix: Arc::from(prefix.trim_end_matches(':')),
            default_ttl: DEFAULT_EXPIRE,
            initialized: Arc::new(AtomicBool::new(false)),
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// 设置 [`put`](Self::put) 使用的默认过期时间
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// 命名空间前缀
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// 默认过期时间
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// 底层后端
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// 后端名称
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// 是否已初始化
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// 物理键
    #[must_use]
    pub fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    /// 去掉命名空间前缀；不属于本命名空间时返回 `None`
    #[must_use]
    pub fn strip_prefix<'a>(&self, full_key: &'a str) -> Option<&'a str> {
        full_key
            .strip_prefix(&*self.prefix)
            .and_then(|rest| rest.strip_prefix(':'))
    }

    /// 初始化：检查后端存活并确保统计哈希存在，可重复调用
    pub async fn initialize(&self) -> Result<()> {
        if !self.backend.ping().await? {
            return Err(CacheError::unavailable(format!(
                "{} 后端 ping 失败",
                self.backend.name()
            )));
        }

        let stats_key = self.key(STATS_KEY);
        if !self.backend.exists(&stats_key).await? {
            for counter in StatsCounter::ALL {
                self.backend
                    .hset_raw(&stats_key, counter.field(), "0".to_string())
                    .await?;
            }
            self.backend
                .hset_raw(&stats_key, LAST_CLEAR_FIELD, String::new())
                .await?;
        }

        self.initialized.store(true, Ordering::SeqCst);
        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Cache,
            "initialize",
            "缓存管理器初始化完成",
            backend = self.backend.name(),
            prefix = %self.prefix
        );
        Ok(())
    }

    /// 关闭后端连接，之后需重新初始化
    pub async fn close(&self) {
        self.backend.close().await;
        self.initialized.store(false, Ordering::SeqCst);
        linfo!(
            "system",
            LogStage::Shutdown,
            LogComponent::Cache,
            "close",
            "缓存管理器已关闭",
            backend = self.backend.name()
        );
    }

    /// 后端存活检查
    pub async fn ping(&self) -> bool {
        self.backend.ping().await.unwrap_or(false)
    }

    pub(crate) fn ready(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(CacheError::NotInitialized)
        }
    }

    pub(crate) fn report(&self, operation: &str, key: &str, err: &CacheError) {
        if err.is_unavailable() {
            lwarn!(
                "system",
                LogStage::Cache,
                LogComponent::Cache,
                operation,
                &format!("缓存不可用，已降级: {err}"),
                key = key,
                backend = self.backend.name()
            );
        } else {
            lerror!(
                "system",
                LogStage::Cache,
                LogComponent::Cache,
                operation,
                &format!("缓存操作失败: {err}"),
                key = key,
                backend = self.backend.name()
            );
        }
    }

    async fn bump(&self, counter: StatsCounter, amount: i64) {
        if amount == 0 {
            return;
        }
        if let Err(e) = self
            .backend
            .hincrby(&self.key(STATS_KEY), counter.field(), amount)
            .await
        {
            ldebug!(
                "system",
                LogStage::Cache,
                LogComponent::Cache,
                "update_stats",
                &format!("统计更新失败: {e}"),
                metric = counter.field()
            );
        }
    }

    // ---- 基础读写 ----

    /// 写入值；`expire` 为 `None` 或零表示永不过期
    pub async fn set(
        &self,
        key: &str,
        value: &Value,
        expire: Option<Duration>,
        cache_type: CacheType,
    ) -> bool {
        match self.try_set(key, value, expire, cache_type, true).await {
            Ok(written) => written,
            Err(e) => {
                self.report("set", key, &e);
                false
            }
        }
    }

    /// 以默认过期时间写入 JSON 值
    pub async fn put(&self, key: &str, value: &Value) -> bool {
        self.set(key, value, Some(self.default_ttl), CacheType::Json)
            .await
    }

    /// 仅当键不存在时写入
    pub async fn set_if_absent(
        &self,
        key: &str,
        value: &Value,
        expire: Option<Duration>,
        cache_type: CacheType,
    ) -> bool {
        match self.try_set(key, value, expire, cache_type, false).await {
            Ok(written) => written,
            Err(e) => {
                self.report("set_if_absent", key, &e);
                false
            }
        }
    }

    async fn try_set(
        &self,
        key: &str,
        value: &Value,
        expire: Option<Duration>,
        cache_type: CacheType,
        overwrite: bool,
    ) -> Result<bool> {
        self.ready()?;
        let encoded = cache_type.encode(value)?;
        self.write_raw(key, encoded, expire, overwrite).await
    }

    async fn write_raw(
        &self,
        key: &str,
        encoded: String,
        expire: Option<Duration>,
        overwrite: bool,
    ) -> Result<bool> {
        let full_key = self.key(key);
        let written = if overwrite {
            self.backend.set_raw(&full_key, encoded, expire).await?
        } else {
            self.backend.set_raw_nx(&full_key, encoded, expire).await?
        };
        if written {
            self.bump(StatsCounter::Sets, 1).await;
        }
        Ok(written)
    }

    /// 读取值；未命中返回 `None`
    pub async fn get(&self, key: &str, cache_type: CacheType) -> Option<Value> {
        match self.try_get_raw(key).await {
            Ok(raw) => raw.map(|raw| cache_type.decode(raw)),
            Err(e) => {
                self.report("get", key, &e);
                None
            }
        }
    }

    /// 读取值；未命中或不可用时返回 `default`
    pub async fn get_or(&self, key: &str, cache_type: CacheType, default: Value) -> Value {
        self.get(key, cache_type).await.unwrap_or(default)
    }

    async fn try_get_raw(&self, key: &str) -> Result<Option<String>> {
        self.ready()?;
        let raw = self.backend.get_raw(&self.key(key)).await?;
        let counter = if raw.is_some() {
            StatsCounter::Hits
        } else {
            StatsCounter::Misses
        };
        self.bump(counter, 1).await;
        Ok(raw)
    }

    /// 按 `serde` 类型写入
    ///
    /// 始终写成严格 JSON，字符串也带引号，因此 [`get_as`](Self::get_as) 可以精确还原。
    pub async fn set_as<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        expire: Option<Duration>,
    ) -> bool {
        match serde_json::to_string(value) {
            Ok(encoded) => self.store_encoded("set_as", key, encoded, expire, true).await,
            Err(e) => {
                self.report("set_as", key, &e.into());
                false
            }
        }
    }

    /// 写入已编码的负载，失败时记录日志并返回 `false`
    pub(crate) async fn store_encoded(
        &self,
        operation: &str,
        key: &str,
        encoded: String,
        expire: Option<Duration>,
        overwrite: bool,
    ) -> bool {
        let result = match self.ready() {
            Ok(()) => self.write_raw(key, encoded, expire, overwrite).await,
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| {
            self.report(operation, key, &e);
            false
        })
    }

    /// 按 `serde` 类型读取；反序列化失败视为未命中
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.try_get_raw(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                self.report("get_as", key, &e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                self.report("get_as", key, &e.into());
                None
            }
        }
    }

    /// 写入二进制负载（base64 存储）
    pub async fn set_bytes(&self, key: &str, bytes: &[u8], expire: Option<Duration>) -> bool {
        self.store_encoded("set_bytes", key, BASE64.encode(bytes), expire, true)
            .await
    }

    /// 读取二进制负载
    pub async fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        let raw = match self.try_get_raw(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                self.report("get_bytes", key, &e);
                return None;
            }
        };
        match BASE64.decode(raw.as_bytes()) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                self.report(
                    "get_bytes",
                    key,
                    &CacheError::serialization(format!("base64 解码失败: {e}")),
                );
                None
            }
        }
    }

    /// 删除键
    pub async fn delete(&self, key: &str) -> bool {
        let result = match self.ready() {
            Ok(()) => self.backend.delete(&self.key(key)).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(deleted) => {
                if deleted {
                    self.bump(StatsCounter::Deletes, 1).await;
                }
                deleted
            }
            Err(e) => {
                self.report("delete", key, &e);
                false
            }
        }
    }

    /// 键是否存在
    pub async fn exists(&self, key: &str) -> bool {
        self.soft("exists", key, false, async {
            self.ready()?;
            self.backend.exists(&self.key(key)).await
        })
        .await
    }

    /// 设置过期时间
    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        self.soft("expire", key, false, async {
            self.ready()?;
            self.backend.expire(&self.key(key), ttl).await
        })
        .await
    }

    /// 剩余存活秒数：`Some(-1)` 表示永不过期，`None` 表示不存在或不可用
    pub async fn ttl(&self, key: &str) -> Option<i64> {
        self.soft("ttl", key, None, async {
            self.ready()?;
            self.backend.ttl(&self.key(key)).await
        })
        .await
    }

    /// 自增；值不是整数或不可用时返回 `None`
    pub async fn increment(&self, key: &str, amount: i64) -> Option<i64> {
        self.soft("increment", key, None, async {
            self.ready()?;
            self.backend.incr(&self.key(key), amount).await
        })
        .await
    }

    /// 自减
    pub async fn decrement(&self, key: &str, amount: i64) -> Option<i64> {
        self.soft("decrement", key, None, async {
            self.ready()?;
            self.backend.decr(&self.key(key), amount).await
        })
        .await
    }

    // ---- 哈希 ----

    /// 写入哈希字段
    pub async fn hset(&self, key: &str, field: &str, value: &Value) -> bool {
        self.soft("hset", key, false, async {
            self.ready()?;
            self.backend.hset(&self.key(key), field, value).await
        })
        .await
    }

    /// 读取哈希字段
    pub async fn hget(&self, key: &str, field: &str) -> Option<Value> {
        self.soft("hget", key, None, async {
            self.ready()?;
            self.backend.hget(&self.key(key), field).await
        })
        .await
    }

    /// 读取整个哈希
    pub async fn hgetall(&self, key: &str) -> HashMap<String, Value> {
        self.soft("hgetall", key, HashMap::new(), async {
            self.ready()?;
            self.backend.hgetall(&self.key(key)).await
        })
        .await
    }

    /// 哈希字段自增
    pub async fn hincrby(&self, key: &str, field: &str, amount: i64) -> Option<i64> {
        self.soft("hincrby", key, None, async {
            self.ready()?;
            self.backend.hincrby(&self.key(key), field, amount).await
        })
        .await
    }

    async fn soft<T, F>(&self, operation: &str, key: &str, default: T, op: F) -> T
    where
        F: Future<Output = Result<T>>,
    {
        match op.await {
            Ok(value) => value,
            Err(e) => {
                self.report(operation, key, &e);
                default
            }
        }
    }

    // ---- 扫描与批量操作 ----

    /// 单批游标扫描；返回的键不含命名空间前缀
    pub async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> (u64, Vec<String>) {
        self.soft("scan", pattern, (0, Vec::new()), self.try_scan(cursor, pattern, count))
            .await
    }

    pub(crate) async fn try_scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>)> {
        self.ready()?;
        let (next, keys) = self
            .backend
            .scan(cursor, &self.key(pattern), count)
            .await?;
        let keys = keys
            .iter()
            .filter_map(|key| self.strip_prefix(key).map(str::to_string))
            .collect();
        Ok((next, keys))
    }

    /// 列出匹配模式的键（游标迭代），返回不含前缀的键
    pub async fn keys(&self, pattern: &str) -> Vec<String> {
        let mut keys = Vec::new();
        let mut cursor = 0;
        loop {
            match self.try_scan(cursor, pattern, SCAN_BATCH).await {
                Ok((next, batch)) => {
                    keys.extend(batch);
                    if next == 0 {
                        break;
                    }
                    cursor = next;
                }
                Err(e) => {
                    self.report("keys", pattern, &e);
                    break;
                }
            }
        }
        keys
    }

    /// 逐批扫描并删除匹配的物理键
    async fn purge(&self, full_pattern: &str) -> (u64, Option<CacheError>) {
        let mut deleted = 0;
        let mut cursor = 0;
        loop {
            let batch = match self.backend.scan(cursor, full_pattern, SCAN_BATCH).await {
                Ok(batch) => batch,
                Err(e) => return (deleted, Some(e)),
            };
            let (next, keys) = batch;
            match self.backend.delete_many(&keys).await {
                Ok(count) => deleted += count,
                Err(e) => return (deleted, Some(e)),
            }
            if next == 0 {
                return (deleted, None);
            }
            cursor = next;
        }
    }

    /// 按模式清理（游标扫描，不会一次性加载全部键），返回删除数量
    pub async fn clear_by_pattern(&self, pattern: &str) -> u64 {
        if let Err(e) = self.ready() {
            self.report("clear_by_pattern", pattern, &e);
            return 0;
        }

        let (deleted, error) = self.purge(&self.key(pattern)).await;
        self.bump(StatsCounter::Deletes, i64::try_from(deleted).unwrap_or(i64::MAX))
            .await;
        if let Some(e) = error {
            self.report("clear_by_pattern", pattern, &e);
        }

        ldebug!(
            "system",
            LogStage::Cache,
            LogComponent::Cache,
            "clear_by_pattern",
            &format!("按模式清理 {deleted} 个键"),
            pattern = pattern
        );
        deleted
    }

    /// 清空本命名空间下的全部键（不影响库中其他键）
    ///
    /// `confirmation` 由调用层负责获取，这里仅记录日志，不做拦截。
    pub async fn clear_all(&self, confirmation: bool) -> bool {
        if let Err(e) = self.ready() {
            self.report("clear_all", "*", &e);
            return false;
        }
        if !confirmation {
            lwarn!(
                "system",
                LogStage::Maintenance,
                LogComponent::Cache,
                "clear_all",
                "未经确认清空命名空间",
                prefix = %self.prefix
            );
        }

        let (deleted, error) = self.purge(&self.key("*")).await;
        if let Some(e) = error {
            self.report("clear_all", "*", &e);
            return false;
        }

        self.bump(StatsCounter::Clears, 1).await;
        let stats_key = self.key(STATS_KEY);
        let now = chrono::Utc::now().to_rfc3339();
        if let Err(e) = self.backend.hset_raw(&stats_key, LAST_CLEAR_FIELD, now).await {
            self.report("clear_all", STATS_KEY, &e);
        }

        linfo!(
            "system",
            LogStage::Maintenance,
            LogComponent::Cache,
            "clear_all",
            &format!("命名空间已清空，删除 {deleted} 个键"),
            prefix = %self.prefix
        );
        true
    }

    /// 统计报告：持久化计数器 + 后端实时信息
    pub async fn get_stats(&self) -> CacheStatsReport {
        if let Err(e) = self.ready() {
            self.report("get_stats", STATS_KEY, &e);
            return CacheStatsReport {
                backend: self.backend.name().to_string(),
                memory_used: "N/A".to_string(),
                ..CacheStatsReport::default()
            };
        }

        let hash = self
            .backend
            .hgetall_raw(&self.key(STATS_KEY))
            .await
            .unwrap_or_else(|e| {
                self.report("get_stats", STATS_KEY, &e);
                HashMap::new()
            });
        let mut report = CacheStatsReport::from_hash(&hash);
        report.backend = self.backend.name().to_string();

        match self.backend.info().await {
            Ok(info) => {
                report.memory_used = info.memory_used;
                report.total_keys = info.total_keys;
            }
            Err(e) => {
                self.report("get_stats", "info", &e);
                report.memory_used = "N/A".to_string();
            }
        }

        report.namespace_keys = self.count_keys("*").await;
        report
    }

    /// 统计匹配模式的键数（游标迭代）
    pub async fn count_keys(&self, pattern: &str) -> u64 {
        let mut total = 0;
        let mut cursor = 0;
        loop {
            match self.try_scan(cursor, pattern, SCAN_BATCH).await {
                Ok((next, batch)) => {
                    total += batch.len() as u64;
                    if next == 0 {
                        break;
                    }
                    cursor = next;
                }
                Err(e) => {
                    self.report("count_keys", pattern, &e);
                    break;
                }
            }
        }
        total
    }

    // ---- get-or-set ----

    /// 未命中时调用 `getter` 生成值，结果非 `None` 时写入缓存
    ///
    /// 不提供跨调用的互斥：并发的未命中调用可能各自执行一次 `getter`。
    pub async fn get_or_set<F, Fut>(
        &self,
        key: &str,
        getter: F,
        expire: Option<Duration>,
        cache_type: CacheType,
    ) -> Option<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<Value>>,
    {
        if let Some(cached) = self.get(key, cache_type).await {
            return Some(cached);
        }

        let value = getter().await?;
        self.set(key, &value, expire, cache_type).await;
        Some(value)
    }

    /// 与 [`get_or_set`](Self::get_or_set) 相同，但同一进程内对同一键的并发未命中只会执行一次 `getter`
    pub async fn get_or_set_single_flight<F, Fut>(
        &self,
        key: &str,
        getter: F,
        expire: Option<Duration>,
        cache_type: CacheType,
    ) -> Option<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<Value>>,
    {
        if let Some(cached) = self.get(key, cache_type).await {
            return Some(cached);
        }

        let lock = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;
            // 持锁期间再次确认，等待者直接读取先行者写入的值
            let cached = match self.ready() {
                Ok(()) => self
                    .backend
                    .get_raw(&self.key(key))
                    .await
                    .ok()
                    .flatten()
                    .map(|raw| cache_type.decode(raw)),
                Err(_) => None,
            };
            match cached {
                Some(value) => Some(value),
                None => match getter().await {
                    Some(value) => {
                        self.set(key, &value, expire, cache_type).await;
                        Some(value)
                    }
                    None => None,
                },
            }
        };

        self.inflight
            .remove_if(key, |_, entry| Arc::strong_count(entry) <= 2);
        result
    }
}
