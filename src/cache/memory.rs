//! # 内存缓存
//!
//! 与 Redis 后端语义一致的进程内缓存，用于测试或 Redis 不可用时的退化运行。
//!
//! - 字符串键按访问顺序维护（近似 LRU），超出容量时淘汰最久未使用的键
//! - 过期采用“访问时惰性检查 + 后台定期清扫”两种机制
//! - 所有读写共用同一把异步锁

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::backend::{BackendInfo, CacheBackend, KeyKind, effective_ttl};
use super::codec::{decode_tagged, encode_tagged};
use super::inspector::format_bytes;
use crate::error::Result;
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, lwarn};

/// 默认最大条目数
pub const DEFAULT_MAX_SIZE: usize = 10_000;

/// 默认清扫间隔
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
    seq: u64,
}

#[derive(Debug, Default)]
struct HashSlot {
    fields: HashMap<String, String>,
    expires_at: Option<Instant>,
    seq: u64,
}

fn is_expired(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.is_some_and(|at| at <= now)
}

fn remaining_secs(expires_at: Option<Instant>, now: Instant) -> i64 {
    expires_at.map_or(-1, |at| {
        let millis = at.saturating_duration_since(now).as_millis();
        i64::try_from(millis.div_ceil(1000)).unwrap_or(i64::MAX)
    })
}

/// 简单模式匹配：仅支持末尾 `*` 的前缀匹配，其余视为精确匹配
pub(crate) fn matches_pattern(key: &str, pattern: &str) -> bool {
    pattern
        .strip_suffix('*')
        .map_or(key == pattern, |prefix| key.starts_with(prefix))
}

#[derive(Debug, Default)]
struct MemoryStore {
    // 顺序即访问顺序，队首最久未使用
    strings: IndexMap<String, Entry>,
    hashes: HashMap<String, HashSlot>,
    next_seq: u64,
}

impl MemoryStore {
    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// 未过期字符串键的下标；已过期的键会被立即移除
    fn live_index(&mut self, key: &str, now: Instant) -> Option<usize> {
        let index = self.strings.get_index_of(key)?;
        if is_expired(self.strings[index].expires_at, now) {
            self.strings.shift_remove_index(index);
            return None;
        }
        Some(index)
    }

    fn live_hash(&mut self, key: &str, now: Instant) -> Option<&mut HashSlot> {
        if self
            .hashes
            .get(key)
            .is_some_and(|slot| is_expired(slot.expires_at, now))
        {
            self.hashes.remove(key);
            return None;
        }
        self.hashes.get_mut(key)
    }

    fn touch(&mut self, index: usize) -> usize {
        let last = self.strings.len() - 1;
        self.strings.move_index(index, last);
        last
    }

    fn insert(&mut self, key: &str, value: String, expires_at: Option<Instant>) {
        let seq = match self.strings.get(key) {
            Some(existing) => existing.seq,
            None => self.bump_seq(),
        };
        let (index, _) = self.strings.insert_full(
            key.to_string(),
            Entry {
                value,
                expires_at,
                seq,
            },
        );
        self.touch(index);
    }

    fn enforce_size_limit(&mut self, max_size: usize) -> usize {
        let mut evicted = 0;
        while self.strings.len() > max_size {
            self.strings.shift_remove_index(0);
            evicted += 1;
        }
        evicted
    }

    fn remove(&mut self, key: &str) -> bool {
        let scalar = self.strings.shift_remove(key).is_some();
        let hash = self.hashes.remove(key).is_some();
        scalar || hash
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.strings.len() + self.hashes.len();
        self.strings.retain(|_, entry| !is_expired(entry.expires_at, now));
        self.hashes.retain(|_, slot| !is_expired(slot.expires_at, now));
        before - (self.strings.len() + self.hashes.len())
    }

    /// 匹配模式且未过期的键，按创建序号排序
    fn matching(&self, pattern: &str, now: Instant) -> Vec<(u64, String)> {
        let strings = self
            .strings
            .iter()
            .filter(|(_, entry)| !is_expired(entry.expires_at, now))
            .map(|(key, entry)| (entry.seq, key));
        let hashes = self
            .hashes
            .iter()
            .filter(|(key, slot)| {
                !is_expired(slot.expires_at, now) && !self.strings.contains_key(key.as_str())
            })
            .map(|(key, slot)| (slot.seq, key));

        let mut keys: Vec<(u64, String)> = strings
            .chain(hashes)
            .filter(|(_, key)| matches_pattern(key, pattern))
            .map(|(seq, key)| (seq, key.clone()))
            .collect();
        keys.sort_unstable_by_key(|(seq, _)| *seq);
        keys
    }
}

/// 进程内缓存后端
pub struct MemoryCache {
    store: Arc<Mutex<MemoryStore>>,
    max_size: usize,
    sweep_interval: Duration,
    // 运行中的清扫任务的取消令牌，`None` 表示未运行
    sweeper: std::sync::Mutex<Option<CancellationToken>>,
}

impl MemoryCache {
    /// 创建内存缓存，后台清扫间隔为 60 秒
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self::with_sweep_interval(max_size, DEFAULT_SWEEP_INTERVAL)
    }

    /// 创建内存缓存并指定清扫间隔
    ///
    /// 不在 tokio 运行时内调用时暂不启动后台清扫，首次 `ping` 时再启动。
    #[must_use]
    pub fn with_sweep_interval(max_size: usize, sweep_interval: Duration) -> Self {
        let cache = Self {
            store: Arc::new(Mutex::new(MemoryStore::default())),
            max_size: max_size.max(1),
            sweep_interval,
            sweeper: std::sync::Mutex::new(None),
        };

        if tokio::runtime::Handle::try_current().is_ok() {
            cache.start_sweep();
        } else {
            lwarn!(
                "system",
                LogStage::Startup,
                LogComponent::MemoryCache,
                "sweep_deferred",
                "当前不在 tokio 运行时中，后台过期清扫推迟到首次 ping"
            );
        }

        cache
    }

    /// 启动后台清扫；已在运行时不做任何事，返回是否新启动
    ///
    /// 必须在 tokio 运行时内调用。
    fn start_sweep(&self) -> bool {
        let mut sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if sweeper.as_ref().is_some_and(|token| !token.is_cancelled()) {
            return false;
        }
        let token = CancellationToken::new();
        tokio::spawn(sweep_loop(
            Arc::downgrade(&self.store),
            self.sweep_interval,
            token.clone(),
        ));
        *sweeper = Some(token);
        true
    }

    /// 后台清扫是否在运行
    #[must_use]
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    /// 最大条目数
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// 当前字符串键数量（含尚未清扫的过期键）
    pub async fn len(&self) -> usize {
        self.store.lock().await.strings.len()
    }

    /// 是否为空
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 立即清扫过期键，返回清理数量
    pub async fn cleanup_expired(&self) -> usize {
        self.store.lock().await.purge_expired(Instant::now())
    }

    /// 停止后台清扫任务；之后的 `ping` 会重新启动
    pub fn shutdown(&self) {
        let token = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            token.cancel();
        }
    }

    /// 创建批量命令管道
    #[must_use]
    pub const fn pipeline(&self) -> MemoryPipeline<'_> {
        MemoryPipeline {
            cache: self,
            commands: Vec::new(),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE)
    }
}

impl Drop for MemoryCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn sweep_loop(store: Weak<Mutex<MemoryStore>>, every: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(store) = store.upgrade() else { break };
                let removed = store.lock().await.purge_expired(Instant::now());
                if removed > 0 {
                    ldebug!(
                        "system",
                        LogStage::BackgroundTask,
                        LogComponent::MemoryCache,
                        "sweep_expired",
                        &format!("清扫过期键 {removed} 个")
                    );
                }
            }
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<bool> {
        if self.start_sweep() {
            ldebug!(
                "system",
                LogStage::Startup,
                LogComponent::MemoryCache,
                "sweep_started",
                "后台过期清扫已启动",
                interval_secs = self.sweep_interval.as_secs()
            );
        }
        Ok(true)
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let mut store = self.store.lock().await;
        let Some(index) = store.live_index(key, Instant::now()) else {
            return Ok(None);
        };
        let index = store.touch(index);
        Ok(Some(store.strings[index].value.clone()))
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool> {
        let now = Instant::now();
        let expires_at = effective_ttl(ttl).map(|ttl| now + ttl);
        let mut store = self.store.lock().await;
        store.insert(key, value, expires_at);
        let evicted = store.enforce_size_limit(self.max_size);
        if evicted > 0 {
            ldebug!(
                "system",
                LogStage::Cache,
                LogComponent::MemoryCache,
                "evict",
                &format!("超出容量，淘汰 {evicted} 个键"),
                max_size = self.max_size
            );
        }
        Ok(true)
    }

    async fn set_raw_nx(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool> {
        let now = Instant::now();
        let mut store = self.store.lock().await;
        if store.live_index(key, now).is_some() {
            return Ok(false);
        }
        store.insert(key, value, effective_ttl(ttl).map(|ttl| now + ttl));
        store.enforce_size_limit(self.max_size);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.store.lock().await.remove(key))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        let mut store = self.store.lock().await;
        Ok(keys.iter().map(|key| u64::from(store.remove(key))).sum())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let mut store = self.store.lock().await;
        let matched = store.matching(pattern, Instant::now());
        // 已过期但匹配的键也一并移除，但不计数
        store.strings.retain(|key, _| !matches_pattern(key, pattern));
        store.hashes.retain(|key, _| !matches_pattern(key, pattern));
        Ok(matched.len() as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let mut store = self.store.lock().await;
        Ok(store.live_index(key, now).is_some() || store.live_hash(key, now).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut store = self.store.lock().await;
        if let Some(index) = store.live_index(key, now) {
            store.strings[index].expires_at = Some(now + ttl);
            return Ok(true);
        }
        if let Some(slot) = store.live_hash(key, now) {
            slot.expires_at = Some(now + ttl);
            return Ok(true);
        }
        Ok(false)
    }

    async fn ttl(&self, key: &str) -> Result<Option<i64>> {
        let now = Instant::now();
        let mut store = self.store.lock().await;
        if let Some(index) = store.live_index(key, now) {
            return Ok(Some(remaining_secs(store.strings[index].expires_at, now)));
        }
        Ok(store
            .live_hash(key, now)
            .map(|slot| remaining_secs(slot.expires_at, now)))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let store = self.store.lock().await;
        Ok(store
            .matching(pattern, Instant::now())
            .into_iter()
            .map(|(_, key)| key)
            .collect())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        let store = self.store.lock().await;
        let mut remaining = store
            .matching(pattern, Instant::now())
            .into_iter()
            .filter(|(seq, _)| *seq >= cursor)
            .peekable();

        let mut batch = Vec::with_capacity(count.max(1));
        let mut last_seq = 0;
        while batch.len() < count.max(1) {
            let Some((seq, key)) = remaining.next() else { break };
            last_seq = seq;
            batch.push(key);
        }

        let next = if remaining.peek().is_some() { last_seq + 1 } else { 0 };
        Ok((next, batch))
    }

    async fn incr(&self, key: &str, amount: i64) -> Result<Option<i64>> {
        let now = Instant::now();
        let mut store = self.store.lock().await;
        let (current, expires_at) = match store.live_index(key, now) {
            Some(index) => {
                let entry = &store.strings[index];
                match entry.value.trim().parse::<i64>() {
                    Ok(current) => (current, entry.expires_at),
                    Err(_) => return Ok(None),
                }
            }
            None => (0, None),
        };

        let Some(next) = current.checked_add(amount) else {
            return Ok(None);
        };
        store.insert(key, next.to_string(), expires_at);
        store.enforce_size_limit(self.max_size);
        Ok(Some(next))
    }

    async fn hset_raw(&self, key: &str, field: &str, value: String) -> Result<bool> {
        let now = Instant::now();
        let mut store = self.store.lock().await;
        if store.live_hash(key, now).is_none() {
            let seq = store.bump_seq();
            store.hashes.insert(
                key.to_string(),
                HashSlot {
                    seq,
                    ..HashSlot::default()
                },
            );
        }
        if let Some(slot) = store.hashes.get_mut(key) {
            slot.fields.insert(field.to_string(), value);
        }
        Ok(true)
    }

    async fn hget_raw(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut store = self.store.lock().await;
        Ok(store
            .live_hash(key, Instant::now())
            .and_then(|slot| slot.fields.get(field).cloned()))
    }

    async fn hgetall_raw(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut store = self.store.lock().await;
        Ok(store
            .live_hash(key, Instant::now())
            .map(|slot| slot.fields.clone())
            .unwrap_or_default())
    }

    async fn hincrby(&self, key: &str, field: &str, amount: i64) -> Result<Option<i64>> {
        let now = Instant::now();
        let mut store = self.store.lock().await;
        if store.live_hash(key, now).is_none() {
            let seq = store.bump_seq();
            store.hashes.insert(
                key.to_string(),
                HashSlot {
                    seq,
                    ..HashSlot::default()
                },
            );
        }
        let Some(slot) = store.hashes.get_mut(key) else {
            return Ok(None);
        };
        let current = match slot.fields.get(field) {
            Some(raw) => match raw.trim().parse::<i64>() {
                Ok(current) => current,
                Err(_) => return Ok(None),
            },
            None => 0,
        };
        let Some(next) = current.checked_add(amount) else {
            return Ok(None);
        };
        slot.fields.insert(field.to_string(), next.to_string());
        Ok(Some(next))
    }

    async fn key_type(&self, key: &str) -> Result<Option<KeyKind>> {
        let now = Instant::now();
        let mut store = self.store.lock().await;
        if store.live_index(key, now).is_some() {
            return Ok(Some(KeyKind::String));
        }
        Ok(store.live_hash(key, now).map(|_| KeyKind::Hash))
    }

    async fn memory_usage(&self, key: &str) -> Result<Option<u64>> {
        let now = Instant::now();
        let mut store = self.store.lock().await;
        if let Some(index) = store.live_index(key, now) {
            let size = key.len() + store.strings[index].value.len();
            return Ok(Some(size as u64));
        }
        Ok(store.live_hash(key, now).map(|slot| {
            let fields: usize = slot.fields.iter().map(|(f, v)| f.len() + v.len()).sum();
            (key.len() + fields) as u64
        }))
    }

    async fn flushdb(&self) -> Result<bool> {
        let mut store = self.store.lock().await;
        store.strings.clear();
        store.hashes.clear();
        Ok(true)
    }

    async fn info(&self) -> Result<BackendInfo> {
        let now = Instant::now();
        let store = self.store.lock().await;
        let expired = store
            .strings
            .values()
            .filter(|entry| is_expired(entry.expires_at, now))
            .count();
        let bytes: usize = store
            .strings
            .iter()
            .map(|(key, entry)| key.len() + entry.value.len())
            .chain(store.hashes.iter().map(|(key, slot)| {
                key.len() + slot.fields.iter().map(|(f, v)| f.len() + v.len()).sum::<usize>()
            }))
            .sum();

        Ok(BackendInfo {
            backend: self.name().to_string(),
            total_keys: store.strings.len() as u64,
            expired_keys: expired as u64,
            hash_keys: store.hashes.len() as u64,
            max_size: Some(self.max_size as u64),
            memory_used: format_bytes(bytes as u64),
        })
    }

    async fn close(&self) {
        self.shutdown();
    }
}

/// 内存管道中的命令
#[derive(Debug, Clone)]
enum PipelineCommand {
    Get(String),
    Set(String, Value, Option<Duration>),
    Delete(String),
}

/// 内存缓存的批量命令管道，按入队顺序依次执行
pub struct MemoryPipeline<'a> {
    cache: &'a MemoryCache,
    commands: Vec<PipelineCommand>,
}

impl MemoryPipeline<'_> {
    /// 入队 GET
    #[must_use]
    pub fn get(mut self, key: &str) -> Self {
        self.commands.push(PipelineCommand::Get(key.to_string()));
        self
    }

    /// 入队 SET
    #[must_use]
    pub fn set(mut self, key: &str, value: Value, ttl: Option<Duration>) -> Self {
        self.commands
            .push(PipelineCommand::Set(key.to_string(), value, ttl));
        self
    }

    /// 入队 DELETE
    #[must_use]
    pub fn delete(mut self, key: &str) -> Self {
        self.commands.push(PipelineCommand::Delete(key.to_string()));
        self
    }

    /// 已入队命令数
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// 是否没有命令
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// 执行全部命令；GET 未命中返回 `null`，SET/DELETE 返回布尔值
    pub async fn execute(self) -> Result<Vec<Value>> {
        let mut results = Vec::with_capacity(self.commands.len());
        for command in self.commands {
            let result = match command {
                PipelineCommand::Get(key) => self
                    .cache
                    .get_raw(&key)
                    .await?
                    .map_or(Value::Null, decode_tagged),
                PipelineCommand::Set(key, value, ttl) => Value::Bool(
                    self.cache
                        .set_raw(&key, encode_tagged(&value), ttl)
                        .await?,
                ),
                PipelineCommand::Delete(key) => Value::Bool(self.cache.delete(&key).await?),
            };
            results.push(result);
        }
        Ok(results)
    }
}
