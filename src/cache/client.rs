//! # Redis 缓存客户端
//!
//! 持有到 Redis 的连接池，负责断线重连，并提供与内存缓存相同的原语。
//!
//! 每个原语调用前都会确认连接；连接失败返回 [`CacheError::Unavailable`]。
//! 操作过程中出现 Redis 错误时记录日志并将连接标记为断开，
//! 下一次调用会触发重连，单次调用内部不重试。

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client, ErrorKind, FromRedisValue, RedisError, ToRedisArgs};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use super::backend::{BackendInfo, CacheBackend, KeyKind, effective_ttl};
use crate::config::RedisConfig;
use crate::error::{CacheError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, lerror, linfo, lwarn};

/// 按模式批量处理时每批扫描的键数
const SCAN_BATCH: usize = 500;

/// 轮询使用的连接池
struct RedisPool {
    connections: Vec<ConnectionManager>,
    next: AtomicUsize,
}

impl RedisPool {
    fn get(&self) -> Option<ConnectionManager> {
        if self.connections.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        self.connections.get(index).cloned()
    }
}

/// Redis 缓存客户端
pub struct RedisClient {
    client: Client,
    config: RedisConfig,
    pool: RwLock<Option<Arc<RedisPool>>>,
    connected: AtomicBool,
    connection_lock: Mutex<()>,
}

impl RedisClient {
    /// 创建客户端（不立即连接）
    pub fn new(config: RedisConfig) -> Result<Self> {
        let client = Client::open(config.build_url())
            .map_err(|e| CacheError::config_with_source("创建 Redis 客户端失败", e))?;

        Ok(Self {
            client,
            config,
            pool: RwLock::new(None),
            connected: AtomicBool::new(false),
            connection_lock: Mutex::new(()),
        })
    }

    /// 配置
    #[must_use]
    pub const fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// 是否标记为已连接
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// 建立连接
    ///
    /// 幂等：已连接时先 ping 验证，失败则拆除旧连接池后重连。
    /// 连接失败返回 `false` 并保持断开状态，不会返回错误。
    pub async fn connect(&self) -> bool {
        let _guard = self.connection_lock.lock().await;

        if self.is_connected() {
            if self.ping_pool().await {
                return true;
            }
            lwarn!(
                "system",
                LogStage::Cache,
                LogComponent::Redis,
                "reconnect",
                "Redis 连接已失效，正在重建连接池",
                addr = %self.config.display_addr()
            );
            self.teardown().await;
        }

        linfo!(
            "system",
            LogStage::Cache,
            LogComponent::Redis,
            "connect_to_redis",
            &format!("正在连接 Redis 服务器: {}", self.config.display_addr()),
            max_connections = self.config.max_connections
        );

        match self.build_pool().await {
            Ok(pool) => {
                *self.pool.write().await = Some(Arc::new(pool));
                self.connected.store(true, Ordering::SeqCst);
                linfo!(
                    "system",
                    LogStage::Cache,
                    LogComponent::Redis,
                    "redis_connected",
                    "Redis 连接建立成功"
                );
                true
            }
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                lerror!(
                    "system",
                    LogStage::Cache,
                    LogComponent::Redis,
                    "connect_failed",
                    &format!("Redis 连接失败: {e}"),
                    addr = %self.config.display_addr()
                );
                false
            }
        }
    }

    /// 断开连接并释放连接池
    pub async fn disconnect(&self) {
        let _guard = self.connection_lock.lock().await;
        self.teardown().await;
        linfo!(
            "system",
            LogStage::Shutdown,
            LogComponent::Redis,
            "disconnect",
            "Redis 连接已关闭"
        );
    }

    /// 确保连接可用，必要时重连
    pub async fn ensure_connection(&self) -> Result<()> {
        if self.is_connected() || self.connect().await {
            Ok(())
        } else {
            Err(CacheError::unavailable(format!(
                "无法连接 Redis: {}",
                self.config.display_addr()
            )))
        }
    }

    /// 创建批量命令管道；执行失败时错误直接返回给调用方
    pub async fn pipeline(&self) -> Result<RedisPipeline> {
        let conn = self.connection().await?;
        Ok(RedisPipeline {
            pipe: redis::pipe(),
            conn,
        })
    }

    async fn build_pool(&self) -> Result<RedisPool> {
        let size = self.config.max_connections.max(1) as usize;
        let mut connections = Vec::with_capacity(size);

        for _ in 0..size {
            let manager_config =
                ConnectionManagerConfig::new().set_number_of_retries(self.config.connection_retries);
            let connection = tokio::time::timeout(
                self.config.connection_timeout(),
                ConnectionManager::new_with_config(self.client.clone(), manager_config),
            )
            .await
            .map_err(|_| {
                CacheError::unavailable(format!(
                    "连接 Redis 超时（{}秒）",
                    self.config.connection_timeout
                ))
            })??;
            connections.push(connection);
        }

        let pool = RedisPool {
            connections,
            next: AtomicUsize::new(0),
        };

        // 连接管理器可能在服务不可达时仍然构建成功，这里用 ping 确认
        let mut conn = pool
            .get()
            .ok_or_else(|| CacheError::unavailable("Redis 连接池为空"))?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;

        Ok(pool)
    }

    async fn ping_pool(&self) -> bool {
        let Some(mut conn) = self.pool.read().await.as_ref().and_then(|pool| pool.get()) else {
            return false;
        };
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }

    async fn teardown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.pool.write().await.take();
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        self.ensure_connection().await?;
        self.pool
            .read()
            .await
            .as_ref()
            .and_then(|pool| pool.get())
            .ok_or_else(|| CacheError::unavailable("Redis 连接池未初始化"))
    }

    /// 记录错误；连接类错误将连接标记为断开，下一次调用触发重连
    fn on_error(&self, operation: &str, key: &str, err: RedisError) -> CacheError {
        let command_error = matches!(err.kind(), ErrorKind::ResponseError | ErrorKind::TypeError);
        if !command_error {
            self.connected.store(false, Ordering::SeqCst);
        }
        lerror!(
            "system",
            LogStage::Cache,
            LogComponent::Redis,
            operation,
            &format!("Redis 操作失败: {err}"),
            key = key,
            connection_dropped = !command_error
        );
        CacheError::Redis(err)
    }

    async fn query<T: FromRedisValue>(
        &self,
        operation: &str,
        key: &str,
        cmd: &redis::Cmd,
    ) -> Result<T> {
        let mut conn = self.connection().await?;
        cmd.query_async::<T>(&mut conn)
            .await
            .map_err(|e| self.on_error(operation, key, e))
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool> {
        let mut conn = self.connection().await?;
        let result = match effective_ttl(ttl) {
            Some(ttl) => {
                let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
                conn.pset_ex::<_, _, ()>(key, value, millis).await
            }
            None => conn.set::<_, _, ()>(key, value).await,
        };
        result.map_err(|e| self.on_error("set", key, e))?;
        ldebug!(
            "system",
            LogStage::Cache,
            LogComponent::Redis,
            "set_cache_ok",
            "缓存设置成功",
            key = key
        );
        Ok(true)
    }
}

/// 将 Redis `TTL` 返回值转换为统一约定
const fn normalize_ttl(raw: i64) -> Option<i64> {
    match raw {
        -2 => None,
        raw if raw < 0 => Some(-1),
        raw => Some(raw),
    }
}

/// 解析 `INFO` 输出中的字段
fn parse_info(info: &str, database: u8) -> (Option<String>, u64) {
    let mut memory = None;
    let mut keys = 0;
    let db_prefix = format!("db{database}:");

    for line in info.lines().map(str::trim) {
        if let Some(value) = line.strip_prefix("used_memory_human:") {
            memory = Some(value.to_string());
        } else if let Some(stats) = line.strip_prefix(&db_prefix) {
            keys = stats
                .split(',')
                .find_map(|part| part.strip_prefix("keys="))
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);
        }
    }
    (memory, keys)
}

#[async_trait]
impl CacheBackend for RedisClient {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> Result<bool> {
        let pong: String = self.query("ping", "", &redis::cmd("PING")).await?;
        Ok(pong.eq_ignore_ascii_case("PONG"))
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        conn.get(key).await.map_err(|e| self.on_error("get", key, e))
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool> {
        self.set_with_ttl(key, value, ttl).await
    }

    async fn set_raw_nx(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = effective_ttl(ttl) {
            cmd.arg("PX")
                .arg(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));
        }
        let reply: Option<String> = self.query("set_nx", key, &cmd).await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let deleted: u64 = conn
            .del(key)
            .await
            .map_err(|e| self.on_error("delete", key, e))?;
        Ok(deleted > 0)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        conn.del(keys)
            .await
            .map_err(|e| self.on_error("delete_many", &keys[0], e))
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let mut cursor = 0;
        let mut deleted = 0;
        loop {
            let (next, batch) = self.scan(cursor, pattern, SCAN_BATCH).await?;
            deleted += self.delete_many(&batch).await?;
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        conn.exists(key)
            .await
            .map_err(|e| self.on_error("exists", key, e))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let mut conn = self.connection().await?;
        conn.pexpire(key, millis)
            .await
            .map_err(|e| self.on_error("expire", key, e))
    }

    async fn ttl(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.connection().await?;
        let raw: i64 = conn
            .ttl(key)
            .await
            .map_err(|e| self.on_error("ttl", key, e))?;
        Ok(normalize_ttl(raw))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut cursor = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch) = self.scan(cursor, pattern, SCAN_BATCH).await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        let mut cmd = redis::cmd("SCAN");
        cmd.arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count.max(1));
        self.query("scan", pattern, &cmd).await
    }

    async fn incr(&self, key: &str, amount: i64) -> Result<Option<i64>> {
        let mut conn = self.connection().await?;
        match conn.incr::<_, _, i64>(key, amount).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::ResponseError => {
                lwarn!(
                    "system",
                    LogStage::Cache,
                    LogComponent::Redis,
                    "incr",
                    &format!("值不是整数，拒绝自增: {e}"),
                    key = key
                );
                Ok(None)
            }
            Err(e) => Err(self.on_error("incr", key, e)),
        }
    }

    async fn hset_raw(&self, key: &str, field: &str, value: String) -> Result<bool> {
        let mut conn = self.connection().await?;
        conn.hset::<_, _, _, ()>(key, field, value)
            .await
            .map_err(|e| self.on_error("hset", key, e))?;
        Ok(true)
    }

    async fn hget_raw(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        conn.hget(key, field)
            .await
            .map_err(|e| self.on_error("hget", key, e))
    }

    async fn hgetall_raw(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.connection().await?;
        conn.hgetall(key)
            .await
            .map_err(|e| self.on_error("hgetall", key, e))
    }

    async fn hincrby(&self, key: &str, field: &str, amount: i64) -> Result<Option<i64>> {
        let mut conn = self.connection().await?;
        match conn.hincr::<_, _, _, i64>(key, field, amount).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::ResponseError => Ok(None),
            Err(e) => Err(self.on_error("hincrby", key, e)),
        }
    }

    async fn key_type(&self, key: &str) -> Result<Option<KeyKind>> {
        let mut cmd = redis::cmd("TYPE");
        cmd.arg(key);
        let kind: String = self.query("type", key, &cmd).await?;
        Ok(KeyKind::from_redis(&kind))
    }

    async fn memory_usage(&self, key: &str) -> Result<Option<u64>> {
        let mut cmd = redis::cmd("MEMORY");
        cmd.arg("USAGE").arg(key);
        self.query("memory_usage", key, &cmd).await
    }

    async fn flushdb(&self) -> Result<bool> {
        self.query::<()>("flushdb", "", &redis::cmd("FLUSHDB"))
            .await?;
        lwarn!(
            "system",
            LogStage::Maintenance,
            LogComponent::Redis,
            "flushdb",
            "Redis 数据库已清空",
            database = self.config.database
        );
        Ok(true)
    }

    async fn info(&self) -> Result<BackendInfo> {
        let raw: String = self.query("info", "", &redis::cmd("INFO")).await?;
        let (memory, total_keys) = parse_info(&raw, self.config.database);
        Ok(BackendInfo {
            backend: self.name().to_string(),
            total_keys,
            memory_used: memory.unwrap_or_else(|| "unknown".to_string()),
            ..BackendInfo::default()
        })
    }

    async fn close(&self) {
        self.disconnect().await;
    }
}

/// Redis 批量命令管道
///
/// 与其他原语不同，执行失败时错误直接返回给调用方。
pub struct RedisPipeline {
    pipe: redis::Pipeline,
    conn: ConnectionManager,
}

impl RedisPipeline {
    /// 切换为事务模式（MULTI/EXEC）
    #[must_use]
    pub fn atomic(mut self) -> Self {
        self.pipe.atomic();
        self
    }

    /// 入队 GET
    #[must_use]
    pub fn get(mut self, key: &str) -> Self {
        self.pipe.get(key);
        self
    }

    /// 入队 SET，可带过期时间；其 `OK` 回复不出现在结果中
    #[must_use]
    pub fn set<V: ToRedisArgs>(mut self, key: &str, value: V, ttl: Option<Duration>) -> Self {
        match effective_ttl(ttl) {
            Some(ttl) => {
                self.pipe
                    .pset_ex(key, value, u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
                    .ignore();
            }
            None => {
                self.pipe.set(key, value).ignore();
            }
        }
        self
    }

    /// 入队 DEL
    #[must_use]
    pub fn delete(mut self, key: &str) -> Self {
        self.pipe.del(key);
        self
    }

    /// 入队 EXPIRE
    #[must_use]
    pub fn expire(mut self, key: &str, ttl: Duration) -> Self {
        self.pipe
            .pexpire(key, i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));
        self
    }

    /// 入队 HINCRBY
    #[must_use]
    pub fn hincrby(mut self, key: &str, field: &str, amount: i64) -> Self {
        self.pipe.hincr(key, field, amount);
        self
    }

    /// 执行并解析结果
    pub async fn query<T: FromRedisValue>(mut self) -> Result<T> {
        Ok(self.pipe.query_async::<T>(&mut self.conn).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_ttl() {
        assert_eq!(normalize_ttl(-2), None);
        assert_eq!(normalize_ttl(-1), Some(-1));
        assert_eq!(normalize_ttl(30), Some(30));
    }

    #[test]
    fn test_parse_info() {
        let info = "# Memory\r\nused_memory:1024\r\nused_memory_human:1.00K\r\n\
                    # Keyspace\r\ndb0:keys=12,expires=3,avg_ttl=0\r\ndb15:keys=4,expires=0\r\n";
        assert_eq!(parse_info(info, 0), (Some("1.00K".to_string()), 12));
        assert_eq!(parse_info(info, 15).1, 4);
        assert_eq!(parse_info(info, 3).1, 0);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let client = RedisClient::new(RedisConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            max_connections: 1,
            connection_timeout: 1,
            connection_retries: 0,
            ..RedisConfig::default()
        })
        .unwrap();

        assert!(!client.connect().await);
        assert!(!client.is_connected());

        let err = client.get_raw("any").await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(client.pipeline().await.is_err());
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        let result = RedisClient::new(RedisConfig {
            url: Some("not-a-url".to_string()),
            ..RedisConfig::default()
        });
        assert!(matches!(result, Err(CacheError::Config { .. })));
    }
}
