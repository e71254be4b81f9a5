//! # 缓存后端抽象
//!
//! Redis 与内存缓存共享同一组原语。所有原语返回 [`Result`]，
//! 以便调用方区分“后端不可用”（`Err`）与“键不存在”（`Ok(None)`）。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use super::codec::{decode_tagged, encode_tagged};
use crate::error::Result;

/// 键的存储类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    /// 字符串
    String,
    /// 哈希
    Hash,
    /// 列表
    List,
    /// 集合
    Set,
    /// 有序集合
    ZSet,
    /// 其他类型
    Other,
}

impl KeyKind {
    /// 从 Redis `TYPE` 命令结果解析
    #[must_use]
    pub fn from_redis(name: &str) -> Option<Self> {
        match name {
            "none" => None,
            "string" => Some(Self::String),
            "hash" => Some(Self::Hash),
            "list" => Some(Self::List),
            "set" => Some(Self::Set),
            "zset" => Some(Self::ZSet),
            _ => Some(Self::Other),
        }
    }

    /// 类型名称
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Hash => "hash",
            Self::List => "list",
            Self::Set => "set",
            Self::ZSet => "zset",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 后端运行信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendInfo {
    /// 后端名称
    pub backend: String,
    /// 当前库中的键总数
    pub total_keys: u64,
    /// 已过期但尚未清理的键数（仅内存后端）
    pub expired_keys: u64,
    /// 哈希键数量（仅内存后端）
    pub hash_keys: u64,
    /// 最大条目数（仅内存后端）
    pub max_size: Option<u64>,
    /// 可读的内存占用
    pub memory_used: String,
}

/// 缓存后端原语
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// 后端名称
    fn name(&self) -> &'static str;

    /// 存活检查
    async fn ping(&self) -> Result<bool>;

    /// 读取原始字符串
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;

    /// 写入原始字符串；`ttl` 为 `None` 或零表示永不过期
    async fn set_raw(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool>;

    /// 仅当键不存在时写入，返回是否写入
    async fn set_raw_nx(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool>;

    /// 删除键（连同同名哈希）
    async fn delete(&self, key: &str) -> Result<bool>;

    /// 批量删除，返回删除数量
    async fn delete_many(&self, keys: &[String]) -> Result<u64>;

    /// 按模式删除，返回删除数量
    async fn delete_pattern(&self, pattern: &str) -> Result<u64>;

    /// 键是否存在
    async fn exists(&self, key: &str) -> Result<bool>;

    /// 设置过期时间
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// 剩余存活秒数：`Some(-1)` 表示永不过期，`None` 表示不存在
    async fn ttl(&self, key: &str) -> Result<Option<i64>>;

    /// 列出匹配模式的键
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// 游标迭代；返回的游标为 0 表示迭代结束
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)>;

    /// 自增；键不存在时按 0 处理，值不是整数时返回 `None`
    async fn incr(&self, key: &str, amount: i64) -> Result<Option<i64>>;

    /// 自减
    async fn decr(&self, key: &str, amount: i64) -> Result<Option<i64>> {
        self.incr(key, -amount).await
    }

    /// 写入哈希字段
    async fn hset_raw(&self, key: &str, field: &str, value: String) -> Result<bool>;

    /// 读取哈希字段
    async fn hget_raw(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// 读取整个哈希
    async fn hgetall_raw(&self, key: &str) -> Result<HashMap<String, String>>;

    /// 哈希字段自增；字段值不是整数时返回 `None`
    async fn hincrby(&self, key: &str, field: &str, amount: i64) -> Result<Option<i64>>;

    /// 键的存储类型，不存在时为 `None`
    async fn key_type(&self, key: &str) -> Result<Option<KeyKind>>;

    /// 近似内存占用（字节）
    async fn memory_usage(&self, key: &str) -> Result<Option<u64>>;

    /// 清空整个库
    async fn flushdb(&self) -> Result<bool>;

    /// 后端运行信息
    async fn info(&self) -> Result<BackendInfo>;

    /// 释放连接或后台任务
    async fn close(&self) {}

    /// 读取并解码带标记的值
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.get_raw(key).await?.map(decode_tagged))
    }

    /// 编码并写入带标记的值
    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<bool> {
        self.set_raw(key, encode_tagged(value), ttl).await
    }

    /// 编码并写入哈希字段
    async fn hset(&self, key: &str, field: &str, value: &Value) -> Result<bool> {
        self.hset_raw(key, field, encode_tagged(value)).await
    }

    /// 读取并解码哈希字段
    async fn hget(&self, key: &str, field: &str) -> Result<Option<Value>> {
        Ok(self.hget_raw(key, field).await?.map(decode_tagged))
    }

    /// 读取并解码整个哈希
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, Value>> {
        Ok(self
            .hgetall_raw(key)
            .await?
            .into_iter()
            .map(|(field, raw)| (field, decode_tagged(raw)))
            .collect())
    }
}

/// 将 TTL 规范化：零视为永不过期
#[must_use]
pub fn effective_ttl(ttl: Option<Duration>) -> Option<Duration> {
    ttl.filter(|ttl| !ttl.is_zero())
}
