//! # 缓存统计
//!
//! 计数器以哈希形式保存在 `{prefix}:stats` 下，通过 HINCRBY 原子更新。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 统计哈希的逻辑键
pub const STATS_KEY: &str = "stats";

/// 统计计数项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsCounter {
    /// 命中
    Hits,
    /// 未命中
    Misses,
    /// 写入
    Sets,
    /// 删除
    Deletes,
    /// 清空
    Clears,
}

impl StatsCounter {
    /// 全部计数项
    pub const ALL: [Self; 5] = [
        Self::Hits,
        Self::Misses,
        Self::Sets,
        Self::Deletes,
        Self::Clears,
    ];

    /// 哈希字段名
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::Hits => "hits",
            Self::Misses => "misses",
            Self::Sets => "sets",
            Self::Deletes => "deletes",
            Self::Clears => "clears",
        }
    }
}

impl fmt::Display for StatsCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

/// 最近一次清空时间字段
pub const LAST_CLEAR_FIELD: &str = "last_clear";

/// 统计报告
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatsReport {
    /// 命中次数
    pub hits: u64,
    /// 未命中次数
    pub misses: u64,
    /// 写入次数
    pub sets: u64,
    /// 删除次数
    pub deletes: u64,
    /// 清空次数
    pub clears: u64,
    /// 最近一次清空时间（RFC 3339）
    pub last_clear: Option<String>,
    /// 后端名称
    pub backend: String,
    /// 后端内存占用
    pub memory_used: String,
    /// 后端当前库中的键总数
    pub total_keys: u64,
    /// 本命名空间下的键数
    pub namespace_keys: u64,
}

impl CacheStatsReport {
    /// 从统计哈希解析计数器；无法解析的字段按 0 处理
    #[must_use]
    pub fn from_hash(hash: &HashMap<String, String>) -> Self {
        let counter = |counter: StatsCounter| {
            hash.get(counter.field())
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .unwrap_or(0)
        };

        Self {
            hits: counter(StatsCounter::Hits),
            misses: counter(StatsCounter::Misses),
            sets: counter(StatsCounter::Sets),
            deletes: counter(StatsCounter::Deletes),
            clears: counter(StatsCounter::Clears),
            last_clear: hash
                .get(LAST_CLEAR_FIELD)
                .filter(|raw| !raw.is_empty())
                .cloned(),
            ..Self::default()
        }
    }

    /// 命中率（0.0 - 1.0）
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
