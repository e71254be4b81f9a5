//! # 缓存策略
//!
//! TTL 类别与函数结果缓存的读写策略

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::keys::KeyFamily;
use crate::config::CacheConfig;

/// 缓存 TTL 类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheTtl {
    /// 短期缓存（5分钟）- 限流计数等
    Short,
    /// 中期缓存（1小时）- 业务数据
    Medium,
    /// 长期缓存（24小时）- 对话状态、日志
    Long,
    /// 自定义 TTL（秒）
    Custom(u64),
    /// 永不过期（需要手动删除）
    Never,
}

impl CacheTtl {
    /// 获取TTL秒数
    #[must_use]
    pub const fn as_seconds(&self) -> Option<u64> {
        match self {
            Self::Short => Some(300),
            Self::Medium => Some(3600),
            Self::Long => Some(86400),
            Self::Custom(seconds) => Some(*seconds),
            Self::Never => None,
        }
    }

    /// 获取 Duration
    #[must_use]
    pub fn as_duration(&self) -> Option<Duration> {
        self.as_seconds().map(Duration::from_secs)
    }

    /// 从分钟创建自定义 TTL
    #[must_use]
    pub const fn from_minutes(minutes: u64) -> Self {
        Self::Custom(minutes * 60)
    }

    /// 从小时创建自定义 TTL
    #[must_use]
    pub const fn from_hours(hours: u64) -> Self {
        Self::Custom(hours * 3600)
    }

    /// 按配置解析键族的 TTL
    ///
    /// 分页、对话状态、搜索结果使用配置中的专用 TTL，其余使用键族默认值。
    #[must_use]
    pub fn for_family(family: KeyFamily, config: &CacheConfig) -> Self {
        match family {
            KeyFamily::Pagination => Self::Custom(config.pagination_ttl),
            KeyFamily::Fsm => Self::Custom(config.fsm_ttl),
            KeyFamily::Search => Self::Custom(config.search_ttl),
            KeyFamily::User | KeyFamily::Admin | KeyFamily::Cache => {
                Self::Custom(config.default_ttl)
            }
            other => other.default_ttl(),
        }
    }
}

/// 函数结果缓存的读写策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    /// 只读：命中返回缓存，未命中只执行不回写
    Read,
    /// 只写：总是执行并写入结果
    Write,
    /// 读写：命中返回缓存，未命中执行并覆盖写入
    #[default]
    ReadWrite,
    /// 绕写：命中返回缓存，未命中执行并仅在键仍不存在时写入
    WriteAround,
}

impl CacheStrategy {
    /// 调用前是否读取缓存
    #[must_use]
    pub const fn reads(&self) -> bool {
        !matches!(self, Self::Write)
    }

    /// 执行后是否写入缓存
    #[must_use]
    pub const fn writes(&self) -> bool {
        !matches!(self, Self::Read)
    }

    /// 写入时是否允许覆盖已有值
    #[must_use]
    pub const fn overwrites(&self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}
