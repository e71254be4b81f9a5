//! # 应用配置结构

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// 日志级别（可被 `RUST_LOG` 覆盖）
    pub log_level: Option<String>,
    /// 缓存配置
    pub cache: CacheConfig,
}

/// 缓存后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// 内存缓存（测试或 Redis 不可用时）
    Memory,
    /// Redis缓存
    #[default]
    Redis,
}

/// 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// 缓存后端类型
    pub backend: CacheBackendKind,
    /// 进程级键命名空间前缀
    pub key_prefix: String,
    /// 默认过期时间（秒）
    pub default_ttl: u64,
    /// 内存缓存最大条目数
    pub memory_max_entries: usize,
    /// 内存缓存过期清扫间隔（秒）
    pub memory_sweep_interval: u64,
    /// 分页缓存 TTL（秒）
    pub pagination_ttl: u64,
    /// 分页默认页大小
    pub pagination_page_size: usize,
    /// FSM 相关数据 TTL（秒）
    pub fsm_ttl: u64,
    /// 搜索结果 TTL（秒）
    pub search_ttl: u64,
    /// 过期分页清理间隔（秒）
    pub cleanup_interval: u64,
    /// Redis 初始化失败时是否退回内存缓存
    pub fallback_to_memory: bool,
    /// Redis 配置
    pub redis: RedisConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Redis,
            key_prefix: "electric_bot".to_string(),
            default_ttl: 3600,
            memory_max_entries: 10000,
            memory_sweep_interval: 60,
            pagination_ttl: 600,
            pagination_page_size: 10,
            fsm_ttl: 86400,
            search_ttl: 1800,
            cleanup_interval: 3600,
            fallback_to_memory: true,
            redis: RedisConfig::default(),
        }
    }
}

impl CacheConfig {
    /// 内存后端配置（测试用）
    #[must_use]
    pub fn memory(max_entries: usize) -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            memory_max_entries: max_entries,
            ..Self::default()
        }
    }

    /// 默认 TTL
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl)
    }

    /// 分页 TTL
    #[must_use]
    pub const fn pagination_ttl(&self) -> Duration {
        Duration::from_secs(self.pagination_ttl)
    }

    /// 内存缓存清扫间隔
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.memory_sweep_interval)
    }

    /// 分页清理间隔
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval)
    }
}

/// Redis配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// 完整连接URL（设置后优先于 host/port/database）
    pub url: Option<String>,
    /// 服务器地址
    pub host: String,
    /// 服务器端口
    pub port: u16,
    /// 数据库编号
    pub database: u8,
    /// 连接密码（可选）
    pub password: Option<String>,
    /// 连接池最大连接数
    pub max_connections: u32,
    /// 连接超时时间（秒）
    pub connection_timeout: u64,
    /// 建立连接时的重试次数
    pub connection_retries: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 6379,
            database: 0,
            password: None,
            max_connections: 10,
            connection_timeout: 5,
            connection_retries: 1,
        }
    }
}

impl RedisConfig {
    /// 构建 Redis 连接 URL
    #[must_use]
    pub fn build_url(&self) -> String {
        if let Some(url) = self.url.as_ref().filter(|url| !url.is_empty()) {
            return url.clone();
        }
        if let Some(password) = &self.password {
            format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.database
            )
        } else {
            format!("redis://{}:{}/{}", self.host, self.port, self.database)
        }
    }

    /// 连接超时
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    /// 用于日志输出的地址（不含密码）
    #[must_use]
    pub fn display_addr(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_without_password() {
        let config = RedisConfig::default();
        assert_eq!(config.build_url(), "redis://localhost:6379/0");
    }

    #[test]
    fn test_build_url_with_password_and_override() {
        let mut config = RedisConfig {
            password: Some("secret".to_string()),
            database: 3,
            ..RedisConfig::default()
        };
        assert_eq!(config.build_url(), "redis://:secret@localhost:6379/3");

        config.url = Some("redis://cache.internal:6380/1".to_string());
        assert_eq!(config.build_url(), "redis://cache.internal:6380/1");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [cache]
            backend = "memory"
            pagination_ttl = 120
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.backend, CacheBackendKind::Memory);
        assert_eq!(config.cache.pagination_ttl, 120);
        assert_eq!(config.cache.key_prefix, "electric_bot");
        assert_eq!(config.cache.redis.max_connections, 10);
    }
}
