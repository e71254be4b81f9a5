//! # 配置管理模块
//!
//! 处理缓存配置加载与验证

mod app_config;

pub use app_config::{AppConfig, CacheBackendKind, CacheConfig, RedisConfig};

use crate::ensure_config;
use crate::error::{CacheError, Context, Result};
use crate::logging::{LogComponent, LogStage};
use crate::linfo;
use std::env;
use std::path::Path;

/// 加载配置文件
///
/// 读取 `config/cache.{RUST_ENV}.toml`，`RUST_ENV` 缺省为 `dev`。
pub fn load_config() -> Result<AppConfig> {
    let env = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
    let config_file = format!("config/cache.{env}.toml");
    load_config_from(&config_file)
}

/// 从指定路径加载配置
pub fn load_config_from(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(CacheError::config(format!(
            "配置文件不存在: {}",
            path.display()
        )));
    }

    let config_content = std::fs::read_to_string(path)
        .with_context(|| format!("读取配置文件失败: {}", path.display()))?;

    let config: AppConfig = toml::from_str(&config_content)?;

    validate_config(&config)?;

    linfo!(
        "system",
        LogStage::Configuration,
        LogComponent::Config,
        "load_config",
        &format!("配置加载完成: {}", path.display()),
        backend = ?config.cache.backend,
        key_prefix = %config.cache.key_prefix
    );

    Ok(config)
}

/// 验证配置有效性
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let cache = &config.cache;

    ensure_config!(!cache.key_prefix.is_empty(), "缓存键前缀不能为空");
    ensure_config!(
        !cache.key_prefix.contains('*'),
        "缓存键前缀不能包含通配符: {}",
        cache.key_prefix
    );
    ensure_config!(cache.memory_max_entries > 0, "内存缓存最大条目数必须大于0");
    ensure_config!(cache.memory_sweep_interval > 0, "内存缓存清扫间隔必须大于0");
    ensure_config!(cache.pagination_page_size > 0, "分页大小必须大于0");
    ensure_config!(cache.pagination_ttl > 0, "分页缓存TTL必须大于0");
    ensure_config!(cache.cleanup_interval > 0, "分页清理间隔必须大于0");

    // 验证Redis配置
    let redis = &cache.redis;
    if cache.backend == CacheBackendKind::Redis {
        let has_url = redis.url.as_ref().is_some_and(|url| !url.is_empty());
        ensure_config!(has_url || !redis.host.is_empty(), "Redis 地址不能为空");
        ensure_config!(redis.port != 0, "无效的Redis端口: {}", redis.port);
        ensure_config!(redis.max_connections > 0, "Redis最大连接数必须大于0");
        ensure_config!(redis.connection_timeout > 0, "Redis连接超时必须大于0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_zero_page_size() {
        let mut config = AppConfig::default();
        config.cache.pagination_page_size = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("分页大小"));
    }

    #[test]
    fn test_memory_backend_skips_redis_checks() {
        let mut config = AppConfig::default();
        config.cache.backend = CacheBackendKind::Memory;
        config.cache.redis.port = 0;
        assert!(validate_config(&config).is_ok());

        config.cache.backend = CacheBackendKind::Redis;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[cache]
backend = "memory"
key_prefix = "test_bot"
memory_max_entries = 50

[cache.redis]
host = "redis.local"
"#
        )
        .unwrap();

        let config = load_config_from(file.path()).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.cache.key_prefix, "test_bot");
        assert_eq!(config.cache.memory_max_entries, 50);
        assert_eq!(config.cache.redis.host, "redis.local");
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = load_config_from("config/does-not-exist.toml").unwrap_err();
        assert!(matches!(err, CacheError::Config { .. }));
    }
}
