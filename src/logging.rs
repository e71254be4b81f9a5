//! # 日志配置模块
//!
//! 提供统一的结构化日志宏和日志系统初始化

use std::env;
use std::fmt;
use tracing_subscriber::{EnvFilter, fmt as fmt_layer, layer::SubscriberExt, util::SubscriberInitExt};

/// 日志所处的生命周期阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStage {
    /// 启动阶段
    Startup,
    /// 关闭阶段
    Shutdown,
    /// 配置加载
    Configuration,
    /// 缓存读写
    Cache,
    /// 后台任务
    BackgroundTask,
    /// 运维维护操作
    Maintenance,
}

impl LogStage {
    /// 字段值
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Shutdown => "shutdown",
            Self::Configuration => "configuration",
            Self::Cache => "cache",
            Self::BackgroundTask => "background_task",
            Self::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for LogStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 产生日志的组件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogComponent {
    /// 缓存管理器
    Cache,
    /// Redis 客户端
    Redis,
    /// 内存缓存
    MemoryCache,
    /// 分页缓存
    Pagination,
    /// 缓存包装器
    Decorator,
    /// 缓存分组
    CacheGroup,
    /// 缓存工厂
    Factory,
    /// 运维巡检
    Inspector,
    /// 分页清理任务
    Janitor,
    /// 配置
    Config,
    /// 命令行入口
    Main,
}

impl LogComponent {
    /// 字段值
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Redis => "redis",
            Self::MemoryCache => "memory_cache",
            Self::Pagination => "pagination",
            Self::Decorator => "decorator",
            Self::CacheGroup => "cache_group",
            Self::Factory => "factory",
            Self::Inspector => "inspector",
            Self::Janitor => "janitor",
            Self::Config => "config",
            Self::Main => "main",
        }
    }
}

impl fmt::Display for LogComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 结构化 DEBUG 日志
#[macro_export]
macro_rules! ldebug {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $message:expr $(, $($fields:tt)+)?) => {
        ::tracing::debug!(
            request_id = %$request_id,
            stage = $stage.as_str(),
            component = $component.as_str(),
            operation = $operation,
            $($($fields)+ ,)?
            "{}",
            $message
        )
    };
}

/// 结构化 INFO 日志
#[macro_export]
macro_rules! linfo {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $message:expr $(, $($fields:tt)+)?) => {
        ::tracing::info!(
            request_id = %$request_id,
            stage = $stage.as_str(),
            component = $component.as_str(),
            operation = $operation,
            $($($fields)+ ,)?
            "{}",
            $message
        )
    };
}

/// 结构化 WARN 日志
#[macro_export]
macro_rules! lwarn {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $message:expr $(, $($fields:tt)+)?) => {
        ::tracing::warn!(
            request_id = %$request_id,
            stage = $stage.as_str(),
            component = $component.as_str(),
            operation = $operation,
            $($($fields)+ ,)?
            "{}",
            $message
        )
    };
}

/// 结构化 ERROR 日志
#[macro_export]
macro_rules! lerror {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $message:expr $(, $($fields:tt)+)?) => {
        ::tracing::error!(
            request_id = %$request_id,
            stage = $stage.as_str(),
            component = $component.as_str(),
            operation = $operation,
            $($($fields)+ ,)?
            "{}",
            $message
        )
    };
}

/// 初始化日志系统
pub fn init_logging(log_level: Option<&str>) {
    let level = log_level.unwrap_or("info");

    // 默认压低 redis 自身的日志
    let default_filter = format!("{level},electric_bot_cache=debug,redis=warn");

    let log_filter = env::var("RUST_LOG").unwrap_or(default_filter);

    let result = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| log_filter.into()))
        .with(
            fmt_layer::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init();

    if result.is_ok() {
        tracing::info!("📋 cache logging initialized at level {}", level);
    }
}

/// 环境变量设置指南
pub fn print_logging_help() {
    println!("📋 日志配置指南:");
    println!("  RUST_LOG=info                              # 标准日志级别");
    println!("  RUST_LOG=debug                             # 调试级别");
    println!("  RUST_LOG=info,redis=warn                   # 生产环境：仅 Redis 警告");
    println!("  RUST_LOG=electric_bot_cache=trace          # 缓存层详细追踪");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_and_component_names() {
        assert_eq!(LogStage::Cache.as_str(), "cache");
        assert_eq!(LogStage::BackgroundTask.to_string(), "background_task");
        assert_eq!(LogComponent::MemoryCache.as_str(), "memory_cache");
        assert_eq!(LogComponent::Janitor.to_string(), "janitor");
    }

    #[test]
    fn test_macros_expand_with_extra_fields() {
        let key = "electric_bot:user:1";
        ldebug!("system", LogStage::Cache, LogComponent::Cache, "get", "缓存命中", key = key);
        linfo!("system", LogStage::Startup, LogComponent::Factory, "start", &format!("启动 {}", 1));
        lwarn!("system", LogStage::Cache, LogComponent::Redis, "reconnect", "连接断开", attempt = 2, key = %key);
        lerror!("system", LogStage::Shutdown, LogComponent::Main, "stop", "stop failed");
    }
}
