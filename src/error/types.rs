//! # 错误类型定义

use thiserror::Error;

/// 缓存层主要错误类型
#[derive(Debug, Error)]
pub enum CacheError {
    /// 配置相关错误
    #[error("配置错误: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 后端不可用（连接失败、未连接、连接池耗尽）
    #[error("缓存后端不可用: {message}")]
    Unavailable { message: String },

    /// 缓存管理器尚未初始化或已关闭
    #[error("缓存管理器未初始化")]
    NotInitialized,

    /// Redis 客户端错误
    #[error("Redis 错误: {0}")]
    Redis(#[from] redis::RedisError),

    /// 序列化/反序列化错误
    #[error("序列化错误: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// 参数不合法
    #[error("参数无效: {0}")]
    InvalidArgument(String),

    /// 破坏性操作缺少确认
    #[error("操作需要显式确认: {0}")]
    ConfirmationRequired(String),

    /// IO相关错误
    #[error("IO错误: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// 附加了上下文的错误
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<CacheError>,
    },
}

impl CacheError {
    /// 创建配置错误
    pub fn config<T: Into<String>>(message: T) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的配置错误
    pub fn config_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建后端不可用错误
    pub fn unavailable<T: Into<String>>(message: T) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// 创建序列化错误
    pub fn serialization<T: Into<String>>(message: T) -> Self {
        Self::Serialization {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的序列化错误
    pub fn serialization_with_source<T: Into<String>>(message: T, source: serde_json::Error) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(source),
        }
    }

    /// 创建参数错误
    pub fn invalid_argument<T: Into<String>>(message: T) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// 是否表示后端不可用（调用方应视为“缓存不可用”而不是“键不存在”）
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Unavailable { .. } | Self::NotInitialized => true,
            Self::Redis(e) => e.is_io_error() || e.is_connection_dropped() || e.is_timeout(),
            Self::Context { source, .. } => source.is_unavailable(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_with_source("JSON 处理失败", err)
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: "文件操作失败".to_string(),
            source: err,
        }
    }
}

impl From<toml::de::Error> for CacheError {
    fn from(err: toml::de::Error) -> Self {
        Self::config_with_source("TOML解析失败", err)
    }
}
