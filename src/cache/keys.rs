//! # 缓存键命名规范
//!
//! 所有键在物理上都形如 `{命名空间前缀}:{逻辑路径}`。逻辑路径的前缀
//! （`fsm:`、`pagination:` 等）被机器人其余组件按字面量引用，必须保持一致。

use serde::{Deserialize, Serialize};
use std::fmt;

use super::strategies::CacheTtl;

/// 逻辑键族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyFamily {
    /// 对话状态机 - `fsm:*`
    Fsm,
    /// 分页缓存 - `pagination:*`
    Pagination,
    /// 搜索结果 - `search:*`
    Search,
    /// 限流计数 - `rate_limit:*`
    RateLimit,
    /// 用户数据 - `user:*`
    User,
    /// 管理员数据 - `admin:*`
    Admin,
    /// 维护项目 - `service:*`
    Service,
    /// 安装项目 - `installation:*`
    Installation,
    /// 提醒 - `reminder:*`
    Reminder,
    /// 文件 - `file:*`
    File,
    /// 日志 - `log:*`
    Log,
    /// 函数结果缓存 - `cache:*`
    Cache,
}

impl KeyFamily {
    /// 全部键族
    pub const ALL: [Self; 12] = [
        Self::Fsm,
        Self::Pagination,
        Self::Search,
        Self::RateLimit,
        Self::User,
        Self::Admin,
        Self::Service,
        Self::Installation,
        Self::Reminder,
        Self::File,
        Self::Log,
        Self::Cache,
    ];

    /// 逻辑路径前缀（不含末尾冒号）
    #[must_use]
    pub const fn segment(&self) -> &'static str {
        match self {
            Self::Fsm => "fsm",
            Self::Pagination => "pagination",
            Self::Search => "search",
            Self::RateLimit => "rate_limit",
            Self::User => "user",
            Self::Admin => "admin",
            Self::Service => "service",
            Self::Installation => "installation",
            Self::Reminder => "reminder",
            Self::File => "file",
            Self::Log => "log",
            Self::Cache => "cache",
        }
    }

    /// 匹配该族全部键的模式
    #[must_use]
    pub fn pattern(&self) -> String {
        format!("{}:*", self.segment())
    }

    /// 说明
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Fsm => "Состояния FSM пользователей",
            Self::Pagination => "Кэш пагинации",
            Self::Search => "Результаты поиска",
            Self::RateLimit => "Счетчики rate limiting",
            Self::User => "Данные пользователей",
            Self::Admin => "Данные администраторов",
            Self::Service => "Данные обслуживания",
            Self::Installation => "Данные монтажа",
            Self::Reminder => "Напоминания",
            Self::File => "Метаданные файлов",
            Self::Log => "Логи действий",
            Self::Cache => "Кэш результатов функций",
        }
    }

    /// 默认 TTL 类别
    #[must_use]
    pub const fn default_ttl(&self) -> CacheTtl {
        match self {
            Self::Fsm => CacheTtl::Long,
            Self::Pagination => CacheTtl::Custom(600),
            Self::Search => CacheTtl::Custom(1800),
            Self::RateLimit => CacheTtl::Short,
            Self::Log | Self::File => CacheTtl::Long,
            Self::User
            | Self::Admin
            | Self::Service
            | Self::Installation
            | Self::Reminder
            | Self::Cache => CacheTtl::Medium,
        }
    }

    /// 根据逻辑键识别所属键族
    #[must_use]
    pub fn of(key: &str) -> Option<Self> {
        let segment = key.split(':').next()?;
        Self::ALL.into_iter().find(|family| family.segment() == segment)
    }
}

impl fmt::Display for KeyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.segment())
    }
}

/// 缓存键类型（逻辑路径，不含命名空间前缀）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheKey {
    /// 对话状态 - `fsm:{chat_id}:{user_id}`
    Fsm { chat_id: i64, user_id: i64 },

    /// 分页集合 - `pagination:{prefix}:{pagination_id}`
    Pagination { prefix: String, pagination_id: String },

    /// 搜索结果 - `search:{scope}:{query_hash}`
    Search { scope: String, query_hash: String },

    /// 限流计数 - `rate_limit:{user_id}:{action}`
    RateLimit { user_id: i64, action: String },

    /// 用户资料 - `user:{user_id}`
    User { user_id: i64 },

    /// 管理员权限 - `admin:{user_id}`
    Admin { user_id: i64 },

    /// 维护项目 - `service:{entity}:{id}`
    Service { entity: String, id: i64 },

    /// 安装项目 - `installation:{entity}:{id}`
    Installation { entity: String, id: i64 },

    /// 提醒 - `reminder:{reminder_id}`
    Reminder { reminder_id: i64 },

    /// 文件元数据 - `file:{file_id}`
    File { file_id: String },

    /// 操作日志 - `log:{date}:{user_id}`
    Log { date: String, user_id: i64 },

    /// 自定义键 - `{family}:{key}`
    Custom { family: KeyFamily, key: String },
}

impl CacheKey {
    /// 生成逻辑键字符串
    #[must_use]
    pub fn build(&self) -> String {
        match self {
            Self::Fsm { chat_id, user_id } => format!("fsm:{chat_id}:{user_id}"),
            Self::Pagination {
                prefix,
                pagination_id,
            } => format!("pagination:{prefix}:{pagination_id}"),
            Self::Search { scope, query_hash } => format!("search:{scope}:{query_hash}"),
            Self::RateLimit { user_id, action } => {
                format!("rate_limit:{user_id}:{}", sanitize_segment(action))
            }
            Self::User { user_id } => format!("user:{user_id}"),
            Self::Admin { user_id } => format!("admin:{user_id}"),
            Self::Service { entity, id } => format!("service:{entity}:{id}"),
            Self::Installation { entity, id } => format!("installation:{entity}:{id}"),
            Self::Reminder { reminder_id } => format!("reminder:{reminder_id}"),
            Self::File { file_id } => format!("file:{file_id}"),
            Self::Log { date, user_id } => format!("log:{date}:{user_id}"),
            Self::Custom { family, key } => format!("{}:{key}", family.segment()),
        }
    }

    /// 同类键的批量匹配模式
    #[must_use]
    pub fn pattern(&self) -> String {
        match self {
            Self::Fsm { chat_id, .. } => format!("fsm:{chat_id}:*"),
            Self::Pagination { prefix, .. } => format!("pagination:{prefix}:*"),
            Self::Search { scope, .. } => format!("search:{scope}:*"),
            Self::RateLimit { user_id, .. } => format!("rate_limit:{user_id}:*"),
            Self::Service { entity, .. } => format!("service:{entity}:*"),
            Self::Installation { entity, .. } => format!("installation:{entity}:*"),
            Self::Log { date, .. } => format!("log:{date}:*"),
            other => other.family().pattern(),
        }
    }

    /// 所属键族
    #[must_use]
    pub const fn family(&self) -> KeyFamily {
        match self {
            Self::Fsm { .. } => KeyFamily::Fsm,
            Self::Pagination { .. } => KeyFamily::Pagination,
            Self::Search { .. } => KeyFamily::Search,
            Self::RateLimit { .. } => KeyFamily::RateLimit,
            Self::User { .. } => KeyFamily::User,
            Self::Admin { .. } => KeyFamily::Admin,
            Self::Service { .. } => KeyFamily::Service,
            Self::Installation { .. } => KeyFamily::Installation,
            Self::Reminder { .. } => KeyFamily::Reminder,
            Self::File { .. } => KeyFamily::File,
            Self::Log { .. } => KeyFamily::Log,
            Self::Custom { family, .. } => *family,
        }
    }

    /// 默认 TTL 类别
    #[must_use]
    pub const fn default_ttl(&self) -> CacheTtl {
        self.family().default_ttl()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.build())
    }
}

/// 清理动作名称，确保可以安全用作键片段
fn sanitize_segment(segment: &str) -> String {
    segment
        .replace(['/', ':', '?', '&', '=', ' ', '*'], "_")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(CacheKey::Fsm { chat_id: -100, user_id: 7 }, "fsm:-100:7", "fsm:-100:*")]
    #[case(CacheKey::User { user_id: 42 }, "user:42", "user:*")]
    #[case(
        CacheKey::RateLimit { user_id: 1, action: "/Export Report".into() },
        "rate_limit:1:_export_report",
        "rate_limit:1:*"
    )]
    #[case(
        CacheKey::Service { entity: "problem".into(), id: 9 },
        "service:problem:9",
        "service:problem:*"
    )]
    #[case(
        CacheKey::Custom { family: KeyFamily::Search, key: "regions".into() },
        "search:regions",
        "search:*"
    )]
    fn test_key_layout(#[case] key: CacheKey, #[case] built: &str, #[case] pattern: &str) {
        assert_eq!(key.build(), built);
        assert_eq!(key.pattern(), pattern);
        assert_eq!(KeyFamily::of(&key.build()), Some(key.family()));
    }

    #[test]
    fn test_family_lookup() {
        assert_eq!(KeyFamily::of("installation:object:3"), Some(KeyFamily::Installation));
        assert_eq!(KeyFamily::of("unknown:1"), None);
        assert_eq!(KeyFamily::RateLimit.pattern(), "rate_limit:*");
        assert_eq!(KeyFamily::ALL.len(), 12);
    }
}
