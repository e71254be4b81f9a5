//! # 缓存运维检查
//!
//! 为管理端提供按模式分批列出键、查看单个键、删除、清理和
//! 键族分布统计。所有键都以不含命名空间前缀的逻辑形式出入。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::backend::KeyKind;
use super::codec::decode_stored;
use super::keys::KeyFamily;
use super::manager::{CacheManager, SCAN_BATCH};
use crate::error::{CacheError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{linfo, lwarn};

/// 预览字符串的默认最大字符数
pub const DEFAULT_PREVIEW_CHARS: usize = 200;

/// 格式化字节数为人类可读形式（1024 进制）
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.2} {}", UNITS[unit])
}

/// 单个键的概要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    /// 逻辑键
    pub key: String,
    /// 数据类型
    pub key_type: Option<KeyKind>,
    /// 剩余秒数，`-1` 表示永不过期
    pub ttl: Option<i64>,
    /// 近似内存占用
    pub size_bytes: Option<u64>,
    /// 可读的内存占用
    pub size_human: Option<String>,
}

/// 一批键
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPage {
    /// 本批键
    pub keys: Vec<KeyInfo>,
    /// 下一次扫描的游标，`0` 表示结束
    pub cursor: u64,
    /// 是否还有后续批次
    pub has_more: bool,
}

/// 单个键的详细信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyDetail {
    /// 键概要
    #[serde(flatten)]
    pub info: KeyInfo,
    /// 值预览，过长的字符串会被截断
    pub value: Value,
    /// 预览是否被截断
    pub truncated: bool,
}

/// 键族计数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyCount {
    /// 键族
    pub family: KeyFamily,
    /// 匹配模式
    pub pattern: String,
    /// 用途说明
    pub description: String,
    /// 键数量
    pub count: u64,
}

/// 命名空间内的键分布
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternSummary {
    /// 命名空间内的键总数
    pub total_keys: u64,
    /// 各已知键族的计数
    pub families: Vec<FamilyCount>,
    /// 不属于已知键族的前缀，按数量降序
    pub other_prefixes: Vec<(String, u64)>,
}

/// 运维检查器
#[derive(Debug, Clone)]
pub struct CacheInspector {
    manager: CacheManager,
    preview_chars: usize,
}

impl CacheInspector {
    /// 创建检查器
    #[must_use]
    pub const fn new(manager: CacheManager) -> Self {
        Self {
            manager,
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }

    /// 设置预览截断长度
    #[must_use]
    pub const fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }

    /// 底层管理器
    #[must_use]
    pub const fn manager(&self) -> &CacheManager {
        &self.manager
    }

    async fn describe(&self, key: &str) -> Result<KeyInfo> {
        let backend = self.manager.backend();
        let full_key = self.manager.key(key);
        let size_bytes = backend.memory_usage(&full_key).await?;
        Ok(KeyInfo {
            key: key.to_string(),
            key_type: backend.key_type(&full_key).await?,
            ttl: backend.ttl(&full_key).await?,
            size_bytes,
            size_human: size_bytes.map(format_bytes),
        })
    }

    /// 从 `cursor` 开始扫描一批匹配 `pattern` 的键
    pub async fn list_keys(&self, pattern: &str, cursor: u64, count: usize) -> Result<KeyPage> {
        let (next, keys) = self
            .manager
            .try_scan(cursor, pattern, count.max(1))
            .await?;

        let mut infos = Vec::with_capacity(keys.len());
        for key in keys {
            infos.push(self.describe(&key).await?);
        }
        Ok(KeyPage {
            keys: infos,
            cursor: next,
            has_more: next != 0,
        })
    }

    /// 查看单个键；不存在时返回 `None`
    pub async fn key_detail(&self, key: &str) -> Result<Option<KeyDetail>> {
        self.manager.ready()?;
        let info = self.describe(key).await?;
        let Some(kind) = info.key_type else {
            return Ok(None);
        };

        let backend = self.manager.backend();
        let full_key = self.manager.key(key);
        let raw_value = match kind {
            KeyKind::Hash => {
                let fields = backend.hgetall_raw(&full_key).await?;
                Value::Object(
                    fields
                        .into_iter()
                        .map(|(field, raw)| (field, decode_stored(raw)))
                        .collect(),
                )
            }
            KeyKind::String => backend
                .get_raw(&full_key)
                .await?
                .map_or(Value::Null, decode_stored),
            other => Value::String(format!("<{other}>")),
        };
        let (value, truncated) = self.preview(raw_value);

        Ok(Some(KeyDetail {
            info,
            value,
            truncated,
        }))
    }

    /// 截断过长的值
    #[must_use]
    pub fn preview(&self, value: Value) -> (Value, bool) {
        let text = match &value {
            Value::String(text) => text.clone(),
            Value::Null => return (value, false),
            other => other.to_string(),
        };
        if text.chars().count() <= self.preview_chars {
            return (value, false);
        }
        let cut: String = text.chars().take(self.preview_chars).collect();
        (Value::String(format!("{cut}...")), true)
    }

    /// 删除单个键
    pub async fn delete(&self, key: &str) -> bool {
        let deleted = self.manager.delete(key).await;
        linfo!(
            "system",
            LogStage::Maintenance,
            LogComponent::Inspector,
            "delete_key",
            "管理端删除键",
            key = key,
            deleted = deleted
        );
        deleted
    }

    /// 按模式清理
    pub async fn clear_pattern(&self, pattern: &str) -> Result<u64> {
        if pattern.is_empty() {
            return Err(CacheError::invalid_argument("模式不能为空"));
        }
        self.manager.ready()?;
        let deleted = self.manager.clear_by_pattern(pattern).await;
        linfo!(
            "system",
            LogStage::Maintenance,
            LogComponent::Inspector,
            "clear_pattern",
            &format!("管理端按模式清理 {deleted} 个键"),
            pattern = pattern
        );
        Ok(deleted)
    }

    /// 清空整个命名空间，必须显式确认；返回清空前的键数
    pub async fn flush(&self, confirmation: bool) -> Result<u64> {
        if !confirmation {
            lwarn!(
                "system",
                LogStage::Maintenance,
                LogComponent::Inspector,
                "flush",
                "拒绝未确认的清空请求",
                prefix = self.manager.prefix()
            );
            return Err(CacheError::ConfirmationRequired(format!(
                "清空命名空间 {}",
                self.manager.prefix()
            )));
        }

        self.manager.ready()?;
        let before = self.manager.count_keys("*").await;
        if !self.manager.clear_all(true).await {
            return Err(CacheError::unavailable("命名空间清空失败"));
        }
        Ok(before)
    }

    /// 统计各键族数量及最常见的 `top` 个其他前缀
    pub async fn pattern_summary(&self, top: usize) -> Result<PatternSummary> {
        let mut family_counts: HashMap<KeyFamily, u64> = HashMap::new();
        let mut other: HashMap<String, u64> = HashMap::new();
        let mut total_keys = 0;
        let mut cursor = 0;

        loop {
            let (next, keys) = self.manager.try_scan(cursor, "*", SCAN_BATCH).await?;
            for key in keys {
                total_keys += 1;
                match KeyFamily::of(&key) {
                    Some(family) => *family_counts.entry(family).or_default() += 1,
                    None => {
                        let prefix = key.split(':').next().unwrap_or_default().to_string();
                        *other.entry(prefix).or_default() += 1;
                    }
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        let families = KeyFamily::ALL
            .iter()
            .map(|family| FamilyCount {
                family: *family,
                pattern: family.pattern(),
                description: family.description().to_string(),
                count: family_counts.get(family).copied().unwrap_or(0),
            })
            .collect();

        let mut other_prefixes: Vec<(String, u64)> = other.into_iter().collect();
        other_prefixes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        other_prefixes.truncate(top);

        Ok(PatternSummary {
            total_keys,
            families,
            other_prefixes,
        })
    }
}
