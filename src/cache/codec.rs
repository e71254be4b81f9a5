//! # 缓存值编解码
//!
//! 后端层统一使用字符串存储：结构化值带 `json:` 标记，
//! 标量直接存储。管理器层再按 [`CacheType`] 决定序列化方式。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CacheError, Result};

/// 结构化值标记
pub const JSON_TAG: &str = "json:";

/// 编码后端层存储值
///
/// 对象与数组写成 `json:` + JSON 文本；字符串原样存储；
/// 其余标量存储其 JSON 文本（`42`、`true`、`null`）。
#[must_use]
pub fn encode_tagged(value: &Value) -> String {
    match value {
        Value::Object(_) | Value::Array(_) => format!("{JSON_TAG}{value}"),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 解码后端层存储值
///
/// 带标记的负载解析失败时退回原始字符串；未带标记的负载一律视为字符串。
#[must_use]
pub fn decode_tagged(raw: String) -> Value {
    match raw.strip_prefix(JSON_TAG) {
        Some(payload) => serde_json::from_str(payload).unwrap_or(Value::String(raw)),
        None => Value::String(raw),
    }
}

/// 解码来源未知的字符串负载
///
/// 带 `json:` 标记的按后端约定解析，其余按 [`CacheType::Json`] 解析，
/// 解析失败时退回原始字符串。
#[must_use]
pub fn decode_stored(raw: String) -> Value {
    if raw.starts_with(JSON_TAG) {
        decode_tagged(raw)
    } else {
        CacheType::Json.decode(raw)
    }
}

/// 管理器层序列化方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// JSON 序列化（默认），字符串原样存储
    #[default]
    Json,
    /// 字符串直通
    String,
    /// 整数文本（可与 increment/decrement 配合）
    Integer,
}

impl CacheType {
    /// 按类型编码
    pub fn encode(self, value: &Value) -> Result<String> {
        match self {
            Self::Json => match value {
                Value::String(s) => Ok(s.clone()),
                other => serde_json::to_string(other)
                    .map_err(|e| CacheError::serialization_with_source("JSON 序列化失败", e)),
            },
            Self::String => Ok(match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            Self::Integer => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
                Value::String(s) if s.trim().parse::<i64>().is_ok() => Ok(s.trim().to_string()),
                other => Err(CacheError::serialization(format!(
                    "值不是整数: {other}"
                ))),
            },
        }
    }

    /// 按类型解码；无法解析时退回原始字符串
    #[must_use]
    pub fn decode(self, raw: String) -> Value {
        match self {
            Self::Json => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
            Self::String => Value::String(raw),
            Self::Integer => raw
                .trim()
                .parse::<i64>()
                .map_or(Value::String(raw), Value::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tagged_structured_values() {
        let value = json!({"name": "Щит ВРУ", "items": [1, 2, 3]});
        let encoded = encode_tagged(&value);
        assert!(encoded.starts_with(JSON_TAG));
        assert_eq!(decode_tagged(encoded), value);
    }

    #[test]
    fn test_tagged_scalars_are_untagged() {
        assert_eq!(encode_tagged(&json!("plain")), "plain");
        assert_eq!(encode_tagged(&json!(42)), "42");
        // 未带标记的负载统一按字符串返回
        assert_eq!(decode_tagged("42".to_string()), json!("42"));
    }

    #[test]
    fn test_malformed_tagged_payload_falls_back() {
        let raw = "json:{broken".to_string();
        assert_eq!(decode_tagged(raw.clone()), Value::String(raw));
    }

    #[test]
    fn test_cache_type_json_falls_back_to_raw() {
        assert_eq!(CacheType::Json.decode("not json".into()), json!("not json"));
        assert_eq!(CacheType::Json.decode("{\"a\":1}".into()), json!({"a": 1}));
    }

    #[test]
    fn test_cache_type_json_stores_strings_verbatim() {
        assert_eq!(CacheType::Json.encode(&json!("plain")).unwrap(), "plain");
        assert_eq!(
            CacheType::Json.encode(&json!({"a": "б"})).unwrap(),
            "{\"a\":\"б\"}"
        );
        assert_eq!(CacheType::Json.encode(&json!(3)).unwrap(), "3");
        assert_eq!(CacheType::Json.decode("plain".into()), json!("plain"));
    }

    #[test]
    fn test_decode_stored_handles_both_conventions() {
        assert_eq!(
            decode_stored(encode_tagged(&json!({"name": "root"}))),
            json!({"name": "root"})
        );
        assert_eq!(decode_stored("{\"name\":\"root\"}".into()), json!({"name": "root"}));
        assert_eq!(decode_stored("abcdef".into()), json!("abcdef"));
        assert_eq!(decode_stored("0".into()), json!(0));
    }

    #[test]
    fn test_cache_type_integer() {
        assert_eq!(CacheType::Integer.encode(&json!(7)).unwrap(), "7");
        assert_eq!(CacheType::Integer.encode(&json!(" 12 ")).unwrap(), "12");
        assert!(CacheType::Integer.encode(&json!(1.5)).is_err());
        assert_eq!(CacheType::Integer.decode("15".into()), json!(15));
        assert_eq!(CacheType::Integer.decode("x".into()), json!("x"));
    }
}
