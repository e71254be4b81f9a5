//! # 缓存分组
//!
//! 一组相关键共享命名空间。成员关系同时记录在本地集合和
//! 带 TTL 的标记键 `{namespace}:key:{key}` 中，进程重启后仍能整体失效。

use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::Mutex;

use super::codec::CacheType;
use super::manager::CacheManager;
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, linfo};

/// 成员标记的存活时间
pub const MARKER_TTL: Duration = Duration::from_secs(86_400);

/// 缓存分组
#[derive(Debug)]
pub struct CacheGroup {
    namespace: String,
    manager: CacheManager,
    keys: Mutex<HashSet<String>>,
}

impl CacheGroup {
    /// 创建分组
    pub fn new(namespace: impl Into<String>, manager: CacheManager) -> Self {
        Self {
            namespace: namespace.into(),
            manager,
            keys: Mutex::new(HashSet::new()),
        }
    }

    /// 命名空间
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn marker_key(&self, key: &str) -> String {
        format!("{}:key:{key}", self.namespace)
    }

    fn marker_pattern(&self) -> String {
        format!("{}:key:*", self.namespace)
    }

    /// 记录成员；标记写入失败只影响跨进程失效，本地集合仍然生效
    pub async fn add_key(&self, key: &str) -> bool {
        self.keys.lock().await.insert(key.to_string());
        self.manager
            .set(
                &self.marker_key(key),
                &Value::String(self.namespace.clone()),
                Some(MARKER_TTL),
                CacheType::String,
            )
            .await
    }

    /// 本地跟踪的成员
    pub async fn tracked_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.keys.lock().await.iter().cloned().collect();
        keys.sort();
        keys
    }

    /// 失效整个分组，返回删除的键数（含标记）
    ///
    /// 先删除本地跟踪的成员，再扫描标记键，覆盖之前进程登记的成员。
    pub async fn invalidate_group(&self) -> u64 {
        let tracked: Vec<String> = self.keys.lock().await.drain().collect();
        let mut removed = 0;

        for key in &tracked {
            removed += u64::from(self.manager.delete(key).await);
            removed += u64::from(self.manager.delete(&self.marker_key(key)).await);
        }

        let marker_prefix = format!("{}:key:", self.namespace);
        for marker in self.manager.keys(&self.marker_pattern()).await {
            if let Some(member) = marker.strip_prefix(&marker_prefix) {
                removed += u64::from(self.manager.delete(member).await);
            }
            removed += u64::from(self.manager.delete(&marker).await);
        }

        ldebug!(
            "system",
            LogStage::Cache,
            LogComponent::CacheGroup,
            "invalidate_group",
            &format!("分组失效，删除 {removed} 个键"),
            namespace = %self.namespace,
            tracked = tracked.len()
        );
        removed
    }

    /// 删除命名空间 `{namespace}:` 下的全部键
    pub async fn invalidate_namespace(namespace: &str, manager: &CacheManager) -> u64 {
        let removed = manager.clear_by_pattern(&format!("{namespace}:*")).await;
        linfo!(
            "system",
            LogStage::Cache,
            LogComponent::CacheGroup,
            "invalidate_namespace",
            &format!("命名空间失效，删除 {removed} 个键"),
            namespace = namespace
        );
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::memory_manager;
    use serde_json::json;

    async fn manager() -> CacheManager {
        memory_manager(1000).await
    }

    #[tokio::test]
    async fn test_add_key_writes_marker() {
        let manager = manager().await;
        let group = CacheGroup::new("objects", manager.clone());
        assert!(group.add_key("object:1").await);

        assert_eq!(
            manager.get("objects:key:object:1", CacheType::String).await,
            Some(json!("objects"))
        );
        let ttl = manager.ttl("objects:key:object:1").await.unwrap();
        assert!(ttl > 86_000 && ttl <= 86_400);
        assert_eq!(group.tracked_keys().await, vec!["object:1"]);
    }

    #[tokio::test]
    async fn test_invalidate_group_covers_previous_process() {
        let manager = manager().await;
        manager.put("object:1", &json!(1)).await;
        manager.put("object:2", &json!(2)).await;
        manager.put("object:3", &json!(3)).await;

        // 上一个进程登记的成员只剩标记
        let previous = CacheGroup::new("objects", manager.clone());
        previous.add_key("object:1").await;
        drop(previous);

        let group = CacheGroup::new("objects", manager.clone());
        group.add_key("object:2").await;

        assert_eq!(group.invalidate_group().await, 4);
        assert!(!manager.exists("object:1").await);
        assert!(!manager.exists("object:2").await);
        assert!(manager.exists("object:3").await);
        assert!(manager.keys("objects:key:*").await.is_empty());
        assert!(group.tracked_keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_namespace() {
        let manager = manager().await;
        manager.put("reports:daily", &json!(1)).await;
        manager.put("reports:weekly", &json!(2)).await;
        manager.put("reportsx", &json!(3)).await;

        assert_eq!(CacheGroup::invalidate_namespace("reports", &manager).await, 2);
        assert!(manager.exists("reportsx").await);
    }
}
