//! # 分页缓存
//!
//! 将任意序列按页大小切分，页数据存放在 `{base_key}:page:{n}`，
//! 元数据存放在 `{base_key}:metadata`。
//! 所有键共用同一个绝对截止时间，先写页后写元数据，
//! 因此能读到元数据时第 1 页一定存在。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

use super::codec::CacheType;
use super::keys::KeyFamily;
use super::manager::{CacheManager, SCAN_BATCH};
use crate::error::CacheError;
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, linfo, lwarn};

/// 元数据剩余 TTL 低于该值时视为即将过期
pub const EXPIRING_THRESHOLD_SECS: i64 = 60;

/// 默认页大小
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// 默认分页 TTL
pub const DEFAULT_PAGINATION_TTL: Duration = Duration::from_secs(600);

/// 分页元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationMetadata {
    /// 总条目数
    pub total_items: usize,
    /// 页大小
    pub page_size: usize,
    /// 总页数
    pub total_pages: usize,
    /// 创建时间（RFC 3339）
    pub created_at: String,
}

/// 分页缓存句柄
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationHandle {
    /// 分页 ID
    pub pagination_id: String,
    /// 基础逻辑键 `pagination:{prefix}:{id}`
    pub base_key: String,
    /// 元数据
    pub metadata: PaginationMetadata,
}

impl PaginationHandle {
    /// 第 `page` 页的逻辑键
    #[must_use]
    pub fn page_key(&self, page: usize) -> String {
        page_key(&self.base_key, page)
    }

    /// 元数据逻辑键
    #[must_use]
    pub fn metadata_key(&self) -> String {
        metadata_key(&self.base_key)
    }
}

fn page_key(base_key: &str, page: usize) -> String {
    format!("{base_key}:page:{page}")
}

fn metadata_key(base_key: &str) -> String {
    format!("{base_key}:metadata")
}

/// 到截止时间的剩余时长；`None` 表示永不过期，截止时间已过返回错误
fn time_left(deadline: Option<Instant>) -> Result<Option<Duration>, CacheError> {
    let Some(at) = deadline else {
        return Ok(None);
    };
    let left = at.saturating_duration_since(Instant::now());
    if left.is_zero() {
        Err(CacheError::unavailable("分页缓存写入耗时超过 TTL"))
    } else {
        Ok(Some(left))
    }
}

impl CacheManager {
    /// 缓存分页数据，返回分页句柄；失败时已写入的页会被回滚
    pub async fn cache_pagination(
        &self,
        key_prefix: &str,
        data: &[Value],
        page_size: usize,
        ttl: Duration,
    ) -> Option<PaginationHandle> {
        if let Err(e) = self.ready() {
            self.report("cache_pagination", key_prefix, &e);
            return None;
        }
        if page_size == 0 {
            self.report(
                "cache_pagination",
                key_prefix,
                &CacheError::invalid_argument("页大小必须大于0"),
            );
            return None;
        }

        let pagination_id = uuid::Uuid::new_v4().to_string();
        let base_key = format!("{}:{key_prefix}:{pagination_id}", KeyFamily::Pagination);
        let metadata = PaginationMetadata {
            total_items: data.len(),
            page_size,
            total_pages: data.len().div_ceil(page_size),
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        let deadline = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        let mut written = Vec::with_capacity(metadata.total_pages + 1);
        for (index, chunk) in data.chunks(page_size).enumerate() {
            let key = page_key(&base_key, index + 1);
            let page = Value::Array(chunk.to_vec());
            let expire = match time_left(deadline) {
                Ok(expire) => expire,
                Err(e) => {
                    self.report("cache_pagination", &key, &e);
                    self.rollback_pagination(&base_key, &written).await;
                    return None;
                }
            };
            if !self.set(&key, &page, expire, CacheType::Json).await {
                self.rollback_pagination(&base_key, &written).await;
                return None;
            }
            written.push(self.key(&key));
        }

        let meta_value = match serde_json::to_value(&metadata) {
            Ok(value) => value,
            Err(e) => {
                self.report("cache_pagination", &base_key, &e.into());
                self.rollback_pagination(&base_key, &written).await;
                return None;
            }
        };
        let meta_expire = match time_left(deadline) {
            Ok(expire) => expire,
            Err(e) => {
                self.report("cache_pagination", &base_key, &e);
                self.rollback_pagination(&base_key, &written).await;
                return None;
            }
        };
        if !self
            .set(&metadata_key(&base_key), &meta_value, meta_expire, CacheType::Json)
            .await
        {
            self.rollback_pagination(&base_key, &written).await;
            return None;
        }

        ldebug!(
            "system",
            LogStage::Cache,
            LogComponent::Pagination,
            "cache_pagination",
            &format!("分页缓存完成，共 {} 页", metadata.total_pages),
            base_key = %base_key,
            total_items = metadata.total_items
        );

        Some(PaginationHandle {
            pagination_id,
            base_key,
            metadata,
        })
    }

    async fn rollback_pagination(&self, base_key: &str, written: &[String]) {
        lwarn!(
            "system",
            LogStage::Cache,
            LogComponent::Pagination,
            "rollback",
            "分页缓存写入失败，回滚已写入的页",
            base_key = base_key,
            pages = written.len()
        );
        if let Err(e) = self.backend().delete_many(written).await {
            self.report("rollback_pagination", base_key, &e);
        }
    }

    /// 读取一页；任何失败都应视为整体未命中并重新生成
    pub async fn get_pagination_page(&self, base_key: &str, page: usize) -> Option<Vec<Value>> {
        match self.get(&page_key(base_key, page), CacheType::Json).await? {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// 读取分页元数据
    pub async fn get_pagination_metadata(&self, base_key: &str) -> Option<PaginationMetadata> {
        self.get_as(&metadata_key(base_key)).await
    }

    /// 清理即将过期（剩余 TTL 为负或不足 60 秒）的分页集合，返回清理的集合数
    pub async fn cleanup_expired_pagination(&self) -> u64 {
        let pattern = KeyFamily::Pagination.pattern();
        let mut cleaned = 0;
        let mut cursor = 0;

        loop {
            let (next, keys) = match self.try_scan(cursor, &pattern, SCAN_BATCH).await {
                Ok(batch) => batch,
                Err(e) => {
                    self.report("cleanup_expired_pagination", &pattern, &e);
                    break;
                }
            };

            for key in keys {
                let Some(base_key) = key.strip_suffix(":metadata") else {
                    continue;
                };
                let ttl = match self.backend().ttl(&self.key(&key)).await {
                    Ok(Some(ttl)) => ttl,
                    Ok(None) => continue,
                    Err(e) => {
                        self.report("cleanup_expired_pagination", &key, &e);
                        continue;
                    }
                };
                if ttl < EXPIRING_THRESHOLD_SECS {
                    self.clear_by_pattern(&format!("{base_key}:*")).await;
                    cleaned += 1;
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        if cleaned > 0 {
            linfo!(
                "system",
                LogStage::Maintenance,
                LogComponent::Pagination,
                "cleanup_expired_pagination",
                &format!("清理过期分页 {cleaned} 组")
            );
        }
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FlakyBackend, memory_manager, service_objects};
    use serde_json::json;
    use std::sync::Arc;

    async fn manager() -> CacheManager {
        memory_manager(1000).await
    }

    #[tokio::test]
    async fn test_handle_layout() {
        let manager = manager().await;
        let items = service_objects(3);
        let handle = manager
            .cache_pagination("objects", &items, 2, DEFAULT_PAGINATION_TTL)
            .await
            .unwrap();

        assert!(handle.base_key.starts_with("pagination:objects:"));
        assert!(handle.base_key.ends_with(&handle.pagination_id));
        assert_eq!(handle.metadata.total_pages, 2);
        assert_eq!(
            manager.get_pagination_metadata(&handle.base_key).await,
            Some(handle.metadata.clone())
        );
        assert_eq!(manager.ttl(&handle.page_key(1)).await, Some(600));
        assert_eq!(manager.ttl(&handle.metadata_key()).await, Some(600));
        assert_eq!(manager.get_pagination_page(&handle.base_key, 3).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metadata_never_outlives_first_page() {
        let backend = Arc::new(FlakyBackend::new(1000));
        let manager = CacheManager::new(backend.clone(), "test_bot");
        manager.initialize().await.unwrap();
        // 每次写入耗时 400ms，元数据比第 1 页晚写入 1.2 秒
        backend.set_write_delay(Duration::from_millis(400));

        let start = Instant::now();
        let handle = manager
            .cache_pagination("slow", &service_objects(25), 10, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(1600));

        tokio::time::sleep_until(start + Duration::from_millis(9500)).await;
        for _ in 0..30 {
            let page_alive = manager.exists(&handle.page_key(1)).await;
            let meta_alive = manager.exists(&handle.metadata_key()).await;
            assert!(page_alive || !meta_alive, "元数据存在但第 1 页已过期");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(!manager.exists(&handle.metadata_key()).await);
    }

    #[tokio::test]
    async fn test_zero_ttl_pages_persist() {
        let manager = manager().await;
        let handle = manager
            .cache_pagination("forever", &service_objects(3), 2, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(manager.ttl(&handle.page_key(1)).await, Some(-1));
        assert_eq!(manager.ttl(&handle.metadata_key()).await, Some(-1));
    }

    #[tokio::test]
    async fn test_zero_page_size_is_rejected() {
        let manager = manager().await;
        assert!(
            manager
                .cache_pagination("x", &[json!(1)], 0, DEFAULT_PAGINATION_TTL)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_empty_data_has_no_pages() {
        let manager = manager().await;
        let handle = manager
            .cache_pagination("empty", &[], 10, DEFAULT_PAGINATION_TTL)
            .await
            .unwrap();
        assert_eq!(handle.metadata.total_pages, 0);
        assert_eq!(manager.get_pagination_page(&handle.base_key, 1).await, None);
    }

    #[tokio::test]
    async fn test_cleanup_removes_expiring_sets_only() {
        let manager = manager().await;
        let items = vec![json!("a"), json!("b")];

        let fresh = manager
            .cache_pagination("fresh", &items, 1, Duration::from_secs(600))
            .await
            .unwrap();
        let expiring = manager
            .cache_pagination("expiring", &items, 1, Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(manager.cleanup_expired_pagination().await, 1);
        assert!(manager.get_pagination_page(&fresh.base_key, 1).await.is_some());
        assert!(!manager.exists(&expiring.page_key(1)).await);
        assert!(!manager.exists(&expiring.page_key(2)).await);
        assert!(!manager.exists(&expiring.metadata_key()).await);
    }
}
