//! # 缓存工厂
//!
//! 根据配置构建后端与管理器。应用启动时调用一次，得到的
//! [`CacheManager`] 在整个进程内共享，关闭时调用 `close()`。

use std::sync::Arc;

use super::backend::CacheBackend;
use super::client::RedisClient;
use super::manager::CacheManager;
use super::memory::MemoryCache;
use crate::config::{CacheBackendKind, CacheConfig};
use crate::error::Result;
use crate::logging::{LogComponent, LogStage};
use crate::{linfo, lwarn};

/// 缓存工厂
pub struct CacheFactory;

impl CacheFactory {
    /// 按配置创建后端（不建立连接）
    pub fn create_backend(config: &CacheConfig) -> Result<Arc<dyn CacheBackend>> {
        let backend: Arc<dyn CacheBackend> = match config.backend {
            CacheBackendKind::Memory => Arc::new(Self::memory_backend(config)),
            CacheBackendKind::Redis => Arc::new(RedisClient::new(config.redis.clone())?),
        };
        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Factory,
            "create_backend",
            "缓存后端已创建",
            backend = backend.name()
        );
        Ok(backend)
    }

    fn memory_backend(config: &CacheConfig) -> MemoryCache {
        MemoryCache::with_sweep_interval(config.memory_max_entries, config.sweep_interval())
    }

    /// 创建未初始化的管理器
    pub fn create_manager(config: &CacheConfig) -> Result<CacheManager> {
        let backend = Self::create_backend(config)?;
        Ok(CacheManager::new(backend, config.key_prefix.clone())
            .with_default_ttl(config.default_ttl()))
    }

    /// 创建并初始化管理器
    ///
    /// Redis 初始化失败且 `fallback_to_memory` 开启时退回内存后端，
    /// 否则返回初始化错误。
    pub async fn create_initialized(config: &CacheConfig) -> Result<CacheManager> {
        let manager = Self::create_manager(config)?;
        let err = match manager.initialize().await {
            Ok(()) => return Ok(manager),
            Err(e) => e,
        };

        if config.backend != CacheBackendKind::Redis || !config.fallback_to_memory {
            return Err(err);
        }

        lwarn!(
            "system",
            LogStage::Startup,
            LogComponent::Factory,
            "fallback_to_memory",
            &format!("Redis 初始化失败，退回内存缓存: {err}"),
            redis = %config.redis.display_addr()
        );
        manager.close().await;

        let fallback = CacheManager::new(
            Arc::new(Self::memory_backend(config)),
            config.key_prefix.clone(),
        )
        .with_default_ttl(config.default_ttl());
        fallback.initialize().await?;
        Ok(fallback)
    }
}
