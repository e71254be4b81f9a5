//! # 缓存模块
//!
//! 机器人共享的缓存层：Redis 与进程内两种后端、带命名空间的缓存管理器、
//! 分页缓存、函数结果缓存构建器、缓存分组和运维检查工具

pub mod backend;
pub mod cached;
pub mod client;
pub mod codec;
pub mod factory;
pub mod group;
pub mod inspector;
pub mod janitor;
pub mod keys;
pub mod manager;
pub mod memory;
pub mod pagination;
pub mod stats;
pub mod strategies;

pub use backend::{BackendInfo, CacheBackend, KeyKind};
pub use cached::{CacheAware, CacheKeyDeriver, CacheRegistry, CachedOperation, InvalidateCache};
pub use client::{RedisClient, RedisPipeline};
pub use codec::CacheType;
pub use factory::CacheFactory;
pub use group::CacheGroup;
pub use inspector::{CacheInspector, KeyDetail, KeyInfo, KeyPage, PatternSummary, format_bytes};
pub use janitor::PaginationJanitor;
pub use keys::{CacheKey, KeyFamily};
pub use manager::CacheManager;
pub use memory::{MemoryCache, MemoryPipeline};
pub use pagination::{PaginationHandle, PaginationMetadata};
pub use stats::{CacheStatsReport, StatsCounter};
pub use strategies::{CacheStrategy, CacheTtl};
