//! # 函数结果缓存
//!
//! 用构建器包装任意异步计算，实现四种读写策略、按调用参数派生缓存键、
//! 条件缓存、调用即失效，以及在函数执行成功后按键或模式失效。
//!
//! 缓存始终是尽力而为的：读写缓存时的任何错误都按未命中处理，
//! 被包装计算自身的错误则原样返回。

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::manager::CacheManager;
use super::strategies::CacheStrategy;
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, lwarn};

/// 默认缓存时间
pub const DEFAULT_CACHED_TTL: Duration = Duration::from_secs(300);

/// 能够提供缓存管理器的接收者（通常是持有管理器的服务对象）
pub trait CacheAware {
    /// 当前可用的缓存管理器
    fn cache_manager(&self) -> Option<&CacheManager>;
}

impl CacheAware for CacheManager {
    fn cache_manager(&self) -> Option<&CacheManager> {
        Some(self)
    }
}

impl<T: CacheAware + ?Sized> CacheAware for Arc<T> {
    fn cache_manager(&self) -> Option<&CacheManager> {
        (**self).cache_manager()
    }
}

/// 启动时注册的缓存管理器，供没有接收者的调用点解析
#[derive(Debug, Clone, Default)]
pub struct CacheRegistry {
    slot: Arc<OnceLock<CacheManager>>,
}

impl CacheRegistry {
    /// 创建空注册表
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册管理器；已注册时返回 `false`
    pub fn register(&self, manager: CacheManager) -> bool {
        self.slot.set(manager).is_ok()
    }

    /// 解析已注册的管理器
    #[must_use]
    pub fn resolve(&self) -> Option<&CacheManager> {
        self.slot.get()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Function { module: String, name: String },
    Method { class: String, method: String, instance: usize },
}

/// 缓存键派生器
///
/// 由限定名、位置参数和按名称排序的关键字参数计算 MD5，
/// 可选前缀不参与哈希，便于按模式批量失效。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyDeriver {
    target: Target,
    args: Vec<String>,
    kwargs: BTreeMap<String, String>,
    prefix: Option<String>,
}

impl CacheKeyDeriver {
    /// 以限定名（`module::function`）创建
    pub fn new(qualified_name: impl AsRef<str>) -> Self {
        let qualified_name = qualified_name.as_ref();
        let (module, name) = qualified_name
            .rsplit_once("::")
            .unwrap_or(("", qualified_name));
        Self {
            target: Target::Function {
                module: module.replace("::", "."),
                name: name.to_string(),
            },
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            prefix: None,
        }
    }

    /// 以函数项的类型名作为限定名
    pub fn for_fn<F>(_function: &F) -> Self {
        Self::new(std::any::type_name::<F>())
    }

    /// 为实例方法创建；实例的类型名与地址参与哈希，不同实例互不冲突
    pub fn method<T: ?Sized>(instance: &T, method: &str) -> Self {
        let type_name = std::any::type_name::<T>();
        let class = type_name.rsplit("::").next().unwrap_or(type_name);
        Self {
            target: Target::Method {
                class: class.to_string(),
                method: method.to_string(),
                instance: std::ptr::from_ref(instance).cast::<()>() as usize,
            },
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            prefix: None,
        }
    }

    /// 追加位置参数
    #[must_use]
    pub fn arg(mut self, value: impl Debug) -> Self {
        self.args.push(format!("{value:?}"));
        self
    }

    /// 追加关键字参数（顺序无关）
    #[must_use]
    pub fn kwarg(mut self, name: &str, value: impl Debug) -> Self {
        self.kwargs.insert(name.to_string(), format!("{value:?}"));
        self
    }

    /// 设置不参与哈希的键前缀
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// 计算缓存键
    #[must_use]
    pub fn derive(&self) -> String {
        let args = format!("{:?}", self.args);
        let kwargs = format!("{:?}", self.kwargs);

        let key = match &self.target {
            Target::Function { module, name } => {
                let digest = md5::compute(format!("{name}:{args}:{kwargs}"));
                if module.is_empty() {
                    format!("cache:{name}:{digest:x}")
                } else {
                    format!("cache:{module}:{name}:{digest:x}")
                }
            }
            Target::Method {
                class,
                method,
                instance,
            } => {
                let digest = md5::compute(format!(
                    "method:{class}:{method}:{class}:{instance}:{args}:{kwargs}"
                ));
                format!("cache:{digest:x}")
            }
        };

        match &self.prefix {
            Some(prefix) => format!("{prefix}:{key}"),
            None => key,
        }
    }
}

/// 被缓存的一次调用
#[derive(Debug, Clone)]
pub struct CachedOperation {
    deriver: CacheKeyDeriver,
    ttl: Option<Duration>,
    strategy: CacheStrategy,
    namespace: Option<String>,
    enabled: bool,
    invalidate_on_call: bool,
    manager: Option<CacheManager>,
}

impl CachedOperation {
    /// 以键派生器创建，默认读写策略、TTL 300 秒
    #[must_use]
    pub const fn new(deriver: CacheKeyDeriver) -> Self {
        Self {
            deriver,
            ttl: Some(DEFAULT_CACHED_TTL),
            strategy: CacheStrategy::ReadWrite,
            namespace: None,
            enabled: true,
            invalidate_on_call: false,
            manager: None,
        }
    }

    /// 缓存时间；`None` 表示永不过期
    #[must_use]
    pub const fn ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// 读写策略
    #[must_use]
    pub const fn strategy(mut self, strategy: CacheStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// 命名空间（放在键的最前面）
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// 条件不成立时完全绕过缓存
    #[must_use]
    pub const fn cache_if(mut self, condition: bool) -> Self {
        self.enabled = condition;
        self
    }

    /// 仅删除派生键后执行，忽略读写策略
    #[must_use]
    pub const fn invalidate_on_call(mut self, invalidate: bool) -> Self {
        self.invalidate_on_call = invalidate;
        self
    }

    /// 从接收者解析管理器
    #[must_use]
    pub fn on<R: CacheAware + ?Sized>(mut self, receiver: &R) -> Self {
        if self.manager.is_none() {
            self.manager = receiver.cache_manager().cloned();
        }
        self
    }

    /// 接收者未提供时从注册表解析
    #[must_use]
    pub fn fallback(mut self, registry: &CacheRegistry) -> Self {
        if self.manager.is_none() {
            self.manager = registry.resolve().cloned();
        }
        self
    }

    /// 最终缓存键
    #[must_use]
    pub fn key(&self) -> String {
        let key = self.deriver.derive();
        match &self.namespace {
            Some(namespace) => format!("{namespace}:{key}"),
            None => key,
        }
    }

    /// 执行计算并按策略读写缓存
    pub async fn execute<T, E, F, Fut>(self, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(manager) = self.manager.as_ref() else {
            ldebug!(
                "system",
                LogStage::Cache,
                LogComponent::Decorator,
                "bypass",
                "未找到缓存管理器，直接执行"
            );
            return compute().await;
        };
        if !self.enabled {
            return compute().await;
        }

        let key = self.key();

        if self.invalidate_on_call {
            manager.delete(&key).await;
            return compute().await;
        }

        // 无法还原的缓存值由 get_as 记录并按未命中处理
        if self.strategy.reads() {
            if let Some(cached) = manager.get_as::<T>(&key).await {
                return Ok(cached);
            }
        }

        let result = compute().await?;

        if self.strategy.writes() {
            match serde_json::to_string(&result) {
                Ok(encoded) => {
                    manager
                        .store_encoded(
                            "cached_write",
                            &key,
                            encoded,
                            self.ttl,
                            self.strategy.overwrites(),
                        )
                        .await;
                }
                Err(e) => lwarn!(
                    "system",
                    LogStage::Cache,
                    LogComponent::Decorator,
                    "encode_result",
                    &format!("结果无法序列化，跳过缓存: {e}"),
                    key = %key
                ),
            }
        }

        Ok(result)
    }
}

#[derive(Debug, Clone)]
enum Invalidation {
    Key(CacheKeyDeriver),
    Pattern(String),
    Namespace,
}

/// 执行成功后失效缓存
#[derive(Debug, Clone)]
pub struct InvalidateCache {
    target: Invalidation,
    namespace: Option<String>,
    manager: Option<CacheManager>,
}

impl InvalidateCache {
    /// 失效某个函数在当前参数下的派生键
    #[must_use]
    pub const fn function(deriver: CacheKeyDeriver) -> Self {
        Self {
            target: Invalidation::Key(deriver),
            namespace: None,
            manager: None,
        }
    }

    /// 按模式失效
    #[must_use]
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self {
            target: Invalidation::Pattern(pattern.into()),
            namespace: None,
            manager: None,
        }
    }

    /// 失效整个命名空间
    #[must_use]
    pub fn whole_namespace(namespace: impl Into<String>) -> Self {
        Self {
            target: Invalidation::Namespace,
            namespace: Some(namespace.into()),
            manager: None,
        }
    }

    /// 命名空间（放在键或模式最前面）
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// 从接收者解析管理器
    #[must_use]
    pub fn on<R: CacheAware + ?Sized>(mut self, receiver: &R) -> Self {
        if self.manager.is_none() {
            self.manager = receiver.cache_manager().cloned();
        }
        self
    }

    /// 接收者未提供时从注册表解析
    #[must_use]
    pub fn fallback(mut self, registry: &CacheRegistry) -> Self {
        if self.manager.is_none() {
            self.manager = registry.resolve().cloned();
        }
        self
    }

    fn scoped(&self, key: String) -> String {
        match &self.namespace {
            Some(namespace) => format!("{namespace}:{key}"),
            None => key,
        }
    }

    /// 先执行计算，成功后再失效；计算失败时不做任何失效
    pub async fn execute<T, E, F, Fut>(self, compute: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let result = compute().await?;
        self.invalidate().await;
        Ok(result)
    }

    /// 立即失效，返回删除的键数
    pub async fn invalidate(&self) -> u64 {
        let Some(manager) = self.manager.as_ref() else {
            return 0;
        };

        let removed = match &self.target {
            Invalidation::Key(deriver) => {
                u64::from(manager.delete(&self.scoped(deriver.derive())).await)
            }
            Invalidation::Pattern(pattern) => {
                manager
                    .clear_by_pattern(&self.scoped(pattern.clone()))
                    .await
            }
            Invalidation::Namespace => match &self.namespace {
                Some(namespace) => manager.clear_by_pattern(&format!("{namespace}:*")).await,
                None => 0,
            },
        };

        ldebug!(
            "system",
            LogStage::Cache,
            LogComponent::Decorator,
            "invalidate",
            &format!("失效缓存 {removed} 个键")
        );
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::codec::CacheType;
    use crate::cache::memory::MemoryCache;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn manager() -> CacheManager {
        let manager = CacheManager::new(Arc::new(MemoryCache::new(1000)), "test_bot");
        manager.initialize().await.unwrap();
        manager
    }

    fn deriver(region: i64) -> CacheKeyDeriver {
        CacheKeyDeriver::new("electric_bot::services::regions::list_objects").arg(region)
    }

    #[test]
    fn test_function_key_layout() {
        let key = deriver(1).derive();
        assert!(key.starts_with("cache:electric_bot.services.regions:list_objects:"));
        assert_eq!(key.rsplit(':').next().unwrap().len(), 32);

        let prefixed = deriver(1).prefix("regions").derive();
        assert_eq!(prefixed, format!("regions:{key}"));
    }

    #[test]
    fn test_method_keys_differ_per_instance() {
        struct Service {
            _id: u8,
        }
        let a = Service { _id: 1 };
        let b = Service { _id: 2 };
        let key_a = CacheKeyDeriver::method(&a, "load").arg(1).derive();
        let key_b = CacheKeyDeriver::method(&b, "load").arg(1).derive();
        assert_ne!(key_a, key_b);
        assert_eq!(key_a, CacheKeyDeriver::method(&a, "load").arg(1).derive());
        assert!(key_a.starts_with("cache:"));
    }

    #[tokio::test]
    async fn test_read_write_caches_result() {
        let manager = manager().await;
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Result<Vec<i64>, String> = CachedOperation::new(deriver(1))
                .on(&manager)
                .execute(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1, 2, 3])
                })
                .await;
            assert_eq!(value.unwrap(), vec![1, 2, 3]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.ttl(&CachedOperation::new(deriver(1)).key()).await, Some(300));
    }

    #[tokio::test]
    async fn test_read_strategy_never_writes() {
        let manager = manager().await;
        let op = CachedOperation::new(deriver(2)).strategy(CacheStrategy::Read);
        let key = op.key();
        let result: Result<i64, String> = op.on(&manager).execute(|| async { Ok(5) }).await;
        assert_eq!(result, Ok(5));
        assert!(!manager.exists(&key).await);

        manager.put(&key, &json!(9)).await;
        let result: Result<i64, String> = CachedOperation::new(deriver(2))
            .strategy(CacheStrategy::Read)
            .on(&manager)
            .execute(|| async { Ok(5) })
            .await;
        assert_eq!(result, Ok(9));
    }

    #[tokio::test]
    async fn test_write_strategy_always_computes() {
        let manager = manager().await;
        let key = CachedOperation::new(deriver(3)).key();
        manager.put(&key, &json!(1)).await;

        let result: Result<i64, String> = CachedOperation::new(deriver(3))
            .strategy(CacheStrategy::Write)
            .on(&manager)
            .execute(|| async { Ok(2) })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(manager.get(&key, CacheType::Json).await, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_string_results_keep_their_type() {
        let manager = manager().await;
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let result: Result<String, String> = CachedOperation::new(deriver(17))
                .on(&manager)
                .execute(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("0042".to_string())
                })
                .await;
            assert_eq!(result, Ok("0042".to_string()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_write_around_does_not_overwrite() {
        let manager = manager().await;
        let op = CachedOperation::new(deriver(4))
            .strategy(CacheStrategy::Read)
            .on(&manager);
        let key = op.key();

        // 计算期间另一写入者抢先写入
        let result: Result<i64, String> = CachedOperation::new(deriver(4))
            .strategy(CacheStrategy::WriteAround)
            .on(&manager)
            .execute(|| async {
                manager.put(&key, &json!(100)).await;
                Ok(1)
            })
            .await;
        assert_eq!(result, Ok(1));
        assert_eq!(manager.get(&key, CacheType::Json).await, Some(json!(100)));

        let cached: Result<i64, String> = op.execute(|| async { Ok(0) }).await;
        assert_eq!(cached, Ok(100));
    }

    #[tokio::test]
    async fn test_condition_and_missing_manager_bypass() {
        let manager = manager().await;
        let op = CachedOperation::new(deriver(5)).cache_if(false);
        let key = op.key();
        let result: Result<i64, String> = op.on(&manager).execute(|| async { Ok(1) }).await;
        assert_eq!(result, Ok(1));
        assert!(!manager.exists(&key).await);

        let registry = CacheRegistry::new();
        let result: Result<i64, String> = CachedOperation::new(deriver(5))
            .fallback(&registry)
            .execute(|| async { Ok(2) })
            .await;
        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn test_registry_fallback_and_invalidate_on_call() {
        let manager = manager().await;
        let registry = CacheRegistry::new();
        assert!(registry.register(manager.clone()));
        assert!(!registry.register(manager.clone()));

        let key = CachedOperation::new(deriver(6)).key();
        manager.put(&key, &json!(7)).await;

        let result: Result<i64, String> = CachedOperation::new(deriver(6))
            .invalidate_on_call(true)
            .fallback(&registry)
            .execute(|| async { Ok(8) })
            .await;
        assert_eq!(result, Ok(8));
        assert!(!manager.exists(&key).await);
    }

    #[tokio::test]
    async fn test_compute_errors_propagate_and_skip_cache() {
        let manager = manager().await;
        let op = CachedOperation::new(deriver(7));
        let key = op.key();
        let result: Result<i64, String> = op
            .on(&manager)
            .execute(|| async { Err("db down".to_string()) })
            .await;
        assert_eq!(result, Err("db down".to_string()));
        assert!(!manager.exists(&key).await);
    }

    #[tokio::test]
    async fn test_invalidate_after_success_only() {
        let manager = manager().await;
        let key = deriver(8).derive();
        manager.put(&key, &json!(1)).await;

        let failed: Result<(), String> = InvalidateCache::function(deriver(8))
            .on(&manager)
            .execute(|| async { Err("rejected".to_string()) })
            .await;
        assert!(failed.is_err());
        assert!(manager.exists(&key).await);

        let ok: Result<(), String> = InvalidateCache::function(deriver(8))
            .on(&manager)
            .execute(|| async { Ok(()) })
            .await;
        assert!(ok.is_ok());
        assert!(!manager.exists(&key).await);
    }

    #[tokio::test]
    async fn test_invalidate_by_pattern_with_namespace() {
        let manager = manager().await;
        manager.put("regions:cache:a", &json!(1)).await;
        manager.put("regions:cache:b", &json!(2)).await;
        manager.put("objects:cache:a", &json!(3)).await;

        let removed = InvalidateCache::pattern("cache:*")
            .namespace("regions")
            .on(&manager)
            .invalidate()
            .await;
        assert_eq!(removed, 2);
        assert!(manager.exists("objects:cache:a").await);

        let removed = InvalidateCache::whole_namespace("objects")
            .on(&manager)
            .invalidate()
            .await;
        assert_eq!(removed, 1);
    }
}
