//! # 分页清理任务
//!
//! 按固定间隔调用 [`CacheManager::cleanup_expired_pagination`]，
//! 清除元数据即将过期的分页集合。

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::manager::CacheManager;
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, linfo};

/// 分页清理任务
#[derive(Clone)]
pub struct PaginationJanitor {
    manager: CacheManager,
    interval: Duration,
    shutdown: Arc<RwLock<Option<CancellationToken>>>,
    task_handle: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl PaginationJanitor {
    /// 创建清理任务，调用 [`start`](Self::start) 后才开始运行
    #[must_use]
    pub fn new(manager: CacheManager, interval: Duration) -> Self {
        Self {
            manager,
            interval,
            shutdown: Arc::new(RwLock::new(None)),
            task_handle: Arc::new(RwLock::new(None)),
        }
    }

    /// 清理间隔
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// 是否正在运行
    pub async fn is_running(&self) -> bool {
        self.task_handle
            .read()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// 启动后台任务；已在运行时不重复启动
    pub async fn start(&self) {
        let mut handle_slot = self.task_handle.write().await;
        if handle_slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let token = CancellationToken::new();
        *self.shutdown.write().await = Some(token.clone());
        *handle_slot = Some(tokio::spawn(run(
            self.manager.clone(),
            self.interval,
            token,
        )));

        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Janitor,
            "pagination_janitor_started",
            "分页清理任务已启动",
            interval_secs = self.interval.as_secs()
        );
    }

    /// 停止后台任务并等待其退出
    pub async fn stop(&self) {
        if let Some(token) = self.shutdown.write().await.take() {
            token.cancel();
        }
        let handle = self.task_handle.write().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        linfo!(
            "system",
            LogStage::Shutdown,
            LogComponent::Janitor,
            "pagination_janitor_stopped",
            "分页清理任务已停止"
        );
    }
}

async fn run(manager: CacheManager, period: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    // 第一次 tick 立即返回，跳过它以免启动时立即扫描
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let cleaned = manager.cleanup_expired_pagination().await;
                ldebug!(
                    "system",
                    LogStage::BackgroundTask,
                    LogComponent::Janitor,
                    "pagination_cleanup_tick",
                    &format!("本轮清理分页 {cleaned} 组")
                );
            }
        }
    }
}
