//! 停止与优雅关闭
//!
//! 进程级 ShutdownManager 监听 Ctrl+C / SIGTERM；每个蜂群持有其子管理器，
//! 停止单个蜂群不影响其他蜂群，进程关闭会级联取消全部蜂群。
//! 取消令牌贯穿重试循环，退避等待可被立即中止。

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::core::ConflictResolver;
use crate::store::SqliteStore;

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    /// 关闭信号 token
    shutdown_token: CancellationToken,
    /// 关闭原因广播
    reason_tx: broadcast::Sender<ShutdownReason>,
}

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// 用户发起的退出 (Ctrl+C)
    UserInitiated,
    /// SIGTERM 信号
    Signal,
    /// 单个蜂群被停止
    SwarmStopped(String),
    /// 致命错误
    FatalError(String),
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::from_token(CancellationToken::new())
    }

    fn from_token(shutdown_token: CancellationToken) -> Self {
        let (reason_tx, _) = broadcast::channel(1);
        Self {
            shutdown_token,
            reason_tx,
        }
    }

    /// 子管理器：父级关闭时随之取消，自身关闭不影响父级
    pub fn child(&self) -> Self {
        Self::from_token(self.shutdown_token.child_token())
    }

    /// 获取关闭 token（用于取消正在进行的任务）
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// 触发关闭
    pub fn shutdown(&self, reason: ShutdownReason) {
        let _ = self.reason_tx.send(reason);
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// 订阅关闭原因
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 关闭时需要执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 清理任务名称（用于日志）
    fn name(&self) -> &'static str;
}

/// 关闭协调器：按注册顺序执行清理，单个任务超时不阻塞其余任务
pub struct ShutdownCoordinator {
    manager: Arc<ShutdownManager>,
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    /// 单个清理任务的超时时间（秒）
    timeout_secs: u64,
}

impl ShutdownCoordinator {
    pub fn new(manager: Arc<ShutdownManager>) -> Self {
        Self {
            manager,
            cleanup_tasks: Vec::new(),
            timeout_secs: 5,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    pub async fn run_cleanup(&self) {
        tracing::info!("Running {} cleanup tasks...", self.cleanup_tasks.len());

        let timeout = tokio::time::Duration::from_secs(self.timeout_secs);

        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(timeout, task.cleanup()).await {
                Ok(Ok(())) => {
                    tracing::info!("Cleanup task '{}' completed successfully", name);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Cleanup task '{}' failed: {}", name, e);
                }
                Err(_) => {
                    tracing::warn!("Cleanup task '{}' timed out after {}s", name, self.timeout_secs);
                }
            }
        }

        tracing::info!("All cleanup tasks finished");
    }

    pub fn manager(&self) -> &Arc<ShutdownManager> {
        &self.manager
    }
}

/// 释放一组 Agent 持有的文件锁
pub struct LockReleaseCleanup {
    resolver: Arc<ConflictResolver>,
    agent_ids: Vec<String>,
}

impl LockReleaseCleanup {
    pub fn new(resolver: Arc<ConflictResolver>, agent_ids: Vec<String>) -> Self {
        Self {
            resolver,
            agent_ids,
        }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for LockReleaseCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let released: usize = self
            .agent_ids
            .iter()
            .map(|id| self.resolver.release_all_locks_for_agent(id))
            .sum();
        tracing::debug!("Released {} file locks on shutdown", released);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "FileLocks"
    }
}

/// SQLite WAL 检查点
pub struct SqliteCheckpointCleanup {
    store: Arc<SqliteStore>,
}

impl SqliteCheckpointCleanup {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for SqliteCheckpointCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.store.checkpoint()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SQLite"
    }
}
