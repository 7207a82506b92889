//! 冲突仲裁：文件独占锁 + 失败标记传播
//!
//! 所有操作都是进程内、同步、非阻塞的测试并设置；调用方自行轮询 / 退避。
//! 锁表与失败标记各自只属于一个实例（由编排器持有），进程重启即丢失。

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::domain::TaskId;

/// 默认锁过期时间：30 分钟
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
struct FileLock {
    holder: String,
    acquired_at: Instant,
}

#[derive(Debug, Default)]
struct ResolverState {
    /// 文件路径 -> 持有者
    locks: HashMap<String, FileLock>,
    /// 任务 ID -> 失败原因
    failures: HashMap<TaskId, String>,
}

/// 健康面板用的只读统计
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolverStats {
    pub active_locks: usize,
    pub locked_files: Vec<String>,
    pub failed_tasks: usize,
    pub failed_task_ids: Vec<TaskId>,
}

#[derive(Debug)]
pub struct ConflictResolver {
    state: Mutex<ResolverState>,
    stale_after: Duration,
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self::with_stale_after(DEFAULT_STALE_AFTER)
    }

    pub fn with_stale_after(stale_after: Duration) -> Self {
        Self {
            state: Mutex::new(ResolverState::default()),
            stale_after,
        }
    }

    fn state(&self) -> MutexGuard<'_, ResolverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 尝试获取文件独占锁
    ///
    /// 未加锁或本 Agent 已持有时返回 true；被他人持有且未过期时返回 false；
    /// 持有时间达到过期阈值视为遗弃，直接转给请求方。
    pub fn acquire_file_lock(&self, path: &str, agent_id: &str) -> bool {
        let mut state = self.state();
        let now = Instant::now();

        if let Some(lock) = state.locks.get_mut(path) {
            if lock.holder == agent_id {
                return true;
            }

            let held_for = now.saturating_duration_since(lock.acquired_at);
            if held_for >= self.stale_after {
                tracing::warn!(
                    "Stale lock on {} held by {} for {:?}, reassigning to {}",
                    path,
                    lock.holder,
                    held_for,
                    agent_id
                );
                lock.holder = agent_id.to_string();
                lock.acquired_at = now;
                return true;
            }

            tracing::debug!("File {} locked by {} ({} waiting)", path, lock.holder, agent_id);
            return false;
        }

        state.locks.insert(
            path.to_string(),
            FileLock {
                holder: agent_id.to_string(),
                acquired_at: now,
            },
        );
        tracing::debug!("Agent {} acquired lock on {}", agent_id, path);
        true
    }

    /// 释放锁；非持有者调用时静默忽略
    pub fn release_file_lock(&self, path: &str, agent_id: &str) {
        let mut state = self.state();
        if state.locks.get(path).is_some_and(|l| l.holder == agent_id) {
            state.locks.remove(path);
            tracing::debug!("Agent {} released lock on {}", agent_id, path);
        }
    }

    /// 释放某 Agent 持有的全部锁（失败 / 关闭时清理），返回释放数量
    pub fn release_all_locks_for_agent(&self, agent_id: &str) -> usize {
        let mut state = self.state();
        let before = state.locks.len();
        state.locks.retain(|_, lock| lock.holder != agent_id);
        let released = before - state.locks.len();
        if released > 0 {
            tracing::info!("Released {} locks held by {}", released, agent_id);
        }
        released
    }

    /// 当前持有者
    pub fn lock_holder(&self, path: &str) -> Option<String> {
        self.state().locks.get(path).map(|l| l.holder.clone())
    }

    /// 标记任务失败（覆盖旧原因）
    pub fn mark_task_failed(&self, task_id: &str, error: &str) {
        self.state()
            .failures
            .insert(task_id.to_string(), error.to_string());
        tracing::warn!("Task {} marked as failed: {}", task_id, error);
    }

    pub fn is_task_failed(&self, task_id: &str) -> bool {
        self.state().failures.contains_key(task_id)
    }

    pub fn get_failure_reason(&self, task_id: &str) -> Option<String> {
        self.state().failures.get(task_id).cloned()
    }

    /// 按输入顺序检查依赖，第一个已失败的依赖决定阻塞原因
    pub fn should_block_dependent_task(&self, dependencies: &[TaskId]) -> Option<String> {
        let state = self.state();
        dependencies.iter().find_map(|dep| {
            state
                .failures
                .get(dep)
                .map(|reason| format!("Dependency task {dep} failed: {reason}"))
        })
    }

    /// 清除失败标记（操作员选择重试时）
    pub fn clear_failures(&self, task_ids: &[TaskId]) {
        let mut state = self.state();
        for task_id in task_ids {
            if state.failures.remove(task_id).is_some() {
                tracing::info!("Cleared failure marker for task {}", task_id);
            }
        }
    }

    pub fn get_stats(&self) -> ResolverStats {
        let state = self.state();
        let mut locked_files: Vec<String> = state.locks.keys().cloned().collect();
        locked_files.sort();
        let mut failed_task_ids: Vec<TaskId> = state.failures.keys().cloned().collect();
        failed_task_ids.sort();
        ResolverStats {
            active_locks: locked_files.len(),
            locked_files,
            failed_tasks: failed_task_ids.len(),
            failed_task_ids,
        }
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_reentrant_acquire() {
        let resolver = ConflictResolver::new();
        assert!(resolver.acquire_file_lock("src/app.rs", "a"));
        assert!(resolver.acquire_file_lock("src/app.rs", "a"));
        assert_eq!(resolver.lock_holder("src/app.rs").as_deref(), Some("a"));
    }

    #[test]
    fn test_mutual_exclusion() {
        let resolver = ConflictResolver::new();
        assert!(resolver.acquire_file_lock("src/app.rs", "a"));
        assert!(!resolver.acquire_file_lock("src/app.rs", "b"));
        assert_eq!(resolver.lock_holder("src/app.rs").as_deref(), Some("a"));
    }

    #[test]
    fn test_stale_lock_takeover() {
        let resolver = ConflictResolver::with_stale_after(Duration::ZERO);
        assert!(resolver.acquire_file_lock("src/app.rs", "a"));
        assert!(resolver.acquire_file_lock("src/app.rs", "b"));
        assert_eq!(resolver.lock_holder("src/app.rs").as_deref(), Some("b"));
    }

    #[test]
    fn test_release_by_non_holder_is_ignored() {
        let resolver = ConflictResolver::new();
        resolver.acquire_file_lock("f", "a");
        resolver.release_file_lock("f", "b");
        assert_eq!(resolver.lock_holder("f").as_deref(), Some("a"));
        resolver.release_file_lock("f", "a");
        assert!(resolver.lock_holder("f").is_none());
        assert!(resolver.acquire_file_lock("f", "b"));
    }

    #[test]
    fn test_release_all_for_agent() {
        let resolver = ConflictResolver::new();
        resolver.acquire_file_lock("f1", "a");
        resolver.acquire_file_lock("f2", "a");
        resolver.acquire_file_lock("f3", "b");
        assert_eq!(resolver.release_all_locks_for_agent("a"), 2);
        let stats = resolver.get_stats();
        assert_eq!(stats.active_locks, 1);
        assert_eq!(stats.locked_files, vec!["f3"]);
    }

    #[test]
    fn test_failure_markers() {
        let resolver = ConflictResolver::new();
        assert!(resolver.should_block_dependent_task(&["t1".into()]).is_none());

        resolver.mark_task_failed("t2", "boom");
        resolver.mark_task_failed("t3", "bang");
        resolver.mark_task_failed("t2", "boom again");
        assert!(resolver.is_task_failed("t2"));
        assert_eq!(resolver.get_failure_reason("t2").as_deref(), Some("boom again"));

        let reason = resolver
            .should_block_dependent_task(&["t1".into(), "t3".into(), "t2".into()])
            .unwrap();
        assert_eq!(reason, "Dependency task t3 failed: bang");

        resolver.clear_failures(&["t2".into(), "missing".into()]);
        assert!(!resolver.is_task_failed("t2"));
        assert_eq!(resolver.get_stats().failed_task_ids, vec!["t3"]);
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        let resolver = Arc::new(ConflictResolver::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let resolver = Arc::clone(&resolver);
                std::thread::spawn(move || resolver.acquire_file_lock("shared.rs", &format!("agent-{i}")))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
