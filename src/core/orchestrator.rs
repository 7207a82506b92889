//! 蜂群编排器：计划接受、任务派发、失败处理、健康报告
//!
//! 编排器持有冲突仲裁、调度、重试、升级四个组件的唯一实例（不使用进程级全局单例）。
//! 执行模型是单循环顺序派发；各组件本身可被多个调用方并发使用。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::conflict_resolver::ResolverStats;
use crate::core::escalation_manager::EscalationSummary;
use crate::core::retry_manager::{OperationFailure, RetryManager};
use crate::core::shutdown::{ShutdownManager, ShutdownReason};
use crate::core::task_scheduler::{find_cycle, SchedulerStats, StartDecision, SwarmProgress};
use crate::core::{ConflictResolver, EscalationManager, HiveError, TaskScheduler};
use crate::domain::{AgentStatus, Escalation, SwarmPlan, Task, TaskId, TaskStatus};
use crate::store::{EscalationLog, TaskStore};

/// 任务执行的接缝：实际工作（LLM 调用、写文件等）由外部实现
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// `attempt` 从 1 开始
    async fn execute(&self, task: &Task, attempt: u32) -> Result<Value, OperationFailure>;
}

/// 单个任务的派发结果
#[derive(Debug, Clone, PartialEq)]
pub enum TaskRun {
    Completed {
        attempts: u32,
        result: Value,
    },
    Failed {
        error: String,
        attempts: u32,
        escalation: Option<Escalation>,
    },
    /// 调度检查未通过（归属 / 状态 / 依赖）
    NotStarted { reason: String },
    /// 依赖已失败，本任务随之失败
    BlockedByFailure { reason: String },
    /// 声明的文件被其他 Agent 锁定
    WaitingForLock { path: String, holder: String },
    /// 蜂群已停止
    Stopped,
}

/// `run_swarm` 的汇总
#[derive(Debug, Clone, Serialize)]
pub struct SwarmRunSummary {
    pub tasks_run: usize,
    pub completed: Vec<TaskId>,
    pub failed: Vec<TaskId>,
    /// 因锁等待本轮未执行
    pub waiting: Vec<TaskId>,
    pub stopped: bool,
    pub progress: SwarmProgress,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub swarm_id: String,
    pub stopped: bool,
    pub scheduler: SchedulerStats,
    pub locks: ResolverStats,
    pub escalations: EscalationSummary,
}

pub struct Orchestrator {
    store: Arc<dyn TaskStore>,
    resolver: Arc<ConflictResolver>,
    scheduler: TaskScheduler,
    retry: RetryManager,
    escalations: EscalationManager,
    /// 进程级关闭管理器；各蜂群持有其子管理器
    shutdown: ShutdownManager,
    swarms: Mutex<HashMap<String, ShutdownManager>>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn TaskStore>, log: Arc<dyn EscalationLog>, config: &AppConfig) -> Self {
        Self {
            resolver: Arc::new(ConflictResolver::with_stale_after(config.locks.stale_after())),
            scheduler: TaskScheduler::new(Arc::clone(&store)),
            retry: RetryManager::from_config(&config.retry),
            escalations: EscalationManager::new(Arc::clone(&store), log, config.escalation.clone()),
            store,
            shutdown: ShutdownManager::new(),
            swarms: Mutex::new(HashMap::new()),
        }
    }

    /// 挂到进程级关闭管理器下，信号到达时所有蜂群一并停止
    pub fn with_shutdown(mut self, shutdown: &ShutdownManager) -> Self {
        self.shutdown = shutdown.child();
        self
    }

    /// 替换重试管理器（测试中用零退避）
    pub fn with_retry_manager(mut self, retry: RetryManager) -> Self {
        self.retry = retry;
        self
    }

    pub fn resolver(&self) -> &Arc<ConflictResolver> {
        &self.resolver
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn retry_manager(&self) -> &RetryManager {
        &self.retry
    }

    pub fn escalations(&self) -> &EscalationManager {
        &self.escalations
    }

    fn swarms(&self) -> MutexGuard<'_, HashMap<String, ShutdownManager>> {
        self.swarms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn swarm_token(&self, swarm_id: &str) -> CancellationToken {
        self.swarms()
            .entry(swarm_id.to_string())
            .or_insert_with(|| self.shutdown.child())
            .token()
    }

    /// 只读查询，不为未见过的蜂群登记令牌
    pub fn is_stopped(&self, swarm_id: &str) -> bool {
        if self.shutdown.is_shutdown() {
            return true;
        }
        self.swarms()
            .get(swarm_id)
            .map_or(false, ShutdownManager::is_shutdown)
    }

    /// 已登记令牌的蜂群数
    pub fn tracked_swarms(&self) -> usize {
        self.swarms().len()
    }

    /// 校验并持久化计划；任何问题（含依赖环）都会在写入前拒绝整个计划
    pub async fn accept_plan(&self, plan: &SwarmPlan) -> Result<(), HiveError> {
        let mut problems = plan.structural_problems();

        let existing = self.store.get_tasks_for_swarm(&plan.swarm_id).await?;
        let existing_ids: HashSet<&str> = existing.iter().map(|t| t.id.as_str()).collect();
        let planned_ids: HashSet<&str> = plan.tasks.iter().map(|t| t.id.as_str()).collect();

        for task in &plan.tasks {
            if self.store.get_task(&task.id).await?.is_some() {
                problems.push(format!("task {} already exists", task.id));
            }
            for dep in &task.dependencies {
                if !planned_ids.contains(dep.as_str()) && !existing_ids.contains(dep.as_str()) {
                    problems.push(format!("task {} depends on unknown task {}", task.id, dep));
                }
            }
        }

        if !problems.is_empty() {
            tracing::warn!("Rejected plan for swarm {}: {:?}", plan.swarm_id, problems);
            return Err(HiveError::InvalidPlan(problems.join("; ")));
        }

        let mut graph = existing;
        graph.extend(plan.tasks.iter().cloned());
        if let Some(cycle) = find_cycle(&graph) {
            tracing::warn!("Rejected plan for swarm {}: cycle {:?}", plan.swarm_id, cycle);
            return Err(HiveError::CyclicDependency(cycle));
        }

        // 追加计划可以复用已登记的 Agent，只扩展其任务列表
        let registered = self.store.get_agents_for_swarm(&plan.swarm_id).await?;
        for agent in &plan.agents {
            let task_ids = plan
                .tasks
                .iter()
                .filter(|t| t.agent_id == agent.id)
                .map(|t| t.id.clone());
            match registered.iter().find(|a| a.id == agent.id) {
                Some(existing) => {
                    let mut state = existing.state.clone();
                    state.task_ids.extend(task_ids);
                    self.store.update_agent_state(&agent.id, &state).await?;
                }
                None => {
                    let mut agent = agent.clone();
                    agent.state.task_ids = task_ids.collect();
                    self.store.create_agent(&agent).await?;
                }
            }
        }
        for task in &plan.tasks {
            self.store.create_task(task).await?;
        }

        tracing::info!(
            "Accepted plan for swarm {}: {} agents, {} tasks",
            plan.swarm_id,
            plan.agents.len(),
            plan.tasks.len()
        );
        Ok(())
    }

    /// 调度器的就绪集合，去掉被失败标记阻塞的任务
    pub async fn ready_tasks(&self, swarm_id: &str) -> Result<Vec<Task>, HiveError> {
        let ready = self.scheduler.get_ready_tasks(swarm_id).await?;
        Ok(ready
            .into_iter()
            .filter(|t| self.resolver.should_block_dependent_task(&t.dependencies).is_none())
            .collect())
    }

    /// 把失败沿依赖边传播给仍在 pending 的下游任务，直到不动点；返回新失败的任务
    pub async fn propagate_failures(&self, swarm_id: &str) -> Result<Vec<TaskId>, HiveError> {
        let mut newly_failed = Vec::new();
        loop {
            let tasks = self.store.get_tasks_for_swarm(swarm_id).await?;
            let mut changed = false;
            for task in tasks.iter().filter(|t| t.status == TaskStatus::Pending) {
                if let Some(reason) = self.resolver.should_block_dependent_task(&task.dependencies) {
                    self.fail_blocked_task(task, &reason).await?;
                    newly_failed.push(task.id.clone());
                    changed = true;
                }
            }
            if !changed {
                return Ok(newly_failed);
            }
        }
    }

    async fn fail_blocked_task(&self, task: &Task, reason: &str) -> Result<(), HiveError> {
        let blocked_by = task
            .dependencies
            .iter()
            .find(|dep| self.resolver.is_task_failed(dep))
            .cloned();
        let data = merge_data(&task.data, json!({ "error": reason, "blocked_by": blocked_by }));
        self.store
            .update_task_status(&task.id, TaskStatus::Failed, Some(data))
            .await?;
        self.resolver.mark_task_failed(&task.id, reason);
        Ok(())
    }

    /// 派发一个任务：调度检查 → 锁 → 带重试执行 → 状态迁移 → 失败标记 / 升级
    pub async fn run_task(
        &self,
        agent_id: &str,
        task_id: &str,
        swarm_id: &str,
        executor: &dyn TaskExecutor,
    ) -> Result<TaskRun, HiveError> {
        let token = self.swarm_token(swarm_id);
        if token.is_cancelled() {
            return Ok(TaskRun::Stopped);
        }

        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| HiveError::TaskNotFound(task_id.to_string()))?;

        if task.status == TaskStatus::Pending && task.agent_id == agent_id {
            if let Some(reason) = self.resolver.should_block_dependent_task(&task.dependencies) {
                tracing::warn!("Task {} blocked by failed dependency: {}", task_id, reason);
                self.fail_blocked_task(&task, &reason).await?;
                return Ok(TaskRun::BlockedByFailure { reason });
            }
        }

        if let StartDecision::Blocked(reason) = self
            .scheduler
            .can_agent_start_task(agent_id, task_id, swarm_id)
            .await?
        {
            tracing::debug!("Task {} not started: {}", task_id, reason);
            return Ok(TaskRun::NotStarted { reason });
        }

        let files = task.declared_files();
        // 任何提前返回（包括 `?`）都会随 lease 释放已取得的锁
        let mut lease = LockLease {
            resolver: &self.resolver,
            agent_id,
            paths: Vec::new(),
        };
        for path in &files {
            if !self.resolver.acquire_file_lock(path, agent_id) {
                let holder = self.resolver.lock_holder(path).unwrap_or_default();
                return Ok(TaskRun::WaitingForLock {
                    path: path.clone(),
                    holder,
                });
            }
            lease.paths.push(path.clone());
        }

        self.store
            .update_task_status(task_id, TaskStatus::InProgress, None)
            .await?;
        self.set_agent_status(swarm_id, agent_id, AgentStatus::Executing)
            .await?;
        tracing::info!("Agent {} started task {}", agent_id, task_id);

        // 尝试之间锁被他人取走时中断重试循环，而不是消耗重试次数
        let interrupt = token.child_token();
        let lock_wait: Mutex<Option<(String, String)>> = Mutex::new(None);
        let attempt_ctx = AttemptContext {
            resolver: &self.resolver,
            executor,
            task: &task,
            files: &files,
            agent_id,
            interrupt: &interrupt,
            lock_wait: &lock_wait,
        };
        let ctx = &attempt_ctx;
        let outcome = self
            .retry
            .execute_with_retry(&interrupt, move |attempt| async move {
                run_attempt(ctx, attempt).await
            })
            .await;
        drop(lease);

        if outcome.cancelled {
            let waiting = lock_wait
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            self.store
                .update_task_status(task_id, TaskStatus::Pending, None)
                .await?;
            self.set_agent_status(swarm_id, agent_id, AgentStatus::Idle)
                .await?;
            if let Some((path, holder)) = waiting {
                tracing::info!("Task {} back to pending: {} taken by {}", task_id, path, holder);
                return Ok(TaskRun::WaitingForLock { path, holder });
            }
            tracing::info!("Task {} interrupted by swarm stop", task_id);
            return Ok(TaskRun::Stopped);
        }

        if outcome.success {
            let result = outcome.result.unwrap_or(Value::Null);
            let data = merge_data(&task.data, json!({ "result": result.clone() }));
            self.store
                .update_task_status(task_id, TaskStatus::Completed, Some(data))
                .await?;
            self.set_agent_status(swarm_id, agent_id, AgentStatus::Idle)
                .await?;
            tracing::info!("Task {} completed after {} attempt(s)", task_id, outcome.attempts);
            return Ok(TaskRun::Completed {
                attempts: outcome.attempts,
                result,
            });
        }

        let error = outcome
            .error
            .clone()
            .unwrap_or_else(|| "unknown error".to_string());
        let category = outcome.error_category.map(|c| c.as_str());
        let data = merge_data(
            &task.data,
            json!({
                "error": error,
                "error_category": category,
                "attempts": outcome.attempts,
            }),
        );
        self.store
            .update_task_status(task_id, TaskStatus::Failed, Some(data))
            .await?;
        self.resolver.mark_task_failed(task_id, &error);
        self.set_agent_status(swarm_id, agent_id, AgentStatus::Failed)
            .await?;

        let dependents = self
            .store
            .get_tasks_for_swarm(swarm_id)
            .await?
            .iter()
            .filter(|t| t.depends_on(task_id))
            .count();

        let escalation = if outcome.should_escalate || dependents > 0 {
            let context = json!({
                "attempts": outcome.attempts,
                "error_category": category,
                "escalation_reason": outcome.escalation_reason,
                "dependents": dependents,
            });
            Some(
                self.escalations
                    .create_escalation(&error, &task, agent_id, swarm_id, Some(context))
                    .await?,
            )
        } else {
            None
        };

        Ok(TaskRun::Failed {
            error,
            attempts: outcome.attempts,
            escalation,
        })
    }

    /// 顺序工作循环：每次取优先级最高的就绪任务执行，直到没有可执行任务或蜂群被停止
    pub async fn run_swarm(
        &self,
        swarm_id: &str,
        executor: &dyn TaskExecutor,
    ) -> Result<SwarmRunSummary, HiveError> {
        let token = self.swarm_token(swarm_id);
        let mut summary = SwarmRunSummary {
            tasks_run: 0,
            completed: Vec::new(),
            failed: Vec::new(),
            waiting: Vec::new(),
            stopped: false,
            progress: SwarmProgress::default(),
        };

        if let Some(cycle) = self.scheduler.detect_dependency_cycle(swarm_id).await? {
            return Err(HiveError::CyclicDependency(cycle));
        }

        loop {
            if token.is_cancelled() {
                summary.stopped = true;
                break;
            }

            summary.failed.extend(self.propagate_failures(swarm_id).await?);

            let ready = self.ready_tasks(swarm_id).await?;
            let Some(task) = ready
                .into_iter()
                .find(|t| !summary.waiting.contains(&t.id))
            else {
                break;
            };

            match self
                .run_task(&task.agent_id, &task.id, swarm_id, executor)
                .await?
            {
                TaskRun::Completed { .. } => {
                    summary.tasks_run += 1;
                    summary.completed.push(task.id);
                }
                TaskRun::Failed { .. } | TaskRun::BlockedByFailure { .. } => {
                    summary.tasks_run += 1;
                    summary.failed.push(task.id);
                }
                TaskRun::WaitingForLock { path, holder } => {
                    tracing::debug!("Task {} deferred: {} held by {}", task.id, path, holder);
                    summary.waiting.push(task.id);
                }
                TaskRun::NotStarted { reason } => {
                    // 就绪集合刚计算过，只有并发修改才会走到这里
                    tracing::warn!("Ready task {} refused to start: {}", task.id, reason);
                    summary.waiting.push(task.id);
                }
                TaskRun::Stopped => {
                    summary.stopped = true;
                    break;
                }
            }
        }

        summary.progress = self.scheduler.calculate_progress(swarm_id).await?;
        tracing::info!(
            "Swarm {} run finished: {} run, {}% complete{}",
            swarm_id,
            summary.tasks_run,
            summary.progress.progress_percent,
            if summary.stopped { " (stopped)" } else { "" }
        );
        Ok(summary)
    }

    /// 操作员重试：清除失败标记并把任务（以及因它而失败的下游）放回 pending
    pub async fn retry_failed_task(&self, task_id: &str) -> Result<Vec<TaskId>, HiveError> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| HiveError::TaskNotFound(task_id.to_string()))?;
        if task.status != TaskStatus::Failed {
            return Err(HiveError::TaskNotFailed {
                id: task.id,
                status: task.status,
            });
        }

        let swarm_tasks = self.store.get_tasks_for_swarm(&task.swarm_id).await?;
        let mut reset = Vec::new();
        let mut queue = vec![task.id.clone()];
        while let Some(id) = queue.pop() {
            let Some(current) = swarm_tasks.iter().find(|t| t.id == id) else {
                continue;
            };
            if current.status != TaskStatus::Failed || reset.contains(&id) {
                continue;
            }

            let mut data = current.data.clone();
            if let Some(obj) = data.as_object_mut() {
                for key in ["error", "error_category", "attempts", "blocked_by"] {
                    obj.remove(key);
                }
            }
            self.store
                .update_task_status(&id, TaskStatus::Pending, Some(data))
                .await?;
            self.resolver.clear_failures(std::slice::from_ref(&id));

            queue.extend(
                swarm_tasks
                    .iter()
                    .filter(|t| t.data.get("blocked_by").and_then(Value::as_str) == Some(id.as_str()))
                    .map(|t| t.id.clone()),
            );
            reset.push(id);
        }

        tracing::info!("Reset {} task(s) for retry starting at {}", reset.len(), task_id);
        Ok(reset)
    }

    /// 停止蜂群：取消其令牌（中止退避等待）并释放其 Agent 持有的锁
    pub async fn stop(&self, swarm_id: &str) -> Result<usize, HiveError> {
        let manager = self
            .swarms()
            .entry(swarm_id.to_string())
            .or_insert_with(|| self.shutdown.child())
            .clone();
        manager.shutdown(ShutdownReason::SwarmStopped(swarm_id.to_string()));

        let agents = self.store.get_agents_for_swarm(swarm_id).await?;
        let released = agents
            .iter()
            .map(|a| self.resolver.release_all_locks_for_agent(&a.id))
            .sum();
        tracing::info!("Swarm {} stopped, released {} locks", swarm_id, released);
        Ok(released)
    }

    /// 允许已停止的蜂群重新运行
    pub fn resume(&self, swarm_id: &str) {
        self.swarms().remove(swarm_id);
    }

    pub async fn health_report(&self, swarm_id: &str) -> Result<HealthReport, HiveError> {
        Ok(HealthReport {
            swarm_id: swarm_id.to_string(),
            stopped: self.is_stopped(swarm_id),
            scheduler: self.scheduler.get_stats(swarm_id).await?,
            locks: self.resolver.get_stats(),
            escalations: self.escalations.get_escalation_summary(swarm_id).await?,
        })
    }

    async fn set_agent_status(
        &self,
        swarm_id: &str,
        agent_id: &str,
        status: AgentStatus,
    ) -> Result<(), HiveError> {
        let agents = self.store.get_agents_for_swarm(swarm_id).await?;
        let Some(agent) = agents.into_iter().find(|a| a.id == agent_id) else {
            tracing::debug!("Agent {} not registered in swarm {}", agent_id, swarm_id);
            return Ok(());
        };
        let mut state = agent.state;
        state.status = status;
        self.store.update_agent_state(agent_id, &state).await?;
        Ok(())
    }
}

/// 派发前取得的锁，离开作用域时释放
struct LockLease<'a> {
    resolver: &'a ConflictResolver,
    agent_id: &'a str,
    paths: Vec<String>,
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        for path in &self.paths {
            self.resolver.release_file_lock(path, self.agent_id);
        }
    }
}

struct AttemptContext<'a> {
    resolver: &'a ConflictResolver,
    executor: &'a dyn TaskExecutor,
    task: &'a Task,
    files: &'a [String],
    agent_id: &'a str,
    /// 锁冲突时取消，使重试循环立即结束
    interrupt: &'a CancellationToken,
    lock_wait: &'a Mutex<Option<(String, String)>>,
}

/// 单次尝试：取锁 → 执行 → 释放锁（在任何退避等待之前）
async fn run_attempt(ctx: &AttemptContext<'_>, attempt: u32) -> Result<Value, OperationFailure> {
    let mut held: Vec<&str> = Vec::new();
    for path in ctx.files {
        if !ctx.resolver.acquire_file_lock(path, ctx.agent_id) {
            for p in &held {
                ctx.resolver.release_file_lock(p, ctx.agent_id);
            }
            let holder = ctx.resolver.lock_holder(path).unwrap_or_default();
            tracing::warn!("Attempt {} aborted: {} is locked by {}", attempt, path, holder);
            let message = format!("File {path} is locked by {holder}");
            *ctx.lock_wait.lock().unwrap_or_else(PoisonError::into_inner) =
                Some((path.clone(), holder));
            ctx.interrupt.cancel();
            return Err(OperationFailure::new(message));
        }
        held.push(path.as_str());
    }

    let result = ctx.executor.execute(ctx.task, attempt).await;

    for path in held {
        ctx.resolver.release_file_lock(path, ctx.agent_id);
    }
    result
}

fn merge_data(data: &Value, extra: Value) -> Value {
    let mut merged = match data {
        Value::Object(_) => data.clone(),
        _ => json!({}),
    };
    if let (Some(target), Value::Object(extra)) = (merged.as_object_mut(), extra) {
        for (key, value) in extra {
            target.insert(key, value);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::retry_manager::ErrorCategory;
    use crate::domain::{Agent, AgentRole, AgentState};
    use crate::store::{InMemoryStore, StoreError};
    use std::time::Duration;

    /// 按任务 ID 决定成功或失败
    struct ScriptedExecutor {
        failures: HashMap<String, String>,
    }

    impl ScriptedExecutor {
        fn ok() -> Self {
            Self {
                failures: HashMap::new(),
            }
        }

        fn failing(task_id: &str, error: &str) -> Self {
            Self {
                failures: HashMap::from([(task_id.to_string(), error.to_string())]),
            }
        }
    }

    #[async_trait]
    impl TaskExecutor for ScriptedExecutor {
        async fn execute(&self, task: &Task, attempt: u32) -> Result<Value, OperationFailure> {
            match self.failures.get(&task.id) {
                Some(error) => Err(OperationFailure::new(error.clone())),
                None => Ok(json!({ "task": task.id, "attempt": attempt })),
            }
        }
    }

    fn plan() -> SwarmPlan {
        SwarmPlan::new("s1")
            .agent(Agent::new("backend", "s1", AgentRole::BackendIntegrator))
            .agent(Agent::new("frontend", "s1", AgentRole::FrontendArchitect))
            .task(Task::new("T1", "backend", "s1", "API").with_priority(10))
            .task(
                Task::new("T2", "frontend", "s1", "UI")
                    .with_dependencies(["T1"])
                    .with_data(json!({ "files": ["src/App.tsx"] })),
            )
            .task(Task::new("T3", "frontend", "s1", "Docs").with_priority(1))
    }

    fn orchestrator() -> (Arc<InMemoryStore>, Orchestrator) {
        let store = Arc::new(InMemoryStore::new());
        let orch = Orchestrator::new(store.clone(), store.clone(), &AppConfig::default())
            .with_retry_manager(RetryManager::new().with_backoff_unit(Duration::ZERO));
        (store, orch)
    }

    #[tokio::test]
    async fn test_accept_plan_rejects_cycle_without_persisting() {
        let (store, orch) = orchestrator();
        let cyclic = SwarmPlan::new("s1")
            .agent(Agent::new("a", "s1", AgentRole::Implementation))
            .task(Task::new("A", "a", "s1", "a").with_dependencies(["B"]))
            .task(Task::new("B", "a", "s1", "b").with_dependencies(["A"]));

        let err = orch.accept_plan(&cyclic).await.unwrap_err();
        assert!(matches!(err, HiveError::CyclicDependency(_)));
        assert!(store.get_tasks_for_swarm("s1").await.unwrap().is_empty());
        assert!(store.get_agents_for_swarm("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_accept_plan_rejects_unknown_dependency() {
        let (_, orch) = orchestrator();
        let bad = SwarmPlan::new("s1")
            .agent(Agent::new("a", "s1", AgentRole::Implementation))
            .task(Task::new("A", "a", "s1", "a").with_dependencies(["ghost"]));
        let err = orch.accept_plan(&bad).await.unwrap_err();
        assert!(err.to_string().contains("unknown task ghost"));
    }

    #[tokio::test]
    async fn test_accept_plan_records_agent_task_ids() {
        let (store, orch) = orchestrator();
        orch.accept_plan(&plan()).await.unwrap();
        let agents = store.get_agents_for_swarm("s1").await.unwrap();
        let frontend = agents.iter().find(|a| a.id == "frontend").unwrap();
        assert_eq!(frontend.state.task_ids, vec!["T2", "T3"]);

        let err = orch.accept_plan(&plan()).await.unwrap_err();
        assert!(err.is_plan_rejection());
    }

    #[tokio::test]
    async fn test_follow_up_plan_reuses_agents() {
        let (store, orch) = orchestrator();
        orch.accept_plan(&plan()).await.unwrap();
        let follow_up = SwarmPlan::new("s1")
            .agent(Agent::new("backend", "s1", AgentRole::BackendIntegrator))
            .task(Task::new("T4", "backend", "s1", "Migrations").with_dependencies(["T1"]));
        orch.accept_plan(&follow_up).await.unwrap();

        let agents = store.get_agents_for_swarm("s1").await.unwrap();
        let backend = agents.iter().find(|a| a.id == "backend").unwrap();
        assert_eq!(backend.state.task_ids, vec!["T1", "T4"]);
    }

    #[tokio::test]
    async fn test_run_swarm_completes_everything() {
        let (store, orch) = orchestrator();
        orch.accept_plan(&plan()).await.unwrap();

        let summary = orch.run_swarm("s1", &ScriptedExecutor::ok()).await.unwrap();
        assert_eq!(summary.completed, vec!["T1", "T2", "T3"]);
        assert_eq!(summary.progress.progress_percent, 100);
        assert!(orch.resolver().get_stats().locked_files.is_empty());

        let t2 = store.get_task("T2").await.unwrap().unwrap();
        assert_eq!(t2.data["result"]["attempt"], 1);
        assert_eq!(t2.data["files"][0], "src/App.tsx");
    }

    #[tokio::test]
    async fn test_failure_blocks_dependents_and_escalates() {
        let (store, orch) = orchestrator();
        orch.accept_plan(&plan()).await.unwrap();

        let executor = ScriptedExecutor::failing("T1", "SyntaxError: unexpected token");
        let summary = orch.run_swarm("s1", &executor).await.unwrap();

        assert_eq!(summary.completed, vec!["T3"]);
        assert!(summary.failed.contains(&"T1".to_string()));
        assert!(summary.failed.contains(&"T2".to_string()));

        let t2 = store.get_task("T2").await.unwrap().unwrap();
        assert_eq!(t2.status, TaskStatus::Failed);
        assert_eq!(t2.data["blocked_by"], "T1");

        // syntax_error 只尝试 2 次，不会自动升级；但 T1 有依赖方，所以仍然升级
        let pending = orch
            .escalations()
            .get_escalations_for_swarm("s1", Some(crate::domain::EscalationStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_id, "T1");
        assert_eq!(pending[0].affected_task_ids, vec!["T1", "T2"]);
        assert_eq!(pending[0].context["error_category"], "syntax_error");
    }

    #[tokio::test]
    async fn test_leaf_failure_without_escalation() {
        let (_, orch) = orchestrator();
        orch.accept_plan(&plan()).await.unwrap();
        let run = orch
            .run_task("frontend", "T3", "s1", &ScriptedExecutor::failing("T3", "not found"))
            .await
            .unwrap();
        match run {
            TaskRun::Failed {
                attempts,
                escalation,
                ..
            } => {
                assert_eq!(attempts, 1);
                assert!(escalation.is_none());
            }
            other => panic!("unexpected run result: {other:?}"),
        }
        assert!(orch.resolver().is_task_failed("T3"));
    }

    #[tokio::test]
    async fn test_api_error_escalates_leaf() {
        let (_, orch) = orchestrator();
        orch.accept_plan(&plan()).await.unwrap();
        let run = orch
            .run_task("frontend", "T3", "s1", &ScriptedExecutor::failing("T3", "Invalid API key"))
            .await
            .unwrap();
        let TaskRun::Failed { escalation, .. } = run else {
            panic!("expected failure");
        };
        let escalation = escalation.unwrap();
        assert_eq!(escalation.context["error_category"], ErrorCategory::ApiError.as_str());
    }

    #[tokio::test]
    async fn test_run_task_waits_for_foreign_lock() {
        let (store, orch) = orchestrator();
        orch.accept_plan(&plan()).await.unwrap();
        store
            .update_task_status("T1", TaskStatus::Completed, None)
            .await
            .unwrap();
        assert!(orch.resolver().acquire_file_lock("src/App.tsx", "intruder"));

        let run = orch
            .run_task("frontend", "T2", "s1", &ScriptedExecutor::ok())
            .await
            .unwrap();
        assert_eq!(
            run,
            TaskRun::WaitingForLock {
                path: "src/App.tsx".into(),
                holder: "intruder".into()
            }
        );
        assert_eq!(
            store.get_task("T2").await.unwrap().unwrap().status,
            TaskStatus::Pending
        );
    }

    /// 第一次尝试失败后，让另一个 Agent 在退避期间取走文件锁
    struct LockStealingExecutor {
        resolver: Arc<ConflictResolver>,
    }

    #[async_trait]
    impl TaskExecutor for LockStealingExecutor {
        async fn execute(&self, _task: &Task, attempt: u32) -> Result<Value, OperationFailure> {
            if attempt == 1 {
                let resolver = Arc::clone(&self.resolver);
                tokio::spawn(async move {
                    resolver.acquire_file_lock("src/App.tsx", "intruder");
                });
            }
            Err(OperationFailure::new("request timed out"))
        }
    }

    #[tokio::test]
    async fn test_lock_lost_between_attempts_returns_task_to_pending() {
        let store = Arc::new(InMemoryStore::new());
        let orch = Orchestrator::new(store.clone(), store.clone(), &AppConfig::default())
            .with_retry_manager(RetryManager::new().with_backoff_unit(Duration::from_millis(20)));
        orch.accept_plan(&plan()).await.unwrap();
        store
            .update_task_status("T1", TaskStatus::Completed, None)
            .await
            .unwrap();

        let executor = LockStealingExecutor {
            resolver: Arc::clone(orch.resolver()),
        };
        let run = orch.run_task("frontend", "T2", "s1", &executor).await.unwrap();
        assert_eq!(
            run,
            TaskRun::WaitingForLock {
                path: "src/App.tsx".into(),
                holder: "intruder".into()
            }
        );

        let t2 = store.get_task("T2").await.unwrap().unwrap();
        assert_eq!(t2.status, TaskStatus::Pending);
        assert!(!orch.resolver().is_task_failed("T2"));
        assert_eq!(orch.resolver().lock_holder("src/App.tsx").as_deref(), Some("intruder"));
        let escalations = orch
            .escalations()
            .get_escalations_for_swarm("s1", None)
            .await
            .unwrap();
        assert!(escalations.is_empty());
    }

    /// 把任务置为 in-progress 的写入总是失败
    struct FailingStartStore {
        inner: Arc<InMemoryStore>,
    }

    #[async_trait]
    impl TaskStore for FailingStartStore {
        async fn create_task(&self, task: &Task) -> Result<(), StoreError> {
            self.inner.create_task(task).await
        }

        async fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
            self.inner.get_task(id).await
        }

        async fn get_tasks_for_swarm(&self, swarm_id: &str) -> Result<Vec<Task>, StoreError> {
            self.inner.get_tasks_for_swarm(swarm_id).await
        }

        async fn update_task_status(
            &self,
            id: &str,
            status: TaskStatus,
            data: Option<Value>,
        ) -> Result<(), StoreError> {
            if status == TaskStatus::InProgress {
                return Err(StoreError::Corrupt("disk".into()));
            }
            self.inner.update_task_status(id, status, data).await
        }

        async fn create_agent(&self, agent: &Agent) -> Result<(), StoreError> {
            self.inner.create_agent(agent).await
        }

        async fn get_agents_for_swarm(&self, swarm_id: &str) -> Result<Vec<Agent>, StoreError> {
            self.inner.get_agents_for_swarm(swarm_id).await
        }

        async fn update_agent_state(
            &self,
            agent_id: &str,
            state: &AgentState,
        ) -> Result<(), StoreError> {
            self.inner.update_agent_state(agent_id, state).await
        }
    }

    #[tokio::test]
    async fn test_store_error_releases_dispatch_locks() {
        let inner = Arc::new(InMemoryStore::new());
        let store = Arc::new(FailingStartStore {
            inner: inner.clone(),
        });
        let orch = Orchestrator::new(store, inner.clone(), &AppConfig::default());
        orch.accept_plan(&plan()).await.unwrap();
        inner
            .update_task_status("T1", TaskStatus::Completed, None)
            .await
            .unwrap();

        let err = orch
            .run_task("frontend", "T2", "s1", &ScriptedExecutor::ok())
            .await
            .unwrap_err();
        assert!(matches!(err, HiveError::Store(StoreError::Corrupt(_))));
        assert!(orch.resolver().get_stats().locked_files.is_empty());
        assert!(orch.resolver().lock_holder("src/App.tsx").is_none());
    }

    #[tokio::test]
    async fn test_not_started_reasons() {
        let (_, orch) = orchestrator();
        orch.accept_plan(&plan()).await.unwrap();
        let run = orch
            .run_task("frontend", "T2", "s1", &ScriptedExecutor::ok())
            .await
            .unwrap();
        assert_eq!(
            run,
            TaskRun::NotStarted {
                reason: "Dependencies not met: [T1]".into()
            }
        );
        let missing = orch.run_task("frontend", "nope", "s1", &ScriptedExecutor::ok()).await;
        assert!(matches!(missing, Err(HiveError::TaskNotFound(_))));
    }

    #[tokio::test]
    async fn test_retry_failed_task_resets_downstream() {
        let (store, orch) = orchestrator();
        orch.accept_plan(&plan()).await.unwrap();
        orch.run_swarm("s1", &ScriptedExecutor::failing("T1", "boom"))
            .await
            .unwrap();

        let reset = orch.retry_failed_task("T1").await.unwrap();
        assert_eq!(reset, vec!["T1", "T2"]);
        assert!(!orch.resolver().is_task_failed("T1"));
        let t2 = store.get_task("T2").await.unwrap().unwrap();
        assert_eq!(t2.status, TaskStatus::Pending);
        assert!(t2.data.get("blocked_by").is_none());

        let summary = orch.run_swarm("s1", &ScriptedExecutor::ok()).await.unwrap();
        assert_eq!(summary.progress.progress_percent, 100);

        let err = orch.retry_failed_task("T1").await.unwrap_err();
        assert!(matches!(err, HiveError::TaskNotFailed { .. }));
    }

    #[tokio::test]
    async fn test_stop_halts_swarm() {
        let (_, orch) = orchestrator();
        orch.accept_plan(&plan()).await.unwrap();
        orch.resolver().acquire_file_lock("src/lib.rs", "backend");

        assert_eq!(orch.stop("s1").await.unwrap(), 1);
        assert!(orch.is_stopped("s1"));
        let summary = orch.run_swarm("s1", &ScriptedExecutor::ok()).await.unwrap();
        assert!(summary.stopped);
        assert_eq!(summary.tasks_run, 0);

        orch.resume("s1");
        let summary = orch.run_swarm("s1", &ScriptedExecutor::ok()).await.unwrap();
        assert_eq!(summary.tasks_run, 3);
    }

    #[tokio::test]
    async fn test_process_shutdown_stops_swarms() {
        let process = ShutdownManager::new();
        let store = Arc::new(InMemoryStore::new());
        let orch = Orchestrator::new(store.clone(), store, &AppConfig::default())
            .with_shutdown(&process);
        assert!(!orch.is_stopped("s1"));
        process.shutdown(ShutdownReason::Signal);
        assert!(orch.is_stopped("s1"));
    }

    #[tokio::test]
    async fn test_read_paths_do_not_track_swarms() {
        let (_, orch) = orchestrator();
        assert!(!orch.is_stopped("ghost"));
        orch.health_report("ghost").await.unwrap();
        assert_eq!(orch.tracked_swarms(), 0);

        orch.stop("ghost").await.unwrap();
        assert!(orch.is_stopped("ghost"));
        assert_eq!(orch.tracked_swarms(), 1);
        orch.resume("ghost");
        assert_eq!(orch.tracked_swarms(), 0);
    }

    #[tokio::test]
    async fn test_health_report_serializes() {
        let (_, orch) = orchestrator();
        orch.accept_plan(&plan()).await.unwrap();
        let report = orch.health_report("s1").await.unwrap();
        assert_eq!(report.scheduler.ready_tasks_count, 2);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["scheduler"]["total"], 3);
        assert_eq!(value["escalations"]["total"], 0);
    }
}
