//! 任务调度：依赖门控、就绪集合、依赖环检测、进度统计
//!
//! 任务存储是唯一数据源；调度器本身无状态，每次查询都读存储。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::core::HiveError;
use crate::domain::{Task, TaskId, TaskStatus};
use crate::store::TaskStore;

/// Agent 能否开始某任务的判定结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartDecision {
    Allowed,
    Blocked(String),
}

impl StartDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, StartDecision::Allowed)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            StartDecision::Allowed => None,
            StartDecision::Blocked(reason) => Some(reason),
        }
    }
}

/// 蜂群进度
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct SwarmProgress {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub failed: usize,
    pub skipped: usize,
    pub queued: usize,
    /// round(completed / total * 100)，空蜂群为 0
    pub progress_percent: u8,
}

impl SwarmProgress {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut progress = SwarmProgress {
            total: tasks.len(),
            ..Default::default()
        };
        for task in tasks {
            match task.status {
                TaskStatus::Pending => progress.pending += 1,
                TaskStatus::InProgress => progress.in_progress += 1,
                TaskStatus::Completed => progress.completed += 1,
                TaskStatus::Failed => progress.failed += 1,
                TaskStatus::Skipped => progress.skipped += 1,
                TaskStatus::Queued => progress.queued += 1,
            }
        }
        if progress.total > 0 {
            let percent = progress.completed as f64 / progress.total as f64 * 100.0;
            progress.progress_percent = percent.round() as u8;
        }
        progress
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    #[serde(flatten)]
    pub progress: SwarmProgress,
    pub ready_tasks_count: usize,
    pub has_cycle: bool,
    pub cycle_tasks: Option<Vec<TaskId>>,
}

/// 依赖全部为 completed 才算满足；引用不存在的任务视为未满足
pub fn are_dependencies_met(task: &Task, all_tasks: &[Task]) -> bool {
    unmet_dependencies(task, all_tasks).is_empty()
}

/// 未满足的依赖（保持声明顺序）
pub fn unmet_dependencies(task: &Task, all_tasks: &[Task]) -> Vec<TaskId> {
    let status_by_id: HashMap<&str, TaskStatus> = all_tasks
        .iter()
        .map(|t| (t.id.as_str(), t.status))
        .collect();
    task.dependencies
        .iter()
        .filter(|dep| status_by_id.get(dep.as_str()) != Some(&TaskStatus::Completed))
        .cloned()
        .collect()
}

/// 就绪任务：pending 且依赖已满足，按优先级降序（同优先级保持原顺序）
pub fn ready_tasks(all_tasks: &[Task]) -> Vec<Task> {
    let mut ready: Vec<Task> = all_tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending && are_dependencies_met(t, all_tasks))
        .cloned()
        .collect();
    // sort_by 是稳定排序
    ready.sort_by(|a, b| b.priority.cmp(&a.priority));
    ready
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// 三色 DFS 找依赖环；覆盖所有连通分量，自依赖报告为长度 1 的环
pub fn find_cycle(tasks: &[Task]) -> Option<Vec<TaskId>> {
    let index: HashMap<&str, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id.as_str(), i))
        .collect();
    let edges: Vec<Vec<usize>> = tasks
        .iter()
        .map(|t| {
            t.dependencies
                .iter()
                .filter_map(|dep| index.get(dep.as_str()).copied())
                .collect()
        })
        .collect();

    let mut colors = vec![Color::White; tasks.len()];
    // 显式栈：(节点, 下一条待检查的边)
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for start in 0..tasks.len() {
        if colors[start] != Color::White {
            continue;
        }
        colors[start] = Color::Gray;
        stack.push((start, 0));

        while let Some(frame) = stack.last_mut() {
            let (node, edge) = *frame;
            let Some(&next) = edges[node].get(edge) else {
                colors[node] = Color::Black;
                stack.pop();
                continue;
            };
            frame.1 += 1;

            match colors[next] {
                Color::White => {
                    colors[next] = Color::Gray;
                    stack.push((next, 0));
                }
                Color::Gray => {
                    // 灰色节点都在栈上，从它到栈顶即为环
                    let from = stack.iter().position(|&(n, _)| n == next).unwrap_or(0);
                    return Some(
                        stack[from..]
                            .iter()
                            .map(|&(n, _)| tasks[n].id.clone())
                            .collect(),
                    );
                }
                Color::Black => {}
            }
        }
    }
    None
}

/// 基于任务存储的调度器
pub struct TaskScheduler {
    store: Arc<dyn TaskStore>,
}

impl TaskScheduler {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub fn are_dependencies_met(&self, task: &Task, all_tasks: &[Task]) -> bool {
        are_dependencies_met(task, all_tasks)
    }

    pub async fn get_ready_tasks(&self, swarm_id: &str) -> Result<Vec<Task>, HiveError> {
        let tasks = self.store.get_tasks_for_swarm(swarm_id).await?;
        Ok(ready_tasks(&tasks))
    }

    /// 归属检查 → 状态检查 → 依赖检查
    pub async fn can_agent_start_task(
        &self,
        agent_id: &str,
        task_id: &str,
        swarm_id: &str,
    ) -> Result<StartDecision, HiveError> {
        let tasks = self.store.get_tasks_for_swarm(swarm_id).await?;
        let Some(task) = tasks.iter().find(|t| t.id == task_id) else {
            return Ok(StartDecision::Blocked(format!(
                "Task {task_id} not found in swarm {swarm_id}"
            )));
        };

        if task.agent_id != agent_id {
            return Ok(StartDecision::Blocked(
                "Task belongs to a different agent".to_string(),
            ));
        }

        if task.status != TaskStatus::Pending {
            return Ok(StartDecision::Blocked(format!(
                "Task is not pending (status: {})",
                task.status
            )));
        }

        let unmet = unmet_dependencies(task, &tasks);
        if !unmet.is_empty() {
            tracing::debug!("Task {} waiting on {:?}", task_id, unmet);
            return Ok(StartDecision::Blocked(format!(
                "Dependencies not met: [{}]",
                unmet.join(", ")
            )));
        }

        Ok(StartDecision::Allowed)
    }

    pub async fn detect_dependency_cycle(
        &self,
        swarm_id: &str,
    ) -> Result<Option<Vec<TaskId>>, HiveError> {
        let tasks = self.store.get_tasks_for_swarm(swarm_id).await?;
        let cycle = find_cycle(&tasks);
        if let Some(cycle) = &cycle {
            tracing::warn!("Dependency cycle in swarm {}: {:?}", swarm_id, cycle);
        }
        Ok(cycle)
    }

    pub async fn calculate_progress(&self, swarm_id: &str) -> Result<SwarmProgress, HiveError> {
        let tasks = self.store.get_tasks_for_swarm(swarm_id).await?;
        Ok(SwarmProgress::from_tasks(&tasks))
    }

    /// 一次读取，计算全部统计
    pub async fn get_stats(&self, swarm_id: &str) -> Result<SchedulerStats, HiveError> {
        let tasks = self.store.get_tasks_for_swarm(swarm_id).await?;
        let cycle = find_cycle(&tasks);
        Ok(SchedulerStats {
            progress: SwarmProgress::from_tasks(&tasks),
            ready_tasks_count: ready_tasks(&tasks).len(),
            has_cycle: cycle.is_some(),
            cycle_tasks: cycle,
        })
    }
}
