//! 核心层错误类型
//!
//! 调度冲突（锁被占用、依赖未满足）不是错误，用 bool / 原因字符串表达；这里只放真正的失败。

use thiserror::Error;

use crate::domain::{EscalationStatus, TaskId, TaskStatus};
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum HiveError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Escalation not found: {0}")]
    EscalationNotFound(String),

    /// 升级记录已是终态，不可再次迁移
    #[error("Escalation {id} is already {status}")]
    EscalationClosed {
        id: String,
        status: EscalationStatus,
    },

    /// 只有 failed 的任务可以重试
    #[error("Task {id} is {status}, not failed")]
    TaskNotFailed { id: TaskId, status: TaskStatus },

    /// 计划中存在依赖环，必须拒绝
    #[error("Cyclic dependency detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<TaskId>),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Cancelled")]
    Cancelled,
}

impl HiveError {
    /// 是否为计划被拒绝（需要重新规划，而非重试）
    pub fn is_plan_rejection(&self) -> bool {
        matches!(self, Self::CyclicDependency(_) | Self::InvalidPlan(_))
    }
}

impl From<config::ConfigError> for HiveError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
