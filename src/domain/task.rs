//! 任务实体
//!
//! 任务由规划步骤创建，执行过程只做状态迁移，从不删除；终态为 completed / failed / skipped。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务 ID
pub type TaskId = String;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// 等待执行
    Pending,
    /// 正在执行
    InProgress,
    /// 已完成
    Completed,
    /// 执行失败
    Failed,
    /// 已跳过（升级被取消）
    Skipped,
    /// 已排队
    Queued,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Queued => "queued",
        }
    }

    /// 从存储中的字符串解析；未知值返回 None
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in-progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "skipped" => Some(TaskStatus::Skipped),
            "queued" => Some(TaskStatus::Queued),
            _ => None,
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 蜂群中的一个任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// 负责该任务的 Agent
    pub agent_id: String,
    /// 所属蜂群（一次用户请求）
    pub swarm_id: String,
    pub description: String,
    pub status: TaskStatus,
    /// 数值越大越紧急
    pub priority: i64,
    /// 必须先 completed 的任务 ID（有序）
    pub dependencies: Vec<TaskId>,
    /// 输入 / 输出载荷
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        id: impl Into<TaskId>,
        agent_id: impl Into<String>,
        swarm_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            swarm_id: swarm_id.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority: 5,
            dependencies: Vec::new(),
            data: serde_json::Value::Object(serde_json::Map::new()),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// 是否直接依赖 `task_id`
    pub fn depends_on(&self, task_id: &str) -> bool {
        self.dependencies.iter().any(|d| d == task_id)
    }

    /// 任务写入的文件路径（`data.files`），执行前需逐个加锁
    pub fn declared_files(&self) -> Vec<String> {
        self.data
            .get("files")
            .and_then(|v| v.as_array())
            .map(|files| {
                files
                    .iter()
                    .filter_map(|f| f.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 展示用标题：优先 `data.title`，否则用描述
    pub fn title(&self) -> &str {
        self.data
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.description)
    }
}
