//! 任务 / Agent 存储与升级日志
//!
//! 调度层只依赖这里的 trait；存储引擎可替换（内存版用于测试，SQLite 版用于单文件持久化）。

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Agent, AgentState, Escalation, Task, TaskStatus};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// 存储层错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Escalation not found: {0}")]
    EscalationNotFound(String),

    #[error("Duplicate id: {0}")]
    Duplicate(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// 任务 / Agent 存储
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: &Task) -> Result<(), StoreError>;

    async fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError>;

    /// 按插入顺序返回蜂群内全部任务
    async fn get_tasks_for_swarm(&self, swarm_id: &str) -> Result<Vec<Task>, StoreError>;

    /// 更新状态；`data` 给出时整体替换任务载荷
    async fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        data: Option<serde_json::Value>,
    ) -> Result<(), StoreError>;

    async fn create_agent(&self, agent: &Agent) -> Result<(), StoreError>;

    async fn get_agents_for_swarm(&self, swarm_id: &str) -> Result<Vec<Agent>, StoreError>;

    async fn update_agent_state(&self, agent_id: &str, state: &AgentState)
        -> Result<(), StoreError>;
}

/// 升级记录日志：只追加与更新，不删除
#[async_trait]
pub trait EscalationLog: Send + Sync {
    async fn append(&self, escalation: &Escalation) -> Result<(), StoreError>;

    async fn update(&self, escalation: &Escalation) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Escalation>, StoreError>;

    async fn list_for_swarm(&self, swarm_id: &str) -> Result<Vec<Escalation>, StoreError>;
}
