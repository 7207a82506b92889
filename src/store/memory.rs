//! 内存版存储（测试与单次运行）

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{Agent, AgentState, Escalation, Task, TaskStatus};
use crate::store::{EscalationLog, StoreError, TaskStore};

/// 内存存储：保留插入顺序，保证蜂群内任务列表稳定
#[derive(Default)]
pub struct InMemoryStore {
    tasks: RwLock<HashMap<String, Task>>,
    /// 任务插入顺序
    task_order: RwLock<Vec<String>>,
    agents: RwLock<Vec<Agent>>,
    escalations: RwLock<Vec<Escalation>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn create_task(&self, task: &Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::Duplicate(task.id.clone()));
        }
        tasks.insert(task.id.clone(), task.clone());
        self.task_order.write().await.push(task.id.clone());
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn get_tasks_for_swarm(&self, swarm_id: &str) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        let order = self.task_order.read().await;
        Ok(order
            .iter()
            .filter_map(|id| tasks.get(id))
            .filter(|t| t.swarm_id == swarm_id)
            .cloned()
            .collect())
    }

    async fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        data: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| StoreError::TaskNotFound(id.to_string()))?;
        task.status = status;
        if let Some(data) = data {
            task.data = data;
        }
        task.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn create_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        let mut agents = self.agents.write().await;
        if agents.iter().any(|a| a.id == agent.id) {
            return Err(StoreError::Duplicate(agent.id.clone()));
        }
        agents.push(agent.clone());
        Ok(())
    }

    async fn get_agents_for_swarm(&self, swarm_id: &str) -> Result<Vec<Agent>, StoreError> {
        Ok(self
            .agents
            .read()
            .await
            .iter()
            .filter(|a| a.swarm_id == swarm_id)
            .cloned()
            .collect())
    }

    async fn update_agent_state(
        &self,
        agent_id: &str,
        state: &AgentState,
    ) -> Result<(), StoreError> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .iter_mut()
            .find(|a| a.id == agent_id)
            .ok_or_else(|| StoreError::AgentNotFound(agent_id.to_string()))?;
        agent.state = state.clone();
        Ok(())
    }
}

#[async_trait]
impl EscalationLog for InMemoryStore {
    async fn append(&self, escalation: &Escalation) -> Result<(), StoreError> {
        let mut escalations = self.escalations.write().await;
        if escalations.iter().any(|e| e.id == escalation.id) {
            return Err(StoreError::Duplicate(escalation.id.clone()));
        }
        escalations.push(escalation.clone());
        Ok(())
    }

    async fn update(&self, escalation: &Escalation) -> Result<(), StoreError> {
        let mut escalations = self.escalations.write().await;
        let existing = escalations
            .iter_mut()
            .find(|e| e.id == escalation.id)
            .ok_or_else(|| StoreError::EscalationNotFound(escalation.id.clone()))?;
        *existing = escalation.clone();
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Escalation>, StoreError> {
        Ok(self
            .escalations
            .read()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn list_for_swarm(&self, swarm_id: &str) -> Result<Vec<Escalation>, StoreError> {
        Ok(self
            .escalations
            .read()
            .await
            .iter()
            .filter(|e| e.swarm_id == swarm_id)
            .cloned()
            .collect())
    }
}
