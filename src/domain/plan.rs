//! 蜂群计划：规划步骤（LLM）产出的 Agent 与任务集合，被接受前需要校验

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain::{Agent, Task};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwarmPlan {
    pub swarm_id: String,
    pub agents: Vec<Agent>,
    pub tasks: Vec<Task>,
}

impl SwarmPlan {
    pub fn new(swarm_id: impl Into<String>) -> Self {
        Self {
            swarm_id: swarm_id.into(),
            agents: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn agent(mut self, agent: Agent) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    /// 结构校验（不含环检测）：ID 唯一、归属一致、任务指向已知 Agent
    pub fn structural_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let mut agent_ids = HashSet::new();
        for agent in &self.agents {
            if !agent_ids.insert(agent.id.as_str()) {
                problems.push(format!("duplicate agent id {}", agent.id));
            }
            if agent.swarm_id != self.swarm_id {
                problems.push(format!(
                    "agent {} belongs to swarm {}",
                    agent.id, agent.swarm_id
                ));
            }
        }

        let mut task_ids = HashSet::new();
        for task in &self.tasks {
            if !task_ids.insert(task.id.as_str()) {
                problems.push(format!("duplicate task id {}", task.id));
            }
            if task.swarm_id != self.swarm_id {
                problems.push(format!("task {} belongs to swarm {}", task.id, task.swarm_id));
            }
            if !agent_ids.contains(task.agent_id.as_str()) {
                problems.push(format!(
                    "task {} assigned to unknown agent {}",
                    task.id, task.agent_id
                ));
            }
        }

        problems
    }
}
