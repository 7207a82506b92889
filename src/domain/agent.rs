//! Agent 实体
//!
//! Agent 状态只保存自己名下任务的 ID 列表；任务内容以任务存储为准。

use serde::{Deserialize, Serialize};

use crate::domain::TaskId;

/// Agent 专长角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    FrontendArchitect,
    BackendIntegrator,
    DeploymentGuardian,
    Research,
    Design,
    Implementation,
    Test,
    Deploy,
    Quality,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::FrontendArchitect => "frontend_architect",
            AgentRole::BackendIntegrator => "backend_integrator",
            AgentRole::DeploymentGuardian => "deployment_guardian",
            AgentRole::Research => "research",
            AgentRole::Design => "design",
            AgentRole::Implementation => "implementation",
            AgentRole::Test => "test",
            AgentRole::Deploy => "deploy",
            AgentRole::Quality => "quality",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "frontend_architect" => Some(AgentRole::FrontendArchitect),
            "backend_integrator" => Some(AgentRole::BackendIntegrator),
            "deployment_guardian" => Some(AgentRole::DeploymentGuardian),
            "research" => Some(AgentRole::Research),
            "design" => Some(AgentRole::Design),
            "implementation" => Some(AgentRole::Implementation),
            "test" => Some(AgentRole::Test),
            "deploy" => Some(AgentRole::Deploy),
            "quality" => Some(AgentRole::Quality),
            _ => None,
        }
    }
}

/// Agent 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Executing,
    Completed,
    Failed,
}

/// Agent 状态：状态 + 名下任务引用 + 任意附加数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AgentState {
    pub status: AgentStatus,
    #[serde(default)]
    pub task_ids: Vec<TaskId>,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub swarm_id: String,
    pub role: AgentRole,
    pub state: AgentState,
}

impl Agent {
    pub fn new(id: impl Into<String>, swarm_id: impl Into<String>, role: AgentRole) -> Self {
        Self {
            id: id.into(),
            swarm_id: swarm_id.into(),
            role,
            state: AgentState::default(),
        }
    }
}
