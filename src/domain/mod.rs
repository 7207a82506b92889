//! 领域模型：任务、Agent、升级记录、蜂群计划

pub mod agent;
pub mod escalation;
pub mod plan;
pub mod task;

pub use agent::{Agent, AgentRole, AgentState, AgentStatus};
pub use escalation::{BlockerType, Escalation, EscalationStatus, Severity};
pub use plan::SwarmPlan;
pub use task::{Task, TaskId, TaskStatus};
