//! 升级记录：自动重试无法解决、需要用户处理的阻塞
//!
//! 状态机：Pending → Resolved 或 Pending → Cancelled，两者都是终态。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::TaskId;

/// 阻塞类型（固定分类）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockerType {
    Config,
    DesignDecision,
    ExternalService,
    UnclearRequirement,
    /// 兜底分类
    TechnicalLimitation,
}

impl BlockerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockerType::Config => "config",
            BlockerType::DesignDecision => "design_decision",
            BlockerType::ExternalService => "external_service",
            BlockerType::UnclearRequirement => "unclear_requirement",
            BlockerType::TechnicalLimitation => "technical_limitation",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            BlockerType::Config => "⚙️",
            BlockerType::DesignDecision => "🤔",
            BlockerType::ExternalService => "🌐",
            BlockerType::UnclearRequirement => "❓",
            BlockerType::TechnicalLimitation => "⚠️",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            BlockerType::Config => "Configuration Required",
            BlockerType::DesignDecision => "Design Decision Needed",
            BlockerType::ExternalService => "External Service Issue",
            BlockerType::UnclearRequirement => "Requirement Clarification Needed",
            BlockerType::TechnicalLimitation => "Technical Limitation",
        }
    }

    /// 每种阻塞固定的三个建议动作
    pub fn suggested_actions(&self) -> [&'static str; 3] {
        match self {
            BlockerType::Config => [
                "Provide the required configuration",
                "Use test/mock values for now",
                "Skip this feature",
            ],
            BlockerType::DesignDecision => [
                "Choose recommended option",
                "Choose alternative option",
                "Let AI decide based on best practices",
            ],
            BlockerType::ExternalService => [
                "Wait for service to recover",
                "Use alternative service",
                "Mock this feature for now",
            ],
            BlockerType::UnclearRequirement => [
                "Provide more details",
                "Accept AI interpretation",
                "Skip for now, revisit later",
            ],
            BlockerType::TechnicalLimitation => [
                "Adjust requirements",
                "Use workaround approach",
                "Mark as known limitation",
            ],
        }
    }
}

impl fmt::Display for BlockerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Pending,
    Resolved,
    Cancelled,
}

impl EscalationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationStatus::Pending => "pending",
            EscalationStatus::Resolved => "resolved",
            EscalationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EscalationStatus::Pending),
            "resolved" => Some(EscalationStatus::Resolved),
            "cancelled" => Some(EscalationStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for EscalationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条升级记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub id: String,
    pub swarm_id: String,
    pub agent_id: String,
    pub task_id: TaskId,
    pub task_title: String,
    pub blocker_type: BlockerType,
    /// 原始错误文本
    pub blocker_error: String,
    pub severity: Severity,
    pub icon: String,
    pub title: String,
    pub description: String,
    pub suggested_actions: Vec<String>,
    /// 依赖方较少时其余工作可并行推进
    pub can_continue_without: bool,
    /// 被阻塞任务本身 + 直接依赖它的任务
    pub affected_task_ids: Vec<TaskId>,
    #[serde(default)]
    pub context: serde_json::Value,
    pub status: EscalationStatus,
    pub resolution: Option<serde_json::Value>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Escalation {
    pub fn is_pending(&self) -> bool {
        self.status == EscalationStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_blocker_has_three_actions() {
        for blocker in [
            BlockerType::Config,
            BlockerType::DesignDecision,
            BlockerType::ExternalService,
            BlockerType::UnclearRequirement,
            BlockerType::TechnicalLimitation,
        ] {
            assert_eq!(blocker.suggested_actions().len(), 3);
            assert!(!blocker.title().is_empty());
        }
    }

    #[test]
    fn test_escalation_status_parse() {
        assert_eq!(
            EscalationStatus::parse("cancelled"),
            Some(EscalationStatus::Cancelled)
        );
        assert_eq!(EscalationStatus::parse("reopened"), None);
    }
}
