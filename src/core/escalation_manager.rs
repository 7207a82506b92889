//! 升级管理：把无法自动恢复的阻塞变成带建议动作的结构化记录，并跟踪其解决
//!
//! 记录写入 EscalationLog（只追加 / 更新），本实例另持有一份进程内缓存；
//! 终态迁移在缓存写锁内完成，同一记录不会被并发地解决和取消。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::config::EscalationConfig;
use crate::core::HiveError;
use crate::domain::{
    BlockerType, Escalation, EscalationStatus, Severity, Task, TaskId, TaskStatus,
};
use crate::store::{EscalationLog, TaskStore};

/// 按顺序检查的关键词表；首个命中的类型生效
const BLOCKER_KEYWORDS: [(BlockerType, &[&str]); 4] = [
    (
        BlockerType::Config,
        &["env", "api key", "api_key", "config", "credential"],
    ),
    (
        BlockerType::ExternalService,
        &["unavailable", "not found", "timeout", "connection"],
    ),
    (
        BlockerType::DesignDecision,
        &["choose", "decide", "which", "should i"],
    ),
    (
        BlockerType::UnclearRequirement,
        &["unclear", "ambiguous", "dont understand", "don't know"],
    ),
];

/// 仪表盘汇总
#[derive(Debug, Clone, Serialize)]
pub struct EscalationSummary {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub pending: usize,
    pub resolved: usize,
    pub cancelled: usize,
    pub escalations: Vec<Escalation>,
}

pub struct EscalationManager {
    store: Arc<dyn TaskStore>,
    log: Arc<dyn EscalationLog>,
    cache: RwLock<HashMap<String, Escalation>>,
    config: EscalationConfig,
}

impl EscalationManager {
    pub fn new(
        store: Arc<dyn TaskStore>,
        log: Arc<dyn EscalationLog>,
        config: EscalationConfig,
    ) -> Self {
        Self {
            store,
            log,
            cache: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn classify_blocker(&self, error: &str, _task: &Task) -> BlockerType {
        let error = error.to_lowercase();
        BLOCKER_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| error.contains(k)))
            .map(|(blocker, _)| *blocker)
            .unwrap_or(BlockerType::TechnicalLimitation)
    }

    pub fn assess_severity(&self, blocker: BlockerType, task: &Task) -> Severity {
        match blocker {
            BlockerType::Config => Severity::High,
            BlockerType::ExternalService if task.priority >= self.config.high_priority_threshold => {
                Severity::High
            }
            BlockerType::ExternalService => Severity::Medium,
            BlockerType::DesignDecision | BlockerType::UnclearRequirement => Severity::Medium,
            BlockerType::TechnicalLimitation => Severity::Low,
        }
    }

    pub fn generate_description(&self, error: &str, task: &Task, blocker: BlockerType) -> String {
        let title = task.title();
        match blocker {
            BlockerType::Config => {
                format!("Missing configuration needed to complete '{title}'. Error: {error}")
            }
            BlockerType::DesignDecision => {
                format!("Need to make a design decision for '{title}'. Question: {error}")
            }
            BlockerType::ExternalService => {
                format!("External service issue while working on '{title}'. Error: {error}")
            }
            BlockerType::UnclearRequirement => {
                format!("Requirements unclear for '{title}'. Need clarification: {error}")
            }
            BlockerType::TechnicalLimitation => {
                format!("Technical challenge with '{title}'. Issue: {error}")
            }
        }
    }

    /// 直接依赖方不多时，其余工作可以继续推进
    pub fn can_work_around(&self, task: &Task, swarm_tasks: &[Task]) -> bool {
        let dependents = swarm_tasks.iter().filter(|t| t.depends_on(&task.id)).count();
        dependents <= self.config.max_dependents_to_continue
    }

    /// 被阻塞任务本身 + 直接依赖它的任务（只展开一层）
    pub fn get_affected_tasks(&self, task: &Task, swarm_tasks: &[Task]) -> Vec<TaskId> {
        std::iter::once(task.id.clone())
            .chain(
                swarm_tasks
                    .iter()
                    .filter(|t| t.depends_on(&task.id))
                    .map(|t| t.id.clone()),
            )
            .collect()
    }

    pub async fn create_escalation(
        &self,
        error: &str,
        task: &Task,
        agent_id: &str,
        swarm_id: &str,
        context: Option<Value>,
    ) -> Result<Escalation, HiveError> {
        let swarm_tasks = self.store.get_tasks_for_swarm(swarm_id).await?;
        let blocker = self.classify_blocker(error, task);

        let escalation = Escalation {
            id: format!("esc_{}", uuid::Uuid::new_v4().simple()),
            swarm_id: swarm_id.to_string(),
            agent_id: agent_id.to_string(),
            task_id: task.id.clone(),
            task_title: task.title().to_string(),
            blocker_type: blocker,
            blocker_error: error.to_string(),
            severity: self.assess_severity(blocker, task),
            icon: blocker.icon().to_string(),
            title: blocker.title().to_string(),
            description: self.generate_description(error, task, blocker),
            suggested_actions: blocker
                .suggested_actions()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            can_continue_without: self.can_work_around(task, &swarm_tasks),
            affected_task_ids: self.get_affected_tasks(task, &swarm_tasks),
            context: context.unwrap_or_else(|| json!({})),
            status: EscalationStatus::Pending,
            resolution: None,
            cancellation_reason: None,
            created_at: Utc::now(),
            resolved_at: None,
            cancelled_at: None,
        };

        self.log.append(&escalation).await?;
        self.cache
            .write()
            .await
            .insert(escalation.id.clone(), escalation.clone());

        tracing::warn!(
            "Escalation created: {} {} (task: {}, severity: {}, can continue: {})",
            escalation.icon,
            escalation.title,
            task.id,
            escalation.severity.as_str(),
            escalation.can_continue_without
        );
        Ok(escalation)
    }

    /// 取出仍为 pending 的记录；调用方需持有缓存写锁
    async fn pending_record(
        &self,
        cache: &HashMap<String, Escalation>,
        id: &str,
    ) -> Result<Escalation, HiveError> {
        let record = match cache.get(id) {
            Some(record) => record.clone(),
            None => self
                .log
                .get(id)
                .await?
                .ok_or_else(|| HiveError::EscalationNotFound(id.to_string()))?,
        };
        if !record.is_pending() {
            return Err(HiveError::EscalationClosed {
                id: id.to_string(),
                status: record.status,
            });
        }
        Ok(record)
    }

    pub async fn resolve_escalation(
        &self,
        id: &str,
        resolution: Value,
    ) -> Result<Escalation, HiveError> {
        let mut cache = self.cache.write().await;
        let mut record = self.pending_record(&cache, id).await?;

        record.status = EscalationStatus::Resolved;
        record.resolution = Some(resolution);
        record.resolved_at = Some(Utc::now());
        self.log.update(&record).await?;
        cache.insert(record.id.clone(), record.clone());

        let action = record
            .resolution
            .as_ref()
            .and_then(|r| r.get("action"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("none");
        tracing::info!("Escalation resolved: {} (action: {})", record.title, action);
        Ok(record)
    }

    /// 取消升级，并把受影响任务全部标记为 skipped
    pub async fn cancel_escalation(
        &self,
        id: &str,
        reason: Option<String>,
    ) -> Result<Escalation, HiveError> {
        let mut cache = self.cache.write().await;
        let mut record = self.pending_record(&cache, id).await?;

        let reason = reason.unwrap_or_else(|| "Escalation cancelled by user".to_string());

        // 先完成级联再落终态；级联中途失败时记录仍为 pending，可再次取消
        for task_id in &record.affected_task_ids {
            let Some(task) = self.store.get_task(task_id).await? else {
                tracing::warn!("Affected task {} no longer exists, not skipping", task_id);
                continue;
            };
            if task.status == TaskStatus::Skipped {
                continue;
            }
            let mut data = task.data;
            match data.as_object_mut() {
                Some(obj) => {
                    obj.insert("skipped_reason".to_string(), Value::String(reason.clone()));
                }
                None => data = json!({ "skipped_reason": reason }),
            }
            self.store
                .update_task_status(task_id, TaskStatus::Skipped, Some(data))
                .await?;
        }

        record.status = EscalationStatus::Cancelled;
        record.cancellation_reason = Some(reason);
        record.cancelled_at = Some(Utc::now());
        self.log.update(&record).await?;
        cache.insert(record.id.clone(), record.clone());

        tracing::info!(
            "Escalation cancelled: {} ({} tasks skipped)",
            record.title,
            record.affected_task_ids.len()
        );
        Ok(record)
    }

    /// 蜂群内的升级记录（创建顺序），可按状态过滤
    pub async fn get_escalations_for_swarm(
        &self,
        swarm_id: &str,
        status: Option<EscalationStatus>,
    ) -> Result<Vec<Escalation>, HiveError> {
        let records = self.log.list_for_swarm(swarm_id).await?;
        Ok(records
            .into_iter()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .collect())
    }

    pub async fn get_escalation(&self, id: &str) -> Result<Option<Escalation>, HiveError> {
        if let Some(record) = self.cache.read().await.get(id) {
            return Ok(Some(record.clone()));
        }
        Ok(self.log.get(id).await?)
    }

    /// 重启后从日志重新载入某蜂群的记录，返回载入数量
    pub async fn recall(&self, swarm_id: &str) -> Result<usize, HiveError> {
        let records = self.log.list_for_swarm(swarm_id).await?;
        let count = records.len();
        let mut cache = self.cache.write().await;
        for record in records {
            cache.insert(record.id.clone(), record);
        }
        tracing::debug!("Recalled {} escalations for swarm {}", count, swarm_id);
        Ok(count)
    }

    pub async fn get_escalation_summary(
        &self,
        swarm_id: &str,
    ) -> Result<EscalationSummary, HiveError> {
        let escalations = self.get_escalations_for_swarm(swarm_id, None).await?;
        let mut by_type = BTreeMap::new();
        let mut by_severity = BTreeMap::new();
        let (mut pending, mut resolved, mut cancelled) = (0, 0, 0);

        for e in &escalations {
            *by_type.entry(e.blocker_type.as_str().to_string()).or_insert(0) += 1;
            *by_severity.entry(e.severity.as_str().to_string()).or_insert(0) += 1;
            match e.status {
                EscalationStatus::Pending => pending += 1,
                EscalationStatus::Resolved => resolved += 1,
                EscalationStatus::Cancelled => cancelled += 1,
            }
        }

        Ok(EscalationSummary {
            total: escalations.len(),
            by_type,
            by_severity,
            pending,
            resolved,
            cancelled,
            escalations,
        })
    }
}
