//! SQLite 持久化（同步 rusqlite，单文件）
//!
//! 表结构：agents / tasks / escalations；依赖、载荷、Agent 状态与升级记录以 JSON 文本存储。
//! 连接由互斥锁保护，每个操作都很短，不跨 await 持有。

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{Agent, AgentRole, AgentState, Escalation, Task, TaskStatus};
use crate::store::{EscalationLog, StoreError, TaskStore};

const TASK_COLUMNS: &str =
    "id, agent_id, swarm_id, description, status, priority, dependencies, data, created_at, updated_at";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        swarm_id TEXT NOT NULL,
        role TEXT NOT NULL,
        state TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL,
        swarm_id TEXT NOT NULL,
        description TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        priority INTEGER NOT NULL DEFAULT 5,
        dependencies TEXT NOT NULL,
        data TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS escalations (
        id TEXT PRIMARY KEY,
        swarm_id TEXT NOT NULL,
        status TEXT NOT NULL,
        record TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_agent_swarm ON agents(swarm_id);
    CREATE INDEX IF NOT EXISTS idx_task_swarm ON tasks(swarm_id);
    CREATE INDEX IF NOT EXISTS idx_task_status ON tasks(status);
    CREATE INDEX IF NOT EXISTS idx_escalation_swarm ON escalations(swarm_id);
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// 打开（或创建）数据库文件；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!("SQLite journal mode: {}", mode);
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        tracing::debug!("SQLite store schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 把 WAL 内容写回主库文件（关闭前调用）
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        self.conn()
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        Ok(())
    }
}

fn map_insert_error(err: rusqlite::Error, id: &str) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            StoreError::Duplicate(id.to_string())
        }
        other => StoreError::Sqlite(other),
    }
}

/// tasks 表的一行原始数据，解析状态与 JSON 列放在锁外完成
struct TaskRow {
    id: String,
    agent_id: String,
    swarm_id: String,
    description: String,
    status: String,
    priority: i64,
    dependencies: String,
    data: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            agent_id: row.get(1)?,
            swarm_id: row.get(2)?,
            description: row.get(3)?,
            status: row.get(4)?,
            priority: row.get(5)?,
            dependencies: row.get(6)?,
            data: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_task(self) -> Result<Task, StoreError> {
        let status = TaskStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Corrupt(format!("task {} has status '{}'", self.id, self.status))
        })?;
        Ok(Task {
            status,
            dependencies: serde_json::from_str(&self.dependencies)?,
            data: serde_json::from_str(&self.data)?,
            id: self.id,
            agent_id: self.agent_id,
            swarm_id: self.swarm_id,
            description: self.description,
            priority: self.priority,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn agent_from_parts(id: String, swarm_id: String, role: String, state: String) -> Result<Agent, StoreError> {
    let role = AgentRole::parse(&role)
        .ok_or_else(|| StoreError::Corrupt(format!("agent {id} has role '{role}'")))?;
    let state: AgentState = serde_json::from_str(&state)?;
    Ok(Agent {
        id,
        swarm_id,
        role,
        state,
    })
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn create_task(&self, task: &Task) -> Result<(), StoreError> {
        let dependencies = serde_json::to_string(&task.dependencies)?;
        let data = serde_json::to_string(&task.data)?;
        self.conn()
            .execute(
                &format!("INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                params![
                    task.id,
                    task.agent_id,
                    task.swarm_id,
                    task.description,
                    task.status.as_str(),
                    task.priority,
                    dependencies,
                    data,
                    task.created_at,
                    task.updated_at,
                ],
            )
            .map_err(|e| map_insert_error(e, &task.id))?;
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                TaskRow::from_row,
            )
            .optional()?;
        row.map(TaskRow::into_task).transpose()
    }

    async fn get_tasks_for_swarm(&self, swarm_id: &str) -> Result<Vec<Task>, StoreError> {
        let rows = {
            let conn = self.conn();
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE swarm_id = ?1 ORDER BY rowid"
            ))?;
            let rows = stmt
                .query_map(params![swarm_id], TaskRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    async fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        data: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let changed = match data {
            Some(data) => {
                let data = serde_json::to_string(&data)?;
                self.conn().execute(
                    "UPDATE tasks SET status = ?1, data = ?2, updated_at = ?3 WHERE id = ?4",
                    params![status.as_str(), data, now, id],
                )?
            }
            None => self.conn().execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now, id],
            )?,
        };
        if changed == 0 {
            return Err(StoreError::TaskNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn create_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        let state = serde_json::to_string(&agent.state)?;
        self.conn()
            .execute(
                "INSERT INTO agents (id, swarm_id, role, state) VALUES (?1, ?2, ?3, ?4)",
                params![agent.id, agent.swarm_id, agent.role.as_str(), state],
            )
            .map_err(|e| map_insert_error(e, &agent.id))?;
        Ok(())
    }

    async fn get_agents_for_swarm(&self, swarm_id: &str) -> Result<Vec<Agent>, StoreError> {
        let rows = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT id, swarm_id, role, state FROM agents WHERE swarm_id = ?1 ORDER BY rowid",
            )?;
            let rows = stmt
                .query_map(params![swarm_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        rows.into_iter()
            .map(|(id, swarm_id, role, state)| agent_from_parts(id, swarm_id, role, state))
            .collect()
    }

    async fn update_agent_state(
        &self,
        agent_id: &str,
        state: &AgentState,
    ) -> Result<(), StoreError> {
        let state = serde_json::to_string(state)?;
        let changed = self.conn().execute(
            "UPDATE agents SET state = ?1 WHERE id = ?2",
            params![state, agent_id],
        )?;
        if changed == 0 {
            return Err(StoreError::AgentNotFound(agent_id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EscalationLog for SqliteStore {
    async fn append(&self, escalation: &Escalation) -> Result<(), StoreError> {
        let record = serde_json::to_string(escalation)?;
        self.conn()
            .execute(
                "INSERT INTO escalations (id, swarm_id, status, record) VALUES (?1, ?2, ?3, ?4)",
                params![
                    escalation.id,
                    escalation.swarm_id,
                    escalation.status.as_str(),
                    record
                ],
            )
            .map_err(|e| map_insert_error(e, &escalation.id))?;
        Ok(())
    }

    async fn update(&self, escalation: &Escalation) -> Result<(), StoreError> {
        let record = serde_json::to_string(escalation)?;
        let changed = self.conn().execute(
            "UPDATE escalations SET status = ?1, record = ?2 WHERE id = ?3",
            params![escalation.status.as_str(), record, escalation.id],
        )?;
        if changed == 0 {
            return Err(StoreError::EscalationNotFound(escalation.id.clone()));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Escalation>, StoreError> {
        let record: Option<String> = self
            .conn()
            .query_row(
                "SELECT record FROM escalations WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(record.map(|r| serde_json::from_str(&r)).transpose()?)
    }

    async fn list_for_swarm(&self, swarm_id: &str) -> Result<Vec<Escalation>, StoreError> {
        let records = {
            let conn = self.conn();
            let mut stmt = conn
                .prepare("SELECT record FROM escalations WHERE swarm_id = ?1 ORDER BY rowid")?;
            let records = stmt
                .query_map(params![swarm_id], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            records
        };
        records
            .iter()
            .map(|r| serde_json::from_str(r).map_err(StoreError::from))
            .collect()
    }
}
