//! Hive - 多 Agent 蜂群的协调核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 文件锁仲裁、依赖调度、错误重试、阻塞升级、停止与编排
//! - **domain**: 任务、Agent、升级记录、蜂群计划
//! - **observability**: tracing 初始化
//! - **store**: 任务存储与升级日志（内存 / SQLite）

pub mod config;
pub mod core;
pub mod domain;
pub mod observability;
pub mod store;

pub use crate::core::{HiveError, Orchestrator};
