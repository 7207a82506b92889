//! Hive 运维入口：查看蜂群健康状况、处理升级、重试失败任务
//!
//! 用法：
//!   hive [--config PATH] report <swarm_id>
//!   hive [--config PATH] escalations <swarm_id>
//!   hive [--config PATH] resolve <escalation_id> <action>
//!   hive [--config PATH] cancel <escalation_id> [reason]
//!   hive [--config PATH] retry <task_id>

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use hive::config::load_config;
use hive::core::shutdown::SqliteCheckpointCleanup;
use hive::core::{Orchestrator, ShutdownCoordinator, ShutdownManager};
use hive::domain::EscalationStatus;
use hive::store::SqliteStore;
use serde_json::{json, Value};

const USAGE: &str = "usage: hive [--config PATH] <report|escalations|resolve|cancel|retry> <id> [args]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let config_path = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            if i + 1 >= args.len() {
                bail!("--config requires a path\n{USAGE}");
            }
            let path = PathBuf::from(args.remove(i + 1));
            args.remove(i);
            Some(path)
        }
        None => None,
    };

    let cfg = load_config(config_path).context("Failed to load config")?;
    hive::observability::init_with_level(&cfg.app.log_level);

    let (Some(command), Some(target)) = (args.first(), args.get(1)) else {
        bail!("{USAGE}");
    };

    let store = if cfg.store.path.as_os_str() == ":memory:" {
        Arc::new(SqliteStore::open_in_memory()?)
    } else {
        Arc::new(
            SqliteStore::open(&cfg.store.path)
                .with_context(|| format!("Failed to open store {}", cfg.store.path.display()))?,
        )
    };

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let orchestrator =
        Orchestrator::new(store.clone(), store.clone(), &cfg).with_shutdown(&shutdown);

    let output = run_then_cleanup(&orchestrator, store, shutdown, command, target, &args).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

/// 执行命令；无论成败都执行清理（WAL checkpoint）
async fn run_then_cleanup(
    orchestrator: &Orchestrator,
    store: Arc<SqliteStore>,
    shutdown: Arc<ShutdownManager>,
    command: &str,
    target: &str,
    args: &[String],
) -> anyhow::Result<Value> {
    let result = run_command(orchestrator, command, target, args).await;

    let mut coordinator = ShutdownCoordinator::new(shutdown);
    coordinator.register(SqliteCheckpointCleanup::new(store));
    coordinator.run_cleanup().await;

    result
}

async fn run_command(
    orchestrator: &Orchestrator,
    command: &str,
    target: &str,
    args: &[String],
) -> anyhow::Result<Value> {
    let output = match command {
        "report" => {
            orchestrator.escalations().recall(target).await?;
            serde_json::to_value(orchestrator.health_report(target).await?)?
        }
        "escalations" => serde_json::to_value(
            orchestrator
                .escalations()
                .get_escalations_for_swarm(target, Some(EscalationStatus::Pending))
                .await?,
        )?,
        "resolve" => {
            let action = args.get(2).context("resolve requires an action")?;
            let resolved = orchestrator
                .escalations()
                .resolve_escalation(target, json!({ "action": action }))
                .await?;
            serde_json::to_value(resolved)?
        }
        "cancel" => {
            let reason = args.get(2).cloned();
            let cancelled = orchestrator
                .escalations()
                .cancel_escalation(target, reason)
                .await?;
            serde_json::to_value(cancelled)?
        }
        "retry" => json!({ "reset": orchestrator.retry_failed_task(target).await? }),
        other => bail!("unknown command '{other}'\n{USAGE}"),
    };
    Ok(output)
}
