//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__LOCKS__STALE_AFTER_SECS=600`）。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::retry_manager::RetryStrategy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub store: StoreSection,
    pub locks: LockSection,
    pub retry: RetryConfig,
    pub escalation: EscalationConfig,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 默认日志级别，RUST_LOG 优先
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// [store] 段：SQLite 文件路径，`:memory:` 表示不落盘
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("swarms/hive.db")
}

/// [locks] 段
#[derive(Debug, Clone, Deserialize)]
pub struct LockSection {
    /// 持有超过该时长的锁视为遗弃
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl LockSection {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

fn default_stale_after_secs() -> u64 {
    30 * 60
}

/// [retry] 段
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// 策略表中 1 秒对应的毫秒数（测试设为 0）
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
    /// 重试耗尽时，总尝试次数达到此值才要求升级
    #[serde(default = "default_escalate_after_attempts")]
    pub escalate_after_attempts: u32,
    /// 按错误类别覆盖内置策略，键为 timeout / rate_limit / ...
    #[serde(default)]
    pub overrides: HashMap<String, RetryStrategy>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_unit_ms: default_backoff_unit_ms(),
            escalate_after_attempts: default_escalate_after_attempts(),
            overrides: HashMap::new(),
        }
    }
}

fn default_backoff_unit_ms() -> u64 {
    1000
}

fn default_escalate_after_attempts() -> u32 {
    3
}

/// [escalation] 段
#[derive(Debug, Clone, Deserialize)]
pub struct EscalationConfig {
    /// 直接依赖方不超过此数量时，其余工作可继续
    #[serde(default = "default_max_dependents_to_continue")]
    pub max_dependents_to_continue: usize,
    /// 外部服务阻塞时，优先级达到此值判为 high
    #[serde(default = "default_high_priority_threshold")]
    pub high_priority_threshold: i64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            max_dependents_to_continue: default_max_dependents_to_continue(),
            high_priority_threshold: default_high_priority_threshold(),
        }
    }
}

fn default_max_dependents_to_continue() -> usize {
    2
}

fn default_high_priority_threshold() -> i64 {
    8
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::retry_manager::BackoffKind;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.app.log_level, "info");
        assert_eq!(config.store.path, PathBuf::from("swarms/hive.db"));
        assert_eq!(config.locks.stale_after(), Duration::from_secs(1800));
        assert_eq!(config.retry.backoff_unit_ms, 1000);
        assert_eq!(config.retry.escalate_after_attempts, 3);
        assert_eq!(config.escalation.max_dependents_to_continue, 2);
        assert_eq!(config.escalation.high_priority_threshold, 8);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[locks]
stale_after_secs = 60

[retry]
backoff_unit_ms = 0

[retry.overrides.timeout]
max_retries = 5
backoff = "fixed"
base_delay = 1.5

[escalation]
high_priority_threshold = 3
"#
        )
        .unwrap();

        let config = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.locks.stale_after_secs, 60);
        assert_eq!(config.retry.backoff_unit_ms, 0);
        assert_eq!(config.escalation.high_priority_threshold, 3);
        let timeout = &config.retry.overrides["timeout"];
        assert_eq!(timeout.max_retries, 5);
        assert_eq!(timeout.backoff, BackoffKind::Fixed);
        assert!(!timeout.escalate);
    }
}
