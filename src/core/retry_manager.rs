//! 重试管理：错误分类 + 退避 + 可取消的重试循环
//!
//! 失败优先使用调用方给出的分类（`OperationFailure::category`），
//! 否则退回到对错误文本做关键词匹配。

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::core::HiveError;

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    RateLimit,
    Network,
    SyntaxError,
    TypeError,
    ApiError,
    NotFound,
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 8] = [
        ErrorCategory::Timeout,
        ErrorCategory::RateLimit,
        ErrorCategory::Network,
        ErrorCategory::SyntaxError,
        ErrorCategory::TypeError,
        ErrorCategory::ApiError,
        ErrorCategory::NotFound,
        ErrorCategory::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Network => "network",
            ErrorCategory::SyntaxError => "syntax_error",
            ErrorCategory::TypeError => "type_error",
            ErrorCategory::ApiError => "api_error",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }

    /// 关键词分类：按表顺序匹配，首个命中生效，未命中为 Unknown
    pub fn classify(message: &str) -> Self {
        classifier_patterns()
            .iter()
            .find(|(_, re)| re.is_match(message))
            .map(|(category, _)| *category)
            .unwrap_or(ErrorCategory::Unknown)
    }

    /// 内置重试策略（base_delay 单位为「秒」，实际时长乘以 backoff_unit）
    pub fn default_strategy(&self) -> RetryStrategy {
        let (max_retries, backoff, base_delay, escalate) = match self {
            ErrorCategory::Timeout => (3, BackoffKind::Exponential, 2.0, false),
            ErrorCategory::RateLimit => (5, BackoffKind::Exponential, 10.0, false),
            ErrorCategory::Network => (3, BackoffKind::Exponential, 1.0, false),
            ErrorCategory::SyntaxError => (2, BackoffKind::Immediate, 0.0, false),
            ErrorCategory::TypeError => (2, BackoffKind::Immediate, 0.0, false),
            ErrorCategory::ApiError => (0, BackoffKind::None, 0.0, true),
            ErrorCategory::NotFound => (1, BackoffKind::Immediate, 0.0, false),
            ErrorCategory::Unknown => (2, BackoffKind::Exponential, 1.0, false),
        };
        RetryStrategy {
            max_retries,
            backoff,
            base_delay,
            escalate,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static CLASSIFIER: OnceLock<Vec<(ErrorCategory, Regex)>> = OnceLock::new();

fn classifier_patterns() -> &'static [(ErrorCategory, Regex)] {
    CLASSIFIER.get_or_init(|| {
        [
            (ErrorCategory::Timeout, r"timeout|timed out|connection timeout"),
            (ErrorCategory::RateLimit, r"rate limit|too many requests|429"),
            (
                ErrorCategory::Network,
                r"network|connection refused|connection reset|dns",
            ),
            (
                ErrorCategory::SyntaxError,
                r"syntaxerror|unexpected token|parse error",
            ),
            (
                ErrorCategory::TypeError,
                r"typeerror|cannot read property|undefined",
            ),
            (
                ErrorCategory::ApiError,
                r"api error|invalid api key|unauthorized|401|403",
            ),
            (ErrorCategory::NotFound, r"not found|404|enoent|no such file"),
        ]
        .into_iter()
        .filter_map(|(category, pattern)| {
            Regex::new(&format!("(?i){pattern}"))
                .ok()
                .map(|re| (category, re))
        })
        .collect()
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// base * 2^(n-1)
    Exponential,
    /// 固定 base
    Fixed,
    Immediate,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryStrategy {
    /// 总尝试次数上限
    pub max_retries: u32,
    pub backoff: BackoffKind,
    #[serde(default)]
    pub base_delay: f64,
    /// 不重试，直接升级
    #[serde(default)]
    pub escalate: bool,
}

/// 被重试操作的失败值
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct OperationFailure {
    pub category: Option<ErrorCategory>,
    pub message: String,
}

impl OperationFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            category: None,
            message: message.into(),
        }
    }

    pub fn categorized(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category: Some(category),
            message: message.into(),
        }
    }

    /// 显式分类优先，否则按关键词
    pub fn category(&self) -> ErrorCategory {
        self.category
            .unwrap_or_else(|| ErrorCategory::classify(&self.message))
    }
}

impl From<String> for OperationFailure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for OperationFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<anyhow::Error> for OperationFailure {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

impl From<HiveError> for OperationFailure {
    fn from(err: HiveError) -> Self {
        let category = match &err {
            HiveError::TaskNotFound(_) | HiveError::EscalationNotFound(_) => {
                Some(ErrorCategory::NotFound)
            }
            _ => None,
        };
        Self {
            category,
            message: err.to_string(),
        }
    }
}

/// 一次重试循环的结果
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub success: bool,
    pub result: Option<T>,
    pub error: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub attempts: u32,
    pub should_escalate: bool,
    pub escalation_reason: Option<String>,
    /// 被取消令牌中止
    pub cancelled: bool,
    /// 累计退避时长
    pub backoff_total: Duration,
}

impl<T> RetryOutcome<T> {
    fn succeeded(result: T, attempts: u32, backoff_total: Duration) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            error_category: None,
            attempts,
            should_escalate: false,
            escalation_reason: None,
            cancelled: false,
            backoff_total,
        }
    }

    fn failed(
        failure: &OperationFailure,
        category: ErrorCategory,
        attempts: u32,
        should_escalate: bool,
        escalation_reason: String,
        backoff_total: Duration,
    ) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(failure.message.clone()),
            error_category: Some(category),
            attempts,
            should_escalate,
            escalation_reason: Some(escalation_reason),
            cancelled: false,
            backoff_total,
        }
    }

    fn cancelled(
        last_failure: Option<(&OperationFailure, ErrorCategory)>,
        attempts: u32,
        backoff_total: Duration,
    ) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(
                last_failure
                    .map(|(f, _)| f.message.clone())
                    .unwrap_or_else(|| HiveError::Cancelled.to_string()),
            ),
            error_category: last_failure.map(|(_, c)| c),
            attempts,
            should_escalate: false,
            escalation_reason: None,
            cancelled: true,
            backoff_total,
        }
    }
}

/// 一次失败之后的下一步
enum Verdict {
    GiveUp {
        should_escalate: bool,
        reason: String,
    },
    RetryAfter(Duration),
}

#[derive(Debug, Clone)]
pub struct RetryManager {
    strategies: HashMap<ErrorCategory, RetryStrategy>,
    backoff_unit: Duration,
    escalate_after_attempts: u32,
}

impl RetryManager {
    pub fn new() -> Self {
        Self {
            strategies: ErrorCategory::ALL
                .into_iter()
                .map(|c| (c, c.default_strategy()))
                .collect(),
            backoff_unit: Duration::from_secs(1),
            escalate_after_attempts: 3,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        let mut manager = Self::new()
            .with_backoff_unit(Duration::from_millis(config.backoff_unit_ms))
            .with_escalate_after_attempts(config.escalate_after_attempts);
        for (name, strategy) in &config.overrides {
            match ErrorCategory::parse(name) {
                Some(category) => {
                    manager.strategies.insert(category, *strategy);
                }
                None => tracing::warn!("Ignoring retry override for unknown category '{}'", name),
            }
        }
        manager
    }

    /// 1 个「秒」对应的实际时长；测试中设为 0
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn with_escalate_after_attempts(mut self, attempts: u32) -> Self {
        self.escalate_after_attempts = attempts;
        self
    }

    pub fn with_strategy(mut self, category: ErrorCategory, strategy: RetryStrategy) -> Self {
        self.strategies.insert(category, strategy);
        self
    }

    pub fn classify(&self, failure: &OperationFailure) -> ErrorCategory {
        failure.category()
    }

    pub fn retry_strategy(&self, category: ErrorCategory) -> RetryStrategy {
        self.strategies
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.default_strategy())
    }

    /// 第 `failed_attempts` 次失败后的等待时长
    pub fn calculate_delay(&self, category: ErrorCategory, failed_attempts: u32) -> Duration {
        let strategy = self.retry_strategy(category);
        let base = strategy.base_delay.max(0.0);
        let factor = match strategy.backoff {
            BackoffKind::Immediate | BackoffKind::None => return Duration::ZERO,
            BackoffKind::Fixed => base,
            BackoffKind::Exponential => {
                let exponent = failed_attempts.saturating_sub(1).min(30) as i32;
                base * 2f64.powi(exponent)
            }
        };
        Duration::try_from_secs_f64(self.backoff_unit.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX)
    }

    /// 只有确定性错误值得带上错误信息重新生成
    pub fn should_regenerate_with_error_context(&self, category: ErrorCategory) -> bool {
        matches!(
            category,
            ErrorCategory::SyntaxError | ErrorCategory::TypeError | ErrorCategory::NotFound
        )
    }

    /// 在原提示词后追加失败上下文，供重新生成
    pub fn create_fix_prompt(
        &self,
        original_prompt: &str,
        error: &str,
        category: ErrorCategory,
    ) -> String {
        format!(
            "{original_prompt}\n\n\
             PREVIOUS ATTEMPT FAILED:\n\n\
             Error Type: {category}\n\
             Error Message: {error}\n\n\
             INSTRUCTIONS:\n\
             1. Analyze the error above\n\
             2. Identify what went wrong\n\
             3. Fix the issue in your regenerated output\n\
             4. Ensure this specific error doesn't happen again\n\n\
             Generate the corrected version now.\n"
        )
    }

    fn judge(&self, category: ErrorCategory, attempts: u32, failure: &OperationFailure) -> Verdict {
        let strategy = self.retry_strategy(category);

        if strategy.escalate {
            tracing::warn!("Error requires escalation: {} - {}", category, failure.message);
            return Verdict::GiveUp {
                should_escalate: true,
                reason: format!("{category}: {}", failure.message),
            };
        }

        if attempts >= strategy.max_retries {
            tracing::warn!(
                "Max retries ({}) exceeded for {}",
                strategy.max_retries,
                category
            );
            return Verdict::GiveUp {
                should_escalate: attempts >= self.escalate_after_attempts,
                reason: format!("Failed after {attempts} attempts: {}", failure.message),
            };
        }

        let delay = self.calculate_delay(category, attempts);
        tracing::info!(
            "Retrying in {:?} (attempt {}/{})",
            delay,
            attempts + 1,
            strategy.max_retries
        );
        Verdict::RetryAfter(delay)
    }

    /// 异步重试循环；`operation` 收到本次尝试序号（从 1 开始）
    ///
    /// 取消令牌在每次尝试前检查，退避等待期间也可被中止；被取消的结果不会要求升级。
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<OperationFailure>,
    {
        let mut attempts = 0u32;
        let mut backoff_total = Duration::ZERO;
        let mut last: Option<(OperationFailure, ErrorCategory)> = None;

        loop {
            if cancel.is_cancelled() {
                return RetryOutcome::cancelled(
                    last.as_ref().map(|(f, c)| (f, *c)),
                    attempts,
                    backoff_total,
                );
            }

            attempts += 1;
            let failure = match operation(attempts).await {
                Ok(result) => {
                    tracing::debug!("Success on attempt {}", attempts);
                    return RetryOutcome::succeeded(result, attempts, backoff_total);
                }
                Err(err) => err.into(),
            };

            let category = self.classify(&failure);
            tracing::warn!("Attempt {} failed: {} - {}", attempts, category, failure.message);

            // 尝试期间被取消：不再判定重试或升级
            if cancel.is_cancelled() {
                return RetryOutcome::cancelled(Some((&failure, category)), attempts, backoff_total);
            }

            match self.judge(category, attempts, &failure) {
                Verdict::GiveUp {
                    should_escalate,
                    reason,
                } => {
                    return RetryOutcome::failed(
                        &failure,
                        category,
                        attempts,
                        should_escalate,
                        reason,
                        backoff_total,
                    );
                }
                Verdict::RetryAfter(delay) => {
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                tracing::info!("Retry cancelled during backoff");
                                return RetryOutcome::cancelled(
                                    Some((&failure, category)),
                                    attempts,
                                    backoff_total,
                                );
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                        backoff_total += delay;
                    }
                }
            }
            last = Some((failure, category));
        }
    }

    /// 同步版本：阻塞当前线程，退避按小片睡眠以便响应取消
    pub fn execute_sync_with_retry<T, E, F>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Result<T, E>,
        E: Into<OperationFailure>,
    {
        const SLICE: Duration = Duration::from_millis(50);

        let mut attempts = 0u32;
        let mut backoff_total = Duration::ZERO;
        let mut last: Option<(OperationFailure, ErrorCategory)> = None;

        loop {
            if cancel.is_cancelled() {
                return RetryOutcome::cancelled(
                    last.as_ref().map(|(f, c)| (f, *c)),
                    attempts,
                    backoff_total,
                );
            }

            attempts += 1;
            let failure: OperationFailure = match operation(attempts) {
                Ok(result) => return RetryOutcome::succeeded(result, attempts, backoff_total),
                Err(err) => err.into(),
            };

            let category = self.classify(&failure);
            tracing::warn!("Attempt {} failed: {} - {}", attempts, category, failure.message);

            // 尝试期间被取消：不再判定重试或升级
            if cancel.is_cancelled() {
                return RetryOutcome::cancelled(Some((&failure, category)), attempts, backoff_total);
            }

            match self.judge(category, attempts, &failure) {
                Verdict::GiveUp {
                    should_escalate,
                    reason,
                } => {
                    return RetryOutcome::failed(
                        &failure,
                        category,
                        attempts,
                        should_escalate,
                        reason,
                        backoff_total,
                    );
                }
                Verdict::RetryAfter(delay) => {
                    let mut remaining = delay;
                    while !remaining.is_zero() {
                        if cancel.is_cancelled() {
                            return RetryOutcome::cancelled(
                                Some((&failure, category)),
                                attempts,
                                backoff_total,
                            );
                        }
                        let step = remaining.min(SLICE);
                        std::thread::sleep(step);
                        remaining -= step;
                        backoff_total += step;
                    }
                }
            }
            last = Some((failure, category));
        }
    }
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryManager {
        RetryManager::new().with_backoff_unit(Duration::ZERO)
    }

    #[test]
    fn test_classify_table_order() {
        assert_eq!(ErrorCategory::classify("Request TIMED OUT"), ErrorCategory::Timeout);
        assert_eq!(ErrorCategory::classify("HTTP 429"), ErrorCategory::RateLimit);
        assert_eq!(ErrorCategory::classify("connection refused"), ErrorCategory::Network);
        assert_eq!(ErrorCategory::classify("SyntaxError: bad"), ErrorCategory::SyntaxError);
        assert_eq!(ErrorCategory::classify("x is undefined"), ErrorCategory::TypeError);
        assert_eq!(ErrorCategory::classify("Invalid API key"), ErrorCategory::ApiError);
        assert_eq!(ErrorCategory::classify("ENOENT: no such file"), ErrorCategory::NotFound);
        assert_eq!(ErrorCategory::classify("something odd"), ErrorCategory::Unknown);
        // timeout 排在 network 之前
        assert_eq!(
            ErrorCategory::classify("network connection timeout"),
            ErrorCategory::Timeout
        );
    }

    #[test]
    fn test_explicit_category_wins() {
        let failure = OperationFailure::categorized(ErrorCategory::RateLimit, "timeout");
        assert_eq!(failure.category(), ErrorCategory::RateLimit);
        let failure: OperationFailure = HiveError::TaskNotFound("t".into()).into();
        assert_eq!(failure.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn test_delays() {
        let manager = RetryManager::new();
        assert_eq!(manager.calculate_delay(ErrorCategory::Timeout, 1), Duration::from_secs(2));
        assert_eq!(manager.calculate_delay(ErrorCategory::Timeout, 2), Duration::from_secs(4));
        assert_eq!(manager.calculate_delay(ErrorCategory::Timeout, 3), Duration::from_secs(8));
        assert_eq!(manager.calculate_delay(ErrorCategory::SyntaxError, 1), Duration::ZERO);
        assert_eq!(manager.calculate_delay(ErrorCategory::ApiError, 1), Duration::ZERO);

        let fixed = manager.with_strategy(
            ErrorCategory::Network,
            RetryStrategy {
                max_retries: 4,
                backoff: BackoffKind::Fixed,
                base_delay: 3.0,
                escalate: false,
            },
        );
        assert_eq!(fixed.calculate_delay(ErrorCategory::Network, 3), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_timeout_exhausts_after_three_attempts() {
        let manager = fast();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let outcome: RetryOutcome<()> = manager
            .execute_with_retry(&CancellationToken::new(), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("operation timed out") }
            })
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.error_category, Some(ErrorCategory::Timeout));
        assert!(outcome.should_escalate);
        assert_eq!(
            outcome.escalation_reason.as_deref(),
            Some("Failed after 3 attempts: operation timed out")
        );
    }

    #[tokio::test]
    async fn test_api_error_fails_fast() {
        // 真实退避单位：若发生退避，backoff_total 将不为零
        let manager = RetryManager::new();
        let outcome: RetryOutcome<()> = manager
            .execute_with_retry(&CancellationToken::new(), |_| async {
                Err::<(), _>("401 Unauthorized")
            })
            .await;

        assert_eq!(outcome.attempts, 1);
        assert!(outcome.should_escalate);
        assert_eq!(outcome.backoff_total, Duration::ZERO);
        assert_eq!(outcome.error_category, Some(ErrorCategory::ApiError));
        assert!(outcome
            .escalation_reason
            .as_deref()
            .is_some_and(|r| r.starts_with("api_error:")));
    }

    #[tokio::test]
    async fn test_syntax_error_not_escalated() {
        let outcome: RetryOutcome<()> = fast()
            .execute_with_retry(&CancellationToken::new(), |_| async {
                Err::<(), _>("SyntaxError: unexpected token")
            })
            .await;
        assert_eq!(outcome.attempts, 2);
        assert!(!outcome.should_escalate);
    }

    #[tokio::test]
    async fn test_success_after_failure() {
        let outcome = fast()
            .execute_with_retry(&CancellationToken::new(), |attempt| async move {
                if attempt < 2 {
                    Err("network down")
                } else {
                    Ok(attempt * 10)
                }
            })
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.result, Some(20));
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let manager = RetryManager::new().with_backoff_unit(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome: RetryOutcome<()> = manager
            .execute_with_retry(&cancel, |_| async { Err::<(), _>("timeout") })
            .await;
        assert!(outcome.cancelled);
        assert!(!outcome.should_escalate);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_cancel_inside_attempt_skips_escalation() {
        let cancel = CancellationToken::new();
        let outcome: RetryOutcome<()> = fast()
            .execute_with_retry(&cancel, |_| {
                let cancel = cancel.clone();
                async move {
                    cancel.cancel();
                    Err::<(), _>("401 unauthorized")
                }
            })
            .await;
        assert!(outcome.cancelled);
        assert!(!outcome.should_escalate);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.error_category, Some(ErrorCategory::ApiError));
    }

    #[tokio::test]
    async fn test_already_cancelled_never_runs() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome: RetryOutcome<()> = fast()
            .execute_with_retry(&cancel, |_| async { Ok::<(), OperationFailure>(()) })
            .await;
        assert!(outcome.cancelled);
        assert_eq!(outcome.attempts, 0);
    }

    #[test]
    fn test_sync_retry() {
        let mut calls = 0;
        let outcome = fast().execute_sync_with_retry(&CancellationToken::new(), |_| {
            calls += 1;
            if calls == 1 {
                Err("rate limit hit")
            } else {
                Ok("done")
            }
        });
        assert!(outcome.success);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.result, Some("done"));
    }

    #[test]
    fn test_regenerate_and_fix_prompt() {
        let manager = RetryManager::new();
        assert!(manager.should_regenerate_with_error_context(ErrorCategory::SyntaxError));
        assert!(manager.should_regenerate_with_error_context(ErrorCategory::NotFound));
        assert!(!manager.should_regenerate_with_error_context(ErrorCategory::Timeout));

        let prompt = manager.create_fix_prompt("Write main.rs", "unexpected token", ErrorCategory::SyntaxError);
        assert!(prompt.starts_with("Write main.rs"));
        assert!(prompt.contains("Error Type: syntax_error"));
        assert!(prompt.contains("Error Message: unexpected token"));
    }

    #[test]
    fn test_from_config_overrides() {
        let mut config = RetryConfig::default();
        config.backoff_unit_ms = 0;
        config.overrides.insert(
            "not_found".to_string(),
            RetryStrategy {
                max_retries: 4,
                backoff: BackoffKind::Immediate,
                base_delay: 0.0,
                escalate: false,
            },
        );
        config.overrides.insert("bogus".to_string(), ErrorCategory::Unknown.default_strategy());
        let manager = RetryManager::from_config(&config);
        assert_eq!(manager.retry_strategy(ErrorCategory::NotFound).max_retries, 4);
        assert_eq!(manager.retry_strategy(ErrorCategory::Timeout).max_retries, 3);
    }
}
