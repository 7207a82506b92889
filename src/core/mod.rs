//! 核心层：冲突仲裁、任务调度、重试、升级、停止与编排

pub mod conflict_resolver;
pub mod error;
pub mod escalation_manager;
pub mod orchestrator;
pub mod retry_manager;
pub mod shutdown;
pub mod task_scheduler;

pub use conflict_resolver::{ConflictResolver, ResolverStats};
pub use error::HiveError;
pub use escalation_manager::{EscalationManager, EscalationSummary};
pub use orchestrator::{HealthReport, Orchestrator, SwarmRunSummary, TaskExecutor, TaskRun};
pub use retry_manager::{
    BackoffKind, ErrorCategory, OperationFailure, RetryManager, RetryOutcome, RetryStrategy,
};
pub use shutdown::{ShutdownCoordinator, ShutdownManager, ShutdownReason};
pub use task_scheduler::{SchedulerStats, StartDecision, SwarmProgress, TaskScheduler};
