//! 调度与编排核心
//!
//! 通用调度框架（固定/自适应间隔策略）、节点健康监控、作业生命周期
//! 编排、按节点串行化的传输队列与资源准入控制。

pub mod adaptive;
pub mod allocator;
pub mod health_monitor;
pub mod orchestrator;
pub mod registry;
pub mod runner;
pub mod test_utils;
pub mod transfer_queue;

pub use adaptive::{AdaptiveConfig, AdaptiveStrategy};
pub use allocator::ResourceAllocator;
pub use health_monitor::{
    HealthMonitorConfig, HealthSweepTask, NodeHealthMonitor, ProbeOptions, ProbeReport,
};
pub use orchestrator::{
    DispatchLoopTask, JobOrchestrator, JobSubmission, OrchestratorConfig,
};
pub use registry::RunnerRegistry;
pub use runner::{
    FixedIntervalStrategy, FnTask, RunnerConfig, RunnerHealth, RunnerStats,
    RunnerStatsSnapshot, ScheduleStrategy, ScheduledTask, TaskOutcome, TaskRunner,
};
pub use transfer_queue::FileTransferQueue;
