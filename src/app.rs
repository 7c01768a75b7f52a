use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{info, warn};

use simsched_core::AppConfig;
use simsched_dispatcher::health_monitor::HealthMonitorConfig;
use simsched_dispatcher::{
    AdaptiveConfig, AdaptiveStrategy, DispatchLoopTask, FileTransferQueue, FixedIntervalStrategy,
    FnTask, HealthSweepTask, JobOrchestrator, NodeHealthMonitor, OrchestratorConfig,
    ResourceAllocator, RunnerConfig, RunnerRegistry, TaskOutcome, TaskRunner,
};
use simsched_infrastructure::event_bus::EventBus;
use simsched_infrastructure::memory::{
    InMemoryArtifactRepository, InMemoryJobRepository, InMemoryNodeRepository,
    InMemoryUserRepository,
};
use simsched_infrastructure::ssh::{ScpFileMover, SshRemoteExecutor};

/// 主应用程序
///
/// 入口点在这里显式构造所有组件并完成接线：仓储、事件总线、资源
/// 分配器、健康监控、编排器与三个后台调度器（健康巡检、作业分发、
/// 事件总线清理），不使用任何全局查找。
pub struct Application {
    registry: Arc<RunnerRegistry>,
    orchestrator: Arc<JobOrchestrator>,
    monitor: Arc<NodeHealthMonitor>,
    event_bus: Arc<EventBus>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化仿真作业调度系统");

        let node_repo = Arc::new(InMemoryNodeRepository::new());
        let job_repo = Arc::new(InMemoryJobRepository::new());
        let user_repo = Arc::new(InMemoryUserRepository::new());
        let artifact_repo = Arc::new(InMemoryArtifactRepository::new());

        let event_bus = Arc::new(EventBus::new());
        let executor = Arc::new(SshRemoteExecutor::new());
        let file_mover = Arc::new(ScpFileMover::new(Duration::from_secs(
            config.exec_timeout_secs,
        )));
        let transfer_queue = Arc::new(FileTransferQueue::new());

        let allocator = Arc::new(ResourceAllocator::new(
            user_repo.clone(),
            job_repo.clone(),
            config.total_license_tokens,
        ));

        let monitor = Arc::new(NodeHealthMonitor::new(
            node_repo.clone(),
            executor.clone(),
            event_bus.clone(),
            HealthMonitorConfig {
                probe_timeout: Duration::from_secs(config.probe_timeout_secs),
                max_concurrent_checks: config.max_concurrent_checks,
                normal_interval: Duration::from_millis(config.health_normal_interval_ms),
                min_interval: Duration::from_millis(config.health_min_interval_ms),
                max_interval: Duration::from_millis(config.health_max_interval_ms),
                ..HealthMonitorConfig::default()
            },
        ));

        let orchestrator = Arc::new(JobOrchestrator::new(
            job_repo,
            node_repo,
            artifact_repo,
            allocator,
            transfer_queue,
            executor,
            file_mover,
            event_bus.clone(),
            OrchestratorConfig {
                exec_timeout: Duration::from_secs(config.exec_timeout_secs),
                max_concurrent_jobs: config.max_concurrent_jobs,
                remote_work_root: "/var/lib/simsched/jobs".to_string(),
                local_result_root: PathBuf::from("/var/lib/simsched/results"),
                solver_command: "simsolver".to_string(),
            },
        ));

        let runner_config = RunnerConfig {
            enabled: true,
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        };

        let registry = Arc::new(RunnerRegistry::new());

        // 健康巡检：自适应间隔，立即执行首轮
        registry
            .register(Arc::new(TaskRunner::new(
                "node-health-sweep",
                Arc::new(HealthSweepTask::new(monitor.clone())),
                Arc::new(AdaptiveStrategy::new(
                    AdaptiveConfig::new(Duration::from_millis(config.health_normal_interval_ms))
                        .with_bounds(
                            Duration::from_millis(config.health_min_interval_ms),
                            Duration::from_millis(config.health_max_interval_ms),
                        )
                        .immediate(),
                )),
                runner_config.clone(),
            )))
            .await;

        // 作业分发：固定间隔扫描等待队列
        registry
            .register(Arc::new(TaskRunner::new(
                "job-dispatch",
                Arc::new(DispatchLoopTask::new(orchestrator.clone())),
                Arc::new(FixedIntervalStrategy::new(Duration::from_millis(
                    config.dispatch_interval_ms,
                ))),
                runner_config.clone(),
            )))
            .await;

        // 事件总线订阅者清理
        let cleanup_bus = event_bus.clone();
        registry
            .register(Arc::new(TaskRunner::new(
                "event-bus-cleanup",
                Arc::new(FnTask::new("event-bus-cleanup", move || {
                    let bus = cleanup_bus.clone();
                    async move {
                        let removed = bus.sweep_closed_subscribers().await;
                        Ok(TaskOutcome::success()
                            .with_metadata(serde_json::json!({ "removed": removed })))
                    }
                })),
                Arc::new(FixedIntervalStrategy::new(Duration::from_millis(
                    config.cleanup_interval_ms,
                ))),
                runner_config,
            )))
            .await;

        Ok(Self {
            registry,
            orchestrator,
            monitor,
            event_bus,
        })
    }

    pub fn orchestrator(&self) -> Arc<JobOrchestrator> {
        self.orchestrator.clone()
    }

    pub fn monitor(&self) -> Arc<NodeHealthMonitor> {
        self.monitor.clone()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    /// 运行直到收到关闭信号，然后排空所有调度器
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.registry
            .start_all()
            .await
            .map_err(anyhow::Error::from)?;
        info!("{} 个后台调度器已启动", self.registry.count().await);

        if shutdown_rx.recv().await.is_err() {
            warn!("关闭信号通道已关闭，开始停止");
        }

        self.registry.stop_all().await;
        for snapshot in self.registry.aggregate_stats().await {
            info!(
                "调度器 {} 统计: 总计 {} 成功 {} 失败 {}",
                snapshot.name,
                snapshot.stats.total_executions,
                snapshot.stats.successful_executions,
                snapshot.stats.failed_executions
            );
        }
        Ok(())
    }
}
