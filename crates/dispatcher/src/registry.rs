//! 调度器注册表
//!
//! 跟踪进程内的所有 [`TaskRunner`] 实例，供关闭信号处理器统一停止，
//! 并提供聚合统计查询。由入口点显式构造并注入，不使用全局单例。

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info};

use simsched_core::SimschedResult;

use crate::runner::{RunnerHealth, RunnerStatsSnapshot, TaskRunner};

#[derive(Default)]
pub struct RunnerRegistry {
    runners: RwLock<Vec<Arc<TaskRunner>>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, runner: Arc<TaskRunner>) {
        info!("注册调度器: {}", runner.name());
        self.runners.write().await.push(runner);
    }

    pub async fn count(&self) -> usize {
        self.runners.read().await.len()
    }

    /// 启动所有已注册的调度器
    pub async fn start_all(&self) -> SimschedResult<()> {
        let runners = self.runners.read().await.clone();
        for runner in runners {
            runner.start().await?;
        }
        Ok(())
    }

    /// 停止所有调度器；单个停止失败不会阻止其余调度器停止
    pub async fn stop_all(&self) {
        let runners = self.runners.read().await.clone();
        info!("停止全部 {} 个调度器", runners.len());
        for runner in runners {
            if let Err(e) = runner.stop().await {
                error!("停止调度器 {} 失败: {}", runner.name(), e);
            }
        }
    }

    /// 聚合统计快照
    pub async fn aggregate_stats(&self) -> Vec<RunnerStatsSnapshot> {
        let runners = self.runners.read().await.clone();
        let mut snapshots = Vec::with_capacity(runners.len());
        for runner in runners {
            snapshots.push(runner.stats().await);
        }
        snapshots
    }

    /// 整体健康：取所有运行中调度器的最差状态
    pub async fn overall_health(&self) -> RunnerHealth {
        let snapshots = self.aggregate_stats().await;
        let mut worst = RunnerHealth::Healthy;
        let mut any_running = false;
        for snapshot in &snapshots {
            if !snapshot.is_running {
                continue;
            }
            any_running = true;
            worst = match (worst, snapshot.health) {
                (_, RunnerHealth::Unhealthy) | (RunnerHealth::Unhealthy, _) => {
                    RunnerHealth::Unhealthy
                }
                (_, RunnerHealth::Degraded) | (RunnerHealth::Degraded, _) => RunnerHealth::Degraded,
                _ => RunnerHealth::Healthy,
            };
        }
        if any_running {
            worst
        } else {
            RunnerHealth::Stopped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{
        FixedIntervalStrategy, RunnerConfig, ScheduledTask, TaskOutcome,
    };
    use async_trait::async_trait;
    use simsched_core::SimschedResult;
    use std::time::Duration;

    struct NoopTask;

    #[async_trait]
    impl ScheduledTask for NoopTask {
        async fn execute(&self) -> SimschedResult<TaskOutcome> {
            Ok(TaskOutcome::success())
        }

        fn name(&self) -> &str {
            "noop"
        }
    }

    fn runner(name: &str) -> Arc<TaskRunner> {
        Arc::new(TaskRunner::new(
            name,
            Arc::new(NoopTask),
            Arc::new(FixedIntervalStrategy::new(Duration::from_millis(10))),
            RunnerConfig {
                enabled: true,
                shutdown_timeout: Duration::from_secs(1),
            },
        ))
    }

    #[tokio::test]
    async fn test_stop_all_stops_every_runner() {
        let registry = RunnerRegistry::new();
        let r1 = runner("r1");
        let r2 = runner("r2");
        registry.register(r1.clone()).await;
        registry.register(r2.clone()).await;

        registry.start_all().await.unwrap();
        assert!(r1.is_running().await);
        assert!(r2.is_running().await);

        registry.stop_all().await;
        assert!(!r1.is_running().await);
        assert!(!r2.is_running().await);
        assert_eq!(registry.overall_health().await, RunnerHealth::Stopped);
    }

    #[tokio::test]
    async fn test_aggregate_stats_covers_all_runners() {
        let registry = RunnerRegistry::new();
        registry.register(runner("a")).await;
        registry.register(runner("b")).await;

        let stats = registry.aggregate_stats().await;
        assert_eq!(stats.len(), 2);
        assert_eq!(registry.count().await, 2);
    }
}
