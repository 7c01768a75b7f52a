//! 通用调度框架
//!
//! 所有周期性后台循环共享的启动/停止/健康生命周期。具体的调度行为由
//! [`ScheduleStrategy`] 策略对象提供（固定间隔、自适应间隔等），框架本身
//! 只负责驱动循环、统计执行结果并吞掉任务抛出的错误。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use simsched_core::{SimschedError, SimschedResult};

/// 单次任务执行的结果
#[derive(Debug, Clone, Default)]
pub struct TaskOutcome {
    pub success: bool,
    /// 任务可直接建议下一次执行间隔，策略负责钳制
    pub suggested_next_interval: Option<Duration>,
    pub metadata: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failure<S: Into<String>>(error: S) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_suggested_interval(mut self, interval: Duration) -> Self {
        self.suggested_next_interval = Some(interval);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// 被调度的任务体
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    async fn execute(&self) -> SimschedResult<TaskOutcome>;
    fn name(&self) -> &str;
}

/// 闭包任务适配器，便于将任意异步函数挂到调度框架上
pub struct FnTask<F> {
    name: String,
    f: F,
}

impl<F, Fut> FnTask<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = SimschedResult<TaskOutcome>> + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> ScheduledTask for FnTask<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = SimschedResult<TaskOutcome>> + Send,
{
    async fn execute(&self) -> SimschedResult<TaskOutcome> {
        (self.f)().await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 调度策略对象
///
/// 取代深层继承的钩子集合：{on_start, on_stop, on_task_error, next_interval}。
#[async_trait]
pub trait ScheduleStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// 首次执行前的延迟
    async fn initial_delay(&self) -> Duration;

    /// 记录本次执行结果，返回距下一次执行的延迟
    async fn next_interval(&self, outcome: &TaskOutcome) -> Duration;

    async fn on_start(&self) {}

    async fn on_stop(&self) {}

    /// 任务返回错误时的钩子，策略可据此决定退避
    async fn on_task_error(&self, _error: &SimschedError) {}
}

/// 固定间隔策略
pub struct FixedIntervalStrategy {
    interval: Duration,
    execute_immediately: bool,
}

impl FixedIntervalStrategy {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            execute_immediately: false,
        }
    }

    pub fn immediate(interval: Duration) -> Self {
        Self {
            interval,
            execute_immediately: true,
        }
    }
}

#[async_trait]
impl ScheduleStrategy for FixedIntervalStrategy {
    fn name(&self) -> &str {
        "FixedInterval"
    }

    async fn initial_delay(&self) -> Duration {
        if self.execute_immediately {
            Duration::ZERO
        } else {
            self.interval
        }
    }

    async fn next_interval(&self, _outcome: &TaskOutcome) -> Duration {
        self.interval
    }
}

/// 调度器运行统计（瞬态）
#[derive(Debug, Clone, Default)]
pub struct RunnerStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub last_execution_time: Option<DateTime<Utc>>,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_execution_time: Option<DateTime<Utc>>,
}

/// 由错误率与失败时间推导的健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerHealth {
    Healthy,
    Degraded,
    Unhealthy,
    Stopped,
}

/// 运行统计快照，附带派生字段
#[derive(Debug, Clone)]
pub struct RunnerStatsSnapshot {
    pub name: String,
    pub is_running: bool,
    pub stats: RunnerStats,
    pub health: RunnerHealth,
}

/// 框架运行配置
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub enabled: bool,
    /// stop() 等待在途任务完成的上限
    pub shutdown_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// 通用周期任务运行器
///
/// 每个后台循环对应一个实例；任务失败被计数并交给策略处理，永不使框架崩溃。
pub struct TaskRunner {
    name: String,
    task: Arc<dyn ScheduledTask>,
    strategy: Arc<dyn ScheduleStrategy>,
    config: RunnerConfig,
    running: Arc<RwLock<bool>>,
    stats: Arc<RwLock<RunnerStats>>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TaskRunner {
    pub fn new(
        name: impl Into<String>,
        task: Arc<dyn ScheduledTask>,
        strategy: Arc<dyn ScheduleStrategy>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            name: name.into(),
            task,
            strategy,
            config,
            running: Arc::new(RwLock::new(false)),
            stats: Arc::new(RwLock::new(RunnerStats::default())),
            stop_tx: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// 启动调度循环（幂等）
    pub async fn start(&self) -> SimschedResult<()> {
        if !self.config.enabled {
            warn!("调度器 {} 已被配置禁用，跳过启动", self.name);
            return Ok(());
        }

        {
            let mut running = self.running.write().await;
            if *running {
                warn!("调度器 {} 已在运行，忽略重复启动", self.name);
                return Ok(());
            }
            *running = true;
        }

        info!("启动调度器 {} (策略: {})", self.name, self.strategy.name());
        self.strategy.on_start().await;

        let (stop_tx, stop_rx) = watch::channel(false);
        *self.stop_tx.lock().await = Some(stop_tx);

        let handle = tokio::spawn(Self::run_loop(
            self.name.clone(),
            Arc::clone(&self.task),
            Arc::clone(&self.strategy),
            Arc::clone(&self.running),
            Arc::clone(&self.stats),
            stop_rx,
        ));
        *self.handle.lock().await = Some(handle);

        Ok(())
    }

    /// 停止调度循环（幂等），等待在途任务完成直到超时
    pub async fn stop(&self) -> SimschedResult<()> {
        {
            let mut running = self.running.write().await;
            if !*running {
                debug!("调度器 {} 未在运行，忽略停止请求", self.name);
                return Ok(());
            }
            *running = false;
        }

        info!("停止调度器 {}", self.name);
        self.strategy.on_stop().await;

        if let Some(stop_tx) = self.stop_tx.lock().await.take() {
            // 接收端随循环退出而关闭，发送失败仅说明循环已结束
            let _ = stop_tx.send(true);
        }

        if let Some(handle) = self.handle.lock().await.take() {
            match tokio::time::timeout(self.config.shutdown_timeout, handle).await {
                Ok(Ok(())) => {
                    info!("调度器 {} 已停止", self.name);
                }
                Ok(Err(e)) => {
                    error!("调度器 {} 的循环任务异常退出: {}", self.name, e);
                }
                Err(_) => {
                    // 超时非致命：在途任务仍可能完成，只是不再等待
                    warn!(
                        "调度器 {} 停止超时 ({:?})，不再等待在途任务",
                        self.name, self.config.shutdown_timeout
                    );
                }
            }
        }

        self.stats.write().await.next_execution_time = None;

        Ok(())
    }

    pub async fn stats(&self) -> RunnerStatsSnapshot {
        let stats = self.stats.read().await.clone();
        let is_running = *self.running.read().await;
        let health = Self::derive_health(&stats, is_running);
        RunnerStatsSnapshot {
            name: self.name.clone(),
            is_running,
            stats,
            health,
        }
    }

    pub async fn health(&self) -> RunnerHealth {
        let stats = self.stats.read().await;
        Self::derive_health(&stats, *self.running.read().await)
    }

    fn derive_health(stats: &RunnerStats, is_running: bool) -> RunnerHealth {
        if !is_running {
            return RunnerHealth::Stopped;
        }
        if stats.total_executions == 0 {
            return RunnerHealth::Healthy;
        }
        let error_rate = stats.failed_executions as f64 / stats.total_executions as f64;
        if error_rate >= 0.5 {
            return RunnerHealth::Unhealthy;
        }
        let recent_failure = stats
            .last_failure_time
            .map(|t| Utc::now() - t < chrono::Duration::minutes(5))
            .unwrap_or(false);
        if error_rate >= 0.1 || recent_failure {
            RunnerHealth::Degraded
        } else {
            RunnerHealth::Healthy
        }
    }

    async fn run_loop(
        name: String,
        task: Arc<dyn ScheduledTask>,
        strategy: Arc<dyn ScheduleStrategy>,
        running: Arc<RwLock<bool>>,
        stats: Arc<RwLock<RunnerStats>>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let mut delay = strategy.initial_delay().await;

        loop {
            {
                let mut s = stats.write().await;
                s.next_execution_time = Utc::now()
                    .checked_add_signed(chrono::Duration::from_std(delay).unwrap_or_default());
            }

            tokio::select! {
                _ = stop_rx.changed() => {
                    debug!("调度器 {} 收到停止信号，退出循环", name);
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if !*running.read().await {
                break;
            }

            // 每次执行都计入总数；任务错误被捕获并计为失败
            let outcome = match task.execute().await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("调度器 {} 的任务执行出错: {}", name, e);
                    strategy.on_task_error(&e).await;
                    TaskOutcome::failure(e.to_string())
                }
            };

            {
                let mut s = stats.write().await;
                s.total_executions += 1;
                let now = Utc::now();
                s.last_execution_time = Some(now);
                if outcome.success {
                    s.successful_executions += 1;
                } else {
                    s.failed_executions += 1;
                    s.last_failure_time = Some(now);
                }
            }

            // 循环通过重新装载（可能已自适应的）间隔延续，没有固定频率的定时器
            delay = strategy.next_interval(&outcome).await;
        }
    }
}
