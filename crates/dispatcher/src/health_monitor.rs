//! 节点健康监控
//!
//! 判定每个激活节点当前是否可达、可用，并带有噪声容忍：连续失败计数
//! 达到滞回阈值才真正翻转可用状态，避免单次瞬时失败把健康节点标记为
//! 不可用。节点状态只由本组件修改，保持健康真相单一来源。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use simsched_core::{RemoteExecutor, SimschedError, SimschedResult};
use simsched_domain::entities::{Node, NodeStatus};
use simsched_domain::events::NodeEvent;
use simsched_domain::repositories::NodeRepository;
use simsched_infrastructure::event_bus::{channels, EventBus};

use crate::runner::{ScheduledTask, TaskOutcome};

/// 首次检查（节点刚创建）使用的阈值：坏节点立即标记
pub const INITIAL_CHECK_THRESHOLD: u32 = 1;

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// 稳态监控的连续失败阈值
    pub failure_threshold: u32,
    /// 单次探测超时
    pub probe_timeout: Duration,
    /// 单轮并发探测上限
    pub max_concurrent_checks: usize,
    /// 自适应控制器的正常/最快/最慢轮询间隔
    pub normal_interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// 是否探测仿真求解器环境
    pub check_solver_env: bool,
    /// 求解器命令名（能力探测用）
    pub solver_command: String,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            probe_timeout: Duration::from_secs(30),
            max_concurrent_checks: 5,
            normal_interval: Duration::from_secs(60),
            min_interval: Duration::from_secs(6),
            max_interval: Duration::from_secs(600),
            check_solver_env: true,
            solver_command: "simsolver".to_string(),
        }
    }
}

/// 单次探测的选项
#[derive(Debug, Clone, Default)]
pub struct ProbeOptions {
    pub timeout: Option<Duration>,
    pub skip_solver_env: bool,
}

/// 探测结果：各子测试独立记录，外加整体结论
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub connection_ok: bool,
    pub basic_commands_ok: bool,
    /// None 表示本次未探测求解器环境
    pub solver_env_ok: Option<bool>,
    pub success: bool,
    pub detail: Option<String>,
}

/// 节点健康记录（瞬态，不持久化；监控器重启后丢弃）
#[derive(Debug, Clone)]
struct NodeHealthRecord {
    consecutive_failures: u32,
    last_check_time: DateTime<Utc>,
}

pub struct NodeHealthMonitor {
    node_repo: Arc<dyn NodeRepository>,
    executor: Arc<dyn RemoteExecutor>,
    event_bus: Arc<EventBus>,
    config: HealthMonitorConfig,
    /// 节点id -> 健康记录；归本实例所有，便于测试隔离
    records: Mutex<HashMap<i64, NodeHealthRecord>>,
}

impl NodeHealthMonitor {
    pub fn new(
        node_repo: Arc<dyn NodeRepository>,
        executor: Arc<dyn RemoteExecutor>,
        event_bus: Arc<EventBus>,
        config: HealthMonitorConfig,
    ) -> Self {
        Self {
            node_repo,
            executor,
            event_bus,
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HealthMonitorConfig {
        &self.config
    }

    /// 当前的连续失败计数（未检查过的节点为0）
    pub async fn consecutive_failures(&self, node_id: i64) -> u32 {
        self.records
            .lock()
            .await
            .get(&node_id)
            .map(|r| r.consecutive_failures)
            .unwrap_or(0)
    }

    /// 对节点执行可达性与能力探测
    ///
    /// 探测自身的错误被吸收为失败的子测试，不向外抛出。
    pub async fn probe_node(&self, node: &Node, options: &ProbeOptions) -> ProbeReport {
        let timeout = options.timeout.unwrap_or(self.config.probe_timeout);
        let target = node.target();

        // 子测试1：连接可达
        let connection_ok = match self
            .executor
            .run(&target, "true", &[], timeout, None)
            .await
        {
            Ok(outcome) => outcome.is_success(),
            Err(e) => {
                debug!("{} 连接探测失败: {}", node.entity_description(), e);
                false
            }
        };

        if !connection_ok {
            return ProbeReport {
                connection_ok: false,
                basic_commands_ok: false,
                solver_env_ok: None,
                success: false,
                detail: Some("连接探测失败".to_string()),
            };
        }

        // 子测试2：基础命令环境
        let basic_args = ["-c".to_string(), "echo ok && test -d /tmp".to_string()];
        let basic_commands_ok = match self
            .executor
            .run(&target, "sh", &basic_args, timeout, None)
            .await
        {
            Ok(outcome) => outcome.is_success(),
            Err(e) => {
                debug!("{} 基础命令探测失败: {}", node.entity_description(), e);
                false
            }
        };

        // 子测试3：求解器环境（可选）
        let solver_env_ok = if self.config.check_solver_env && !options.skip_solver_env {
            let solver_args = [
                "-c".to_string(),
                format!("command -v {}", self.config.solver_command),
            ];
            let ok = match self
                .executor
                .run(&target, "sh", &solver_args, timeout, None)
                .await
            {
                Ok(outcome) => outcome.is_success(),
                Err(e) => {
                    debug!("{} 求解器环境探测失败: {}", node.entity_description(), e);
                    false
                }
            };
            Some(ok)
        } else {
            None
        };

        let success = connection_ok && basic_commands_ok && solver_env_ok.unwrap_or(true);
        let detail = if success {
            None
        } else if !basic_commands_ok {
            Some("基础命令探测失败".to_string())
        } else {
            Some("求解器环境探测失败".to_string())
        };

        ProbeReport {
            connection_ok,
            basic_commands_ok,
            solver_env_ok,
            success,
            detail,
        }
    }

    /// 滞回核心：根据探测结果与阈值更新节点状态
    pub async fn update_status_after_check(
        &self,
        node_id: i64,
        report: &ProbeReport,
        failure_threshold: u32,
    ) -> SimschedResult<()> {
        let failures = {
            let mut records = self.records.lock().await;
            let record = records.entry(node_id).or_insert(NodeHealthRecord {
                consecutive_failures: 0,
                last_check_time: Utc::now(),
            });
            record.last_check_time = Utc::now();
            if report.success {
                record.consecutive_failures = 0;
            } else {
                record.consecutive_failures += 1;
            }
            record.consecutive_failures
        };

        let node = self
            .node_repo
            .find_by_id(node_id)
            .await?
            .ok_or_else(|| SimschedError::node_not_found(node_id))?;

        if report.success {
            match node.status {
                NodeStatus::Available => {
                    // 状态已正确，避免冗余写入与事件
                    debug!("{} 探测成功，状态保持可用", node.entity_description());
                }
                NodeStatus::Unavailable => {
                    self.node_repo
                        .update_status(node_id, NodeStatus::Available)
                        .await?;
                    info!("{} 从不可用状态恢复为可用", node.entity_description());
                    self.publish_status_change(&node, NodeStatus::Available, 0)
                        .await;
                }
            }
        } else if failures >= failure_threshold {
            match node.status {
                NodeStatus::Unavailable => {
                    debug!("{} 已处于不可用状态", node.entity_description());
                }
                NodeStatus::Available => {
                    self.node_repo
                        .update_status(node_id, NodeStatus::Unavailable)
                        .await?;
                    warn!(
                        "{} 连续失败 {} 次（阈值 {}），标记为不可用",
                        node.entity_description(),
                        failures,
                        failure_threshold
                    );
                    self.publish_status_change(&node, NodeStatus::Unavailable, failures)
                        .await;
                }
            }
        } else {
            // 未达阈值，状态不变：单次瞬时失败不会把健康节点标下线
            debug!(
                "{} 探测失败 ({}/{})，状态暂不变更",
                node.entity_description(),
                failures,
                failure_threshold
            );
        }

        Ok(())
    }

    /// 节点创建后的首次检查：阈值1，坏节点立即标记
    pub async fn perform_initial_check(&self, node_id: i64) -> SimschedResult<ProbeReport> {
        let node = self
            .node_repo
            .find_by_id(node_id)
            .await?
            .ok_or_else(|| SimschedError::node_not_found(node_id))?;

        info!("对 {} 执行创建后首次健康检查", node.entity_description());
        let report = self.probe_node(&node, &ProbeOptions::default()).await;
        self.update_status_after_check(node_id, &report, INITIAL_CHECK_THRESHOLD)
            .await?;
        Ok(report)
    }

    /// 批量巡检：按并发上限分批探测全部激活节点
    ///
    /// 返回的结果携带给自适应控制器的间隔建议：全部健康回到正常间隔；
    /// 最坏连续失败数≥3说明故障已稳定，放慢轮询；存在较轻失败则加快
    /// 轮询以尽早发现恢复。
    pub async fn run_sweep(&self) -> SimschedResult<TaskOutcome> {
        let nodes = self.node_repo.find_active().await?;
        if nodes.is_empty() {
            debug!("没有激活节点，跳过健康巡检");
            return Ok(TaskOutcome::success()
                .with_suggested_interval(self.config.normal_interval));
        }

        let mut failed_count = 0usize;
        let mut worst_streak = 0u32;

        let probe_options = ProbeOptions::default();
        for chunk in nodes.chunks(self.config.max_concurrent_checks.max(1)) {
            let probes = chunk
                .iter()
                .map(|node| self.probe_node(node, &probe_options));
            let reports = join_all(probes).await;

            for (node, report) in chunk.iter().zip(reports.iter()) {
                self.update_status_after_check(node.id, report, self.config.failure_threshold)
                    .await?;
                if !report.success {
                    failed_count += 1;
                }
                worst_streak = worst_streak.max(self.consecutive_failures(node.id).await);
            }
        }

        let suggested = if failed_count == 0 {
            self.config.normal_interval
        } else if worst_streak >= 3 {
            self.config.max_interval
        } else {
            self.config.min_interval
        };

        info!(
            "健康巡检完成: 检查 {} 个节点, 失败 {}, 最坏连续失败 {}",
            nodes.len(),
            failed_count,
            worst_streak
        );

        let metadata = serde_json::json!({
            "checked": nodes.len(),
            "failed": failed_count,
            "worst_failure_streak": worst_streak,
        });

        let outcome = if failed_count == 0 {
            TaskOutcome::success()
        } else {
            TaskOutcome::failure(format!("{failed_count} 个节点探测失败"))
        };
        Ok(outcome
            .with_suggested_interval(suggested)
            .with_metadata(metadata))
    }

    async fn publish_status_change(
        &self,
        node: &Node,
        status: NodeStatus,
        consecutive_failures: u32,
    ) {
        let event = NodeEvent::StatusChanged {
            id: Uuid::new_v4(),
            node_id: node.id,
            node_name: node.name.clone(),
            status,
            consecutive_failures,
            occurred_at: Utc::now(),
        };
        match serde_json::to_value(&event) {
            Ok(data) => {
                self.event_bus
                    .publish(channels::NODES, "NodeStatusChanged", data)
                    .await;
            }
            Err(e) => warn!("序列化节点事件失败: {}", e),
        }
    }
}

/// 挂到调度框架上的巡检任务
///
/// 巡检自身抛出的错误被转换为失败周期，并附带×3正常间隔的激进退避建议。
pub struct HealthSweepTask {
    monitor: Arc<NodeHealthMonitor>,
}

impl HealthSweepTask {
    pub fn new(monitor: Arc<NodeHealthMonitor>) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl ScheduledTask for HealthSweepTask {
    async fn execute(&self) -> SimschedResult<TaskOutcome> {
        match self.monitor.run_sweep().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!("健康巡检周期出错: {}", e);
                Ok(TaskOutcome::failure(e.to_string())
                    .with_suggested_interval(self.monitor.config.normal_interval * 3))
            }
        }
    }

    fn name(&self) -> &str {
        "node-health-sweep"
    }
}
