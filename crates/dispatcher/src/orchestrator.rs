//! 作业生命周期编排
//!
//! 状态机 `Waiting → Starting → Running → {Completed | Failed}`，外加当
//! 输入文件丢失时从任意状态可达的终止态 `Missing`。转移单向，没有原地
//! 重试：失败的作业不会被自动重新提交。每次转移都向事件总线发布生命
//! 周期事件；在分发时申领的许可令牌在首次进入终止态时释放，且只释放
//! 一次。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use simsched_core::{OutputObserver, RemoteExecutor, SimschedError, SimschedResult};
use simsched_domain::entities::{
    Artifact, Job, JobStatus, Node, TransferDirection, TransferTask,
};
use simsched_domain::events::{JobEvent, NodeEvent};
use simsched_domain::repositories::{
    ArtifactRepository, JobRepository, NodeRepository,
};
use simsched_infrastructure::event_bus::{channels, EventBus};

use crate::allocator::ResourceAllocator;
use crate::runner::{ScheduledTask, TaskOutcome};
use crate::transfer_queue::FileTransferQueue;

/// 求解器输出中的进度信号行
///
/// 仅作为进度提示记录，完成与否严格以命令退出码为准。
pub const ANALYSIS_COMPLETE_MARKER: &str = "Analysis complete";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// 远程节点上的作业工作目录根
    pub remote_work_root: String,
    /// 本地结果文件存放目录
    pub local_result_root: PathBuf,
    /// 远程求解器命令
    pub solver_command: String,
    /// 单个作业远程执行的超时
    pub exec_timeout: Duration,
    /// 全局在途作业上限（Starting + Running）
    pub max_concurrent_jobs: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            remote_work_root: "/var/lib/simsched/jobs".to_string(),
            local_result_root: PathBuf::from("/var/lib/simsched/results"),
            solver_command: "simsolver".to_string(),
            exec_timeout: Duration::from_secs(86_400),
            max_concurrent_jobs: 100,
        }
    }
}

/// 作业提交请求
#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub name: String,
    pub user_id: i64,
    pub artifact_id: i64,
    pub cpu_cores: i32,
    pub priority: i32,
}

pub struct JobOrchestrator {
    job_repo: Arc<dyn JobRepository>,
    node_repo: Arc<dyn NodeRepository>,
    artifact_repo: Arc<dyn ArtifactRepository>,
    allocator: Arc<ResourceAllocator>,
    transfer_queue: Arc<FileTransferQueue>,
    executor: Arc<dyn RemoteExecutor>,
    file_mover: Arc<dyn simsched_core::FileMover>,
    event_bus: Arc<EventBus>,
    config: OrchestratorConfig,
}

impl JobOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        node_repo: Arc<dyn NodeRepository>,
        artifact_repo: Arc<dyn ArtifactRepository>,
        allocator: Arc<ResourceAllocator>,
        transfer_queue: Arc<FileTransferQueue>,
        executor: Arc<dyn RemoteExecutor>,
        file_mover: Arc<dyn simsched_core::FileMover>,
        event_bus: Arc<EventBus>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            job_repo,
            node_repo,
            artifact_repo,
            allocator,
            transfer_queue,
            executor,
            file_mover,
            event_bus,
            config,
        }
    }

    /// 提交作业：准入通过后才创建作业行
    ///
    /// 被拒绝时同步返回准入错误，不产生任何副作用。许可令牌在这里只做
    /// 咨询性检查，分发时以原子的 try_claim 为准。
    pub async fn submit_job(&self, submission: JobSubmission) -> SimschedResult<Job> {
        if submission.cpu_cores < 1 {
            return Err(SimschedError::validation_error(format!(
                "核数必须至少为1: {}",
                submission.cpu_cores
            )));
        }

        if let Err(e) = self.allocator.can_admit_job(submission.user_id).await {
            self.publish_admission_rejected(submission.user_id, &e).await;
            return Err(e);
        }

        if !self
            .allocator
            .has_available_tokens(submission.cpu_cores)
            .await
        {
            let e = SimschedError::admission_denied(format!(
                "许可令牌不足: 需要 {} 可用 {}",
                submission.cpu_cores,
                self.allocator.available_tokens().await
            ));
            self.publish_admission_rejected(submission.user_id, &e).await;
            return Err(e);
        }

        self.artifact_repo
            .find_by_id(submission.artifact_id)
            .await?
            .ok_or_else(|| {
                SimschedError::ArtifactMissing(format!(
                    "输入文件 {} 不存在",
                    submission.artifact_id
                ))
            })?;

        let job = self
            .job_repo
            .create(&Job::new(
                submission.name,
                submission.user_id,
                submission.artifact_id,
                submission.cpu_cores,
                submission.priority,
            ))
            .await?;

        info!("{} 已创建，进入等待队列", job.entity_description());
        self.publish_job_event(&job).await;
        Ok(job)
    }

    /// 扫描等待队列并尝试分发（由调度框架周期驱动）
    ///
    /// 高优先级先出，同优先级内按创建时间先进先出。分发不到节点或令牌
    /// 不足的作业保持等待，留待下一轮。
    pub async fn dispatch_waiting_jobs(self: Arc<Self>) -> SimschedResult<TaskOutcome> {
        let mut waiting = self.job_repo.find_by_status(JobStatus::Waiting).await?;
        if waiting.is_empty() {
            return Ok(TaskOutcome::success());
        }
        waiting.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });

        let mut in_flight = self.count_dispatched().await?;
        let mut dispatched = 0usize;

        for job in waiting {
            if in_flight >= self.config.max_concurrent_jobs {
                debug!("全局在途作业数已达上限 {}，本轮停止分发", self.config.max_concurrent_jobs);
                break;
            }

            // 输入文件在任何阶段丢失都使作业进入Missing终止态
            let artifact = match self.artifact_repo.find_by_id(job.artifact_id).await? {
                Some(artifact) => artifact,
                None => {
                    warn!("{} 的输入文件 {} 已不存在", job.entity_description(), job.artifact_id);
                    self.finish_job(
                        job.id,
                        JobStatus::Missing,
                        Some(format!("输入文件 {} 无法定位", job.artifact_id)),
                    )
                    .await?;
                    continue;
                }
            };

            let Some(node) = self.select_node(&job).await? else {
                debug!("{} 暂无可用节点，保持等待", job.entity_description());
                continue;
            };

            // 可用性检查与申领在同一把锁下完成，并发分发不会超卖令牌
            if !self.allocator.try_claim(job.id, job.required_tokens()).await {
                debug!("{} 令牌不足，保持等待", job.entity_description());
                continue;
            }

            self.job_repo.assign_node(job.id, node.id).await?;
            self.job_repo
                .update_status(job.id, JobStatus::Starting, None)
                .await?;
            info!(
                "{} 分发到 {}",
                job.entity_description(),
                node.entity_description()
            );
            if let Some(updated) = self.job_repo.find_by_id(job.id).await? {
                self.publish_job_event(&updated).await;
            }

            let orchestrator = Arc::clone(&self);
            tokio::spawn(async move {
                orchestrator.run_job(job.id, node, artifact).await;
            });

            in_flight += 1;
            dispatched += 1;
        }

        Ok(TaskOutcome::success()
            .with_metadata(serde_json::json!({ "dispatched": dispatched })))
    }

    /// 执行单个已分发的作业：传出 → 执行 → 取回，阶段严格串行
    async fn run_job(self: Arc<Self>, job_id: i64, node: Node, artifact: Artifact) {
        if let Err(e) = self.run_job_phases(job_id, &node, &artifact).await {
            // run_job_phases 内部已对已知失败路径做了终止转移；
            // 走到这里的是仓储层面的意外错误
            error!("作业 {} 编排出错: {}", job_id, e);
            if let Err(e2) = self
                .finish_job(job_id, JobStatus::Failed, Some(e.to_string()))
                .await
            {
                error!("作业 {} 标记失败时出错: {}", job_id, e2);
            }
        }
    }

    async fn run_job_phases(
        &self,
        job_id: i64,
        node: &Node,
        artifact: &Artifact,
    ) -> SimschedResult<()> {
        let job = self
            .job_repo
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| SimschedError::job_not_found(job_id))?;
        let target = node.target();
        let remote_dir = format!("{}/job-{}", self.config.remote_work_root, job.id);
        let remote_input = format!("{}/{}", remote_dir, artifact.file_name);

        // 阶段1：传出输入文件。失败则直接进入Failed，不会到达Running
        if let Err(e) = self
            .executor
            .run(
                &target,
                "mkdir",
                &["-p".to_string(), remote_dir.clone()],
                Duration::from_secs(30),
                None,
            )
            .await
        {
            self.finish_job(
                job.id,
                JobStatus::Failed,
                Some(format!("输入文件传输失败: 无法创建远程目录: {e}")),
            )
            .await?;
            return Ok(());
        }

        let send_task = TransferTask::new(
            TransferDirection::Send,
            artifact.local_path.clone(),
            remote_input.clone(),
            node.transfer_key(),
            job.priority,
        );
        let local_input = PathBuf::from(&artifact.local_path);
        let send_result = self
            .transfer_queue
            .enqueue(&send_task, async {
                self.file_mover.send(&target, &local_input, &remote_input).await
            })
            .await;
        if let Err(e) = send_result {
            self.finish_job(
                job.id,
                JobStatus::Failed,
                Some(format!("输入文件传输失败: {e}")),
            )
            .await?;
            return Ok(());
        }

        // 阶段2：远程执行
        self.job_repo
            .update_status(job.id, JobStatus::Running, None)
            .await?;
        if let Some(updated) = self.job_repo.find_by_id(job.id).await? {
            self.publish_job_event(&updated).await;
        }

        let observer: Arc<dyn OutputObserver> = Arc::new(CompletionMarkerObserver {
            job_id: job.id,
            job_name: job.name.clone(),
        });
        let exec_args = vec![
            "-dir".to_string(),
            remote_dir.clone(),
            "-input".to_string(),
            artifact.file_name.clone(),
            "-job".to_string(),
            job.name.clone(),
            "-np".to_string(),
            job.cpu_cores.to_string(),
        ];
        let outcome = match self
            .executor
            .run(
                &target,
                &self.config.solver_command,
                &exec_args,
                self.config.exec_timeout,
                Some(observer),
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.finish_job(
                    job.id,
                    JobStatus::Failed,
                    Some(format!("求解器执行出错: {e}")),
                )
                .await?;
                return Ok(());
            }
        };

        // 完成与否严格以退出码为准，输出中的进度信号不作数
        if !outcome.is_success() {
            self.finish_job(
                job.id,
                JobStatus::Failed,
                Some(format!(
                    "求解器退出码 {}: {}",
                    outcome.exit_code,
                    outcome.stderr.trim()
                )),
            )
            .await?;
            return Ok(());
        }

        // 阶段3：取回结果。失败同样终止，但错误信息要与执行阶段可区分
        let remote_result = format!("{}/{}.out", remote_dir, job.name);
        let local_result = self
            .config
            .local_result_root
            .join(format!("job-{}-{}.out", job.id, job.name));
        let fetch_task = TransferTask::new(
            TransferDirection::Receive,
            remote_result.clone(),
            local_result.to_string_lossy().to_string(),
            node.transfer_key(),
            job.priority,
        );
        let fetch_result = self
            .transfer_queue
            .enqueue(&fetch_task, async {
                self.file_mover.fetch(&target, &remote_result, &local_result).await
            })
            .await;
        if let Err(e) = fetch_result {
            self.finish_job(
                job.id,
                JobStatus::Failed,
                Some(format!("计算已完成但结果取回失败: {e}")),
            )
            .await?;
            return Ok(());
        }

        if let Some(mut done) = self.job_repo.find_by_id(job.id).await? {
            done.result_path = Some(local_result.to_string_lossy().to_string());
            self.job_repo.update(&done).await?;
        }
        self.finish_job(job.id, JobStatus::Completed, None).await?;
        Ok(())
    }

    /// 终止转移：状态写入、令牌释放（幂等）、事件发布
    async fn finish_job(
        &self,
        job_id: i64,
        status: JobStatus,
        error_message: Option<String>,
    ) -> SimschedResult<()> {
        self.job_repo
            .update_status(job_id, status, error_message.clone())
            .await?;
        self.allocator.release(job_id).await;

        match self.job_repo.find_by_id(job_id).await? {
            Some(job) => {
                match status {
                    JobStatus::Completed => {
                        info!("{} 已完成", job.entity_description());
                    }
                    _ => {
                        warn!(
                            "{} 进入终止态 {:?}: {}",
                            job.entity_description(),
                            status,
                            error_message.as_deref().unwrap_or("无详情")
                        );
                    }
                }
                self.publish_job_event(&job).await;
            }
            None => {
                warn!("作业 {} 终止转移后已不存在", job_id);
            }
        }
        Ok(())
    }

    /// 输入文件丢失时把作业标记为Missing（从任意状态可达）
    pub async fn mark_missing(&self, job_id: i64) -> SimschedResult<()> {
        let job = self
            .job_repo
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| SimschedError::job_not_found(job_id))?;
        self.finish_job(
            job.id,
            JobStatus::Missing,
            Some(format!("输入文件 {} 无法定位", job.artifact_id)),
        )
        .await
    }

    /// 注册新节点并发布事件（首次健康检查由调用方驱动）
    pub async fn register_node(&self, node: &Node) -> SimschedResult<Node> {
        let created = self.node_repo.create(node).await?;
        info!("{} 已注册", created.entity_description());
        self.publish_node_event(&NodeEvent::Registered {
            id: Uuid::new_v4(),
            node_id: created.id,
            node_name: created.name.clone(),
            occurred_at: Utc::now(),
        })
        .await;
        Ok(created)
    }

    /// 删除节点：仍被非终止作业引用时拒绝
    pub async fn remove_node(&self, node_id: i64) -> SimschedResult<()> {
        if self.job_repo.any_referencing_node(node_id).await? {
            return Err(SimschedError::NodeBusy { id: node_id });
        }
        if !self.node_repo.delete(node_id).await? {
            return Err(SimschedError::node_not_found(node_id));
        }
        info!("节点 {} 已删除", node_id);
        self.publish_node_event(&NodeEvent::Removed {
            id: Uuid::new_v4(),
            node_id,
            occurred_at: Utc::now(),
        })
        .await;
        Ok(())
    }

    /// 选择可用且剩余核数足够的节点
    async fn select_node(&self, job: &Job) -> SimschedResult<Option<Node>> {
        let nodes = self.node_repo.find_active().await?;
        let jobs = self.job_repo.find_all().await?;

        for node in nodes {
            if !node.is_available() || node.cpu_cores_limit < job.cpu_cores {
                continue;
            }
            let used: i32 = jobs
                .iter()
                .filter(|j| j.node_id == Some(node.id) && j.status.holds_assignment())
                .map(|j| j.cpu_cores)
                .sum();
            if node.cpu_cores_limit - used >= job.cpu_cores {
                return Ok(Some(node));
            }
        }
        Ok(None)
    }

    async fn count_dispatched(&self) -> SimschedResult<usize> {
        let starting = self.job_repo.find_by_status(JobStatus::Starting).await?;
        let running = self.job_repo.find_by_status(JobStatus::Running).await?;
        Ok(starting.len() + running.len())
    }

    async fn publish_job_event(&self, job: &Job) {
        let event = JobEvent::StatusChanged {
            id: Uuid::new_v4(),
            job_id: job.id,
            job_name: job.name.clone(),
            status: job.status,
            node_id: job.node_id,
            user_id: job.user_id,
            cpu_cores: job.cpu_cores,
            priority: job.priority,
            artifact_id: job.artifact_id,
            occurred_at: Utc::now(),
        };
        match serde_json::to_value(&event) {
            Ok(data) => {
                self.event_bus
                    .publish(channels::JOBS, "JobStatusChanged", data)
                    .await;
            }
            Err(e) => warn!("序列化作业事件失败: {}", e),
        }
    }

    async fn publish_admission_rejected(&self, user_id: i64, error: &SimschedError) {
        let event = JobEvent::AdmissionRejected {
            id: Uuid::new_v4(),
            user_id,
            reason: error.to_string(),
            occurred_at: Utc::now(),
        };
        match serde_json::to_value(&event) {
            Ok(data) => {
                self.event_bus
                    .publish(channels::JOBS, "JobAdmissionRejected", data)
                    .await;
            }
            Err(e) => warn!("序列化作业事件失败: {}", e),
        }
    }

    async fn publish_node_event(&self, event: &NodeEvent) {
        use simsched_domain::events::DomainEvent;
        match serde_json::to_value(event) {
            Ok(data) => {
                self.event_bus
                    .publish(channels::NODES, event.event_type(), data)
                    .await;
            }
            Err(e) => warn!("序列化节点事件失败: {}", e),
        }
    }
}

/// 求解器输出观察者：识别进度信号行
struct CompletionMarkerObserver {
    job_id: i64,
    job_name: String,
}

impl OutputObserver for CompletionMarkerObserver {
    fn on_stdout_line(&self, line: &str) {
        if line.contains(ANALYSIS_COMPLETE_MARKER) {
            info!("作业 '{}' ({}) 报告分析完成信号", self.job_name, self.job_id);
        } else {
            debug!("作业 {} 输出: {}", self.job_id, line);
        }
    }
}

/// 挂到调度框架上的分发循环任务
pub struct DispatchLoopTask {
    orchestrator: Arc<JobOrchestrator>,
}

impl DispatchLoopTask {
    pub fn new(orchestrator: Arc<JobOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl ScheduledTask for DispatchLoopTask {
    async fn execute(&self) -> SimschedResult<TaskOutcome> {
        Arc::clone(&self.orchestrator).dispatch_waiting_jobs().await
    }

    fn name(&self) -> &str {
        "job-dispatch"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        JobBuilder, MockFileMover, MockRemoteExecutor, NodeBuilder, UserBuilder,
    };
    use simsched_domain::repositories::UserRepository;
    use simsched_infrastructure::memory::{
        InMemoryArtifactRepository, InMemoryJobRepository, InMemoryNodeRepository,
        InMemoryUserRepository,
    };

    struct Fixture {
        orchestrator: Arc<JobOrchestrator>,
        job_repo: Arc<InMemoryJobRepository>,
        node_repo: Arc<InMemoryNodeRepository>,
        executor: Arc<MockRemoteExecutor>,
        mover: Arc<MockFileMover>,
        allocator: Arc<ResourceAllocator>,
        user_id: i64,
        artifact_id: i64,
    }

    async fn fixture(total_tokens: i32, user_limit: i32) -> Fixture {
        let job_repo = Arc::new(InMemoryJobRepository::new());
        let node_repo = Arc::new(InMemoryNodeRepository::new());
        let user_repo = Arc::new(InMemoryUserRepository::new());
        let artifact_repo = Arc::new(InMemoryArtifactRepository::new());
        let executor = Arc::new(MockRemoteExecutor::new());
        let mover = Arc::new(MockFileMover::new());
        let bus = Arc::new(EventBus::new());

        let user = user_repo
            .create(&UserBuilder::new().with_max_concurrent_jobs(user_limit).build())
            .await
            .unwrap();
        let artifact = artifact_repo
            .create(&Artifact::new(
                "model.inp".to_string(),
                "/tmp/model.inp".to_string(),
                user.id,
            ))
            .await
            .unwrap();

        let allocator = Arc::new(ResourceAllocator::new(
            user_repo.clone(),
            job_repo.clone(),
            total_tokens,
        ));

        let orchestrator = Arc::new(JobOrchestrator::new(
            job_repo.clone(),
            node_repo.clone(),
            artifact_repo,
            allocator.clone(),
            Arc::new(FileTransferQueue::new()),
            executor.clone(),
            mover.clone(),
            bus,
            OrchestratorConfig {
                exec_timeout: Duration::from_secs(5),
                ..OrchestratorConfig::default()
            },
        ));

        Fixture {
            orchestrator,
            job_repo,
            node_repo,
            executor,
            mover,
            allocator,
            user_id: user.id,
            artifact_id: artifact.id,
        }
    }

    fn submission(f: &Fixture, name: &str, cores: i32) -> JobSubmission {
        JobSubmission {
            name: name.to_string(),
            user_id: f.user_id,
            artifact_id: f.artifact_id,
            cpu_cores: cores,
            priority: 0,
        }
    }

    async fn wait_for_terminal(job_repo: &InMemoryJobRepository, job_id: i64) -> Job {
        for _ in 0..200 {
            let job = job_repo.find_by_id(job_id).await.unwrap().unwrap();
            if job.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("作业 {} 未在预期时间内终止", job_id);
    }

    #[tokio::test]
    async fn test_rejected_submission_creates_no_row() {
        let f = fixture(10, 1).await;

        f.orchestrator
            .submit_job(submission(&f, "j1", 2))
            .await
            .unwrap();
        // 用户并发上限为1，第二个提交被拒绝且不留行
        let err = f
            .orchestrator
            .submit_job(submission(&f, "j2", 2))
            .await
            .unwrap_err();
        assert!(matches!(err, SimschedError::AdmissionDenied(_)));
        assert_eq!(f.job_repo.find_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_job_completes_on_zero_exit() {
        let f = fixture(10, 5).await;
        f.node_repo
            .create(&NodeBuilder::new().build())
            .await
            .unwrap();

        let job = f
            .orchestrator
            .submit_job(submission(&f, "j1", 2))
            .await
            .unwrap();
        // mkdir成功、求解器退出码0
        f.executor.push_ok(0, "", "").await;
        f.executor
            .push_ok(0, "step 1\nAnalysis complete\n", "")
            .await;

        Arc::clone(&f.orchestrator).dispatch_waiting_jobs().await.unwrap();
        let done = wait_for_terminal(&f.job_repo, job.id).await;

        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.result_path.is_some());
        assert_eq!(f.mover.sends.lock().await.len(), 1);
        assert_eq!(f.mover.fetches.lock().await.len(), 1);
        assert_eq!(f.allocator.claimed_tokens().await, 0);
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails_with_stderr() {
        let f = fixture(10, 5).await;
        f.node_repo
            .create(&NodeBuilder::new().build())
            .await
            .unwrap();

        let job = f
            .orchestrator
            .submit_job(submission(&f, "j1", 2))
            .await
            .unwrap();
        f.executor.push_ok(0, "", "").await;
        f.executor.push_ok(2, "", "license checkout failed").await;

        Arc::clone(&f.orchestrator).dispatch_waiting_jobs().await.unwrap();
        let done = wait_for_terminal(&f.job_repo, job.id).await;

        assert_eq!(done.status, JobStatus::Failed);
        let message = done.error_message.unwrap();
        assert!(message.contains("退出码 2"));
        assert!(message.contains("license checkout failed"));
        assert_eq!(f.allocator.claimed_tokens().await, 0);
    }

    #[tokio::test]
    async fn test_transfer_failure_never_reaches_running() {
        let f = fixture(10, 5).await;
        f.node_repo
            .create(&NodeBuilder::new().build())
            .await
            .unwrap();
        f.mover.set_fail_sends(true);

        let job = f
            .orchestrator
            .submit_job(submission(&f, "j1", 2))
            .await
            .unwrap();
        Arc::clone(&f.orchestrator).dispatch_waiting_jobs().await.unwrap();
        let done = wait_for_terminal(&f.job_repo, job.id).await;

        assert_eq!(done.status, JobStatus::Failed);
        assert!(done.error_message.unwrap().contains("输入文件传输失败"));
        // 从未进入Running
        assert!(done.started_at.is_none());
        assert_eq!(f.allocator.claimed_tokens().await, 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_distinguished_from_execution() {
        let f = fixture(10, 5).await;
        f.node_repo
            .create(&NodeBuilder::new().build())
            .await
            .unwrap();
        f.mover.set_fail_fetches(true);

        let job = f
            .orchestrator
            .submit_job(submission(&f, "j1", 2))
            .await
            .unwrap();
        Arc::clone(&f.orchestrator).dispatch_waiting_jobs().await.unwrap();
        let done = wait_for_terminal(&f.job_repo, job.id).await;

        assert_eq!(done.status, JobStatus::Failed);
        assert!(done.error_message.unwrap().contains("结果取回失败"));
    }

    #[tokio::test]
    async fn test_priority_order_fifo_within_equal() {
        let f = fixture(2, 10).await;
        f.node_repo
            .create(&NodeBuilder::new().with_capacity(2, 2).build())
            .await
            .unwrap();

        let low = f
            .orchestrator
            .submit_job(JobSubmission {
                priority: 0,
                ..submission(&f, "low", 2)
            })
            .await
            .unwrap();
        let high = f
            .orchestrator
            .submit_job(JobSubmission {
                priority: 5,
                ..submission(&f, "high", 2)
            })
            .await
            .unwrap();

        // 节点与令牌都只够一个作业，高优先级先拿到
        Arc::clone(&f.orchestrator).dispatch_waiting_jobs().await.unwrap();
        let high_row = f.job_repo.find_by_id(high.id).await.unwrap().unwrap();
        let low_row = f.job_repo.find_by_id(low.id).await.unwrap().unwrap();
        assert_ne!(high_row.status, JobStatus::Waiting);
        assert_eq!(low_row.status, JobStatus::Waiting);
    }

    #[tokio::test]
    async fn test_missing_artifact_terminates_job() {
        let f = fixture(10, 5).await;
        f.node_repo
            .create(&NodeBuilder::new().build())
            .await
            .unwrap();

        let orphan = f
            .job_repo
            .create(&JobBuilder::new().with_user(f.user_id).with_artifact(999).build())
            .await
            .unwrap();
        Arc::clone(&f.orchestrator).dispatch_waiting_jobs().await.unwrap();

        let row = f.job_repo.find_by_id(orphan.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Missing);
    }

    #[tokio::test]
    async fn test_remove_node_refused_while_referenced() {
        let f = fixture(10, 5).await;
        let node = f
            .node_repo
            .create(&NodeBuilder::new().build())
            .await
            .unwrap();

        let job = f
            .job_repo
            .create(&JobBuilder::new().with_user(f.user_id).build())
            .await
            .unwrap();
        f.job_repo.assign_node(job.id, node.id).await.unwrap();
        f.job_repo
            .update_status(job.id, JobStatus::Running, None)
            .await
            .unwrap();

        let err = f.orchestrator.remove_node(node.id).await.unwrap_err();
        assert!(matches!(err, SimschedError::NodeBusy { .. }));

        f.job_repo
            .update_status(job.id, JobStatus::Completed, None)
            .await
            .unwrap();
        f.orchestrator.remove_node(node.id).await.unwrap();
        assert!(f.node_repo.find_by_id(node.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insufficient_tokens_keeps_job_waiting() {
        let f = fixture(1, 5).await;
        f.node_repo
            .create(&NodeBuilder::new().build())
            .await
            .unwrap();

        // 令牌池总量1，但作业需要… 提交时咨询性检查就会拒绝
        let err = f
            .orchestrator
            .submit_job(submission(&f, "big", 2))
            .await
            .unwrap_err();
        assert!(matches!(err, SimschedError::AdmissionDenied(_)));
        assert!(f.job_repo.find_all().await.unwrap().is_empty());
    }
}
