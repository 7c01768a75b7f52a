//! 端到端场景测试
//!
//! 在内存仓储与mock远程协作者之上跑通完整的作业生命周期与健康监控。

use std::sync::Arc;
use std::time::Duration;

use simsched_core::SimschedError;
use simsched_dispatcher::health_monitor::{HealthMonitorConfig, ProbeOptions};
use simsched_dispatcher::test_utils::{MockFileMover, MockRemoteExecutor, NodeBuilder, UserBuilder};
use simsched_dispatcher::{
    FileTransferQueue, JobOrchestrator, JobSubmission, NodeHealthMonitor, OrchestratorConfig,
    ResourceAllocator,
};
use simsched_domain::entities::{Artifact, JobStatus, NodeStatus};
use simsched_domain::repositories::{
    ArtifactRepository, JobRepository, NodeRepository, UserRepository,
};
use simsched_infrastructure::event_bus::{channels, EventBus};
use simsched_infrastructure::memory::{
    InMemoryArtifactRepository, InMemoryJobRepository, InMemoryNodeRepository,
    InMemoryUserRepository,
};

struct Harness {
    orchestrator: Arc<JobOrchestrator>,
    monitor: Arc<NodeHealthMonitor>,
    job_repo: Arc<InMemoryJobRepository>,
    node_repo: Arc<InMemoryNodeRepository>,
    executor: Arc<MockRemoteExecutor>,
    mover: Arc<MockFileMover>,
    allocator: Arc<ResourceAllocator>,
    bus: Arc<EventBus>,
    user_id: i64,
    artifact_id: i64,
    _results_dir: tempfile::TempDir,
}

async fn harness(total_tokens: i32, user_limit: i32) -> Harness {
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
        user_repo,
        job_repo.clone(),
        total_tokens,
    ));
    let results_dir = tempfile::tempdir().unwrap();
    let orchestrator = Arc::new(JobOrchestrator::new(
        job_repo.clone(),
        node_repo.clone(),
        artifact_repo,
        allocator.clone(),
        Arc::new(FileTransferQueue::new()),
        executor.clone(),
        mover.clone(),
        bus.clone(),
        OrchestratorConfig {
            exec_timeout: Duration::from_secs(5),
            local_result_root: results_dir.path().to_path_buf(),
            ..OrchestratorConfig::default()
        },
    ));
    let monitor = Arc::new(NodeHealthMonitor::new(
        node_repo.clone(),
        executor.clone(),
        bus.clone(),
        HealthMonitorConfig::default(),
    ));

    Harness {
        orchestrator,
        monitor,
        job_repo,
        node_repo,
        executor,
        mover,
        allocator,
        bus,
        user_id: user.id,
        artifact_id: artifact.id,
        _results_dir: results_dir,
    }
}

fn submission(h: &Harness, name: &str, cores: i32) -> JobSubmission {
    JobSubmission {
        name: name.to_string(),
        user_id: h.user_id,
        artifact_id: h.artifact_id,
        cpu_cores: cores,
        priority: 0,
    }
}

async fn wait_for_status(h: &Harness, job_id: i64, status: JobStatus) {
    for _ in 0..200 {
        let job = h.job_repo.find_by_id(job_id).await.unwrap().unwrap();
        if job.status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("作业 {} 未达到状态 {:?}", job_id, status);
}

/// W1 (4核/4令牌)、U1 (上限1)：J1 准入并完成；J1 在途时 J2 被拒绝；
/// 完成后单次探测失败（阈值3）不改变 W1 的可用状态。
#[tokio::test]
async fn test_full_lifecycle_with_health_check() {
    let h = harness(4, 1).await;
    let node = h
        .node_repo
        .create(&NodeBuilder::new().with_capacity(4, 4).build())
        .await
        .unwrap();

    // 传输放慢，保证J2提交时J1仍在途
    h.mover.set_delay(Duration::from_millis(100)).await;

    let j1 = h
        .orchestrator
        .submit_job(submission(&h, "J1", 2))
        .await
        .unwrap();
    Arc::clone(&h.orchestrator)
        .dispatch_waiting_jobs()
        .await
        .unwrap();

    let j2_err = h
        .orchestrator
        .submit_job(submission(&h, "J2", 2))
        .await
        .unwrap_err();
    assert!(matches!(j2_err, SimschedError::AdmissionDenied(_)));

    wait_for_status(&h, j1.id, JobStatus::Completed).await;
    let done = h.job_repo.find_by_id(j1.id).await.unwrap().unwrap();
    assert_eq!(done.node_id, Some(node.id));
    assert_eq!(h.allocator.claimed_tokens().await, 0);

    // 单次探测失败未达滞回阈值，节点保持可用
    h.executor.set_fail_all(true);
    let stored = h.node_repo.find_by_id(node.id).await.unwrap().unwrap();
    let report = h.monitor.probe_node(&stored, &ProbeOptions::default()).await;
    assert!(!report.success);
    h.monitor
        .update_status_after_check(node.id, &report, 3)
        .await
        .unwrap();
    let after = h.node_repo.find_by_id(node.id).await.unwrap().unwrap();
    assert_eq!(after.status, NodeStatus::Available);
}

/// 生命周期事件按序到达订阅者
#[tokio::test]
async fn test_lifecycle_events_published_in_order() {
    let h = harness(8, 5).await;
    h.node_repo
        .create(&NodeBuilder::new().build())
        .await
        .unwrap();
    let mut rx = h.bus.subscribe(channels::JOBS).await;

    let job = h
        .orchestrator
        .submit_job(submission(&h, "J1", 2))
        .await
        .unwrap();
    Arc::clone(&h.orchestrator)
        .dispatch_waiting_jobs()
        .await
        .unwrap();
    wait_for_status(&h, job.id, JobStatus::Completed).await;

    let mut statuses = Vec::new();
    for _ in 0..4 {
        let envelope = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("事件未在超时内到达")
            .expect("事件频道已关闭");
        assert_eq!(envelope.event_type, "JobStatusChanged");
        let status = envelope.data["StatusChanged"]["status"]
            .as_str()
            .map(|s| s.to_string());
        statuses.push(status.unwrap());
    }
    assert_eq!(statuses, vec!["WAITING", "STARTING", "RUNNING", "COMPLETED"]);
}

/// 并发分发不超卖令牌池；全部终止后申领归零
#[tokio::test]
async fn test_license_conservation_under_concurrent_dispatch() {
    let h = harness(4, 10).await;
    h.node_repo
        .create(&NodeBuilder::new().with_name("w1").with_capacity(8, 8).build())
        .await
        .unwrap();
    h.node_repo
        .create(&NodeBuilder::new()
            .with_name("w2")
            .with_hostname("host2")
            .with_capacity(8, 8)
            .build())
        .await
        .unwrap();

    let mut ids = Vec::new();
    for i in 0..4 {
        let job = h
            .orchestrator
            .submit_job(submission(&h, &format!("J{i}"), 2))
            .await
            .unwrap();
        ids.push(job.id);
    }

    Arc::clone(&h.orchestrator)
        .dispatch_waiting_jobs()
        .await
        .unwrap();
    // 令牌池只容得下2个双核作业，其余保持等待
    assert!(h.allocator.claimed_tokens().await <= h.allocator.total_tokens());

    for id in &ids {
        let job = h.job_repo.find_by_id(*id).await.unwrap().unwrap();
        if job.status == JobStatus::Waiting {
            continue;
        }
        wait_for_status(&h, *id, JobStatus::Completed).await;
    }
    // 第二轮把剩下的分发完
    Arc::clone(&h.orchestrator)
        .dispatch_waiting_jobs()
        .await
        .unwrap();
    for id in &ids {
        wait_for_status(&h, *id, JobStatus::Completed).await;
    }
    assert_eq!(h.allocator.claimed_tokens().await, 0);
}

/// 同节点传输串行且跨作业不互相破坏
#[tokio::test]
async fn test_concurrent_jobs_on_same_node_serialize_transfers() {
    let h = harness(8, 10).await;
    h.node_repo
        .create(&NodeBuilder::new().with_capacity(8, 8).build())
        .await
        .unwrap();
    h.mover.set_delay(Duration::from_millis(20)).await;

    let mut ids = Vec::new();
    for i in 0..3 {
        let job = h
            .orchestrator
            .submit_job(submission(&h, &format!("J{i}"), 2))
            .await
            .unwrap();
        ids.push(job.id);
    }
    Arc::clone(&h.orchestrator)
        .dispatch_waiting_jobs()
        .await
        .unwrap();

    for id in ids {
        wait_for_status(&h, id, JobStatus::Completed).await;
    }
    assert_eq!(h.mover.sends.lock().await.len(), 3);
    assert_eq!(h.mover.fetches.lock().await.len(), 3);
}
