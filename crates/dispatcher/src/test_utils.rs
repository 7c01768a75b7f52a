//! 测试辅助
//!
//! 可脚本化的远程执行/文件搬运mock与实体构造器，供本crate的单元测试
//! 和 tests/ 下的集成测试共用。

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use simsched_core::{
    ExecOutcome, FileMover, OutputObserver, RemoteExecutor, RemoteTarget, SimschedError,
    SimschedResult,
};
use simsched_domain::entities::{Job, Node, User};

/// 记录的一次远程调用
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub target_key: String,
    pub command: String,
    pub args: Vec<String>,
}

/// 可脚本化的远程执行mock
///
/// 预置的响应按序弹出；脚本耗尽后返回默认响应（退出码0）。
#[derive(Default)]
pub struct MockRemoteExecutor {
    scripted: Mutex<VecDeque<SimschedResult<ExecOutcome>>>,
    calls: Mutex<Vec<RecordedCall>>,
    fail_all: AtomicBool,
}

impl MockRemoteExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一次成功响应
    pub async fn push_ok(&self, exit_code: i32, stdout: &str, stderr: &str) {
        self.scripted.lock().await.push_back(Ok(ExecOutcome {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }));
    }

    /// 预置一次错误响应
    pub async fn push_err(&self, error: SimschedError) {
        self.scripted.lock().await.push_back(Err(error));
    }

    /// 后续所有调用都失败（模拟节点不可达）
    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl RemoteExecutor for MockRemoteExecutor {
    async fn run(
        &self,
        target: &RemoteTarget,
        command: &str,
        args: &[String],
        _timeout: Duration,
        observer: Option<Arc<dyn OutputObserver>>,
    ) -> SimschedResult<ExecOutcome> {
        self.calls.lock().await.push(RecordedCall {
            target_key: target.key(),
            command: command.to_string(),
            args: args.to_vec(),
        });

        if self.fail_all.load(Ordering::SeqCst) {
            return Err(SimschedError::Network("节点不可达".to_string()));
        }

        let scripted = self.scripted.lock().await.pop_front();
        match scripted {
            Some(result) => {
                if let (Ok(outcome), Some(obs)) = (&result, &observer) {
                    for line in outcome.stdout.lines() {
                        obs.on_stdout_line(line);
                    }
                }
                result
            }
            None => Ok(ExecOutcome {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            }),
        }
    }
}

/// 记录的一次文件传输
#[derive(Debug, Clone)]
pub struct RecordedTransfer {
    pub target_key: String,
    pub source: String,
    pub destination: String,
}

/// 可配置失败的文件搬运mock
#[derive(Default)]
pub struct MockFileMover {
    pub sends: Mutex<Vec<RecordedTransfer>>,
    pub fetches: Mutex<Vec<RecordedTransfer>>,
    fail_sends: AtomicBool,
    fail_fetches: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MockFileMover {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.lock().await = Some(delay);
    }
}

#[async_trait]
impl FileMover for MockFileMover {
    async fn send(
        &self,
        target: &RemoteTarget,
        local_path: &Path,
        remote_path: &str,
    ) -> SimschedResult<()> {
        if let Some(delay) = *self.delay.lock().await {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SimschedError::transfer_error("发送失败: 连接被拒绝"));
        }
        self.sends.lock().await.push(RecordedTransfer {
            target_key: target.key(),
            source: local_path.to_string_lossy().to_string(),
            destination: remote_path.to_string(),
        });
        Ok(())
    }

    async fn fetch(
        &self,
        target: &RemoteTarget,
        remote_path: &str,
        local_path: &Path,
    ) -> SimschedResult<()> {
        if let Some(delay) = *self.delay.lock().await {
            tokio::time::sleep(delay).await;
        }
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(SimschedError::transfer_error("取回失败: 远程路径不存在"));
        }
        self.fetches.lock().await.push(RecordedTransfer {
            target_key: target.key(),
            source: remote_path.to_string(),
            destination: local_path.to_string_lossy().to_string(),
        });
        Ok(())
    }
}

/// 节点构造器
pub struct NodeBuilder {
    node: Node,
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self {
            node: Node::new(
                "node-1".to_string(),
                "host1".to_string(),
                22,
                "sim".to_string(),
                4,
                4,
            ),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.node.name = name.to_string();
        self
    }

    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.node.hostname = hostname.to_string();
        self
    }

    pub fn with_capacity(mut self, cpu_cores: i32, license_tokens: i32) -> Self {
        self.node.cpu_cores_limit = cpu_cores;
        self.node.license_token_limit = license_tokens;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.node.active = false;
        self
    }

    pub fn build(self) -> Node {
        self.node
    }
}

/// 用户构造器
pub struct UserBuilder {
    user: User,
}

impl Default for UserBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl UserBuilder {
    pub fn new() -> Self {
        Self {
            user: User::new("user-1".to_string(), 2),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.user.name = name.to_string();
        self
    }

    pub fn with_max_concurrent_jobs(mut self, limit: i32) -> Self {
        self.user.max_concurrent_jobs = limit;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.user.active = false;
        self
    }

    pub fn build(self) -> User {
        self.user
    }
}

/// 作业构造器
pub struct JobBuilder {
    job: Job,
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl JobBuilder {
    pub fn new() -> Self {
        Self {
            job: Job::new("job-1".to_string(), 1, 1, 2, 0),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.job.name = name.to_string();
        self
    }

    pub fn with_user(mut self, user_id: i64) -> Self {
        self.job.user_id = user_id;
        self
    }

    pub fn with_artifact(mut self, artifact_id: i64) -> Self {
        self.job.artifact_id = artifact_id;
        self
    }

    pub fn with_cpu_cores(mut self, cores: i32) -> Self {
        self.job.cpu_cores = cores;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.job.priority = priority;
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}
