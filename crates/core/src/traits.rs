//! 远程执行协作者抽象
//!
//! 编排核心只负责围绕这些接口做排序、重试与并发控制，不管理底层连接。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::SimschedResult;

/// 远程节点的连接目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub hostname: String,
    pub port: u16,
    pub username: String,
}

impl RemoteTarget {
    pub fn new(hostname: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            username: username.into(),
        }
    }

    /// 传输队列按此键值串行化
    pub fn key(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// 远程命令的执行结果
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutcome {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// 逐行输出观察者，用于流式转发远程命令的stdout
pub trait OutputObserver: Send + Sync {
    fn on_stdout_line(&self, line: &str);
}

/// 远程命令执行协作者
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// 在目标节点上执行命令，超时后视为失败
    async fn run(
        &self,
        target: &RemoteTarget,
        command: &str,
        args: &[String],
        timeout: Duration,
        observer: Option<Arc<dyn OutputObserver>>,
    ) -> SimschedResult<ExecOutcome>;
}

/// 文件搬运协作者（传输队列在其之上做按节点串行化）
#[async_trait]
pub trait FileMover: Send + Sync {
    /// 将本地文件发送到目标节点
    async fn send(
        &self,
        target: &RemoteTarget,
        local_path: &Path,
        remote_path: &str,
    ) -> SimschedResult<()>;

    /// 从目标节点取回文件到本地
    async fn fetch(
        &self,
        target: &RemoteTarget,
        remote_path: &str,
        local_path: &Path,
    ) -> SimschedResult<()>;
}
