//! SSH/SCP 远程执行协作者
//!
//! 基于子进程的 `RemoteExecutor` / `FileMover` 实现。编排核心只把它们
//! 当作带超时的函数调用，不管理底层连接。

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use simsched_core::{
    ExecOutcome, FileMover, OutputObserver, RemoteExecutor, RemoteTarget, SimschedError,
    SimschedResult,
};

/// SSH命令执行器
pub struct SshRemoteExecutor {
    ssh_binary: String,
}

impl Default for SshRemoteExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl SshRemoteExecutor {
    pub fn new() -> Self {
        Self {
            ssh_binary: "ssh".to_string(),
        }
    }

    pub fn with_binary(ssh_binary: impl Into<String>) -> Self {
        Self {
            ssh_binary: ssh_binary.into(),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshRemoteExecutor {
    async fn run(
        &self,
        target: &RemoteTarget,
        command: &str,
        args: &[String],
        timeout: Duration,
        observer: Option<Arc<dyn OutputObserver>>,
    ) -> SimschedResult<ExecOutcome> {
        let mut cmd = Command::new(&self.ssh_binary);
        cmd.arg("-p")
            .arg(target.port.to_string())
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(format!("{}@{}", target.username, target.hostname))
            .arg(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!(
            "远程执行: {}@{}:{} {} {:?}",
            target.username, target.hostname, target.port, command, args
        );

        let mut child = cmd
            .spawn()
            .map_err(|e| SimschedError::RemoteExecution(format!("启动ssh进程失败: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SimschedError::RemoteExecution("无法获取stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SimschedError::RemoteExecution("无法获取stderr".to_string()))?;

        let collect = async {
            let stdout_task = async {
                let mut lines = BufReader::new(stdout).lines();
                let mut collected = String::new();
                while let Some(line) = lines
                    .next_line()
                    .await
                    .map_err(|e| SimschedError::RemoteExecution(format!("读取stdout失败: {e}")))?
                {
                    if let Some(obs) = &observer {
                        obs.on_stdout_line(&line);
                    }
                    collected.push_str(&line);
                    collected.push('\n');
                }
                Ok::<String, SimschedError>(collected)
            };
            let stderr_task = async {
                let mut buf = String::new();
                BufReader::new(stderr)
                    .read_to_string(&mut buf)
                    .await
                    .map_err(|e| SimschedError::RemoteExecution(format!("读取stderr失败: {e}")))?;
                Ok::<String, SimschedError>(buf)
            };

            let (stdout_buf, stderr_buf) = tokio::try_join!(stdout_task, stderr_task)?;
            let status = child
                .wait()
                .await
                .map_err(|e| SimschedError::RemoteExecution(format!("等待ssh进程失败: {e}")))?;

            Ok::<ExecOutcome, SimschedError>(ExecOutcome {
                exit_code: status.code().unwrap_or(-1),
                stdout: stdout_buf,
                stderr: stderr_buf,
            })
        };

        let timed = tokio::time::timeout(timeout, collect).await;
        match timed {
            Ok(result) => {
                let outcome = result?;
                debug!(
                    "远程命令退出码 {} ({}:{})",
                    outcome.exit_code, target.hostname, target.port
                );
                Ok(outcome)
            }
            Err(_) => {
                warn!(
                    "远程命令超时 ({:?})，终止进程: {}:{}",
                    timeout, target.hostname, target.port
                );
                let _ = child.kill().await;
                Err(SimschedError::Timeout(format!(
                    "远程命令在 {timeout:?} 内未完成"
                )))
            }
        }
    }
}

/// SCP文件搬运器
pub struct ScpFileMover {
    scp_binary: String,
    transfer_timeout: Duration,
}

impl ScpFileMover {
    pub fn new(transfer_timeout: Duration) -> Self {
        Self {
            scp_binary: "scp".to_string(),
            transfer_timeout,
        }
    }

    async fn run_scp(&self, source: &str, destination: &str, port: u16) -> SimschedResult<()> {
        let mut cmd = Command::new(&self.scp_binary);
        cmd.arg("-P")
            .arg(port.to_string())
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(source)
            .arg(destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| SimschedError::Transfer(format!("启动scp进程失败: {e}")))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SimschedError::Transfer("无法获取stderr".to_string()))?;

        let wait = async {
            let mut stderr_buf = String::new();
            BufReader::new(stderr)
                .read_to_string(&mut stderr_buf)
                .await
                .map_err(|e| SimschedError::Transfer(format!("读取stderr失败: {e}")))?;
            let status = child
                .wait()
                .await
                .map_err(|e| SimschedError::Transfer(format!("等待scp进程失败: {e}")))?;
            if status.success() {
                Ok(())
            } else {
                Err(SimschedError::Transfer(format!(
                    "scp退出码 {}: {}",
                    status.code().unwrap_or(-1),
                    stderr_buf.trim()
                )))
            }
        };

        let timed = tokio::time::timeout(self.transfer_timeout, wait).await;
        match timed {
            Ok(result) => result,
            Err(_) => {
                let _ = child.kill().await;
                Err(SimschedError::Timeout(format!(
                    "文件传输在 {:?} 内未完成",
                    self.transfer_timeout
                )))
            }
        }
    }
}

#[async_trait]
impl FileMover for ScpFileMover {
    async fn send(
        &self,
        target: &RemoteTarget,
        local_path: &Path,
        remote_path: &str,
    ) -> SimschedResult<()> {
        info!(
            "发送文件 {} -> {}:{}",
            local_path.display(),
            target.hostname,
            remote_path
        );
        let destination = format!("{}@{}:{}", target.username, target.hostname, remote_path);
        self.run_scp(&local_path.to_string_lossy(), &destination, target.port)
            .await
    }

    async fn fetch(
        &self,
        target: &RemoteTarget,
        remote_path: &str,
        local_path: &Path,
    ) -> SimschedResult<()> {
        info!(
            "取回文件 {}:{} -> {}",
            target.hostname,
            remote_path,
            local_path.display()
        );
        let source = format!("{}@{}:{}", target.username, target.hostname, remote_path);
        self.run_scp(&source, &local_path.to_string_lossy(), target.port)
            .await
    }
}
