use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use simsched_core::RemoteTarget;

/// 计算节点（远程工作机）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub name: String,
    pub hostname: String,
    pub port: u16,
    /// 凭据引用（ssh用户名）
    pub username: String,
    pub cpu_cores_limit: i32,
    pub license_token_limit: i32,
    pub active: bool,
    /// 仅由健康监控器修改，保持健康状态单一来源
    pub status: NodeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeStatus {
    #[serde(rename = "AVAILABLE")]
    Available,
    #[serde(rename = "UNAVAILABLE")]
    Unavailable,
}

impl Node {
    pub fn new(
        name: String,
        hostname: String,
        port: u16,
        username: String,
        cpu_cores_limit: i32,
        license_token_limit: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 由存储层分配
            name,
            hostname,
            port,
            username,
            cpu_cores_limit,
            license_token_limit,
            active: true,
            status: NodeStatus::Available,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_available(&self) -> bool {
        self.active && matches!(self.status, NodeStatus::Available)
    }

    pub fn target(&self) -> RemoteTarget {
        RemoteTarget::new(self.hostname.clone(), self.port, self.username.clone())
    }

    /// 传输队列的串行化键
    pub fn transfer_key(&self) -> String {
        self.target().key()
    }

    pub fn entity_description(&self) -> String {
        format!(
            "节点 '{}' (ID: {}, 地址: {}:{})",
            self.name, self.id, self.hostname, self.port
        )
    }
}

/// 仿真作业
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub name: String,
    pub user_id: i64,
    pub artifact_id: i64,
    pub cpu_cores: i32,
    pub priority: i32,
    /// 调度前为None；终止后保留用于审计，不再具有操作意义
    pub node_id: Option<i64>,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub result_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    #[serde(rename = "WAITING")]
    Waiting,
    #[serde(rename = "STARTING")]
    Starting,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "MISSING")]
    Missing,
}

impl JobStatus {
    /// 是否占用用户并发额度
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            JobStatus::Waiting | JobStatus::Starting | JobStatus::Running
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Missing
        )
    }

    /// 该状态下节点指派是否仍有操作意义
    pub fn holds_assignment(&self) -> bool {
        matches!(self, JobStatus::Starting | JobStatus::Running)
    }
}

impl Job {
    pub fn new(name: String, user_id: i64, artifact_id: i64, cpu_cores: i32, priority: i32) -> Self {
        Self {
            id: 0,
            name,
            user_id,
            artifact_id,
            cpu_cores,
            priority,
            node_id: None,
            status: JobStatus::Waiting,
            started_at: None,
            ended_at: None,
            error_message: None,
            result_path: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.status.is_in_flight()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 许可令牌需求与核数成正比
    pub fn required_tokens(&self) -> i32 {
        self.cpu_cores
    }

    pub fn entity_description(&self) -> String {
        format!(
            "作业 '{}' (ID: {}, 用户: {}, 核数: {})",
            self.name, self.id, self.user_id, self.cpu_cores
        )
    }
}

/// 系统用户
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub max_concurrent_jobs: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: String, max_concurrent_jobs: i32) -> Self {
        Self {
            id: 0,
            name,
            max_concurrent_jobs,
            active: true,
            created_at: Utc::now(),
        }
    }
}

/// 作业输入文件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: i64,
    pub file_name: String,
    pub local_path: String,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(file_name: String, local_path: String, user_id: i64) -> Self {
        Self {
            id: 0,
            file_name,
            local_path,
            user_id,
            created_at: Utc::now(),
        }
    }
}

/// 传输方向
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransferDirection {
    #[serde(rename = "SEND")]
    Send,
    #[serde(rename = "RECEIVE")]
    Receive,
}

/// 排队中的传输任务（瞬态，仅在排队或在途期间存在）
#[derive(Debug, Clone)]
pub struct TransferTask {
    pub id: Uuid,
    pub direction: TransferDirection,
    pub source: String,
    pub destination: String,
    pub node_key: String,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

impl TransferTask {
    pub fn new(
        direction: TransferDirection,
        source: String,
        destination: String,
        node_key: String,
        priority: i32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            direction,
            source,
            destination,
            node_key,
            priority,
            created_at: Utc::now(),
        }
    }
}
