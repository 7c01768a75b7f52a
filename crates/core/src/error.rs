use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimschedError {
    #[error("作业未找到: {id}")]
    JobNotFound { id: i64 },
    #[error("节点未找到: {id}")]
    NodeNotFound { id: i64 },
    #[error("用户未找到: {id}")]
    UserNotFound { id: i64 },
    #[error("输入文件未找到: {0}")]
    ArtifactMissing(String),
    #[error("准入被拒绝: {0}")]
    AdmissionDenied(String),
    #[error("节点正被作业引用，无法删除: {id}")]
    NodeBusy { id: i64 },
    #[error("文件传输错误: {0}")]
    Transfer(String),
    #[error("远程执行错误: {0}")]
    RemoteExecution(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("数据存储错误: {0}")]
    Store(String),
    #[error("网络错误: {0}")]
    Network(String),
    #[error("资源不足: {0}")]
    ResourceExhausted(String),
    #[error("数据验证失败: {0}")]
    ValidationError(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type SimschedResult<T> = Result<T, SimschedError>;

impl SimschedError {
    pub fn job_not_found(id: i64) -> Self {
        Self::JobNotFound { id }
    }
    pub fn node_not_found(id: i64) -> Self {
        Self::NodeNotFound { id }
    }
    pub fn user_not_found(id: i64) -> Self {
        Self::UserNotFound { id }
    }
    pub fn admission_denied<S: Into<String>>(msg: S) -> Self {
        Self::AdmissionDenied(msg.into())
    }
    pub fn transfer_error<S: Into<String>>(msg: S) -> Self {
        Self::Transfer(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SimschedError::Internal(_) | SimschedError::Configuration(_)
        )
    }
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SimschedError::Transfer(_)
                | SimschedError::Network(_)
                | SimschedError::Timeout(_)
                | SimschedError::Store(_)
        )
    }
    pub fn user_message(&self) -> &str {
        match self {
            SimschedError::JobNotFound { .. } => "请求的作业不存在",
            SimschedError::NodeNotFound { .. } => "请求的计算节点不存在",
            SimschedError::UserNotFound { .. } => "请求的用户不存在",
            SimschedError::AdmissionDenied(_) => "作业提交被资源限制拒绝",
            SimschedError::NodeBusy { .. } => "节点上仍有未完成的作业",
            SimschedError::ArtifactMissing(_) => "作业的输入文件不存在",
            SimschedError::ValidationError(_) => "输入数据验证失败",
            SimschedError::ResourceExhausted(_) => "系统资源不足，请稍后重试",
            SimschedError::Timeout(_) => "操作超时，请稍后重试",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for SimschedError {
    fn from(err: serde_json::Error) -> Self {
        SimschedError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SimschedError {
    fn from(err: anyhow::Error) -> Self {
        SimschedError::Internal(err.to_string())
    }
}
