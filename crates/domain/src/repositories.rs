//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口，遵循依赖倒置原则；编排核心只调用这些操作，
//! 不直接发出任何查询。

use async_trait::async_trait;

use crate::entities::{Artifact, Job, JobStatus, Node, NodeStatus, User};
use simsched_core::SimschedResult;

/// 节点仓储抽象
#[async_trait]
pub trait NodeRepository: Send + Sync {
    async fn create(&self, node: &Node) -> SimschedResult<Node>;
    async fn find_by_id(&self, id: i64) -> SimschedResult<Option<Node>>;
    async fn find_all(&self) -> SimschedResult<Vec<Node>>;
    async fn find_active(&self) -> SimschedResult<Vec<Node>>;
    async fn update(&self, node: &Node) -> SimschedResult<Node>;
    async fn update_status(&self, id: i64, status: NodeStatus) -> SimschedResult<bool>;
    async fn delete(&self, id: i64) -> SimschedResult<bool>;
}

/// 作业仓储抽象
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create(&self, job: &Job) -> SimschedResult<Job>;
    async fn find_by_id(&self, id: i64) -> SimschedResult<Option<Job>>;
    async fn find_all(&self) -> SimschedResult<Vec<Job>>;
    async fn find_by_status(&self, status: JobStatus) -> SimschedResult<Vec<Job>>;
    async fn update(&self, job: &Job) -> SimschedResult<Job>;
    async fn update_status(
        &self,
        id: i64,
        status: JobStatus,
        error_message: Option<String>,
    ) -> SimschedResult<bool>;
    async fn assign_node(&self, id: i64, node_id: i64) -> SimschedResult<bool>;
    /// 用户当前在途作业数（waiting + starting + running）
    async fn count_in_flight_for_user(&self, user_id: i64) -> SimschedResult<i64>;
    /// 是否有非终止作业引用了指定节点
    async fn any_referencing_node(&self, node_id: i64) -> SimschedResult<bool>;
    async fn delete(&self, id: i64) -> SimschedResult<bool>;
}

/// 用户仓储抽象
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: &User) -> SimschedResult<User>;
    async fn find_by_id(&self, id: i64) -> SimschedResult<Option<User>>;
    async fn find_all(&self) -> SimschedResult<Vec<User>>;
    async fn update(&self, user: &User) -> SimschedResult<User>;
    async fn delete(&self, id: i64) -> SimschedResult<bool>;
}

/// 输入文件仓储抽象
#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    async fn create(&self, artifact: &Artifact) -> SimschedResult<Artifact>;
    async fn find_by_id(&self, id: i64) -> SimschedResult<Option<Artifact>>;
    async fn delete(&self, id: i64) -> SimschedResult<bool>;
}
