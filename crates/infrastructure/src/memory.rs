//! 内存仓储实现
//!
//! HashMap后端的仓储，供嵌入式部署与测试使用。行存储的CRUD管道属于
//! 外部协作者，这里只提供编排核心所需的操作面。

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use simsched_core::{SimschedError, SimschedResult};
use simsched_domain::entities::{Artifact, Job, JobStatus, Node, NodeStatus, User};
use simsched_domain::repositories::{
    ArtifactRepository, JobRepository, NodeRepository, UserRepository,
};

#[derive(Default)]
pub struct InMemoryNodeRepository {
    nodes: RwLock<HashMap<i64, Node>>,
    next_id: AtomicI64,
}

impl InMemoryNodeRepository {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl NodeRepository for InMemoryNodeRepository {
    async fn create(&self, node: &Node) -> SimschedResult<Node> {
        let mut stored = node.clone();
        stored.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        stored.created_at = Utc::now();
        stored.updated_at = stored.created_at;
        self.nodes.write().await.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: i64) -> SimschedResult<Option<Node>> {
        Ok(self.nodes.read().await.get(&id).cloned())
    }

    async fn find_all(&self) -> SimschedResult<Vec<Node>> {
        Ok(self.nodes.read().await.values().cloned().collect())
    }

    async fn find_active(&self) -> SimschedResult<Vec<Node>> {
        Ok(self
            .nodes
            .read()
            .await
            .values()
            .filter(|n| n.active)
            .cloned()
            .collect())
    }

    async fn update(&self, node: &Node) -> SimschedResult<Node> {
        let mut nodes = self.nodes.write().await;
        if !nodes.contains_key(&node.id) {
            return Err(SimschedError::node_not_found(node.id));
        }
        let mut stored = node.clone();
        stored.updated_at = Utc::now();
        nodes.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_status(&self, id: i64, status: NodeStatus) -> SimschedResult<bool> {
        let mut nodes = self.nodes.write().await;
        match nodes.get_mut(&id) {
            Some(node) => {
                node.status = status;
                node.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: i64) -> SimschedResult<bool> {
        Ok(self.nodes.write().await.remove(&id).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<i64, Job>>,
    next_id: AtomicI64,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, job: &Job) -> SimschedResult<Job> {
        let mut stored = job.clone();
        stored.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        stored.created_at = Utc::now();
        self.jobs.write().await.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: i64) -> SimschedResult<Option<Job>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn find_all(&self) -> SimschedResult<Vec<Job>> {
        Ok(self.jobs.read().await.values().cloned().collect())
    }

    async fn find_by_status(&self, status: JobStatus) -> SimschedResult<Vec<Job>> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect())
    }

    async fn update(&self, job: &Job) -> SimschedResult<Job> {
        let mut jobs = self.jobs.write().await;
        if !jobs.contains_key(&job.id) {
            return Err(SimschedError::job_not_found(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(job.clone())
    }

    async fn update_status(
        &self,
        id: i64,
        status: JobStatus,
        error_message: Option<String>,
    ) -> SimschedResult<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) => {
                job.status = status;
                if error_message.is_some() {
                    job.error_message = error_message;
                }
                match status {
                    JobStatus::Running => {
                        if job.started_at.is_none() {
                            job.started_at = Some(Utc::now());
                        }
                    }
                    s if s.is_terminal() => {
                        if job.ended_at.is_none() {
                            job.ended_at = Some(Utc::now());
                        }
                    }
                    _ => {}
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn assign_node(&self, id: i64, node_id: i64) -> SimschedResult<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) => {
                job.node_id = Some(node_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count_in_flight_for_user(&self, user_id: i64) -> SimschedResult<i64> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.user_id == user_id && j.is_in_flight())
            .count() as i64)
    }

    async fn any_referencing_node(&self, node_id: i64) -> SimschedResult<bool> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .any(|j| j.node_id == Some(node_id) && !j.is_terminal()))
    }

    async fn delete(&self, id: i64) -> SimschedResult<bool> {
        Ok(self.jobs.write().await.remove(&id).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<i64, User>>,
    next_id: AtomicI64,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, user: &User) -> SimschedResult<User> {
        let mut stored = user.clone();
        stored.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        stored.created_at = Utc::now();
        self.users.write().await.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: i64) -> SimschedResult<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_all(&self) -> SimschedResult<Vec<User>> {
        Ok(self.users.read().await.values().cloned().collect())
    }

    async fn update(&self, user: &User) -> SimschedResult<User> {
        let mut users = self.users.write().await;
        if !users.contains_key(&user.id) {
            return Err(SimschedError::user_not_found(user.id));
        }
        users.insert(user.id, user.clone());
        Ok(user.clone())
    }

    async fn delete(&self, id: i64) -> SimschedResult<bool> {
        Ok(self.users.write().await.remove(&id).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryArtifactRepository {
    artifacts: RwLock<HashMap<i64, Artifact>>,
    next_id: AtomicI64,
}

impl InMemoryArtifactRepository {
    pub fn new() -> Self {
        Self {
            artifacts: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl ArtifactRepository for InMemoryArtifactRepository {
    async fn create(&self, artifact: &Artifact) -> SimschedResult<Artifact> {
        let mut stored = artifact.clone();
        stored.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        stored.created_at = Utc::now();
        self.artifacts
            .write()
            .await
            .insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: i64) -> SimschedResult<Option<Artifact>> {
        Ok(self.artifacts.read().await.get(&id).cloned())
    }

    async fn delete(&self, id: i64) -> SimschedResult<bool> {
        Ok(self.artifacts.write().await.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_job_repo_in_flight_count() {
        let repo = InMemoryJobRepository::new();
        let user_id = 7;

        let j1 = repo
            .create(&Job::new("j1".to_string(), user_id, 1, 2, 0))
            .await
            .unwrap();
        let j2 = repo
            .create(&Job::new("j2".to_string(), user_id, 2, 2, 0))
            .await
            .unwrap();
        repo.create(&Job::new("other".to_string(), 99, 3, 2, 0))
            .await
            .unwrap();

        assert_eq!(repo.count_in_flight_for_user(user_id).await.unwrap(), 2);

        repo.update_status(j1.id, JobStatus::Completed, None)
            .await
            .unwrap();
        assert_eq!(repo.count_in_flight_for_user(user_id).await.unwrap(), 1);

        repo.update_status(j2.id, JobStatus::Failed, Some("失败".to_string()))
            .await
            .unwrap();
        assert_eq!(repo.count_in_flight_for_user(user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_node_reference_check() {
        let repo = InMemoryJobRepository::new();
        let job = repo
            .create(&Job::new("j".to_string(), 1, 1, 2, 0))
            .await
            .unwrap();
        repo.assign_node(job.id, 42).await.unwrap();
        repo.update_status(job.id, JobStatus::Running, None)
            .await
            .unwrap();

        assert!(repo.any_referencing_node(42).await.unwrap());
        assert!(!repo.any_referencing_node(43).await.unwrap());

        repo.update_status(job.id, JobStatus::Completed, None)
            .await
            .unwrap();
        // 终止后的指派仅作审计保留
        assert!(!repo.any_referencing_node(42).await.unwrap());
    }

    #[tokio::test]
    async fn test_terminal_status_records_end_time() {
        let repo = InMemoryJobRepository::new();
        let job = repo
            .create(&Job::new("j".to_string(), 1, 1, 2, 0))
            .await
            .unwrap();

        repo.update_status(job.id, JobStatus::Running, None)
            .await
            .unwrap();
        let running = repo.find_by_id(job.id).await.unwrap().unwrap();
        assert!(running.started_at.is_some());
        assert!(running.ended_at.is_none());

        repo.update_status(job.id, JobStatus::Completed, None)
            .await
            .unwrap();
        let done = repo.find_by_id(job.id).await.unwrap().unwrap();
        assert!(done.ended_at.is_some());
    }
}
