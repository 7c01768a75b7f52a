//! 资源准入控制
//!
//! 纯粹的准入算术：用户并发作业数与全局浮动许可令牌池。所有跨作业的
//! 共享可变状态（令牌申领）只经由本组件的 claim/release 修改，编排器
//! 从不直接调整，以集中维护守恒不变量。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use simsched_core::{SimschedError, SimschedResult};
use simsched_domain::repositories::{JobRepository, UserRepository};

pub struct ResourceAllocator {
    user_repo: Arc<dyn UserRepository>,
    job_repo: Arc<dyn JobRepository>,
    total_tokens: i32,
    /// 作业id -> 已申领令牌数；归本实例所有，随实例一起销毁
    claims: Mutex<HashMap<i64, i32>>,
}

impl ResourceAllocator {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        job_repo: Arc<dyn JobRepository>,
        total_tokens: i32,
    ) -> Self {
        Self {
            user_repo,
            job_repo,
            total_tokens,
            claims: Mutex::new(HashMap::new()),
        }
    }

    pub fn total_tokens(&self) -> i32 {
        self.total_tokens
    }

    pub async fn claimed_tokens(&self) -> i32 {
        self.claims.lock().await.values().sum()
    }

    pub async fn available_tokens(&self) -> i32 {
        self.total_tokens - self.claimed_tokens().await
    }

    /// 用户准入检查：必须处于激活状态且在途作业数未达上限
    pub async fn can_admit_job(&self, user_id: i64) -> SimschedResult<()> {
        let user = self
            .user_repo
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| SimschedError::user_not_found(user_id))?;

        if !user.active {
            return Err(SimschedError::admission_denied(format!(
                "用户 {} 已停用，不能创建新作业",
                user.name
            )));
        }

        let in_flight = self.job_repo.count_in_flight_for_user(user_id).await?;
        if in_flight >= user.max_concurrent_jobs as i64 {
            return Err(SimschedError::admission_denied(format!(
                "用户 {} 的在途作业数已达上限 {}",
                user.name, user.max_concurrent_jobs
            )));
        }

        Ok(())
    }

    /// 令牌可用性的咨询性检查（创建时用；分发时以 try_claim 为准）
    pub async fn has_available_tokens(&self, required: i32) -> bool {
        self.available_tokens().await >= required
    }

    /// 原子的检查并申领：可用性检查与记账在同一把锁下完成
    pub async fn try_claim(&self, job_id: i64, tokens: i32) -> bool {
        let mut claims = self.claims.lock().await;
        if claims.contains_key(&job_id) {
            // 已申领过则视为成功，保持幂等
            return true;
        }
        let claimed: i32 = claims.values().sum();
        if self.total_tokens - claimed < tokens {
            warn!(
                "令牌不足: 需要 {} 可用 {}",
                tokens,
                self.total_tokens - claimed
            );
            return false;
        }
        claims.insert(job_id, tokens);
        debug!("作业 {} 申领 {} 个许可令牌", job_id, tokens);
        true
    }

    /// 无条件记账申领（幂等：重复申领不叠加）
    pub async fn claim(&self, job_id: i64, tokens: i32) {
        let mut claims = self.claims.lock().await;
        claims.entry(job_id).or_insert(tokens);
    }

    /// 释放作业的令牌申领
    ///
    /// 释放从未申领或已释放的作业是no-op而不是错误，因此多条失败路径
    /// 各自触发释放也只会生效一次。
    pub async fn release(&self, job_id: i64) {
        let mut claims = self.claims.lock().await;
        if let Some(tokens) = claims.remove(&job_id) {
            debug!("作业 {} 释放 {} 个许可令牌", job_id, tokens);
        }
    }
}
