//! 环境变量驱动的应用配置
//!
//! 启动时一次性读取并验证，验证失败时返回完整的违规列表而不是静默修正。

use serde::{Deserialize, Serialize};

use crate::error::{SimschedError, SimschedResult};

/// 健康检查调度间隔的最小下限（毫秒）
const MIN_INTERVAL_FLOOR_MS: u64 = 100;
/// 超时配置的最小下限（秒）
const MIN_TIMEOUT_FLOOR_SECS: u64 = 1;
/// 并发健康检查数量上限
const MAX_CONCURRENT_CHECKS_CEILING: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 健康检查正常轮询间隔（毫秒）
    pub health_normal_interval_ms: u64,
    /// 健康检查最快轮询间隔（毫秒），用于故障恢复侦测
    pub health_min_interval_ms: u64,
    /// 健康检查最慢轮询间隔（毫秒），用于稳定故障时退避
    pub health_max_interval_ms: u64,
    /// 单轮健康检查的最大并发探测数
    pub max_concurrent_checks: usize,
    /// 全局最大并发作业数
    pub max_concurrent_jobs: usize,
    /// 用户默认的并发作业上限
    pub default_max_user_jobs: i32,
    /// 全局浮动许可令牌总数
    pub total_license_tokens: i32,
    /// 事件总线订阅者清理周期（毫秒）
    pub cleanup_interval_ms: u64,
    /// 作业分发扫描周期（毫秒）
    pub dispatch_interval_ms: u64,
    /// 节点探测超时（秒）
    pub probe_timeout_secs: u64,
    /// 远程执行超时（秒）
    pub exec_timeout_secs: u64,
    /// 调度器停止时等待在途任务的超时（秒）
    pub shutdown_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            health_normal_interval_ms: 60_000,
            health_min_interval_ms: 6_000,
            health_max_interval_ms: 600_000,
            max_concurrent_checks: 5,
            max_concurrent_jobs: 100,
            default_max_user_jobs: 2,
            total_license_tokens: 16,
            cleanup_interval_ms: 300_000,
            dispatch_interval_ms: 5_000,
            probe_timeout_secs: 30,
            exec_timeout_secs: 86_400,
            shutdown_timeout_secs: 10,
        }
    }
}

impl AppConfig {
    /// 从环境变量加载配置并验证
    pub fn from_env() -> SimschedResult<Self> {
        let defaults = Self::default();
        let mut violations = Vec::new();

        let config = Self {
            health_normal_interval_ms: read_env(
                "SIMSCHED_HEALTH_NORMAL_INTERVAL_MS",
                defaults.health_normal_interval_ms,
                &mut violations,
            ),
            health_min_interval_ms: read_env(
                "SIMSCHED_HEALTH_MIN_INTERVAL_MS",
                defaults.health_min_interval_ms,
                &mut violations,
            ),
            health_max_interval_ms: read_env(
                "SIMSCHED_HEALTH_MAX_INTERVAL_MS",
                defaults.health_max_interval_ms,
                &mut violations,
            ),
            max_concurrent_checks: read_env(
                "SIMSCHED_MAX_CONCURRENT_CHECKS",
                defaults.max_concurrent_checks,
                &mut violations,
            ),
            max_concurrent_jobs: read_env(
                "SIMSCHED_MAX_CONCURRENT_JOBS",
                defaults.max_concurrent_jobs,
                &mut violations,
            ),
            default_max_user_jobs: read_env(
                "SIMSCHED_DEFAULT_MAX_USER_JOBS",
                defaults.default_max_user_jobs,
                &mut violations,
            ),
            total_license_tokens: read_env(
                "SIMSCHED_TOTAL_LICENSE_TOKENS",
                defaults.total_license_tokens,
                &mut violations,
            ),
            cleanup_interval_ms: read_env(
                "SIMSCHED_CLEANUP_INTERVAL_MS",
                defaults.cleanup_interval_ms,
                &mut violations,
            ),
            dispatch_interval_ms: read_env(
                "SIMSCHED_DISPATCH_INTERVAL_MS",
                defaults.dispatch_interval_ms,
                &mut violations,
            ),
            probe_timeout_secs: read_env(
                "SIMSCHED_PROBE_TIMEOUT_SECS",
                defaults.probe_timeout_secs,
                &mut violations,
            ),
            exec_timeout_secs: read_env(
                "SIMSCHED_EXEC_TIMEOUT_SECS",
                defaults.exec_timeout_secs,
                &mut violations,
            ),
            shutdown_timeout_secs: read_env(
                "SIMSCHED_SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout_secs,
                &mut violations,
            ),
        };

        config.collect_violations(&mut violations);

        if violations.is_empty() {
            Ok(config)
        } else {
            Err(SimschedError::Configuration(format!(
                "配置验证失败 ({} 项): {}",
                violations.len(),
                violations.join("; ")
            )))
        }
    }

    /// 验证配置，返回所有违规项
    pub fn validate(&self) -> SimschedResult<()> {
        let mut violations = Vec::new();
        self.collect_violations(&mut violations);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(SimschedError::Configuration(format!(
                "配置验证失败 ({} 项): {}",
                violations.len(),
                violations.join("; ")
            )))
        }
    }

    fn collect_violations(&self, violations: &mut Vec<String>) {
        for (name, value) in [
            ("health_normal_interval_ms", self.health_normal_interval_ms),
            ("health_min_interval_ms", self.health_min_interval_ms),
            ("health_max_interval_ms", self.health_max_interval_ms),
            ("cleanup_interval_ms", self.cleanup_interval_ms),
            ("dispatch_interval_ms", self.dispatch_interval_ms),
        ] {
            if value < MIN_INTERVAL_FLOOR_MS {
                violations.push(format!(
                    "{name} = {value} 低于最小间隔 {MIN_INTERVAL_FLOOR_MS}ms"
                ));
            }
        }

        if self.health_min_interval_ms > self.health_normal_interval_ms {
            violations.push(format!(
                "health_min_interval_ms ({}) 不能大于 health_normal_interval_ms ({})",
                self.health_min_interval_ms, self.health_normal_interval_ms
            ));
        }
        if self.health_max_interval_ms < self.health_normal_interval_ms {
            violations.push(format!(
                "health_max_interval_ms ({}) 不能小于 health_normal_interval_ms ({})",
                self.health_max_interval_ms, self.health_normal_interval_ms
            ));
        }

        if self.max_concurrent_checks < 1 || self.max_concurrent_checks > MAX_CONCURRENT_CHECKS_CEILING
        {
            violations.push(format!(
                "max_concurrent_checks = {} 必须在 [1, {MAX_CONCURRENT_CHECKS_CEILING}] 范围内",
                self.max_concurrent_checks
            ));
        }
        if self.max_concurrent_jobs < 1 {
            violations.push(format!(
                "max_concurrent_jobs = {} 必须至少为 1",
                self.max_concurrent_jobs
            ));
        }
        if self.default_max_user_jobs < 1 {
            violations.push(format!(
                "default_max_user_jobs = {} 必须至少为 1",
                self.default_max_user_jobs
            ));
        }
        if self.total_license_tokens < 1 {
            violations.push(format!(
                "total_license_tokens = {} 必须至少为 1",
                self.total_license_tokens
            ));
        }

        for (name, value) in [
            ("probe_timeout_secs", self.probe_timeout_secs),
            ("exec_timeout_secs", self.exec_timeout_secs),
            ("shutdown_timeout_secs", self.shutdown_timeout_secs),
        ] {
            if value < MIN_TIMEOUT_FLOOR_SECS {
                violations.push(format!(
                    "{name} = {value} 低于最小超时 {MIN_TIMEOUT_FLOOR_SECS}s"
                ));
            }
        }
    }
}

/// 读取单个环境变量，解析失败记入违规列表并使用默认值
fn read_env<T>(key: &str, default: T, violations: &mut Vec<String>) -> T
where
    T: std::str::FromStr + Copy,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(e) => {
                violations.push(format!("{key} = \"{raw}\" 解析失败: {e}"));
                default
            }
        },
        Err(_) => default,
    }
}
