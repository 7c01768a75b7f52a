//! 自适应间隔策略
//!
//! 根据任务结果的成败序列收缩或放大自身的轮询间隔：连续成功加快轮询，
//! 连续失败放慢轮询；任务显式建议的间隔优先，但始终钳制在 [min, max] 内。

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::runner::{ScheduleStrategy, TaskOutcome};

#[derive(Debug, Clone)]
pub struct AdaptiveConfig {
    pub normal_interval: Duration,
    /// 缺省为正常间隔的10%
    pub min_interval: Option<Duration>,
    /// 缺省为正常间隔的10倍
    pub max_interval: Option<Duration>,
    pub execute_immediately: bool,
}

impl AdaptiveConfig {
    pub fn new(normal_interval: Duration) -> Self {
        Self {
            normal_interval,
            min_interval: None,
            max_interval: None,
            execute_immediately: false,
        }
    }

    pub fn with_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.min_interval = Some(min);
        self.max_interval = Some(max);
        self
    }

    pub fn immediate(mut self) -> Self {
        self.execute_immediately = true;
        self
    }

    fn effective_min(&self) -> Duration {
        self.min_interval
            .unwrap_or_else(|| self.normal_interval / 10)
    }

    fn effective_max(&self) -> Duration {
        self.max_interval.unwrap_or_else(|| self.normal_interval * 10)
    }
}

#[derive(Debug)]
struct AdaptiveState {
    current_interval: Duration,
    consecutive_successes: u32,
    consecutive_failures: u32,
}

pub struct AdaptiveStrategy {
    config: AdaptiveConfig,
    state: Mutex<AdaptiveState>,
}

impl AdaptiveStrategy {
    pub fn new(config: AdaptiveConfig) -> Self {
        let current_interval = config.normal_interval;
        Self {
            config,
            state: Mutex::new(AdaptiveState {
                current_interval,
                consecutive_successes: 0,
                consecutive_failures: 0,
            }),
        }
    }

    fn clamp(&self, interval: Duration) -> Duration {
        interval
            .max(self.config.effective_min())
            .min(self.config.effective_max())
    }

    fn scale(&self, interval: Duration, factor: f64) -> Duration {
        let millis = (interval.as_millis() as f64 * factor).round() as u64;
        self.clamp(Duration::from_millis(millis))
    }

    /// 当前间隔快照（测试与统计用）
    pub async fn current_interval(&self) -> Duration {
        self.state.lock().await.current_interval
    }
}

#[async_trait]
impl ScheduleStrategy for AdaptiveStrategy {
    fn name(&self) -> &str {
        "Adaptive"
    }

    async fn initial_delay(&self) -> Duration {
        if self.config.execute_immediately {
            Duration::ZERO
        } else {
            self.state.lock().await.current_interval
        }
    }

    async fn next_interval(&self, outcome: &TaskOutcome) -> Duration {
        let mut state = self.state.lock().await;

        // 成功与失败的连续计数互斥
        if outcome.success {
            state.consecutive_successes += 1;
            state.consecutive_failures = 0;
        } else {
            state.consecutive_failures += 1;
            state.consecutive_successes = 0;
        }

        if let Some(suggested) = outcome.suggested_next_interval {
            state.current_interval = self.clamp(suggested);
            debug!(
                "采用任务建议的间隔: {:?} (钳制后 {:?})",
                suggested, state.current_interval
            );
            return state.current_interval;
        }

        let current = state.current_interval;
        state.current_interval = if outcome.success {
            match state.consecutive_successes {
                n if n >= 10 => self.scale(current, 0.6),
                n if n >= 5 => self.scale(current, 0.8),
                _ => current,
            }
        } else {
            match state.consecutive_failures {
                n if n >= 5 => self.scale(current, 3.0),
                n if n >= 3 => self.scale(current, 2.0),
                1 => self.scale(current, 1.5),
                _ => current,
            }
        };

        if state.current_interval != current {
            debug!(
                "自适应调整间隔: {:?} -> {:?} (连续成功 {}, 连续失败 {})",
                current, state.current_interval, state.consecutive_successes,
                state.consecutive_failures
            );
        }

        state.current_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(normal_ms: u64) -> AdaptiveStrategy {
        AdaptiveStrategy::new(AdaptiveConfig::new(Duration::from_millis(normal_ms)))
    }

    #[tokio::test]
    async fn test_suggested_interval_is_clamped() {
        let s = strategy(1_000); // min 100ms, max 10s

        let next = s
            .next_interval(
                &TaskOutcome::success().with_suggested_interval(Duration::from_millis(1)),
            )
            .await;
        assert_eq!(next, Duration::from_millis(100));

        let next = s
            .next_interval(
                &TaskOutcome::success().with_suggested_interval(Duration::from_secs(3600)),
            )
            .await;
        assert_eq!(next, Duration::from_secs(10));

        let next = s
            .next_interval(
                &TaskOutcome::success().with_suggested_interval(Duration::from_secs(2)),
            )
            .await;
        assert_eq!(next, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_success_streak_shrinks_interval() {
        let s = strategy(1_000);

        for _ in 0..4 {
            s.next_interval(&TaskOutcome::success()).await;
        }
        assert_eq!(s.current_interval().await, Duration::from_millis(1_000));

        // 第5次连续成功后 ×0.8
        s.next_interval(&TaskOutcome::success()).await;
        assert_eq!(s.current_interval().await, Duration::from_millis(800));

        for _ in 0..5 {
            s.next_interval(&TaskOutcome::success()).await;
        }
        // 第10次连续成功后 ×0.6
        let after_ten = s.current_interval().await;
        assert!(after_ten < Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_failure_streak_grows_interval() {
        let s = strategy(1_000);

        // 第1次失败 ×1.5
        s.next_interval(&TaskOutcome::failure("x")).await;
        assert_eq!(s.current_interval().await, Duration::from_millis(1_500));

        // 第2次失败间隔不变
        s.next_interval(&TaskOutcome::failure("x")).await;
        assert_eq!(s.current_interval().await, Duration::from_millis(1_500));

        // 第3次失败 ×2
        s.next_interval(&TaskOutcome::failure("x")).await;
        assert_eq!(s.current_interval().await, Duration::from_millis(3_000));

        s.next_interval(&TaskOutcome::failure("x")).await;
        // 第5次失败 ×3，但钳制在 max=10s
        s.next_interval(&TaskOutcome::failure("x")).await;
        assert_eq!(s.current_interval().await, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let s = strategy(1_000);

        s.next_interval(&TaskOutcome::failure("x")).await;
        s.next_interval(&TaskOutcome::failure("x")).await;
        s.next_interval(&TaskOutcome::success()).await;

        // 再次失败应按"第1次失败"处理（×1.5）
        let before = s.current_interval().await;
        s.next_interval(&TaskOutcome::failure("x")).await;
        let after = s.current_interval().await;
        assert_eq!(after.as_millis(), (before.as_millis() * 3) / 2);
    }

    #[tokio::test]
    async fn test_interval_always_within_bounds() {
        let s = AdaptiveStrategy::new(
            AdaptiveConfig::new(Duration::from_millis(1_000))
                .with_bounds(Duration::from_millis(200), Duration::from_millis(5_000)),
        );

        // 任意长的失败序列不会超过上界
        for _ in 0..50 {
            let next = s.next_interval(&TaskOutcome::failure("x")).await;
            assert!(next >= Duration::from_millis(200));
            assert!(next <= Duration::from_millis(5_000));
        }

        // 任意长的成功序列不会低于下界
        for _ in 0..50 {
            let next = s.next_interval(&TaskOutcome::success()).await;
            assert!(next >= Duration::from_millis(200));
            assert!(next <= Duration::from_millis(5_000));
        }
    }

    #[tokio::test]
    async fn test_immediate_first_run() {
        let s = AdaptiveStrategy::new(
            AdaptiveConfig::new(Duration::from_millis(1_000)).immediate(),
        );
        assert_eq!(s.initial_delay().await, Duration::ZERO);
    }
}
