//! 内存事件总线
//!
//! 按频道名分发的类型化发布/订阅，将状态生产者与UI/审计消费者解耦。
//! 发布时同步扇出给当时的所有订阅者；没有重放缓冲，晚到的订阅者错过
//! 此前的事件。已关闭的订阅者由维护任务周期性清理以约束内存增长。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use simsched_core::{SimschedError, SimschedResult};

/// 固定的已知频道集合
pub mod channels {
    pub const JOBS: &str = "jobs";
    pub const NODES: &str = "nodes";
    pub const SYSTEM: &str = "system";

    pub const ALL: [&str; 3] = [JOBS, NODES, SYSTEM];
}

/// 事件信封
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_type: String,
    pub channel: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<EventEnvelope>>>>,
    known_channels: HashSet<String>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            known_channels: channels::ALL.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn is_known_channel(&self, channel: &str) -> bool {
        self.known_channels.contains(channel)
    }

    /// 发布事件，返回实际送达的订阅者数量
    ///
    /// 未知频道按自由扩展频道处理，允许发布。
    pub async fn publish(
        &self,
        channel: &str,
        event_type: &str,
        data: serde_json::Value,
    ) -> usize {
        self.publish_envelope(EventEnvelope {
            event_type: event_type.to_string(),
            channel: channel.to_string(),
            data,
            timestamp: Utc::now(),
        })
        .await
    }

    pub async fn publish_envelope(&self, envelope: EventEnvelope) -> usize {
        if !self.is_known_channel(&envelope.channel) {
            debug!("向扩展频道 {} 发布事件 {}", envelope.channel, envelope.event_type);
        }

        let subscribers = self.subscribers.read().await;
        let Some(senders) = subscribers.get(&envelope.channel) else {
            return 0;
        };

        let mut delivered = 0;
        for sender in senders {
            // 接收端已丢弃的订阅者留待清理任务移除
            if sender.send(envelope.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// 订阅频道（宽松模式，未知频道也允许）
    pub async fn subscribe(&self, channel: &str) -> mpsc::UnboundedReceiver<EventEnvelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// 严格订阅：未知频道被拒绝
    pub async fn subscribe_strict(
        &self,
        channel: &str,
    ) -> SimschedResult<mpsc::UnboundedReceiver<EventEnvelope>> {
        if !self.is_known_channel(channel) {
            return Err(SimschedError::ValidationError(format!(
                "未知的事件频道: {channel}"
            )));
        }
        Ok(self.subscribe(channel).await)
    }

    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(channel)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// 清理接收端已关闭的订阅者，返回移除数量
    ///
    /// 由调度框架驱动的维护任务周期性调用。
    pub async fn sweep_closed_subscribers(&self) -> usize {
        let mut subscribers = self.subscribers.write().await;
        let mut removed = 0;
        subscribers.retain(|channel, senders| {
            let before = senders.len();
            senders.retain(|s| !s.is_closed());
            removed += before - senders.len();
            if senders.is_empty() {
                debug!("频道 {} 已无订阅者", channel);
                false
            } else {
                true
            }
        });
        if removed > 0 {
            warn!("清理了 {} 个已失效的事件订阅者", removed);
        }
        removed
    }
}

/// 便捷别名：共享事件总线
pub type SharedEventBus = Arc<EventBus>;
