//! 领域事件
//!
//! 生命周期状态变化的类型化载荷，通过事件总线发布给UI与审计消费者

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{JobStatus, NodeStatus};

/// 领域事件基础trait
pub trait DomainEvent: Send + Sync {
    fn event_id(&self) -> Uuid;
    fn event_type(&self) -> &str;
    fn occurred_at(&self) -> DateTime<Utc>;
    fn aggregate_id(&self) -> String;
}

/// 作业生命周期事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    StatusChanged {
        id: Uuid,
        job_id: i64,
        job_name: String,
        status: JobStatus,
        node_id: Option<i64>,
        user_id: i64,
        cpu_cores: i32,
        priority: i32,
        artifact_id: i64,
        occurred_at: DateTime<Utc>,
    },
    AdmissionRejected {
        id: Uuid,
        user_id: i64,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
}

impl DomainEvent for JobEvent {
    fn event_id(&self) -> Uuid {
        match self {
            JobEvent::StatusChanged { id, .. } => *id,
            JobEvent::AdmissionRejected { id, .. } => *id,
        }
    }

    fn event_type(&self) -> &str {
        match self {
            JobEvent::StatusChanged { .. } => "JobStatusChanged",
            JobEvent::AdmissionRejected { .. } => "JobAdmissionRejected",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            JobEvent::StatusChanged { occurred_at, .. } => *occurred_at,
            JobEvent::AdmissionRejected { occurred_at, .. } => *occurred_at,
        }
    }

    fn aggregate_id(&self) -> String {
        match self {
            JobEvent::StatusChanged { job_id, .. } => job_id.to_string(),
            JobEvent::AdmissionRejected { user_id, .. } => user_id.to_string(),
        }
    }
}

/// 节点相关事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeEvent {
    StatusChanged {
        id: Uuid,
        node_id: i64,
        node_name: String,
        status: NodeStatus,
        consecutive_failures: u32,
        occurred_at: DateTime<Utc>,
    },
    Registered {
        id: Uuid,
        node_id: i64,
        node_name: String,
        occurred_at: DateTime<Utc>,
    },
    Removed {
        id: Uuid,
        node_id: i64,
        occurred_at: DateTime<Utc>,
    },
}

impl DomainEvent for NodeEvent {
    fn event_id(&self) -> Uuid {
        match self {
            NodeEvent::StatusChanged { id, .. } => *id,
            NodeEvent::Registered { id, .. } => *id,
            NodeEvent::Removed { id, .. } => *id,
        }
    }

    fn event_type(&self) -> &str {
        match self {
            NodeEvent::StatusChanged { .. } => "NodeStatusChanged",
            NodeEvent::Registered { .. } => "NodeRegistered",
            NodeEvent::Removed { .. } => "NodeRemoved",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            NodeEvent::StatusChanged { occurred_at, .. } => *occurred_at,
            NodeEvent::Registered { occurred_at, .. } => *occurred_at,
            NodeEvent::Removed { occurred_at, .. } => *occurred_at,
        }
    }

    fn aggregate_id(&self) -> String {
        match self {
            NodeEvent::StatusChanged { node_id, .. } => node_id.to_string(),
            NodeEvent::Registered { node_id, .. } => node_id.to_string(),
            NodeEvent::Removed { node_id, .. } => node_id.to_string(),
        }
    }
}
