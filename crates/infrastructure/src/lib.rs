//! 基础设施协作者
//!
//! 事件总线、内存仓储与SSH/SCP远程执行实现。编排核心只通过
//! `simsched-core` 与 `simsched-domain` 的抽象使用这里的类型。

pub mod event_bus;
pub mod memory;
pub mod ssh;

pub use event_bus::{channels, EventBus, EventEnvelope, SharedEventBus};
pub use memory::{
    InMemoryArtifactRepository, InMemoryJobRepository, InMemoryNodeRepository,
    InMemoryUserRepository,
};
pub use ssh::{ScpFileMover, SshRemoteExecutor};
