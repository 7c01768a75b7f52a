//! 按节点串行化的文件传输队列
//!
//! 保证针对同一节点（`hostname:port` 键）的传输永不重叠，不同节点之间
//! 完全并行。这是按键互斥而不是全局锁；失败的传输不会阻塞同键的后续
//! 传输，完成（无论成败）后自己的条目即被移除。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use simsched_core::SimschedResult;
use simsched_domain::entities::TransferTask;

#[derive(Default)]
pub struct FileTransferQueue {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileTransferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前持有条目的节点键数量（瞬态状态，归队列实例所有）
    pub async fn active_keys(&self) -> usize {
        self.locks.read().await.len()
    }

    /// 在指定节点键上串行执行一次传输
    ///
    /// 等待该键上已登记的传输完成后才开始执行；不同键互不等待。
    pub async fn enqueue<F, T>(&self, task: &TransferTask, transfer: F) -> SimschedResult<T>
    where
        F: Future<Output = SimschedResult<T>>,
    {
        let lock = {
            let mut locks = self.locks.write().await;
            Arc::clone(locks.entry(task.node_key.clone()).or_default())
        };

        debug!(
            "传输任务 {} ({:?}) 排队等待节点 {}",
            task.id, task.direction, task.node_key
        );

        let guard = lock.lock().await;
        info!(
            "传输任务 {} 开始: {} -> {} (节点 {})",
            task.id, task.source, task.destination, task.node_key
        );

        let result = transfer.await;

        if let Err(e) = &result {
            // 失败不污染队列，条目照常移除，下一个传输正常进行
            info!("传输任务 {} 失败: {}", task.id, e);
        } else {
            debug!("传输任务 {} 完成", task.id);
        }

        drop(guard);

        // 无人等待时移除自己的条目，避免幽灵条目阻塞后续调用者
        let mut locks = self.locks.write().await;
        if let Some(existing) = locks.get(&task.node_key) {
            if Arc::ptr_eq(existing, &lock) && Arc::strong_count(existing) == 2 {
                locks.remove(&task.node_key);
            }
        }

        result
    }
}
