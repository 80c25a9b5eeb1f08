// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::domain::models::task::FetchMode;
use crate::engines::traits::FetchResourceFactory;
use crate::utils::errors::CollectionError;
use crate::workers::collection_worker::CollectionWorker;
use crate::workers::worker::{WorkerContext, WorkerSummary};

/// 工作管理器
///
/// 启动时为每个 worker 创建一个独占的抓取资源。资源创建失败只影响
/// 对应的 worker，它不会启动也不会在运行中被替换。
pub struct WorkerManager {
    handles: Vec<JoinHandle<WorkerSummary>>,
}

impl WorkerManager {
    /// 启动工作进程
    ///
    /// # 参数
    ///
    /// * `factory` - 抓取资源工厂
    /// * `mode` - 抓取方式
    /// * `count` - 期望启动的 worker 数量
    /// * `ctx` - 共享协作者
    ///
    /// # 返回值
    ///
    /// * `Ok(WorkerManager)` - 至少一个 worker 已启动
    /// * `Err(CollectionError::NoWorkers)` - 所有资源都创建失败
    pub async fn start(
        factory: &dyn FetchResourceFactory,
        mode: FetchMode,
        count: usize,
        ctx: WorkerContext,
    ) -> Result<Self, CollectionError> {
        let mut handles = Vec::with_capacity(count);

        for worker_id in 0..count {
            let resource = match factory.create(mode, worker_id).await {
                Ok(resource) => resource,
                Err(e) => {
                    error!(worker_id, mode = %mode, "抓取资源创建失败，worker 不启动: {}", e);
                    continue;
                }
            };
            info!(worker_id, resource_id = %resource.resource_id(), "Worker resource ready");
            let worker = CollectionWorker::new(worker_id, resource, ctx.clone());
            handles.push(tokio::spawn(worker.run()));
        }

        if handles.is_empty() {
            return Err(CollectionError::NoWorkers);
        }
        info!(started = handles.len(), requested = count, "Workers started");
        Ok(Self { handles })
    }

    /// 已启动的 worker 数量
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// 等待全部 worker 退出
    ///
    /// 调用前应先发出停止信号或关闭队列。
    pub async fn shutdown(self) -> Vec<WorkerSummary> {
        let mut summaries = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            match handle.await {
                Ok(summary) => summaries.push(summary),
                Err(e) => warn!("worker 异常退出: {}", e),
            }
        }
        info!(workers = summaries.len(), "Workers shut down successfully");
        summaries
    }
}
