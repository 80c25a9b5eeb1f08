// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::challenge::{ChallengeDetector, ChallengeHandler};
use crate::config::settings::SourceProfile;
use crate::domain::models::outcome::WorkerResult;
use crate::domain::services::extraction_service::Extractor;
use crate::domain::services::rate_limiting_service::DomainRateLimiter;
use crate::queue::task_queue::TaskQueue;

/// 停止信号的发送端
///
/// 整个运行共享一个，`stop` 之后所有 worker 在下一个检查点退出。
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StopHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// 停止信号的接收端
#[derive(Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// 等待直到收到停止信号
    pub async fn stopped(&mut self) {
        // a dropped sender also ends the wait
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

/// 所有 worker 共享的协作者
///
/// 跨 worker 的可变状态只有限流器中的域名状态和结果通道另一端的聚合器。
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<dyn TaskQueue>,
    pub rate_limiter: Arc<DomainRateLimiter>,
    pub detector: Arc<ChallengeDetector>,
    pub handler: Arc<ChallengeHandler>,
    pub extractor: Arc<dyn Extractor>,
    pub sources: Arc<HashMap<String, SourceProfile>>,
    pub results: mpsc::UnboundedSender<WorkerResult>,
    pub stop: StopSignal,
    /// 单次尝试的超时
    pub task_timeout: Duration,
    /// 挑战处理可用的时长，从抓取开始计，小于 `task_timeout`
    pub handling_budget: Duration,
    /// 空队列上的阻塞时长
    pub queue_poll: Duration,
}

/// worker 退出时的汇总
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSummary {
    pub worker_id: usize,
    pub resource_id: Uuid,
    pub attempts: u64,
}
