// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;

use metrics::{counter, histogram};
use tracing::{debug, error, info, warn};

use crate::domain::models::outcome::WorkerResult;
use crate::domain::models::record::RawRecord;
use crate::domain::repositories::record_repository::RecordRepository;
use crate::infrastructure::metrics::{
    ATTEMPT_DURATION, CHALLENGES_DETECTED, CHALLENGES_RESOLVED, RECORDS_COLLECTED,
    TASKS_ABANDONED, TASKS_COMPLETED, TASKS_FAILED,
};
use crate::queue::scheduler::{RetryDecision, TaskScheduler};

/// 运行期计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub tasks_completed: u64,
    /// 失败的尝试次数
    pub tasks_failed: u64,
    pub tasks_abandoned: u64,
    pub total_attempts: u64,
    /// 本次运行写入存储的记录数，去重后
    pub records_persisted: u64,
    pub challenges_detected: u64,
    pub challenges_resolved: u64,
}

impl RunStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.tasks_completed as f64 / self.total_attempts as f64
        }
    }
}

/// 一个结果被消费后的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 任务已结束，成功或被丢弃
    Settled,
    /// 任务已重新入队，仍在途中
    Requeued,
}

/// 结果聚合器
///
/// 结果通道的唯一消费者，也是全部运行计数的唯一写入者。成功尝试的记录
/// 先缓存，在批次结束时通过 `flush` 增量写入存储；失败的尝试交给调度器
/// 决定是否重试。
pub struct Aggregator {
    repository: Arc<dyn RecordRepository>,
    stats: RunStats,
    pending: Vec<RawRecord>,
}

impl Aggregator {
    pub fn new(repository: Arc<dyn RecordRepository>) -> Self {
        Self {
            repository,
            stats: RunStats::default(),
            pending: Vec::new(),
        }
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// 等待写入的记录数
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// 消费一个 worker 结果
    pub async fn consume(&mut self, result: WorkerResult, scheduler: &TaskScheduler) -> Disposition {
        self.stats.total_attempts += 1;
        histogram!(ATTEMPT_DURATION).record(result.elapsed.as_secs_f64());

        if let Some(report) = result.challenge {
            self.stats.challenges_detected += 1;
            counter!(CHALLENGES_DETECTED).increment(1);
            if report.resolved {
                self.stats.challenges_resolved += 1;
                counter!(CHALLENGES_RESOLVED).increment(1);
            }
        }

        let WorkerResult {
            task,
            success,
            records,
            error,
            worker_id,
            ..
        } = result;

        if success {
            self.stats.tasks_completed += 1;
            counter!(TASKS_COMPLETED).increment(1);
            debug!(task = %task.key(), worker_id, records = records.len(), "结果已汇总");
            self.pending.extend(records);
            return Disposition::Settled;
        }

        self.stats.tasks_failed += 1;
        counter!(TASKS_FAILED).increment(1);
        let Some(failure) = error else {
            // a failed result always carries its failure; treat a missing one as final
            self.abandon();
            return Disposition::Settled;
        };

        let key = task.key();
        match scheduler.handle_failure(task, failure.kind).await {
            Ok(RetryDecision::Requeued { .. }) => Disposition::Requeued,
            Ok(RetryDecision::Abandoned) => {
                self.abandon();
                Disposition::Settled
            }
            Err(e) => {
                warn!(task = %key, "无法重新入队，任务已丢弃: {}", e);
                self.abandon();
                Disposition::Settled
            }
        }
    }

    fn abandon(&mut self) {
        self.stats.tasks_abandoned += 1;
        counter!(TASKS_ABANDONED).increment(1);
    }

    /// 把缓存的记录写入存储
    ///
    /// 写入失败时记录保留在缓存中，下一次 `flush` 再试。
    pub async fn flush(&mut self) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        match self.repository.persist(&self.pending).await {
            Ok(saved) => {
                info!(buffered = self.pending.len(), saved, "记录已持久化");
                self.pending.clear();
                self.stats.records_persisted += saved as u64;
                counter!(RECORDS_COLLECTED).increment(saved as u64);
                saved
            }
            Err(e) => {
                error!(buffered = self.pending.len(), "记录持久化失败: {}", e);
                0
            }
        }
    }

    /// 存储中的记录总数
    ///
    /// 存储不可读时退化为本次运行已写入的数量。
    pub async fn current_total(&self) -> u64 {
        match self.repository.current_record_count().await {
            Ok(count) => count,
            Err(e) => {
                warn!("读取记录总数失败: {}", e);
                self.stats.records_persisted
            }
        }
    }
}
