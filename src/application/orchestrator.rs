// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;

use metrics::gauge;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration, Instant};
use tracing::{info, instrument, warn};

use crate::application::aggregator::{Aggregator, Disposition};
use crate::challenge::{ChallengeDetector, ChallengeHandler};
use crate::config::settings::Settings;
use crate::domain::models::outcome::{RunSummary, StopReason, WorkerResult};
use crate::domain::repositories::record_repository::RecordRepository;
use crate::domain::services::extraction_service::Extractor;
use crate::domain::services::rate_limiting_service::DomainRateLimiter;
use crate::engines::traits::FetchResourceFactory;
use crate::infrastructure::metrics::QUEUE_DEPTH;
use crate::infrastructure::resource_monitor::ResourceMonitor;
use crate::queue::scheduler::TaskScheduler;
use crate::queue::task_queue::{PriorityTaskQueue, TaskQueue};
use crate::utils::errors::CollectionError;
use crate::utils::retry_policy::RetryBackoff;
use crate::workers::manager::WorkerManager;
use crate::workers::worker::{StopHandle, StopSignal, WorkerContext};

/// 并行采集编排器
///
/// 持有本次运行的全部状态：配置、域名限流状态、停止信号。没有进程级的
/// 全局状态，同一进程内可以并存多个编排器。
pub struct CollectionOrchestrator {
    settings: Settings,
    factory: Arc<dyn FetchResourceFactory>,
    extractor: Arc<dyn Extractor>,
    repository: Arc<dyn RecordRepository>,
    monitor: Arc<dyn ResourceMonitor>,
    rate_limiter: Arc<DomainRateLimiter>,
    backoff: RetryBackoff,
    stop: StopHandle,
}

impl CollectionOrchestrator {
    pub fn new(
        settings: Settings,
        factory: Arc<dyn FetchResourceFactory>,
        extractor: Arc<dyn Extractor>,
        repository: Arc<dyn RecordRepository>,
        monitor: Arc<dyn ResourceMonitor>,
    ) -> Self {
        let rate_limiter = Arc::new(DomainRateLimiter::from_settings(&settings));
        let backoff = RetryBackoff::from_settings(&settings.collection.retry);
        Self {
            settings,
            factory,
            extractor,
            repository,
            monitor,
            rate_limiter,
            backoff,
            stop: StopHandle::new(),
        }
    }

    /// 覆盖重新入队的退避策略
    pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// 用于从外部取消运行的句柄
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// 执行一次完整的采集运行
    ///
    /// # 参数
    ///
    /// * `sources` - 来源站点名称，需在配置中存在
    /// * `keywords` - 搜索关键词
    /// * `max_pages` - 每个关键词的最大页数
    /// * `target` - 目标记录数，0 表示不设目标
    ///
    /// # 返回值
    ///
    /// 单个任务的失败只体现在汇总中。只有无法生成任务或没有任何 worker
    /// 启动时才返回错误。
    #[instrument(skip(self, sources, keywords), fields(sources = sources.len(), keywords = keywords.len()))]
    pub async fn run_collection(
        &self,
        sources: &[String],
        keywords: &[String],
        max_pages: u32,
        target: u64,
    ) -> Result<RunSummary, CollectionError> {
        let started = Instant::now();
        let collection = &self.settings.collection;

        let queue = Arc::new(PriorityTaskQueue::new());
        let scheduler = TaskScheduler::from_settings(queue.clone(), &self.settings)
            .with_backoff(self.backoff.clone());
        let tasks = scheduler.generate_tasks(sources, keywords, max_pages)?;
        let batches = TaskScheduler::into_batches(tasks, collection.batch_size);
        let batch_count = batches.len();

        let detector = Arc::new(ChallengeDetector::new(
            self.settings.challenge.detection_threshold,
        ));
        let handler = Arc::new(ChallengeHandler::new(
            detector.clone(),
            self.settings.challenge.clone(),
        ));
        let (results_tx, mut results) = mpsc::unbounded_channel::<WorkerResult>();
        let ctx = WorkerContext {
            queue: queue.clone(),
            rate_limiter: self.rate_limiter.clone(),
            detector,
            handler,
            extractor: self.extractor.clone(),
            sources: Arc::new(self.settings.sources.clone()),
            results: results_tx,
            stop: self.stop.subscribe(),
            task_timeout: collection.task_timeout(),
            handling_budget: collection.handling_budget(),
            queue_poll: collection.queue_poll(),
        };
        let manager = WorkerManager::start(
            self.factory.as_ref(),
            collection.fetch_mode,
            collection.effective_workers(),
            ctx,
        )
        .await?;

        info!(
            batches = batch_count,
            workers = manager.size(),
            target,
            "采集开始"
        );

        let mut stop = self.stop.subscribe();
        let mut aggregator = Aggregator::new(self.repository.clone());
        let mut stop_reason = StopReason::BatchesExhausted;
        let mut batches_processed = 0;

        for (index, batch) in batches.into_iter().enumerate() {
            if stop.is_stopped() {
                stop_reason = StopReason::Cancelled;
                break;
            }
            if index > 0 && !pause(collection.batch_pause(), &mut stop).await {
                stop_reason = StopReason::Cancelled;
                break;
            }
            if !self.wait_for_resources(&mut stop).await {
                stop_reason = StopReason::Cancelled;
                break;
            }

            let mut outstanding = scheduler
                .submit_batch(batch)
                .await
                .map_err(|e| CollectionError::Queue(e.to_string()))?;
            info!(batch = index + 1, of = batch_count, tasks = outstanding, "批次开始");

            let mut cancelled = false;
            while outstanding > 0 {
                gauge!(QUEUE_DEPTH).set(queue.len() as f64);
                let received = tokio::select! {
                    biased;
                    _ = stop.stopped() => {
                        cancelled = true;
                        break;
                    }
                    received = results.recv() => received,
                };
                let Some(result) = received else {
                    warn!(outstanding, "所有 worker 均已退出，批次提前结束");
                    break;
                };
                outstanding -= 1;
                if aggregator.consume(result, &scheduler).await == Disposition::Requeued {
                    outstanding += 1;
                }
            }

            aggregator.flush().await;
            batches_processed += 1;
            if cancelled {
                stop_reason = StopReason::Cancelled;
                break;
            }

            let total = aggregator.current_total().await;
            info!(batch = index + 1, total, target, "批次结束");
            if target > 0 && total >= target {
                stop_reason = StopReason::TargetReached;
                break;
            }
        }

        // Workers block on the queue until it closes; in-flight attempts still report
        queue.close();
        let summaries = manager.shutdown().await;
        while let Ok(result) = results.try_recv() {
            aggregator.consume(result, &scheduler).await;
        }
        aggregator.flush().await;

        let total_records = aggregator.current_total().await;
        let stats = aggregator.stats();
        let elapsed = started.elapsed();
        let records_per_second = if elapsed.as_secs_f64() > 0.0 {
            stats.records_persisted as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let summary = RunSummary {
            total_records,
            elapsed,
            tasks_completed: stats.tasks_completed,
            tasks_failed: stats.tasks_failed,
            tasks_abandoned: stats.tasks_abandoned,
            total_attempts: stats.total_attempts,
            records_per_second,
            target_achieved: target > 0 && total_records >= target,
            batches_processed,
            success_rate: stats.success_rate(),
            challenges_detected: stats.challenges_detected,
            challenges_resolved: stats.challenges_resolved,
            stop_reason,
        };
        info!(
            total_records = summary.total_records,
            tasks_completed = summary.tasks_completed,
            tasks_failed = summary.tasks_failed,
            tasks_abandoned = summary.tasks_abandoned,
            workers = summaries.len(),
            ?elapsed,
            stop_reason = ?summary.stop_reason,
            "采集结束"
        );
        Ok(summary)
    }

    /// 资源超限时推迟下一批次
    ///
    /// 超过最长等待时间后照常开始；被取消时返回 `false`。
    async fn wait_for_resources(&self, stop: &mut StopSignal) -> bool {
        let collection = &self.settings.collection;
        let pause_for = Duration::from_millis(collection.backpressure_pause_ms);
        let max_wait = Duration::from_secs(collection.max_backpressure_wait_secs);
        let started = Instant::now();

        loop {
            let sample = self.monitor.sample();
            if sample.within_limits {
                return true;
            }
            if started.elapsed() >= max_wait {
                warn!(
                    memory_mb = sample.memory_used_mb,
                    cpu_percent = sample.cpu_percent,
                    "资源持续超限，仍然开始下一批次"
                );
                return true;
            }
            warn!(
                memory_mb = sample.memory_used_mb,
                cpu_percent = sample.cpu_percent,
                "资源超限，推迟下一批次"
            );
            if !pause(pause_for, stop).await {
                return false;
            }
        }
    }
}

/// 可被停止信号打断的等待，被打断时返回 `false`
async fn pause(duration: Duration, stop: &mut StopSignal) -> bool {
    if duration.is_zero() {
        return !stop.is_stopped();
    }
    tokio::select! {
        biased;
        _ = stop.stopped() => false,
        _ = sleep(duration) => true,
    }
}
