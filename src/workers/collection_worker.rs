// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::challenge::actions::ReloadPacing;
use crate::challenge::handler::HandlingScope;
use crate::domain::models::outcome::{ChallengeReport, FailureKind, TaskFailure, WorkerResult};
use crate::domain::models::record::RawRecord;
use crate::domain::models::task::Task;
use crate::domain::services::rate_limiting_service::DomainPermit;
use crate::engines::traits::{EngineError, FetchResource};
use crate::queue::task_queue::QueueError;
use crate::workers::worker::{WorkerContext, WorkerSummary};

/// 采集 worker
///
/// 独占一个抓取资源直到退出。循环：检查停止信号 → 出队 → 按域名限流 →
/// 抓取 → 检测挑战并处理 → 提取记录 → 发送结果。
pub struct CollectionWorker {
    worker_id: usize,
    resource: Box<dyn FetchResource>,
    ctx: WorkerContext,
    current_source: Option<String>,
    attempts: u64,
}

impl CollectionWorker {
    pub fn new(worker_id: usize, resource: Box<dyn FetchResource>, ctx: WorkerContext) -> Self {
        Self {
            worker_id,
            resource,
            ctx,
            current_source: None,
            attempts: 0,
        }
    }

    /// 运行 worker 直到收到停止信号或队列关闭，退出前释放抓取资源
    pub async fn run(mut self) -> WorkerSummary {
        let resource_id = self.resource.resource_id();
        info!(worker_id = self.worker_id, resource_id = %resource_id, "Collection worker started");

        loop {
            if self.ctx.stop.is_stopped() {
                break;
            }

            let next = tokio::select! {
                biased;
                _ = self.ctx.stop.stopped() => break,
                next = self.ctx.queue.dequeue(self.ctx.queue_poll) => next,
            };
            let task = match next {
                Ok(Some(task)) => task,
                Ok(None) => continue,
                Err(QueueError::Closed) => break,
            };

            let Some(result) = self.process(task).await else {
                break;
            };
            self.attempts += 1;
            if self.ctx.results.send(result).is_err() {
                warn!(worker_id = self.worker_id, "结果通道已关闭，worker 退出");
                break;
            }
        }

        if let Err(e) = self.resource.close().await {
            warn!(worker_id = self.worker_id, "关闭抓取资源失败: {}", e);
        }
        info!(
            worker_id = self.worker_id,
            attempts = self.attempts,
            "Collection worker stopped"
        );

        WorkerSummary {
            worker_id: self.worker_id,
            resource_id,
            attempts: self.attempts,
        }
    }

    /// 执行一次任务尝试，被取消时返回 `None`
    #[instrument(skip(self, task), fields(worker_id = self.worker_id, task = %task.key(), retry = task.retry_count))]
    async fn process(&mut self, task: Task) -> Option<WorkerResult> {
        let started = Instant::now();
        let worker_id = self.worker_id;

        let Some(profile) = self.ctx.sources.get(&task.source).cloned() else {
            error!("来源未配置");
            return Some(WorkerResult::failed(
                task,
                FailureKind::Permanent,
                "source is not configured",
                started.elapsed(),
                worker_id,
                None,
            ));
        };
        let url = profile.search_url(&task.keyword, task.page);
        let domain = profile.domain().unwrap_or_else(|| task.source.clone());

        if self.current_source.as_deref() != Some(task.source.as_str()) {
            if let Err(e) = self.resource.prepare_for_source(&profile).await {
                warn!("切换来源设置失败: {}", e);
                return Some(WorkerResult::failed(
                    task,
                    classify(&e),
                    e.to_string(),
                    started.elapsed(),
                    worker_id,
                    None,
                ));
            }
            self.current_source = Some(task.source.clone());
        }

        let permit = tokio::select! {
            biased;
            _ = self.ctx.stop.stopped() => return None,
            permit = self.ctx.rate_limiter.acquire(&domain) => permit,
        };

        let mut challenge = None;
        let task_timeout = self.ctx.task_timeout;
        let handling_deadline = Instant::now() + self.ctx.handling_budget;
        let attempt = self.attempt(&task, &url, &domain, permit, handling_deadline, &mut challenge);
        let outcome = match timeout(task_timeout, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TaskFailure {
                kind: FailureKind::Transient,
                message: format!("attempt timed out after {:?}", task_timeout),
            }),
        };

        let elapsed = started.elapsed();
        Some(match outcome {
            Ok(records) => {
                debug!(records = records.len(), ?elapsed, "任务完成");
                WorkerResult::succeeded(task, records, elapsed, worker_id, challenge)
            }
            Err(failure) => {
                warn!(kind = %failure.kind, ?elapsed, "任务失败: {}", failure.message);
                WorkerResult::failed(task, failure.kind, failure.message, elapsed, worker_id, challenge)
            }
        })
    }

    async fn attempt(
        &mut self,
        task: &Task,
        url: &str,
        domain: &str,
        permit: DomainPermit,
        handling_deadline: Instant,
        challenge: &mut Option<ChallengeReport>,
    ) -> Result<Vec<RawRecord>, TaskFailure> {
        let fetched = self.resource.fetch(url).await;
        // the request counts as completed for rate limiting whether it failed or not
        permit.complete();
        let mut page = fetched.map_err(|e| failure(&e))?;

        let detection = self.ctx.detector.detect(&page);
        if detection.detected {
            info!(
                challenge_type = %detection.challenge_type,
                confidence = detection.confidence,
                strategy = %detection.suggested_strategy,
                "检测到反爬挑战"
            );
            let scope = HandlingScope::new(
                ReloadPacing::new(self.ctx.rate_limiter.clone(), domain),
                self.ctx.stop.clone(),
                handling_deadline,
            );
            let outcome = self
                .ctx
                .handler
                .handle(&detection, self.resource.as_mut(), scope)
                .await;
            *challenge = Some(ChallengeReport {
                strategy: outcome.strategy_used,
                resolved: outcome.success,
            });
            if !outcome.success {
                return Err(TaskFailure {
                    kind: FailureKind::ChallengePersisted,
                    message: format!(
                        "{} challenge persisted after {} attempts of {}",
                        detection.challenge_type, outcome.attempts_made, outcome.strategy_used
                    ),
                });
            }
            page = self.resource.snapshot().await.map_err(|e| failure(&e))?;
        }

        if !page.is_success() {
            let kind = match page.status_code {
                404 | 410 => FailureKind::Permanent,
                _ => FailureKind::Transient,
            };
            return Err(TaskFailure {
                kind,
                message: format!("unexpected HTTP status {}", page.status_code),
            });
        }

        Ok(self.ctx.extractor.extract(&page.html, task))
    }
}

fn classify(error: &EngineError) -> FailureKind {
    if error.is_retryable() {
        FailureKind::Transient
    } else {
        FailureKind::Permanent
    }
}

fn failure(error: &EngineError) -> TaskFailure {
    TaskFailure {
        kind: classify(error),
        message: error.to_string(),
    }
}
