// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::settings::{SourceProfile, Settings};
use crate::domain::models::outcome::FailureKind;
use crate::domain::models::task::{FetchMode, Task};
use crate::domain::services::priority_service::PriorityCalculator;
use crate::queue::task_queue::{QueueError, TaskQueue};
use crate::utils::errors::CollectionError;
use crate::utils::retry_policy::RetryBackoff;

/// 失败任务的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 已重新入队
    Requeued { retry_count: u32, delay: Duration },
    /// 重试耗尽或不可重试，任务被丢弃
    Abandoned,
}

/// 任务调度器
///
/// 生成 来源 × 关键词 × 页码 的任务并计算优先级，按批次送入队列，
/// 失败的任务按退避重新入队。
pub struct TaskScheduler {
    queue: Arc<dyn TaskQueue>,
    priorities: PriorityCalculator,
    sources: HashMap<String, SourceProfile>,
    backoff: RetryBackoff,
    fetch_mode: FetchMode,
    max_retries: u32,
}

impl TaskScheduler {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        priorities: PriorityCalculator,
        sources: HashMap<String, SourceProfile>,
        backoff: RetryBackoff,
        fetch_mode: FetchMode,
        max_retries: u32,
    ) -> Self {
        Self {
            queue,
            priorities,
            sources,
            backoff,
            fetch_mode,
            max_retries,
        }
    }

    pub fn from_settings(queue: Arc<dyn TaskQueue>, settings: &Settings) -> Self {
        Self::new(
            queue,
            PriorityCalculator::new(settings.priority.clone(), &settings.sources),
            settings.sources.clone(),
            RetryBackoff::from_settings(&settings.collection.retry),
            settings.collection.fetch_mode,
            settings.collection.max_retries,
        )
    }

    /// 替换重试退避
    pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// 生成全部任务
    ///
    /// 按 页码 → 关键词 → 来源 交错生成，使相邻任务落在不同域名上；
    /// 随后按优先级降序稳定排序，同优先级按来源名称。未配置的来源会被跳过。
    pub fn generate_tasks(
        &self,
        sources: &[String],
        keywords: &[String],
        max_pages: u32,
    ) -> Result<Vec<Task>, CollectionError> {
        let known: Vec<&String> = sources
            .iter()
            .filter(|name| {
                let found = self.sources.contains_key(name.as_str());
                if !found {
                    warn!(source = %name, "来源未配置，跳过");
                }
                found
            })
            .collect();

        if known.is_empty() {
            return Err(CollectionError::NoTasks("no configured sources".to_string()));
        }
        if keywords.is_empty() {
            return Err(CollectionError::NoTasks("no keywords".to_string()));
        }
        if max_pages == 0 {
            return Err(CollectionError::NoTasks("max pages is zero".to_string()));
        }

        let mut tasks = Vec::with_capacity(known.len() * keywords.len() * max_pages as usize);
        for page in 1..=max_pages {
            for keyword in keywords {
                for source in &known {
                    let priority = self.priorities.priority(source, keyword, page);
                    tasks.push(
                        Task::new(
                            source.as_str(),
                            keyword.as_str(),
                            page,
                            self.fetch_mode,
                            self.max_retries,
                        )
                        .with_priority(priority),
                    );
                }
            }
        }

        tasks.sort_by(|a, b| {
            Reverse(a.priority)
                .cmp(&Reverse(b.priority))
                .then_with(|| a.source.cmp(&b.source))
        });

        info!(
            tasks = tasks.len(),
            sources = known.len(),
            keywords = keywords.len(),
            max_pages,
            "任务已生成"
        );
        Ok(tasks)
    }

    /// 按固定大小切分批次
    pub fn into_batches(tasks: Vec<Task>, batch_size: usize) -> Vec<Vec<Task>> {
        let size = batch_size.max(1);
        let mut batches = Vec::with_capacity(tasks.len().div_ceil(size));
        let mut current = Vec::with_capacity(size);
        for task in tasks {
            current.push(task);
            if current.len() == size {
                batches.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
            }
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }

    /// 把一个批次送入队列
    pub async fn submit_batch(&self, batch: Vec<Task>) -> Result<usize, QueueError> {
        let count = batch.len();
        for task in batch {
            self.queue.enqueue(task).await?;
        }
        debug!(count, "批次已入队");
        Ok(count)
    }

    /// 处理一次失败的尝试
    ///
    /// `retry_count < max_retries` 时递增并按失败类型退避后重新入队，
    /// 优先级用同一公式重新计算；否则丢弃。
    pub async fn handle_failure(
        &self,
        task: Task,
        kind: FailureKind,
    ) -> Result<RetryDecision, QueueError> {
        if !kind.is_retryable() {
            warn!(task = %task.key(), kind = %kind, "任务不可重试，已丢弃");
            return Ok(RetryDecision::Abandoned);
        }

        let previous = task.retry_count;
        let key = task.key();
        let Some(mut retry) = task.into_retry() else {
            warn!(task = %key, retries = previous, "重试次数耗尽，任务已丢弃");
            return Ok(RetryDecision::Abandoned);
        };

        retry.priority = self.priorities.priority(&retry.source, &retry.keyword, retry.page);
        let delay = self.backoff.delay_for(kind, previous);
        let retry_count = retry.retry_count;
        self.queue.enqueue_after(retry, delay).await?;

        info!(task = %key, retry_count, ?delay, kind = %kind, "任务已重新入队");
        Ok(RetryDecision::Requeued { retry_count, delay })
    }
}
