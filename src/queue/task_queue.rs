// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::domain::models::task::Task;

/// 队列错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// 队列已关闭
    #[error("Queue closed")]
    Closed,
}

/// 任务队列特质
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// 入队任务
    async fn enqueue(&self, task: Task) -> Result<(), QueueError>;

    /// 延迟入队，`delay` 过后任务才可被取出
    async fn enqueue_after(&self, task: Task, delay: Duration) -> Result<(), QueueError>;

    /// 出队任务
    ///
    /// 队列为空时最多阻塞 `timeout`，超时返回 `Ok(None)`。
    async fn dequeue(&self, timeout: Duration) -> Result<Option<Task>, QueueError>;

    /// 可取出与延迟中的任务总数
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 关闭队列并唤醒所有等待者
    fn close(&self);
}

struct QueueEntry {
    seq: u64,
    task: Task,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // BinaryHeap pops the greatest: higher priority, then smaller source, then earlier seq
    fn cmp(&self, other: &Self) -> Ordering {
        self.task
            .priority
            .cmp(&other.task.priority)
            .then_with(|| other.task.source.cmp(&self.task.source))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct DelayedEntry {
    ready_at: Instant,
    task: Task,
}

#[derive(Default)]
struct QueueState {
    ready: BinaryHeap<QueueEntry>,
    delayed: Vec<DelayedEntry>,
    next_seq: u64,
    closed: bool,
}

impl QueueState {
    fn push_ready(&mut self, task: Task) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.ready.push(QueueEntry { seq, task });
    }

    /// 把到期的延迟任务移入就绪堆
    fn promote_due(&mut self, now: Instant) {
        if self.delayed.is_empty() {
            return;
        }
        let mut due = Vec::new();
        self.delayed.retain_mut(|entry| {
            if entry.ready_at <= now {
                due.push((entry.ready_at, entry.task.clone()));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(ready_at, _)| *ready_at);
        for (_, task) in due {
            self.push_ready(task);
        }
    }

    fn next_ready_at(&self) -> Option<Instant> {
        self.delayed.iter().map(|entry| entry.ready_at).min()
    }
}

/// 进程内优先级任务队列
///
/// 优先级高者先出；同优先级按来源名称、再按入队顺序。
/// worker 在空队列上阻塞等待而不是轮询。
#[derive(Default)]
pub struct PriorityTaskQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl PriorityTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_pop(&self) -> Result<Result<Task, Option<Instant>>, QueueError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(QueueError::Closed);
        }
        state.promote_due(Instant::now());
        match state.ready.pop() {
            Some(entry) => Ok(Ok(entry.task)),
            None => Ok(Err(state.next_ready_at())),
        }
    }
}

#[async_trait]
impl TaskQueue for PriorityTaskQueue {
    async fn enqueue(&self, task: Task) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.push_ready(task);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn enqueue_after(&self, task: Task, delay: Duration) -> Result<(), QueueError> {
        if delay.is_zero() {
            return self.enqueue(task).await;
        }
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.delayed.push(DelayedEntry {
                ready_at: Instant::now() + delay,
                task,
            });
        }
        // waiters recompute their wake-up time
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Task>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_ready_at = match self.try_pop()? {
                Ok(task) => return Ok(Some(task)),
                Err(next) => next,
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }
            let wake_at = next_ready_at.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    fn len(&self) -> usize {
        let state = self.state.lock();
        state.ready.len() + state.delayed.len()
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::task::FetchMode;
    use std::sync::Arc;

    fn task(source: &str, keyword: &str, priority: i32) -> Task {
        Task::new(source, keyword, 1, FetchMode::Lightweight, 3).with_priority(priority)
    }

    #[tokio::test]
    async fn test_dequeue_order_priority_source_then_insertion() {
        let queue = PriorityTaskQueue::new();
        queue.enqueue(task("walmart", "a", 100)).await.unwrap();
        queue.enqueue(task("ebay", "b", 100)).await.unwrap();
        queue.enqueue(task("amazon", "c", 120)).await.unwrap();
        queue.enqueue(task("ebay", "d", 100)).await.unwrap();
        queue.enqueue(task("amazon", "e", 50)).await.unwrap();

        let mut order = Vec::new();
        while let Some(t) = queue.dequeue(Duration::ZERO).await.unwrap() {
            order.push(t.keyword);
        }
        assert_eq!(order, vec!["c", "b", "d", "a", "e"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_queue_times_out() {
        let queue = PriorityTaskQueue::new();
        let started = Instant::now();
        let result = queue.dequeue(Duration::from_secs(2)).await.unwrap();
        assert!(result.is_none());
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(PriorityTaskQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(60)).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        queue.enqueue(task("ebay", "mouse", 10)).await.unwrap();

        let got = consumer.await.unwrap().unwrap();
        assert_eq!(got.map(|t| t.keyword), Some("mouse".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_task_becomes_ready_after_delay() {
        let queue = PriorityTaskQueue::new();
        queue
            .enqueue_after(task("amazon", "tablet", 10), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);
        assert!(queue.dequeue(Duration::ZERO).await.unwrap().is_none());

        let started = Instant::now();
        let got = queue.dequeue(Duration::from_secs(30)).await.unwrap();
        assert!(got.is_some());
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(30));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_and_wakes() {
        let queue = Arc::new(PriorityTaskQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(60)).await })
        };
        tokio::task::yield_now().await;
        queue.close();

        assert!(matches!(consumer.await.unwrap(), Err(QueueError::Closed)));
        assert_eq!(
            queue.enqueue(task("ebay", "x", 1)).await,
            Err(QueueError::Closed)
        );
    }
}
