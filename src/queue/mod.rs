// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 队列模块
///
/// 进程内优先级队列与负责生成任务、处理重试的调度器
pub mod scheduler;
pub mod task_queue;

pub use scheduler::{RetryDecision, TaskScheduler};
pub use task_queue::{PriorityTaskQueue, QueueError, TaskQueue};
