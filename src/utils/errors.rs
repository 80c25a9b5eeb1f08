// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use thiserror::Error;

/// 仓库层错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 采集运行级错误
///
/// 只有在无法生成任务或没有任何 worker 启动时才会整体失败，
/// 单个任务的失败体现在 `RunSummary` 中。
#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("无法生成任务: {0}")]
    NoTasks(String),

    #[error("没有任何 worker 成功启动")]
    NoWorkers,

    #[error("队列错误: {0}")]
    Queue(String),
}
