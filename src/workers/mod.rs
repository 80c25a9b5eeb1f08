// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工作器模块
///
/// 每个 worker 独占一个抓取资源，从共享队列取任务，结果经通道
/// 交给聚合器
pub mod collection_worker;
pub mod manager;
pub mod worker;

pub use collection_worker::CollectionWorker;
pub use manager::WorkerManager;
pub use worker::{StopHandle, StopSignal, WorkerContext, WorkerSummary};
