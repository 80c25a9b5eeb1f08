// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 应用层模块
///
/// 编排一次采集运行：生成批次、驱动 worker 池、汇总结果。
pub mod aggregator;
pub mod orchestrator;

pub use aggregator::{Aggregator, Disposition, RunStats};
pub use orchestrator::CollectionOrchestrator;
