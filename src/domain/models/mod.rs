// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域模型模块
///
/// - 任务（task）：一次 (来源, 关键词, 页码) 采集单元
/// - 检测（detection）：反爬挑战检测信号、结论与策略
/// - 结果（outcome）：挑战处理结果、worker 结果、运行汇总
/// - 记录（record）：提取出的原始记录
pub mod detection;
pub mod outcome;
pub mod record;
pub mod task;
