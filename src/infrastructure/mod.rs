// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 基础设施层模块
///
/// 包含的子模块：
/// - 指标（metrics）：Prometheus 导出器与指标名称
/// - 资源监控（resource_monitor）：进程内存与 CPU 采样
/// - 存储（storage）：记录仓库的具体实现
pub mod metrics;
pub mod resource_monitor;
pub mod storage;
