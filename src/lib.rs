// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 应用层模块
///
/// 采集编排器与结果聚合
pub mod application;

/// 反爬挑战模块
///
/// 多信号检测与绕过策略执行
pub mod challenge;

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 领域模块
///
/// 包含核心数据类型、服务和仓库接口
pub mod domain;

/// 引擎模块
///
/// HTTP 会话与浏览器会话两种抓取资源
pub mod engines;

/// 基础设施模块
///
/// 资源监控、记录存储与指标导出
pub mod infrastructure;

/// 队列模块
///
/// 实现任务队列和调度功能
pub mod queue;

/// 工具模块
///
/// 提供通用的工具函数和辅助功能
pub mod utils;

/// 工作器模块
///
/// 实现采集 worker 和工作器管理
pub mod workers;
