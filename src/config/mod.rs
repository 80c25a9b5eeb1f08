// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 配置模块
///
/// 处理采集编排、来源站点、挑战处理、浏览器与存储等配置
pub mod settings;
