// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 反爬挑战模块
///
/// 检测器融合五种信号得出结论，处理器按结论选择策略并在
/// worker 自己的抓取资源上执行
pub mod actions;
pub mod detector;
pub mod handler;
pub mod lexicon;

pub use detector::ChallengeDetector;
pub use handler::ChallengeHandler;
