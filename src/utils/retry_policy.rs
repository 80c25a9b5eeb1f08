// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::time::Duration;

use crate::config::settings::RetrySettings;
use crate::domain::models::outcome::FailureKind;

/// 重试退避策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 初始退避时间
    pub initial_backoff: Duration,
    /// 最大退避时间
    pub max_backoff: Duration,
    /// 退避乘数
    pub backoff_multiplier: f64,
    /// 抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
    /// 是否启用抖动
    pub enable_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            enable_jitter: true,
        }
    }
}

impl RetryPolicy {
    /// 以给定初始退避创建策略，其余参数取自配置
    pub fn with_initial(initial_backoff: Duration, settings: &RetrySettings) -> Self {
        Self {
            initial_backoff,
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            backoff_multiplier: settings.backoff_multiplier,
            jitter_factor: 0.1,
            enable_jitter: settings.jitter,
        }
    }

    /// 计算第 `attempt` 次重试的退避时间，`attempt` 从 1 开始
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) as i32 - 1;
        let backoff_secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        // 限制最大退避时间
        let capped_backoff = backoff_secs.min(self.max_backoff.as_secs_f64());

        let final_backoff = if self.enable_jitter {
            let jitter_range = capped_backoff * self.jitter_factor;
            if jitter_range > 0.0 {
                let jitter = rand::random_range(-jitter_range..jitter_range);
                (capped_backoff + jitter).max(0.0)
            } else {
                capped_backoff
            }
        } else {
            capped_backoff
        };

        Duration::from_secs_f64(final_backoff)
    }
}

/// 按失败类型区分的退避
///
/// 挑战未消除的任务使用更长的初始退避，给站点冷却时间。
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    pub transient: RetryPolicy,
    pub challenge: RetryPolicy,
}

impl RetryBackoff {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            transient: RetryPolicy::with_initial(
                Duration::from_millis(settings.transient_backoff_ms),
                settings,
            ),
            challenge: RetryPolicy::with_initial(
                Duration::from_millis(settings.challenge_backoff_ms),
                settings,
            ),
        }
    }

    /// 不等待直接重试
    pub fn immediate() -> Self {
        let zero = RetryPolicy {
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
            enable_jitter: false,
        };
        Self {
            transient: zero.clone(),
            challenge: zero,
        }
    }

    /// 任务已重试 `retry_count` 次后，下一次入队前的等待
    pub fn delay_for(&self, kind: FailureKind, retry_count: u32) -> Duration {
        let attempt = retry_count.saturating_add(1);
        match kind {
            FailureKind::ChallengePersisted => self.challenge.calculate_backoff(attempt),
            FailureKind::Transient | FailureKind::Permanent => {
                self.transient.calculate_backoff(attempt)
            }
        }
    }
}
