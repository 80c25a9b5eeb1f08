// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::challenge::actions::{self, supported, ReloadPacing};
use crate::challenge::detector::ChallengeDetector;
use crate::config::settings::ChallengeSettings;
use crate::domain::models::detection::{ChallengeType, DetectionResult, Strategy};
use crate::domain::models::outcome::{FinalStatus, HandlingOutcome};
use crate::engines::traits::{EngineError, FetchResource};
use crate::workers::worker::StopSignal;

/// 一次策略尝试，`Ok(true)` 表示重新检测后页面已干净
type StrategyFn = for<'a> fn(
    &'a ChallengeHandler,
    &'a mut dyn FetchResource,
    &'a ReloadPacing,
) -> BoxFuture<'a, Result<bool, EngineError>>;

/// 策略与实现的对应表
const STRATEGY_TABLE: [(Strategy, StrategyFn); 5] = [
    (Strategy::Aggressive, run_aggressive),
    (Strategy::CloudflareBypass, run_cloudflare),
    (Strategy::AdvancedStealth, run_stealth),
    (Strategy::Standard, run_standard),
    (Strategy::Gentle, run_gentle),
];

fn run_aggressive<'a>(
    handler: &'a ChallengeHandler,
    resource: &'a mut dyn FetchResource,
    pacing: &'a ReloadPacing,
) -> BoxFuture<'a, Result<bool, EngineError>> {
    Box::pin(handler.aggressive_bypass(resource, pacing))
}

fn run_cloudflare<'a>(
    handler: &'a ChallengeHandler,
    resource: &'a mut dyn FetchResource,
    pacing: &'a ReloadPacing,
) -> BoxFuture<'a, Result<bool, EngineError>> {
    Box::pin(handler.cloudflare_bypass(resource, pacing))
}

fn run_stealth<'a>(
    handler: &'a ChallengeHandler,
    resource: &'a mut dyn FetchResource,
    pacing: &'a ReloadPacing,
) -> BoxFuture<'a, Result<bool, EngineError>> {
    Box::pin(handler.advanced_stealth(resource, pacing))
}

fn run_standard<'a>(
    handler: &'a ChallengeHandler,
    resource: &'a mut dyn FetchResource,
    pacing: &'a ReloadPacing,
) -> BoxFuture<'a, Result<bool, EngineError>> {
    Box::pin(handler.standard_bypass(resource, pacing))
}

fn run_gentle<'a>(
    handler: &'a ChallengeHandler,
    resource: &'a mut dyn FetchResource,
    pacing: &'a ReloadPacing,
) -> BoxFuture<'a, Result<bool, EngineError>> {
    Box::pin(handler.gentle_retry(resource, pacing))
}

fn strategy_fn(strategy: Strategy) -> StrategyFn {
    STRATEGY_TABLE
        .iter()
        .find(|(s, _)| *s == strategy)
        .map(|(_, f)| *f)
        .unwrap_or(run_gentle)
}

/// 一次挑战处理的运行边界
///
/// reload 经过域名限流；停止信号和截止时间都会中断处理，
/// 截止时间由 worker 按任务剩余时限给出。
pub struct HandlingScope {
    pacing: ReloadPacing,
    stop: StopSignal,
    deadline: Instant,
}

impl HandlingScope {
    pub fn new(pacing: ReloadPacing, stop: StopSignal, deadline: Instant) -> Self {
        Self {
            pacing,
            stop,
            deadline,
        }
    }
}

enum Finish {
    Resolved,
    Exhausted,
    DeadlineReached,
    Stopped,
}

/// 反爬挑战处理器
///
/// 按检测结论建议的策略执行最多 `max_attempts` 次尝试，每次尝试后
/// 重新检测，首次成功即停止。处理失败不是错误，而是以
/// `HandlingOutcome { success: false, .. }` 返回，由 worker 按普通失败重试。
pub struct ChallengeHandler {
    detector: Arc<ChallengeDetector>,
    settings: ChallengeSettings,
}

impl ChallengeHandler {
    pub fn new(detector: Arc<ChallengeDetector>, settings: ChallengeSettings) -> Self {
        Self { detector, settings }
    }

    pub fn detector(&self) -> &ChallengeDetector {
        &self.detector
    }

    /// 对当前资源执行挑战处理
    ///
    /// 收到停止信号时立即放弃，结果为 `Persistent`；到达截止时间时放弃
    /// 剩余尝试，由最后一次检测决定结果。
    pub async fn handle(
        &self,
        detection: &DetectionResult,
        resource: &mut dyn FetchResource,
        scope: HandlingScope,
    ) -> HandlingOutcome {
        let started = Instant::now();
        let strategy = detection.suggested_strategy;
        let HandlingScope {
            pacing,
            mut stop,
            deadline,
        } = scope;

        info!(
            resource_id = %resource.resource_id(),
            domain = %pacing.domain(),
            strategy = %strategy,
            challenge_type = %detection.challenge_type,
            confidence = detection.confidence,
            "开始处理反爬挑战"
        );

        let mut attempts_made = 0;
        let finish = {
            let attempts = self.run_attempts(strategy, &mut *resource, &pacing, &mut attempts_made);
            tokio::select! {
                biased;
                _ = stop.stopped() => Finish::Stopped,
                _ = sleep_until(deadline) => Finish::DeadlineReached,
                resolved = attempts => if resolved { Finish::Resolved } else { Finish::Exhausted },
            }
        };

        let success = match finish {
            Finish::Resolved => true,
            Finish::Stopped => {
                info!(strategy = %strategy, attempts_made, "收到停止信号，中断挑战处理");
                false
            }
            Finish::DeadlineReached => {
                warn!(strategy = %strategy, attempts_made, "挑战处理到达任务时限");
                self.is_clear(resource).await.unwrap_or(false)
            }
            // final verification
            Finish::Exhausted => self.is_clear(resource).await.unwrap_or(false),
        };

        let final_status = if success {
            FinalStatus::Resolved
        } else {
            FinalStatus::Persistent
        };
        let elapsed = started.elapsed();
        if success {
            info!(strategy = %strategy, attempts_made, ?elapsed, "挑战已消除");
        } else {
            warn!(strategy = %strategy, attempts_made, ?elapsed, "挑战处理失败");
        }

        HandlingOutcome {
            success,
            strategy_used: strategy,
            attempts_made,
            elapsed,
            final_status,
            recommendations: recommendations(
                success,
                strategy,
                attempts_made,
                detection.challenge_type,
            ),
        }
    }

    async fn run_attempts(
        &self,
        strategy: Strategy,
        resource: &mut dyn FetchResource,
        pacing: &ReloadPacing,
        attempts_made: &mut u32,
    ) -> bool {
        let run = strategy_fn(strategy);
        let max_attempts = self.settings.max_attempts.max(1);

        while *attempts_made < max_attempts {
            *attempts_made += 1;
            match run(self, &mut *resource, pacing).await {
                Ok(true) => return true,
                Ok(false) => debug!(attempt = *attempts_made, strategy = %strategy, "挑战仍然存在"),
                Err(e) => warn!(attempt = *attempts_made, strategy = %strategy, "策略执行失败: {}", e),
            }
            if *attempts_made < max_attempts {
                actions::pause(self.settings.attempt_pause).await;
            }
        }
        false
    }

    /// 对当前页面重新检测
    async fn is_clear(&self, resource: &mut dyn FetchResource) -> Result<bool, EngineError> {
        let page = resource.snapshot().await?;
        Ok(!self.detector.detect(&page).detected)
    }

    /// 依次执行轻量原语，任一步之后页面干净即返回
    async fn aggressive_bypass(
        &self,
        resource: &mut dyn FetchResource,
        pacing: &ReloadPacing,
    ) -> Result<bool, EngineError> {
        if supported(actions::rotate_user_agent(resource).await)? && self.is_clear(resource).await? {
            return Ok(true);
        }
        if supported(actions::clear_cookies_and_reload(resource, pacing, &self.settings).await)?
            && self.is_clear(resource).await?
        {
            return Ok(true);
        }
        if supported(actions::randomize_viewport(resource).await)? && self.is_clear(resource).await? {
            return Ok(true);
        }
        if supported(actions::simulate_pointer(resource, &self.settings).await)?
            && self.is_clear(resource).await?
        {
            return Ok(true);
        }
        self.progressive_retry(resource, pacing).await
    }

    /// 逐级拉长等待后重新加载
    async fn progressive_retry(
        &self,
        resource: &mut dyn FetchResource,
        pacing: &ReloadPacing,
    ) -> Result<bool, EngineError> {
        for base_ms in &self.settings.progressive_delays_ms {
            let wait = actions::jittered(*base_ms, self.settings.progressive_jitter);
            if !wait.is_zero() {
                sleep(wait).await;
            }
            pacing.reload(resource).await?;
            if self.is_clear(resource).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// 等待 Cloudflare 放行，超时后重新加载
    async fn cloudflare_bypass(
        &self,
        resource: &mut dyn FetchResource,
        pacing: &ReloadPacing,
    ) -> Result<bool, EngineError> {
        let deadline = Instant::now() + Duration::from_secs(self.settings.clearance_timeout_secs);
        let poll = Duration::from_millis(self.settings.clearance_poll_ms);

        loop {
            let page = resource.snapshot().await?;
            if !self.detector.clearance_pending(&page) {
                if !self.detector.detect(&page).detected {
                    return Ok(true);
                }
                break;
            }
            if Instant::now() >= deadline {
                debug!("等待放行超时");
                break;
            }
            sleep(poll).await;
        }

        pacing.reload(resource).await?;
        actions::pause(self.settings.cloudflare_fallback_wait).await;
        self.is_clear(resource).await
    }

    async fn advanced_stealth(
        &self,
        resource: &mut dyn FetchResource,
        pacing: &ReloadPacing,
    ) -> Result<bool, EngineError> {
        supported(actions::curved_pointer_path(resource, &self.settings).await)?;
        supported(actions::human_scroll(resource, &self.settings).await)?;

        actions::pause(self.settings.stealth_wait).await;
        pacing.reload(resource).await?;
        actions::pause(self.settings.reload_settle).await;
        if self.is_clear(resource).await? {
            return Ok(true);
        }

        if supported(actions::perturb_fingerprint(resource).await)? {
            pacing.reload(resource).await?;
            return self.is_clear(resource).await;
        }
        Ok(false)
    }

    async fn standard_bypass(
        &self,
        resource: &mut dyn FetchResource,
        pacing: &ReloadPacing,
    ) -> Result<bool, EngineError> {
        pacing.reload(resource).await?;
        actions::pause(self.settings.standard_wait).await;
        if self.is_clear(resource).await? {
            return Ok(true);
        }

        supported(actions::rotate_user_agent(resource).await)?;
        pacing.reload(resource).await?;
        actions::pause(self.settings.standard_rotate_wait).await;
        self.is_clear(resource).await
    }

    async fn gentle_retry(
        &self,
        resource: &mut dyn FetchResource,
        pacing: &ReloadPacing,
    ) -> Result<bool, EngineError> {
        pacing.reload(resource).await?;
        actions::pause(self.settings.gentle_wait).await;
        self.is_clear(resource).await
    }
}

/// 处理结束后的建议
pub fn recommendations(
    success: bool,
    strategy: Strategy,
    attempts_made: u32,
    challenge_type: ChallengeType,
) -> Vec<String> {
    if success {
        return vec![
            format!("Strategy '{}' was effective", strategy),
            "Continue with current approach".to_string(),
        ];
    }

    let mut advice = vec![
        "Consider using proxy rotation".to_string(),
        "Increase delays between requests".to_string(),
        "Try different user agents or browser profiles".to_string(),
    ];
    if attempts_made >= 3 {
        advice.push("Consider manual CAPTCHA solving service".to_string());
        advice.push("Implement session management with longer delays".to_string());
    }
    if challenge_type == ChallengeType::Cloudflare {
        advice.push("Use undetected browser builds with latest versions".to_string());
        advice.push("Consider browser profile rotation".to_string());
    }
    advice
}

#[cfg(test)]
#[path = "handler_test.rs"]
mod tests;
