// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 挑战处理使用的交互原语
//!
//! 每个原语只作用于 worker 自己的抓取资源。资源不支持的原语返回
//! `EngineError::Unsupported`，由调用方通过 [`supported`] 跳过。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::config::settings::{ChallengeSettings, DelayRange};
use crate::domain::services::rate_limiting_service::DomainRateLimiter;
use crate::engines::traits::{EngineError, FetchResource};
use crate::engines::user_agents::random_user_agent;

/// 挑战处理中的重新加载
///
/// 每次 reload 都是对同一域名的新请求，和普通抓取一样先取得域名许可，
/// 完成后记录请求时间。
#[derive(Clone)]
pub struct ReloadPacing {
    limiter: Arc<DomainRateLimiter>,
    domain: String,
}

impl ReloadPacing {
    pub fn new(limiter: Arc<DomainRateLimiter>, domain: impl Into<String>) -> Self {
        Self {
            limiter,
            domain: domain.into(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub async fn reload(&self, resource: &mut dyn FetchResource) -> Result<(), EngineError> {
        let permit = self.limiter.acquire(&self.domain).await;
        let result = resource.reload().await;
        permit.complete();
        result
    }
}

/// 随机视口尺寸候选
pub const VIEWPORTS: [(u32, u32); 4] = [(1920, 1080), (1366, 768), (1440, 900), (1280, 720)];

pub const LOCALES: [&str; 4] = ["en-US", "en-GB", "es-ES", "fr-FR"];

pub const TIMEZONES: [&str; 4] = [
    "America/New_York",
    "Europe/London",
    "Europe/Paris",
    "America/Los_Angeles",
];

/// 把不支持的操作转换为 `Ok(false)`
pub fn supported(result: Result<(), EngineError>) -> Result<bool, EngineError> {
    match result {
        Ok(()) => Ok(true),
        Err(EngineError::Unsupported(op)) => {
            debug!(operation = op, "资源不支持该操作，跳过");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

pub async fn pause(range: DelayRange) {
    let wait = range.sample();
    if !wait.is_zero() {
        sleep(wait).await;
    }
}

/// 在基准时长上加减 `jitter` 比例的随机抖动
pub fn jittered(base_ms: u64, jitter: f64) -> Duration {
    let spread = (base_ms as f64 * jitter.clamp(0.0, 1.0)) as u64;
    DelayRange::new(base_ms.saturating_sub(spread), base_ms + spread).sample()
}

pub async fn rotate_user_agent(resource: &mut dyn FetchResource) -> Result<(), EngineError> {
    let user_agent = random_user_agent(None);
    debug!(resource_id = %resource.resource_id(), user_agent, "轮换 User-Agent");
    resource.set_user_agent(user_agent).await
}

pub async fn clear_cookies_and_reload(
    resource: &mut dyn FetchResource,
    pacing: &ReloadPacing,
    settings: &ChallengeSettings,
) -> Result<(), EngineError> {
    resource.clear_cookies().await?;
    pacing.reload(resource).await?;
    pause(settings.reload_settle).await;
    Ok(())
}

pub async fn randomize_viewport(resource: &mut dyn FetchResource) -> Result<(), EngineError> {
    let (width, height) = VIEWPORTS[rand::random_range(0..VIEWPORTS.len())];
    resource.set_viewport(width, height).await
}

/// 3 到 7 次随机鼠标移动
pub async fn simulate_pointer(
    resource: &mut dyn FetchResource,
    settings: &ChallengeSettings,
) -> Result<(), EngineError> {
    let moves = rand::random_range(3..=7);
    for _ in 0..moves {
        let x = rand::random_range(100.0..1800.0);
        let y = rand::random_range(100.0..1000.0);
        resource.move_pointer(x, y).await?;
        pause(settings.pointer_pause).await;
    }
    Ok(())
}

/// 2 到 5 次向下滚动后回到顶部
pub async fn human_scroll(
    resource: &mut dyn FetchResource,
    settings: &ChallengeSettings,
) -> Result<(), EngineError> {
    let scrolls = rand::random_range(2..=5);
    for _ in 0..scrolls {
        resource.scroll_by(rand::random_range(200..=800)).await?;
        pause(settings.scroll_pause).await;
    }
    resource.scroll_to_top().await
}

/// 沿二次贝塞尔曲线移动鼠标
pub async fn curved_pointer_path(
    resource: &mut dyn FetchResource,
    settings: &ChallengeSettings,
) -> Result<(), EngineError> {
    let start = (rand::random_range(50.0..400.0), rand::random_range(50.0..300.0));
    let end = (rand::random_range(800.0..1600.0), rand::random_range(400.0..900.0));
    let control = (rand::random_range(200.0..1400.0), rand::random_range(100.0..1000.0));
    let steps: u32 = rand::random_range(10..=20);

    for point in bezier_points(start, control, end, steps) {
        resource.move_pointer(point.0, point.1).await?;
        pause(settings.curve_step_pause).await;
    }
    Ok(())
}

fn bezier_points(
    start: (f64, f64),
    control: (f64, f64),
    end: (f64, f64),
    steps: u32,
) -> Vec<(f64, f64)> {
    (0..=steps)
        .map(|i| {
            let t = i as f64 / steps.max(1) as f64;
            let u = 1.0 - t;
            (
                u * u * start.0 + 2.0 * u * t * control.0 + t * t * end.0,
                u * u * start.1 + 2.0 * u * t * control.1 + t * t * end.1,
            )
        })
        .collect()
}

/// 随机修改语言与时区
///
/// 任一项生效即视为成功，两项都不支持时返回 `Unsupported`。
pub async fn perturb_fingerprint(resource: &mut dyn FetchResource) -> Result<(), EngineError> {
    let locale = LOCALES[rand::random_range(0..LOCALES.len())];
    let timezone = TIMEZONES[rand::random_range(0..TIMEZONES.len())];

    let locale_applied = supported(resource.set_locale(locale).await)?;
    let timezone_applied = supported(resource.set_timezone(timezone).await)?;
    if locale_applied || timezone_applied {
        debug!(locale, timezone, "指纹已扰动");
        Ok(())
    } else {
        Err(EngineError::Unsupported("fingerprint"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bezier_path_starts_and_ends_on_endpoints() {
        let points = bezier_points((0.0, 0.0), (50.0, 100.0), (100.0, 0.0), 10);
        assert_eq!(points.len(), 11);
        assert_eq!(points[0], (0.0, 0.0));
        assert_eq!(points[10], (100.0, 0.0));
        assert!(points[5].1 > 0.0);
    }

    #[test]
    fn test_jittered_delay_stays_in_band() {
        for _ in 0..50 {
            let d = jittered(10_000, 0.2);
            assert!(d >= Duration::from_millis(8000));
            assert!(d <= Duration::from_millis(12_000));
        }
        assert_eq!(jittered(0, 0.2), Duration::ZERO);
    }

    #[test]
    fn test_supported_maps_unsupported_to_false() {
        assert!(supported(Ok(())).unwrap());
        assert!(!supported(Err(EngineError::Unsupported("scroll"))).unwrap());
        assert!(supported(Err(EngineError::Timeout)).is_err());
    }
}
