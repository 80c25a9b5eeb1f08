// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::debug;

use crate::config::settings::Settings;

/// 单个域名的限流状态
#[derive(Debug)]
pub struct DomainState {
    pub domain: String,
    /// 最近一次请求完成的时间
    pub last_request_at: Option<Instant>,
    pub min_delay: Duration,
}

impl DomainState {
    fn new(domain: &str, min_delay: Duration) -> Self {
        Self {
            domain: domain.to_string(),
            last_request_at: None,
            min_delay,
        }
    }

    /// 距离下一次可以发起请求还需等待的时间
    pub fn time_until_ready(&self, now: Instant) -> Duration {
        match self.last_request_at {
            Some(last) => (last + self.min_delay).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }
}

/// 按域名限流器
///
/// 每个域名一把异步锁，不同域名之间互不阻塞。`acquire` 返回的许可在
/// 请求完成前一直持有该域名的锁，因此同一域名上已完成请求的时间间隔
/// 不会小于 `min_delay`。
pub struct DomainRateLimiter {
    domains: DashMap<String, Arc<Mutex<DomainState>>>,
    delays: DashMap<String, Duration>,
    default_delay: Duration,
}

impl DomainRateLimiter {
    pub fn new(default_delay: Duration) -> Self {
        Self {
            domains: DashMap::new(),
            delays: DashMap::new(),
            default_delay,
        }
    }

    /// 按来源站点配置每个域名的最小间隔
    pub fn from_settings(settings: &Settings) -> Self {
        let limiter = Self::new(Duration::from_secs(2));
        for profile in settings.sources.values() {
            if let Some(domain) = profile.domain() {
                limiter.set_min_delay(&domain, profile.min_delay());
            }
        }
        limiter
    }

    pub fn set_min_delay(&self, domain: &str, delay: Duration) {
        self.delays.insert(domain.to_string(), delay);
        if let Some(state) = self.domains.get(domain) {
            // Only reachable before any worker holds the lock
            if let Ok(mut guard) = state.try_lock() {
                guard.min_delay = delay;
            }
        }
    }

    pub fn min_delay(&self, domain: &str) -> Duration {
        self.delays
            .get(domain)
            .map(|d| *d)
            .unwrap_or(self.default_delay)
    }

    fn state(&self, domain: &str) -> Arc<Mutex<DomainState>> {
        self.domains
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DomainState::new(domain, self.min_delay(domain)))))
            .clone()
    }

    /// 阻塞直到该域名满足最小间隔，返回实际等待时长
    ///
    /// 只做等待，不记录请求；并发调用者可能同时被放行。
    pub async fn wait(&self, domain: &str) -> Duration {
        let state = self.state(domain);
        let wait = {
            let guard = state.lock().await;
            guard.time_until_ready(Instant::now())
        };
        if !wait.is_zero() {
            debug!(domain = %domain, wait_ms = wait.as_millis() as u64, "限流等待");
            tokio::time::sleep(wait).await;
        }
        wait
    }

    /// 记录一次请求完成
    pub async fn record_request(&self, domain: &str) {
        let state = self.state(domain);
        let mut guard = state.lock().await;
        guard.last_request_at = Some(Instant::now());
    }

    /// 获取域名许可
    ///
    /// 等待满足最小间隔后返回许可，许可持有期间同一域名的其他请求排队。
    /// 调用方在抓取完成后调用 `complete`；许可被丢弃时同样记录请求时间。
    pub async fn acquire(&self, domain: &str) -> DomainPermit {
        let state = self.state(domain);
        let guard = state.lock_owned().await;
        let wait = guard.time_until_ready(Instant::now());
        if !wait.is_zero() {
            debug!(domain = %domain, wait_ms = wait.as_millis() as u64, "限流等待");
            tokio::time::sleep(wait).await;
        }
        DomainPermit {
            guard,
            waited: wait,
            recorded: false,
        }
    }

    /// 某域名最近一次请求完成的时间
    pub async fn last_request_at(&self, domain: &str) -> Option<Instant> {
        let state = self.state(domain);
        let guard = state.lock().await;
        guard.last_request_at
    }
}

/// 域名许可
///
/// 持有期间独占该域名，释放时记录请求完成时间。
pub struct DomainPermit {
    guard: OwnedMutexGuard<DomainState>,
    waited: Duration,
    recorded: bool,
}

impl DomainPermit {
    pub fn domain(&self) -> &str {
        &self.guard.domain
    }

    /// 获取许可前的等待时长
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// 请求完成（无论成功失败），记录时间并释放许可
    pub fn complete(mut self) {
        self.record();
    }

    fn record(&mut self) {
        if !self.recorded {
            self.guard.last_request_at = Some(Instant::now());
            self.recorded = true;
        }
    }
}

impl Drop for DomainPermit {
    fn drop(&mut self) {
        self.record();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_noop_for_fresh_domain() {
        let limiter = DomainRateLimiter::new(Duration::from_secs(2));
        let waited = limiter.wait("www.ebay.com").await;
        assert_eq!(waited, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_blocks_for_remaining_delay() {
        let limiter = DomainRateLimiter::new(Duration::from_secs(2));
        limiter.record_request("www.amazon.com").await;
        tokio::time::advance(Duration::from_millis(500)).await;

        let start = Instant::now();
        let waited = limiter.wait("www.amazon.com").await;
        assert_eq!(waited, Duration::from_millis(1500));
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_domains_do_not_block_each_other() {
        let limiter = DomainRateLimiter::new(Duration::from_secs(5));
        limiter.record_request("a.example").await;
        let waited = limiter.wait("b.example").await;
        assert_eq!(waited, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_permits_are_spaced_by_min_delay() {
        let limiter = Arc::new(DomainRateLimiter::new(Duration::from_secs(1)));
        limiter.set_min_delay("shop.example", Duration::from_secs(2));
        let completions = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = limiter.clone();
            let completions = completions.clone();
            handles.push(tokio::spawn(async move {
                let permit = limiter.acquire("shop.example").await;
                tokio::time::sleep(Duration::from_millis(100)).await;
                completions.lock().push(Instant::now());
                permit.complete();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut times = completions.lock().clone();
        times.sort();
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_permit_still_records_request() {
        let limiter = DomainRateLimiter::new(Duration::from_secs(3));
        {
            let _permit = limiter.acquire("x.example").await;
        }
        assert!(limiter.last_request_at("x.example").await.is_some());
    }
}
