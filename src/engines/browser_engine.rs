// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::{BrowserSettings, SourceProfile};
use crate::domain::models::task::FetchMode;
use crate::engines::traits::{EngineError, FetchResource, PageSnapshot};
use crate::engines::user_agents::DESKTOP_USER_AGENTS;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetLocaleOverrideParams, SetTimezoneOverrideParams,
    SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType,
};
use chromiumoxide::cdp::browser_protocol::network::ClearBrowserCookiesParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::fmt::Display;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

// Hides the usual automation fingerprints before any page script runs
const STEALTH_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined, configurable: true });
    Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5], configurable: true });
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'], configurable: true });
    if (!window.chrome) { window.chrome = { runtime: {} }; }
"#;

const STEALTH_ARGS: [&str; 12] = [
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-dev-shm-usage",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-background-networking",
    "--disable-sync",
    "--disable-translate",
    "--metrics-recording-only",
    "--safebrowsing-disable-auto-update",
    "--disable-gpu",
    "--disable-software-rasterizer",
];

/// 本地启动参数，隐身参数在前，配置的额外参数在后
fn launch_args(settings: &BrowserSettings) -> Vec<String> {
    STEALTH_ARGS
        .iter()
        .map(|arg| arg.to_string())
        .chain(settings.extra_args.iter().cloned())
        .collect()
}

fn browser_config(settings: &BrowserSettings) -> Result<BrowserConfig, EngineError> {
    let mut builder = BrowserConfig::builder()
        .no_sandbox()
        .request_timeout(Duration::from_secs(settings.request_timeout_secs))
        .window_size(settings.window_width, settings.window_height);
    if !settings.headless {
        builder = builder.with_head();
    }
    for arg in launch_args(settings) {
        builder = builder.arg(arg);
    }
    builder.build().map_err(EngineError::Browser)
}

fn cdp_error(e: impl Display) -> EngineError {
    EngineError::Browser(e.to_string())
}

/// 浏览器会话
///
/// 每个 worker 独占一个 Chrome 实例与一个页面，实例随 worker 创建和关闭。
pub struct BrowserSession {
    id: Uuid,
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    settle: Duration,
    has_page: bool,
}

impl BrowserSession {
    /// 启动本地 Chrome，或连接到配置的远程调试地址
    pub async fn launch(settings: &BrowserSettings) -> Result<Self, EngineError> {
        let (mut browser, mut handler) = if let Some(url) = &settings.remote_url {
            info!("连接远程 Chrome: {}", url);
            Browser::connect(url).await.map_err(cdp_error)?
        } else {
            Browser::launch(browser_config(settings)?)
                .await
                .map_err(cdp_error)?
        };

        // Spawn a handler to process browser events
        let handler = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                handler.abort();
                return Err(cdp_error(e));
            }
        };
        if let Err(e) = page.evaluate_on_new_document(STEALTH_SCRIPT).await {
            warn!("注入隐身脚本失败: {}", e);
        }

        Ok(Self {
            id: Uuid::new_v4(),
            browser,
            page,
            handler,
            settle: Duration::from_millis(settings.page_settle_ms),
            has_page: false,
        })
    }

    async fn evaluate(&self, script: &str) -> Result<(), EngineError> {
        self.page.evaluate(script).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn apply_user_agent(&self, user_agent: &str, language: Option<&str>) -> Result<(), EngineError> {
        let mut params = SetUserAgentOverrideParams::new(user_agent);
        params.accept_language = language.map(|l| l.to_string());
        self.page.execute(params).await.map_err(cdp_error)?;
        Ok(())
    }
}

#[async_trait]
impl FetchResource for BrowserSession {
    fn resource_id(&self) -> Uuid {
        self.id
    }

    fn mode(&self) -> FetchMode {
        FetchMode::Browser
    }

    async fn prepare_for_source(&mut self, profile: &SourceProfile) -> Result<(), EngineError> {
        self.clear_cookies().await?;
        let ua = profile
            .user_agent
            .as_deref()
            .unwrap_or(DESKTOP_USER_AGENTS[0]);
        self.apply_user_agent(ua, profile.accept_language.as_deref())
            .await?;
        self.has_page = false;
        Ok(())
    }

    async fn fetch(&mut self, url: &str) -> Result<PageSnapshot, EngineError> {
        self.page.goto(url).await.map_err(cdp_error)?;
        self.has_page = true;
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
        debug!(url = %url, "浏览器导航完成");
        self.snapshot().await
    }

    async fn snapshot(&mut self) -> Result<PageSnapshot, EngineError> {
        if !self.has_page {
            return Err(EngineError::NoPageLoaded);
        }
        let url = self.page.url().await.map_err(cdp_error)?.unwrap_or_default();
        let title = self
            .page
            .get_title()
            .await
            .map_err(cdp_error)?
            .unwrap_or_default();
        let html = self.page.content().await.map_err(cdp_error)?;
        let text: String = self
            .page
            .evaluate("document.body ? document.body.innerText : ''")
            .await
            .map_err(cdp_error)?
            .into_value()
            .map_err(cdp_error)?;
        let window_count = self.browser.pages().await.map_err(cdp_error)?.len().max(1);

        Ok(PageSnapshot {
            url,
            title,
            html,
            text,
            window_count,
            // CDP navigation does not surface the document status here
            status_code: 200,
        })
    }

    async fn reload(&mut self) -> Result<(), EngineError> {
        if !self.has_page {
            return Err(EngineError::NoPageLoaded);
        }
        self.page.reload().await.map_err(cdp_error)?;
        Ok(())
    }

    async fn set_user_agent(&mut self, user_agent: &str) -> Result<(), EngineError> {
        self.apply_user_agent(user_agent, None).await
    }

    async fn clear_cookies(&mut self) -> Result<(), EngineError> {
        self.page
            .execute(ClearBrowserCookiesParams::default())
            .await
            .map_err(cdp_error)?;
        Ok(())
    }

    async fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), EngineError> {
        let params = SetDeviceMetricsOverrideParams::new(width as i64, height as i64, 1.0, false);
        self.page.execute(params).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn move_pointer(&mut self, x: f64, y: f64) -> Result<(), EngineError> {
        let params = DispatchMouseEventParams::new(DispatchMouseEventType::MouseMoved, x, y);
        self.page.execute(params).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn scroll_by(&mut self, delta_y: i64) -> Result<(), EngineError> {
        self.evaluate(&format!("window.scrollBy(0, {});", delta_y)).await
    }

    async fn scroll_to_top(&mut self) -> Result<(), EngineError> {
        self.evaluate("window.scrollTo(0, 0);").await
    }

    async fn set_locale(&mut self, locale: &str) -> Result<(), EngineError> {
        let params = SetLocaleOverrideParams {
            locale: Some(locale.to_string()),
        };
        self.page.execute(params).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn set_timezone(&mut self, timezone: &str) -> Result<(), EngineError> {
        self.page
            .execute(SetTimezoneOverrideParams::new(timezone))
            .await
            .map_err(cdp_error)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        let result = self.browser.close().await.map(|_| ()).map_err(cdp_error);
        self.handler.abort();
        result
    }
}

#[cfg(test)]
#[path = "browser_engine_test.rs"]
mod tests;
