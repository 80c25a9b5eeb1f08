// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use tracing::info;

use crate::config::settings::{BrowserSettings, HttpSettings, Settings};
use crate::domain::models::task::FetchMode;
use crate::engines::browser_engine::BrowserSession;
use crate::engines::reqwest_engine::HttpSession;
use crate::engines::traits::{EngineError, FetchResource, FetchResourceFactory};

/// 默认抓取资源工厂
///
/// 轻量模式创建 `HttpSession`，浏览器模式为每个 worker 启动一个 Chrome。
pub struct DefaultResourceFactory {
    http: HttpSettings,
    browser: BrowserSettings,
}

impl DefaultResourceFactory {
    pub fn new(http: HttpSettings, browser: BrowserSettings) -> Self {
        Self { http, browser }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.http.clone(), settings.browser.clone())
    }
}

#[async_trait]
impl FetchResourceFactory for DefaultResourceFactory {
    async fn create(
        &self,
        mode: FetchMode,
        worker_id: usize,
    ) -> Result<Box<dyn FetchResource>, EngineError> {
        let resource: Box<dyn FetchResource> = match mode {
            FetchMode::Lightweight => Box::new(HttpSession::new(&self.http)?),
            FetchMode::Browser => Box::new(BrowserSession::launch(&self.browser).await?),
        };
        info!(
            worker_id,
            mode = %mode,
            resource_id = %resource.resource_id(),
            "抓取资源已创建"
        );
        Ok(resource)
    }
}
