// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::config::settings::{HttpSettings, SourceProfile};
use crate::domain::models::task::FetchMode;
use crate::engines::traits::{EngineError, FetchResource, PageSnapshot};
use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// HTTP 会话
///
/// 基于 reqwest 的轻量抓取资源。cookie 保存在会话自己的 `Jar` 中，
/// 轮换 User-Agent 或语言时重建客户端但保留 cookie。
pub struct HttpSession {
    id: Uuid,
    client: reqwest::Client,
    jar: Arc<Jar>,
    timeout: Duration,
    /// 来源未指定 UA 时回落到的配置值
    default_user_agent: String,
    user_agent: String,
    accept_language: String,
    last_url: Option<String>,
    last_snapshot: Option<PageSnapshot>,
}

impl HttpSession {
    pub fn new(settings: &HttpSettings) -> Result<Self, EngineError> {
        let jar = Arc::new(Jar::default());
        let timeout = Duration::from_secs(settings.timeout_secs);
        let user_agent = settings.user_agent.clone();
        let accept_language = DEFAULT_ACCEPT_LANGUAGE.to_string();
        let client = build_client(&jar, timeout, &user_agent, &accept_language)?;

        Ok(Self {
            id: Uuid::new_v4(),
            client,
            jar,
            timeout,
            default_user_agent: user_agent.clone(),
            user_agent,
            accept_language,
            last_url: None,
            last_snapshot: None,
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    fn rebuild(&mut self) -> Result<(), EngineError> {
        self.client = build_client(
            &self.jar,
            self.timeout,
            &self.user_agent,
            &self.accept_language,
        )?;
        Ok(())
    }

    async fn get(&mut self, url: &str) -> Result<PageSnapshot, EngineError> {
        let response = self.client.get(url).send().await?;
        let status_code = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await?;

        debug!(url = %url, status = status_code, bytes = body.len(), "HTTP 抓取完成");

        let snapshot = PageSnapshot::from_html(final_url, status_code, body);
        self.last_url = Some(url.to_string());
        self.last_snapshot = Some(snapshot.clone());
        Ok(snapshot)
    }
}

fn build_client(
    jar: &Arc<Jar>,
    timeout: Duration,
    user_agent: &str,
    accept_language: &str,
) -> Result<reqwest::Client, EngineError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    let language = HeaderValue::from_str(accept_language)
        .map_err(|e| EngineError::Other(format!("Invalid Accept-Language: {}", e)))?;
    headers.insert(ACCEPT_LANGUAGE, language);

    let client = reqwest::Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .timeout(timeout)
        .cookie_provider(jar.clone())
        .build()?;
    Ok(client)
}

#[async_trait]
impl FetchResource for HttpSession {
    fn resource_id(&self) -> Uuid {
        self.id
    }

    fn mode(&self) -> FetchMode {
        FetchMode::Lightweight
    }

    async fn prepare_for_source(&mut self, profile: &SourceProfile) -> Result<(), EngineError> {
        self.jar = Arc::new(Jar::default());
        self.user_agent = profile
            .user_agent
            .clone()
            .unwrap_or_else(|| self.default_user_agent.clone());
        self.accept_language = profile
            .accept_language
            .clone()
            .unwrap_or_else(|| DEFAULT_ACCEPT_LANGUAGE.to_string());
        self.last_url = None;
        self.last_snapshot = None;
        self.rebuild()
    }

    async fn fetch(&mut self, url: &str) -> Result<PageSnapshot, EngineError> {
        self.get(url).await
    }

    async fn snapshot(&mut self) -> Result<PageSnapshot, EngineError> {
        self.last_snapshot.clone().ok_or(EngineError::NoPageLoaded)
    }

    async fn reload(&mut self) -> Result<(), EngineError> {
        let url = self.last_url.clone().ok_or(EngineError::NoPageLoaded)?;
        self.get(&url).await.map(|_| ())
    }

    async fn set_user_agent(&mut self, user_agent: &str) -> Result<(), EngineError> {
        self.user_agent = user_agent.to_string();
        self.rebuild()
    }

    async fn clear_cookies(&mut self) -> Result<(), EngineError> {
        self.jar = Arc::new(Jar::default());
        self.rebuild()
    }

    async fn set_locale(&mut self, locale: &str) -> Result<(), EngineError> {
        let primary = locale.split('-').next().unwrap_or(locale);
        self.accept_language = format!("{},{};q=0.9", locale, primary);
        self.rebuild()
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.last_snapshot = None;
        self.last_url = None;
        Ok(())
    }
}
