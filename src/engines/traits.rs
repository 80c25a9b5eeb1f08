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

use async_trait::async_trait;
use scraper::{ElementRef, Html, Node, Selector};
use thiserror::Error;
use uuid::Uuid;

use crate::config::settings::SourceProfile;
use crate::domain::models::task::FetchMode;

/// 引擎错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    /// 请求失败
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// 非预期的 HTTP 状态码
    #[error("Unexpected HTTP status: {0}")]
    HttpStatus(u16),
    /// 超时
    #[error("Timeout")]
    Timeout,
    /// 浏览器或 CDP 调用失败
    #[error("Browser error: {0}")]
    Browser(String),
    /// 尚未加载任何页面
    #[error("No page loaded")]
    NoPageLoaded,
    /// 当前资源不支持该操作
    #[error("Operation not supported by this resource: {0}")]
    Unsupported(&'static str),
    /// 其他错误
    #[error("Other error: {0}")]
    Other(String),
}

impl EngineError {
    /// 判断错误是否可重试
    ///
    /// # 返回值
    ///
    /// 如果错误是可重试的则返回true，否则返回false
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::RequestFailed(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            EngineError::HttpStatus(code) => *code == 429 || *code >= 500 || *code == 403,
            EngineError::Timeout | EngineError::Browser(_) | EngineError::NoPageLoaded => true,
            EngineError::Unsupported(_) | EngineError::Other(_) => false,
        }
    }
}

/// 页面快照
///
/// 检测器只读取快照，不直接访问抓取资源。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageSnapshot {
    /// 当前地址（跟随重定向后）
    pub url: String,
    pub title: String,
    /// 页面源码
    pub html: String,
    /// 可见文本
    pub text: String,
    /// 浏览器窗口/标签页数量，HTTP 会话恒为 1
    pub window_count: usize,
    pub status_code: u16,
}

impl PageSnapshot {
    /// 从 HTML 源码构造快照，标题与正文文本由解析得到
    pub fn from_html(url: impl Into<String>, status_code: u16, html: impl Into<String>) -> Self {
        let html = html.into();
        let (title, text) = parse_title_and_text(&html);
        Self {
            url: url.into(),
            title,
            html,
            text,
            window_count: 1,
            status_code,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status_code)
    }
}

fn parse_title_and_text(html: &str) -> (String, String) {
    let document = Html::parse_document(html);
    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| {
            document
                .select(&sel)
                .next()
                .map(|el| el.text().collect::<String>())
        })
        .map(|t| t.trim().to_string())
        .unwrap_or_default();
    let text = Selector::parse("body")
        .ok()
        .and_then(|sel| document.select(&sel).next().map(visible_text))
        .unwrap_or_default();
    (title, text)
}

/// 元素内的可见文本，跳过脚本与样式
fn visible_text(root: ElementRef<'_>) -> String {
    let mut words: Vec<&str> = Vec::new();
    for node in root.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(ElementRef::wrap)
            .is_some_and(|parent| {
                matches!(parent.value().name(), "script" | "style" | "noscript" | "template")
            });
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }
    words.join(" ")
}

/// 抓取资源
///
/// 每个 worker 独占一个实例，生命周期与 worker 相同。基础操作是
/// `fetch`/`snapshot`/`close`，其余为挑战处理使用的交互原语，
/// 资源不支持时返回 `EngineError::Unsupported`。
#[async_trait]
pub trait FetchResource: Send {
    /// 资源实例标识
    fn resource_id(&self) -> Uuid;

    fn mode(&self) -> FetchMode;

    /// 切换到另一个来源站点前重置站点相关设置
    async fn prepare_for_source(&mut self, profile: &SourceProfile) -> Result<(), EngineError>;

    /// 导航到地址并返回页面快照
    async fn fetch(&mut self, url: &str) -> Result<PageSnapshot, EngineError>;

    /// 当前页面快照
    async fn snapshot(&mut self) -> Result<PageSnapshot, EngineError>;

    async fn reload(&mut self) -> Result<(), EngineError>;

    async fn set_user_agent(&mut self, user_agent: &str) -> Result<(), EngineError>;

    async fn clear_cookies(&mut self) -> Result<(), EngineError>;

    async fn set_viewport(&mut self, _width: u32, _height: u32) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("viewport"))
    }

    async fn move_pointer(&mut self, _x: f64, _y: f64) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("pointer"))
    }

    async fn scroll_by(&mut self, _delta_y: i64) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("scroll"))
    }

    async fn scroll_to_top(&mut self) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("scroll"))
    }

    async fn set_locale(&mut self, _locale: &str) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("locale"))
    }

    async fn set_timezone(&mut self, _timezone: &str) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("timezone"))
    }

    /// 释放资源
    async fn close(&mut self) -> Result<(), EngineError>;
}

/// 抓取资源工厂
#[async_trait]
pub trait FetchResourceFactory: Send + Sync {
    /// 为指定 worker 创建一个独占资源
    async fn create(
        &self,
        mode: FetchMode,
        worker_id: usize,
    ) -> Result<Box<dyn FetchResource>, EngineError>;
}
