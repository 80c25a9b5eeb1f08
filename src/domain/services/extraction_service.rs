// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use tracing::warn;
use url::Url;

use crate::config::settings::{SelectorSettings, SourceProfile};
use crate::domain::models::record::RawRecord;
use crate::domain::models::task::Task;

/// 记录提取器
///
/// 纯函数：不产生副作用，允许返回空列表。
pub trait Extractor: Send + Sync {
    fn extract(&self, raw_content: &str, task: &Task) -> Vec<RawRecord>;
}

/// 编译后的站点选择器
struct SourceSelectors {
    base_url: Option<Url>,
    container: Selector,
    title: Option<Selector>,
    price: Option<Selector>,
    link: Option<Selector>,
    image: Option<Selector>,
    rating: Option<Selector>,
}

/// 基于 CSS 选择器的商品列表提取器
///
/// 每个匹配的商品容器产出一条记录，缺少标题的容器被跳过。
pub struct SelectorExtractor {
    sources: HashMap<String, SourceSelectors>,
}

impl SelectorExtractor {
    /// 根据来源站点配置编译选择器，无效选择器记录警告后忽略
    pub fn from_sources(sources: &HashMap<String, SourceProfile>) -> Self {
        let compiled = sources
            .iter()
            .filter_map(|(name, profile)| {
                compile(name, &profile.base_url, &profile.selectors).map(|s| (name.clone(), s))
            })
            .collect();
        Self { sources: compiled }
    }

    pub fn supports(&self, source: &str) -> bool {
        self.sources.contains_key(source)
    }
}

fn compile(source: &str, base_url: &str, selectors: &SelectorSettings) -> Option<SourceSelectors> {
    let parse = |field: &str, css: &Option<String>| -> Option<Selector> {
        let css = css.as_ref()?;
        match Selector::parse(css) {
            Ok(selector) => Some(selector),
            Err(e) => {
                warn!(source = %source, field = %field, selector = %css, "无效选择器: {}", e);
                None
            }
        }
    };

    let container = parse("product_container", &selectors.product_container)?;
    Some(SourceSelectors {
        base_url: Url::parse(base_url).ok(),
        container,
        title: parse("title", &selectors.title),
        price: parse("price", &selectors.price),
        link: parse("link", &selectors.link),
        image: parse("image", &selectors.image),
        rating: parse("rating", &selectors.rating),
    })
}

impl Extractor for SelectorExtractor {
    fn extract(&self, raw_content: &str, task: &Task) -> Vec<RawRecord> {
        let Some(selectors) = self.sources.get(&task.source) else {
            return Vec::new();
        };

        let document = Html::parse_document(raw_content);
        let mut records = Vec::new();

        for container in document.select(&selectors.container) {
            let Some(title) = selectors
                .title
                .as_ref()
                .and_then(|s| first_text(container, s))
            else {
                continue;
            };

            let mut record = RawRecord::new(task, records.len()).with_field("title", title);

            if let Some(price) = selectors.price.as_ref().and_then(|s| first_text(container, s)) {
                record = record.with_field("price", price);
            }
            if let Some(rating) = selectors.rating.as_ref().and_then(|s| first_text(container, s)) {
                record = record.with_field("rating", rating);
            }
            if let Some(href) = selectors
                .link
                .as_ref()
                .and_then(|s| first_attr(container, s, &["href"]))
            {
                record = record.with_field("url", resolve(selectors.base_url.as_ref(), &href));
            }
            if let Some(src) = selectors
                .image
                .as_ref()
                .and_then(|s| first_attr(container, s, &["src", "data-src"]))
            {
                record = record.with_field("image_url", resolve(selectors.base_url.as_ref(), &src));
            }

            records.push(record);
        }

        records
    }
}

fn first_text(container: ElementRef<'_>, selector: &Selector) -> Option<String> {
    container
        .select(selector)
        .map(|el| normalize_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
        .find(|text| !text.is_empty())
}

fn first_attr(container: ElementRef<'_>, selector: &Selector, attrs: &[&str]) -> Option<String> {
    container.select(selector).find_map(|el| {
        attrs
            .iter()
            .find_map(|a| el.value().attr(a))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

fn resolve(base: Option<&Url>, href: &str) -> String {
    match base.and_then(|b| b.join(href).ok()) {
        Some(url) => url.to_string(),
        None => href.to_string(),
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
#[path = "extraction_service_test.rs"]
mod tests;
