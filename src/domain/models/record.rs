// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::task::Task;

/// 原始采集记录
///
/// 由提取器产出，对编排层不透明；字段内容由具体站点的选择器决定。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source: String,
    pub keyword: String,
    pub page: u32,
    /// 在结果页中的位置，从 0 开始
    pub position: usize,
    /// 提取出的字段，如 title、price、url
    pub fields: BTreeMap<String, String>,
    pub collected_at: DateTime<Utc>,
}

impl RawRecord {
    pub fn new(task: &Task, position: usize) -> Self {
        Self {
            source: task.source.clone(),
            keyword: task.keyword.clone(),
            page: task.page,
            position,
            fields: BTreeMap::new(),
            collected_at: Utc::now(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// 去重指纹
    ///
    /// 优先使用商品链接，其次标题，最后退化为 (关键词, 页码, 位置)。
    pub fn fingerprint(&self) -> String {
        if let Some(url) = self.field("url") {
            return format!("{}|url|{}", self.source, url);
        }
        if let Some(title) = self.field("title") {
            return format!("{}|title|{}", self.source, title.trim().to_lowercase());
        }
        format!(
            "{}|pos|{}|{}|{}",
            self.source, self.keyword, self.page, self.position
        )
    }
}
