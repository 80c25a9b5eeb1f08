// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 采集任务
///
/// 表示一次 (来源, 关键词, 页码) 的采集工作单元。任务在批次生成时由
/// 调度器创建，每次尝试恰好被一个 worker 消费一次；成功或重试次数耗尽后丢弃。
/// 除 `retry_count` 外，其余字段在生命周期内保持不变。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// 任务唯一标识符，重新入队时保持不变
    pub id: Uuid,
    /// 来源站点名称，如 `amazon`
    pub source: String,
    /// 搜索关键词
    pub keyword: String,
    /// 搜索结果页码，从 1 开始
    pub page: u32,
    /// 抓取方式
    pub fetch_mode: FetchMode,
    /// 任务优先级，数值越大越先分发
    pub priority: i32,
    /// 已失败并重新入队的次数
    pub retry_count: u32,
    /// 最大重试次数
    pub max_retries: u32,
    /// 创建时间
    pub created_at: DateTime<Utc>,
}

/// 任务身份标识
///
/// 同一 (来源, 关键词, 页码) 的多次尝试共享同一个身份。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub source: String,
    pub keyword: String,
    pub page: u32,
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}#{}", self.source, self.keyword, self.page)
    }
}

/// 抓取方式
///
/// 决定 worker 持有的抓取资源类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// 轻量 HTTP 会话
    #[default]
    Lightweight,
    /// 无头浏览器
    Browser,
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FetchMode::Lightweight => write!(f, "lightweight"),
            FetchMode::Browser => write!(f, "browser"),
        }
    }
}

impl FromStr for FetchMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lightweight" => Ok(FetchMode::Lightweight),
            "browser" => Ok(FetchMode::Browser),
            _ => Err(()),
        }
    }
}

impl Task {
    /// 创建新任务
    ///
    /// 优先级初始为 0，由调度器在生成批次时赋值。
    pub fn new(
        source: impl Into<String>,
        keyword: impl Into<String>,
        page: u32,
        fetch_mode: FetchMode,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            keyword: keyword.into(),
            page,
            fetch_mode,
            priority: 0,
            retry_count: 0,
            max_retries,
            created_at: Utc::now(),
        }
    }

    /// 设置优先级
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// 任务身份
    pub fn key(&self) -> TaskKey {
        TaskKey {
            source: self.source.clone(),
            keyword: self.keyword.clone(),
            page: self.page,
        }
    }

    /// 是否还能重试
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// 消费失败的任务，返回下一次尝试
    ///
    /// 重试次数耗尽时返回 `None`，`retry_count` 永远不会超过 `max_retries`。
    pub fn into_retry(mut self) -> Option<Self> {
        if !self.can_retry() {
            return None;
        }
        self.retry_count += 1;
        Some(self)
    }
}
