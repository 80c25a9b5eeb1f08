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

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use validator::Validate;

use crate::domain::models::task::FetchMode;

/// worker 数量的硬上限，超出的配置会被截断
pub const MAX_WORKER_CEILING: usize = 8;

/// 任务时限中留给结果上报的余量上限
const HANDLING_MARGIN: Duration = Duration::from_secs(5);

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// 应用程序配置设置
///
/// 启动时读取一次，运行期间不会热加载。
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Settings {
    /// 采集编排配置
    #[validate(nested)]
    pub collection: CollectionSettings,
    /// 来源站点配置，键为来源名称
    pub sources: HashMap<String, SourceProfile>,
    /// 任务优先级配置
    #[validate(nested)]
    pub priority: PrioritySettings,
    /// 资源上限配置
    #[validate(nested)]
    pub resources: ResourceSettings,
    /// 反爬挑战处理配置
    #[validate(nested)]
    pub challenge: ChallengeSettings,
    /// 浏览器配置
    pub browser: BrowserSettings,
    /// HTTP 会话配置
    #[validate(nested)]
    pub http: HttpSettings,
    /// 存储配置
    pub storage: StorageSettings,
    /// 指标导出配置
    pub metrics: MetricsSettings,
}

/// 采集编排配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CollectionSettings {
    /// worker 数量
    #[validate(range(min = 1))]
    pub max_workers: usize,
    /// 每批任务数
    #[validate(range(min = 1, max = 1000))]
    pub batch_size: usize,
    /// 单个任务最大重试次数
    #[validate(range(max = 20))]
    pub max_retries: u32,
    /// 目标记录数，达到后不再启动新批次
    pub target_record_count: u64,
    /// 单次任务尝试的超时时间（秒）
    #[validate(range(min = 1))]
    pub task_timeout_secs: u64,
    /// 空队列时 worker 阻塞等待的时长（毫秒）
    #[validate(range(min = 1))]
    pub queue_poll_ms: u64,
    /// 批次之间的暂停（毫秒）
    pub batch_pause_ms: u64,
    /// 资源超限时每次等待的时长（毫秒）
    pub backpressure_pause_ms: u64,
    /// 资源超限时最多等待的总时长（秒）
    pub max_backpressure_wait_secs: u64,
    /// 抓取方式
    pub fetch_mode: FetchMode,
    /// 批处理驱动使用的关键词
    pub keywords: Vec<String>,
    /// 每个关键词最多采集的页数
    #[validate(range(min = 1))]
    pub max_pages_per_keyword: u32,
    /// 重试退避配置
    #[validate(nested)]
    pub retry: RetrySettings,
}

/// 重试退避配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RetrySettings {
    /// 普通失败的初始退避（毫秒）
    pub transient_backoff_ms: u64,
    /// 挑战未消除时的初始退避（毫秒）
    pub challenge_backoff_ms: u64,
    /// 退避上限（毫秒）
    pub max_backoff_ms: u64,
    /// 退避乘数
    #[validate(range(min = 1.0))]
    pub backoff_multiplier: f64,
    /// 是否添加抖动
    pub jitter: bool,
}

/// 来源站点配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SourceProfile {
    /// 站点根地址
    #[validate(url)]
    pub base_url: String,
    /// 搜索路径模板，支持 `{keyword}` 和 `{page}` 占位符
    #[validate(length(min = 1))]
    pub search_path: String,
    /// 同一域名两次请求之间的最小间隔（毫秒）
    pub min_delay_ms: u64,
    /// 可靠性加分，参与优先级计算
    #[serde(default)]
    pub reliability_bonus: i32,
    /// 站点专用 User-Agent
    #[serde(default)]
    pub user_agent: Option<String>,
    /// 站点专用 Accept-Language
    #[serde(default)]
    pub accept_language: Option<String>,
    /// 提取选择器
    #[serde(default)]
    pub selectors: SelectorSettings,
}

/// 商品列表提取选择器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectorSettings {
    pub product_container: Option<String>,
    pub title: Option<String>,
    pub price: Option<String>,
    pub link: Option<String>,
    pub image: Option<String>,
    pub rating: Option<String>,
}

/// 任务优先级配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PrioritySettings {
    pub base: i32,
    #[validate(range(min = 0))]
    pub page_penalty: i32,
    #[validate(range(min = 0))]
    pub common_keyword_penalty: i32,
    /// 未配置来源的可靠性加分
    pub unknown_source_bonus: i32,
    /// 竞争激烈的关键词，命中时扣分
    pub high_contention_keywords: Vec<String>,
}

/// 资源上限配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ResourceSettings {
    #[validate(range(min = 1))]
    pub max_memory_mb: u64,
    #[validate(range(min = 1.0, max = 100.0))]
    pub max_cpu_percent: f64,
}

/// 随机等待区间（毫秒，闭区间）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// 固定时长
    pub const fn fixed(ms: u64) -> Self {
        Self::new(ms, ms)
    }

    /// 在区间内随机取一个时长
    pub fn sample(&self) -> Duration {
        let (lo, hi) = if self.min_ms <= self.max_ms {
            (self.min_ms, self.max_ms)
        } else {
            (self.max_ms, self.min_ms)
        };
        if lo == hi {
            return Duration::from_millis(lo);
        }
        Duration::from_millis(rand::random_range(lo..=hi))
    }

    /// 区间上界
    pub fn upper(&self) -> Duration {
        Duration::from_millis(self.min_ms.max(self.max_ms))
    }
}

/// 反爬挑战处理配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChallengeSettings {
    /// 每次处理调用的最大尝试次数
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,
    /// 融合置信度超过该阈值时判定为挑战
    #[validate(range(min = 0.0, max = 1.0))]
    pub detection_threshold: f64,
    /// 等待 Cloudflare 放行的超时（秒）
    pub clearance_timeout_secs: u64,
    /// 等待放行时的轮询间隔（毫秒）
    #[validate(range(min = 1))]
    pub clearance_poll_ms: u64,
    /// 两次尝试之间的暂停
    pub attempt_pause: DelayRange,
    /// 重新加载后的稳定等待
    pub reload_settle: DelayRange,
    /// 模拟鼠标移动的步间停顿
    pub pointer_pause: DelayRange,
    /// 渐进式等待序列（毫秒）
    pub progressive_delays_ms: Vec<u64>,
    /// 渐进式等待的抖动比例
    #[validate(range(min = 0.0, max = 1.0))]
    pub progressive_jitter: f64,
    /// Cloudflare 回退方案的等待
    pub cloudflare_fallback_wait: DelayRange,
    /// 高级隐身策略的长等待
    pub stealth_wait: DelayRange,
    /// 模拟滚动的步间停顿
    pub scroll_pause: DelayRange,
    /// 曲线鼠标轨迹的步间停顿
    pub curve_step_pause: DelayRange,
    /// 标准策略重新加载后的等待
    pub standard_wait: DelayRange,
    /// 标准策略轮换 UA 后的等待
    pub standard_rotate_wait: DelayRange,
    /// 温和策略的等待
    pub gentle_wait: DelayRange,
}

impl ChallengeSettings {
    /// 去掉全部等待，保留尝试次数与阈值
    pub fn without_waits(self) -> Self {
        let zero = DelayRange::fixed(0);
        Self {
            clearance_timeout_secs: 0,
            clearance_poll_ms: 1,
            attempt_pause: zero,
            reload_settle: zero,
            pointer_pause: zero,
            progressive_delays_ms: self.progressive_delays_ms.iter().map(|_| 0).collect(),
            cloudflare_fallback_wait: zero,
            stealth_wait: zero,
            scroll_pause: zero,
            curve_step_pause: zero,
            standard_wait: zero,
            standard_rotate_wait: zero,
            gentle_wait: zero,
            ..self
        }
    }

    /// 单次策略尝试在最坏情况下的等待总和，不含网络与限流耗时
    pub fn longest_attempt(&self) -> Duration {
        let jitter = self.progressive_jitter.clamp(0.0, 1.0);
        let progressive: Duration = self
            .progressive_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(ms + (*ms as f64 * jitter) as u64))
            .sum();
        // 7 pointer moves, 21 curve points and 5 scrolls at most
        let aggressive = self.reload_settle.upper() + self.pointer_pause.upper() * 7 + progressive;
        let cloudflare = Duration::from_secs(self.clearance_timeout_secs)
            + Duration::from_millis(self.clearance_poll_ms)
            + self.cloudflare_fallback_wait.upper();
        let stealth = self.curve_step_pause.upper() * 21
            + self.scroll_pause.upper() * 5
            + self.stealth_wait.upper()
            + self.reload_settle.upper();
        let standard = self.standard_wait.upper() + self.standard_rotate_wait.upper();

        [aggressive, cloudflare, stealth, standard, self.gentle_wait.upper()]
            .into_iter()
            .max()
            .unwrap_or_default()
    }
}

/// 浏览器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSettings {
    pub headless: bool,
    /// 远程调试地址，设置后连接已有 Chrome 而不是本地启动
    pub remote_url: Option<String>,
    pub request_timeout_secs: u64,
    /// 页面导航后的稳定等待（毫秒）
    pub page_settle_ms: u64,
    pub window_width: u32,
    pub window_height: u32,
    /// 额外的 Chrome 启动参数
    pub extra_args: Vec<String>,
}

/// HTTP 会话配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HttpSettings {
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
    #[validate(length(min = 1))]
    pub user_agent: String,
}

/// 存储类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    Jsonl,
    Memory,
}

/// 存储配置设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// 存储类型 (jsonl, memory)
    pub storage_type: StorageType,
    /// JSON Lines 文件路径 (当 type=jsonl 时使用)
    pub local_path: String,
}

/// 指标导出配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Prometheus 监听地址，如 `0.0.0.0:9000`
    pub listen_addr: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            collection: CollectionSettings::default(),
            sources: default_sources(),
            priority: PrioritySettings::default(),
            resources: ResourceSettings {
                max_memory_mb: 1024,
                max_cpu_percent: 80.0,
            },
            challenge: ChallengeSettings::default(),
            browser: BrowserSettings::default(),
            http: HttpSettings {
                timeout_secs: 30,
                user_agent: DEFAULT_USER_AGENT.to_string(),
            },
            storage: StorageSettings {
                storage_type: StorageType::Jsonl,
                local_path: "./data_output/records.jsonl".to_string(),
            },
            metrics: MetricsSettings::default(),
        }
    }
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            max_workers: 4,
            batch_size: 12,
            max_retries: 3,
            target_record_count: 5000,
            task_timeout_secs: 120,
            queue_poll_ms: 2000,
            batch_pause_ms: 5000,
            backpressure_pause_ms: 5000,
            max_backpressure_wait_secs: 60,
            fetch_mode: FetchMode::Lightweight,
            keywords: ["laptop", "headphones", "smartphone", "tablet"]
                .iter()
                .map(|k| k.to_string())
                .collect(),
            max_pages_per_keyword: 3,
            retry: RetrySettings {
                transient_backoff_ms: 1000,
                challenge_backoff_ms: 15_000,
                max_backoff_ms: 120_000,
                backoff_multiplier: 2.0,
                jitter: true,
            },
        }
    }
}

impl Default for PrioritySettings {
    fn default() -> Self {
        Self {
            base: 100,
            page_penalty: 10,
            common_keyword_penalty: 15,
            unknown_source_bonus: 5,
            high_contention_keywords: ["laptop", "phone", "computer", "tablet"]
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }
}

impl Default for ChallengeSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            detection_threshold: 0.3,
            clearance_timeout_secs: 30,
            clearance_poll_ms: 1000,
            attempt_pause: DelayRange::new(5000, 15_000),
            reload_settle: DelayRange::new(3000, 8000),
            pointer_pause: DelayRange::new(500, 2000),
            progressive_delays_ms: vec![5000, 10_000, 15_000, 20_000],
            progressive_jitter: 0.2,
            cloudflare_fallback_wait: DelayRange::new(10_000, 20_000),
            stealth_wait: DelayRange::new(15_000, 45_000),
            scroll_pause: DelayRange::new(500, 2000),
            curve_step_pause: DelayRange::new(100, 500),
            standard_wait: DelayRange::new(5000, 15_000),
            standard_rotate_wait: DelayRange::new(5000, 10_000),
            gentle_wait: DelayRange::new(3000, 8000),
        }
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            remote_url: None,
            request_timeout_secs: 30,
            page_settle_ms: 1500,
            window_width: 1920,
            window_height: 1080,
            extra_args: Vec::new(),
        }
    }
}

fn default_sources() -> HashMap<String, SourceProfile> {
    let mut sources = HashMap::new();
    sources.insert(
        "amazon".to_string(),
        SourceProfile {
            base_url: "https://www.amazon.com".to_string(),
            search_path: "/s?k={keyword}&page={page}".to_string(),
            min_delay_ms: 2000,
            reliability_bonus: 0,
            user_agent: None,
            accept_language: Some("en-US,en;q=0.9".to_string()),
            selectors: SelectorSettings {
                product_container: Some("[data-component-type=\"s-search-result\"]".to_string()),
                title: Some("h2 a span".to_string()),
                price: Some(".a-price .a-offscreen".to_string()),
                link: Some("h2 a".to_string()),
                image: Some(".s-image".to_string()),
                rating: Some(".a-icon-alt".to_string()),
            },
        },
    );
    sources.insert(
        "ebay".to_string(),
        SourceProfile {
            base_url: "https://www.ebay.com".to_string(),
            search_path: "/sch/i.html?_nkw={keyword}&_pgn={page}".to_string(),
            min_delay_ms: 1500,
            reliability_bonus: 20,
            user_agent: None,
            accept_language: Some("en-US,en;q=0.9".to_string()),
            selectors: SelectorSettings {
                product_container: Some(".s-item".to_string()),
                title: Some(".s-item__title".to_string()),
                price: Some(".s-item__price".to_string()),
                link: Some(".s-item__link".to_string()),
                image: Some(".s-item__image img".to_string()),
                rating: None,
            },
        },
    );
    sources.insert(
        "walmart".to_string(),
        SourceProfile {
            base_url: "https://www.walmart.com".to_string(),
            search_path: "/search?q={keyword}&page={page}".to_string(),
            min_delay_ms: 2500,
            reliability_bonus: 10,
            user_agent: None,
            accept_language: Some("en-US,en;q=0.9".to_string()),
            selectors: SelectorSettings {
                product_container: Some("[data-item-id]".to_string()),
                title: Some("[data-automation-id=\"product-title\"]".to_string()),
                price: Some("[data-automation-id=\"product-price\"] span".to_string()),
                link: Some("a[link-identifier]".to_string()),
                image: Some("img[data-testid=\"productTileImage\"]".to_string()),
                rating: None,
            },
        },
    );
    sources
}

impl SourceProfile {
    /// 构造搜索地址，关键词会被百分号编码
    pub fn search_url(&self, keyword: &str, page: u32) -> String {
        let path = self
            .search_path
            .replace("{keyword}", &urlencoding::encode(keyword))
            .replace("{page}", &page.to_string());
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// 限流使用的域名
    pub fn domain(&self) -> Option<String> {
        url::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }
}

impl CollectionSettings {
    /// 截断到硬上限后的 worker 数量
    pub fn effective_workers(&self) -> usize {
        self.max_workers.clamp(1, MAX_WORKER_CEILING)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    /// 挑战处理可用的时长，任务时限减去上报余量
    pub fn handling_budget(&self) -> Duration {
        let timeout = self.task_timeout();
        timeout - (timeout / 4).min(HANDLING_MARGIN)
    }

    pub fn queue_poll(&self) -> Duration {
        Duration::from_millis(self.queue_poll_ms)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 依次叠加内置默认值、`config/default`、`config/{APP_ENVIRONMENT}`
    /// 以及 `HARVESTRS__` 前缀的环境变量，最后做校验。
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载的配置
    /// * `Err(ConfigError)` - 配置加载或校验失败
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        let builder = Config::builder()
            // Start with built-in defaults
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("HARVESTRS")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("collection.keywords")
                    .with_list_parse_key("priority.high_contention_keywords")
                    .with_list_parse_key("browser.extra_args"),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.check()?;
        Ok(settings)
    }

    /// 校验全部配置项，包括每个来源站点
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|e| ConfigError::Message(format!("invalid settings: {}", e)))?;
        for (name, profile) in &self.sources {
            profile
                .validate()
                .map_err(|e| ConfigError::Message(format!("invalid source '{}': {}", name, e)))?;
            if profile.domain().is_none() {
                return Err(ConfigError::Message(format!(
                    "source '{}' has no host in base_url",
                    name
                )));
            }
        }

        let longest = self.challenge.longest_attempt();
        let budget = self.collection.handling_budget();
        if longest > budget {
            return Err(ConfigError::Message(format!(
                "a challenge attempt can wait up to {:?}, more than the {:?} available within task_timeout_secs = {}",
                longest, budget, self.collection.task_timeout_secs
            )));
        }
        Ok(())
    }

    pub fn source(&self, name: &str) -> Option<&SourceProfile> {
        self.sources.get(name)
    }
}

#[cfg(test)]
#[path = "settings_test.rs"]
mod tests;
