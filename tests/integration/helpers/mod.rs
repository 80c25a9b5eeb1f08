// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use harvestrs::application::CollectionOrchestrator;
use harvestrs::config::settings::{
    ChallengeSettings, SelectorSettings, Settings, SourceProfile, StorageSettings, StorageType,
};
use harvestrs::domain::models::outcome::ResourceSample;
use harvestrs::domain::models::record::RawRecord;
use harvestrs::domain::models::task::{FetchMode, Task};
use harvestrs::domain::services::extraction_service::Extractor;
use harvestrs::engines::traits::{EngineError, FetchResource, FetchResourceFactory, PageSnapshot};
use harvestrs::infrastructure::resource_monitor::ResourceMonitor;
use harvestrs::infrastructure::storage::InMemoryRecordRepository;
use harvestrs::utils::retry_policy::RetryBackoff;
use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

pub const CHALLENGE_PAGE: &str = r#"<html><head><title>Security Check</title></head>
<body><div class="g-recaptcha"></div><p>Please verify you are human</p></body></html>"#;

/// 含 `items` 个商品的结果页
pub fn listing_page(items: usize) -> String {
    let rows: String = (0..items)
        .map(|i| format!("<li class=\"item\">Item {}</li>", i))
        .collect();
    format!(
        "<html><head><title>Results</title></head><body><ul>{}</ul></body></html>",
        rows
    )
}

/// 根据地址与本次抓取后的 reload 次数决定返回内容
pub type Responder = Arc<dyn Fn(&str, u32) -> Result<PageSnapshot, EngineError> + Send + Sync>;

pub fn always_listing() -> Responder {
    Arc::new(|url, _| Ok(PageSnapshot::from_html(url, 200, listing_page(1))))
}

/// 一次已完成的请求，`reload` 区分抓取与挑战处理中的重新加载
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub url: String,
    pub domain: String,
    pub resource_id: Uuid,
    pub completed_at: Instant,
    pub reload: bool,
}

/// 所有假资源共享的站点状态
pub struct FakeSite {
    responder: Responder,
    latency: Duration,
    events: Mutex<Vec<FetchEvent>>,
    active: Mutex<HashSet<Uuid>>,
    violations: AtomicUsize,
}

impl FakeSite {
    pub fn new(responder: Responder, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            responder,
            latency,
            events: Mutex::new(Vec::new()),
            active: Mutex::new(HashSet::new()),
            violations: AtomicUsize::new(0),
        })
    }

    pub fn events(&self) -> Vec<FetchEvent> {
        self.events.lock().clone()
    }

    /// 命中 `url_fragment` 的抓取次数，不含重新加载
    pub fn fetches_of(&self, url_fragment: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| !e.reload && e.url.contains(url_fragment))
            .count()
    }

    pub fn reloads_of(&self, url_fragment: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.reload && e.url.contains(url_fragment))
            .count()
    }

    /// 模拟一次请求：记录并发使用、等待延迟，完成后记一条事件
    async fn request(&self, resource_id: Uuid, url: &str, reloads: u32) -> Result<PageSnapshot, EngineError> {
        if !self.active.lock().insert(resource_id) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let result = (self.responder)(url, reloads);
        self.active.lock().remove(&resource_id);

        let domain = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        self.events.lock().push(FetchEvent {
            url: url.to_string(),
            domain,
            resource_id,
            completed_at: Instant::now(),
            reload: reloads > 0,
        });
        result
    }

    /// 同一资源被并发使用的次数
    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }
}

pub struct FakeResource {
    id: Uuid,
    site: Arc<FakeSite>,
    current_url: Option<String>,
    current: Option<PageSnapshot>,
    reloads: u32,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl FetchResource for FakeResource {
    fn resource_id(&self) -> Uuid {
        self.id
    }

    fn mode(&self) -> FetchMode {
        FetchMode::Lightweight
    }

    async fn prepare_for_source(&mut self, _profile: &SourceProfile) -> Result<(), EngineError> {
        Ok(())
    }

    async fn fetch(&mut self, url: &str) -> Result<PageSnapshot, EngineError> {
        self.reloads = 0;
        let result = self.site.request(self.id, url, 0).await;
        self.current_url = Some(url.to_string());
        self.current = result.as_ref().ok().cloned();
        result
    }

    async fn snapshot(&mut self) -> Result<PageSnapshot, EngineError> {
        self.current.clone().ok_or(EngineError::NoPageLoaded)
    }

    async fn reload(&mut self) -> Result<(), EngineError> {
        let url = self.current_url.clone().ok_or(EngineError::NoPageLoaded)?;
        self.reloads += 1;
        self.current = Some(self.site.request(self.id, &url, self.reloads).await?);
        Ok(())
    }

    async fn set_user_agent(&mut self, _user_agent: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn clear_cookies(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 假资源工厂，可以让指定 worker 的资源创建失败
pub struct FakeFactory {
    site: Arc<FakeSite>,
    failing_workers: HashSet<usize>,
    created: Mutex<Vec<Uuid>>,
    closed: Arc<AtomicUsize>,
}

impl FakeFactory {
    pub fn new(site: Arc<FakeSite>) -> Arc<Self> {
        Self::failing(site, &[])
    }

    pub fn failing(site: Arc<FakeSite>, workers: &[usize]) -> Arc<Self> {
        Arc::new(Self {
            site,
            failing_workers: workers.iter().copied().collect(),
            created: Mutex::new(Vec::new()),
            closed: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn created(&self) -> Vec<Uuid> {
        self.created.lock().clone()
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FetchResourceFactory for FakeFactory {
    async fn create(
        &self,
        _mode: FetchMode,
        worker_id: usize,
    ) -> Result<Box<dyn FetchResource>, EngineError> {
        if self.failing_workers.contains(&worker_id) {
            return Err(EngineError::Browser("chrome failed to start".to_string()));
        }
        let id = Uuid::new_v4();
        self.created.lock().push(id);
        Ok(Box::new(FakeResource {
            id,
            site: self.site.clone(),
            current_url: None,
            current: None,
            reloads: 0,
            closed: self.closed.clone(),
        }))
    }
}

/// 每个 `<li class="item">` 产出一条记录
pub struct ListingExtractor;

impl Extractor for ListingExtractor {
    fn extract(&self, raw_content: &str, task: &Task) -> Vec<RawRecord> {
        let items = raw_content.matches("<li class=\"item\">").count();
        (0..items)
            .map(|i| {
                RawRecord::new(task, i)
                    .with_field("title", format!("{} {} #{}", task.keyword, task.page, i))
                    .with_field(
                        "url",
                        format!(
                            "https://{}.test/item/{}/{}/{}",
                            task.source, task.keyword, task.page, i
                        ),
                    )
            })
            .collect()
    }
}

/// 按脚本返回资源状态，脚本用完后一直在限制内
#[derive(Default)]
pub struct ScriptedMonitor {
    script: Mutex<VecDeque<bool>>,
    always_over: bool,
    samples: AtomicUsize,
}

impl ScriptedMonitor {
    pub fn within_limits() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn over_limit_for(samples: usize) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(std::iter::repeat(false).take(samples).collect()),
            ..Self::default()
        })
    }

    pub fn always_over() -> Arc<Self> {
        Arc::new(Self {
            always_over: true,
            ..Self::default()
        })
    }

    pub fn samples(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }
}

impl ResourceMonitor for ScriptedMonitor {
    fn sample(&self) -> ResourceSample {
        self.samples.fetch_add(1, Ordering::SeqCst);
        let within_limits = !self.always_over && self.script.lock().pop_front().unwrap_or(true);
        ResourceSample {
            memory_used_mb: if within_limits { 100.0 } else { 4096.0 },
            cpu_percent: 10.0,
            within_limits,
        }
    }
}

fn profile(name: &str, min_delay_ms: u64) -> SourceProfile {
    SourceProfile {
        base_url: format!("https://{}.test", name),
        search_path: "/search?q={keyword}&page={page}".to_string(),
        min_delay_ms,
        reliability_bonus: 0,
        user_agent: None,
        accept_language: None,
        selectors: SelectorSettings::default(),
    }
}

/// 测试配置：内存存储，无批次间隔，无挑战等待
///
/// 需要真实挑战等待的用例在返回值上换回 `ChallengeSettings::default()`
/// 并把 `task_timeout_secs` 调回默认值。
pub fn test_settings(sources: &[(&str, u64)], workers: usize, max_retries: u32) -> Settings {
    let mut settings = Settings::default();
    settings.sources = sources
        .iter()
        .map(|(name, delay)| (name.to_string(), profile(name, *delay)))
        .collect::<HashMap<_, _>>();
    settings.collection.max_workers = workers;
    settings.collection.max_retries = max_retries;
    settings.collection.task_timeout_secs = 30;
    settings.collection.queue_poll_ms = 50;
    settings.collection.batch_pause_ms = 0;
    settings.collection.backpressure_pause_ms = 100;
    settings.collection.max_backpressure_wait_secs = 1;
    settings.challenge = ChallengeSettings::default().without_waits();
    settings.storage = StorageSettings {
        storage_type: StorageType::Memory,
        local_path: String::new(),
    };
    settings
}

pub fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// 组装好的测试编排器及其协作者
#[allow(dead_code)]
pub struct Harness {
    pub orchestrator: Arc<CollectionOrchestrator>,
    pub factory: Arc<FakeFactory>,
    pub site: Arc<FakeSite>,
    pub repository: Arc<InMemoryRecordRepository>,
    pub monitor: Arc<ScriptedMonitor>,
}

pub fn harness(settings: Settings, site: Arc<FakeSite>, monitor: Arc<ScriptedMonitor>) -> Harness {
    harness_with_factory(settings, site.clone(), FakeFactory::new(site), monitor)
}

pub fn harness_with_factory(
    settings: Settings,
    site: Arc<FakeSite>,
    factory: Arc<FakeFactory>,
    monitor: Arc<ScriptedMonitor>,
) -> Harness {
    let repository = Arc::new(InMemoryRecordRepository::new());
    let orchestrator = CollectionOrchestrator::new(
        settings,
        factory.clone(),
        Arc::new(ListingExtractor),
        repository.clone(),
        monitor.clone(),
    )
    .with_backoff(RetryBackoff::immediate());
    Harness {
        orchestrator: Arc::new(orchestrator),
        factory,
        site,
        repository,
        monitor,
    }
}
