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

use std::sync::Arc;

use harvestrs::application::CollectionOrchestrator;
use harvestrs::config::settings::Settings;
use harvestrs::domain::services::extraction_service::SelectorExtractor;
use harvestrs::engines::factory::DefaultResourceFactory;
use harvestrs::infrastructure::metrics;
use harvestrs::infrastructure::resource_monitor::SystemResourceMonitor;
use harvestrs::infrastructure::storage::create_record_repository;
use harvestrs::utils::telemetry;
use tracing::{info, warn};

/// 主函数
///
/// 批处理入口：加载配置，按配置中的关键词对全部来源执行一次采集，
/// 收到 Ctrl-C 时通过停止句柄取消运行。
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize logging
    telemetry::init_telemetry();
    info!("Starting harvestrs...");

    // 2. Load configuration
    let settings = Settings::new()?;
    info!("Configuration loaded");

    // 3. Metrics exporter
    metrics::init_metrics(&settings.metrics);

    // 4. Collaborators
    let factory = Arc::new(DefaultResourceFactory::from_settings(&settings));
    let extractor = Arc::new(SelectorExtractor::from_sources(&settings.sources));
    let repository = create_record_repository(&settings.storage).await?;
    let monitor = Arc::new(SystemResourceMonitor::new(settings.resources.clone()));

    let mut sources: Vec<String> = settings.sources.keys().cloned().collect();
    sources.sort();
    let keywords = settings.collection.keywords.clone();
    let max_pages = settings.collection.max_pages_per_keyword;
    let target = settings.collection.target_record_count;

    let orchestrator =
        CollectionOrchestrator::new(settings, factory, extractor, repository, monitor);

    // 5. Cancel on Ctrl-C
    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("收到中断信号，正在停止采集...");
                stop.stop();
            }
            Err(e) => warn!("无法监听中断信号: {}", e),
        }
    });

    // 6. Run
    let summary = orchestrator
        .run_collection(&sources, &keywords, max_pages, target)
        .await?;

    info!(
        total_records = summary.total_records,
        tasks_completed = summary.tasks_completed,
        tasks_failed = summary.tasks_failed,
        tasks_abandoned = summary.tasks_abandoned,
        records_per_second = %format!("{:.2}", summary.records_per_second),
        success_rate = %format!("{:.1}%", summary.success_rate * 100.0),
        target_achieved = summary.target_achieved,
        challenges_detected = summary.challenges_detected,
        challenges_resolved = summary.challenges_resolved,
        stop_reason = ?summary.stop_reason,
        elapsed = ?summary.elapsed,
        "Collection finished"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
