// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{info, warn};

use crate::config::settings::MetricsSettings;

pub const TASKS_COMPLETED: &str = "harvest_tasks_completed_total";
pub const TASKS_FAILED: &str = "harvest_tasks_failed_total";
pub const TASKS_ABANDONED: &str = "harvest_tasks_abandoned_total";
pub const RECORDS_COLLECTED: &str = "harvest_records_collected_total";
pub const CHALLENGES_DETECTED: &str = "harvest_challenges_detected_total";
pub const CHALLENGES_RESOLVED: &str = "harvest_challenges_resolved_total";
pub const ATTEMPT_DURATION: &str = "harvest_attempt_duration_seconds";
pub const QUEUE_DEPTH: &str = "harvest_queue_depth";

/// 初始化指标系统
///
/// 配置了监听地址时安装 Prometheus 导出器。未配置或安装失败时
/// 指标调用退化为空操作，不影响采集。
pub fn init_metrics(settings: &MetricsSettings) {
    if let Some(listen_addr) = settings.listen_addr.as_deref() {
        match listen_addr.parse::<SocketAddr>() {
            Ok(addr) => match PrometheusBuilder::new().with_http_listener(addr).install() {
                Ok(()) => info!("Metrics exporter listening on {}", addr),
                Err(e) => warn!(
                    "Failed to install Prometheus recorder: {}. This might happen if the port is already in use.",
                    e
                ),
            },
            Err(e) => warn!("无效的指标监听地址 '{}': {}", listen_addr, e),
        }
    }

    describe_counter!(TASKS_COMPLETED, "Total number of collection tasks completed");
    describe_counter!(TASKS_FAILED, "Total number of failed task attempts");
    describe_counter!(TASKS_ABANDONED, "Total number of tasks dropped after exhausting retries");
    describe_counter!(RECORDS_COLLECTED, "Total number of records persisted");
    describe_counter!(CHALLENGES_DETECTED, "Total number of anti-bot challenges detected");
    describe_counter!(CHALLENGES_RESOLVED, "Total number of anti-bot challenges resolved");
    describe_histogram!(ATTEMPT_DURATION, "Duration of task attempts in seconds");
    describe_gauge!(QUEUE_DEPTH, "Number of tasks waiting in the queue");
}
