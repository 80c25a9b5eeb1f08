// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,harvestrs=debug";

/// 初始化日志订阅器
///
/// 过滤规则读取 `RUST_LOG`，缺省为 `info,harvestrs=debug`；
/// 设置 `HARVESTRS_LOG_FORMAT=json` 时输出 JSON 格式日志。
pub fn init_telemetry() {
    let json = std::env::var("HARVESTRS_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(default_filter());

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into())
}
