// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use parking_lot::Mutex;
use sysinfo::{get_current_pid, Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::config::settings::ResourceSettings;
use crate::domain::models::outcome::ResourceSample;

/// 内存超过上限的该比例时开始施加背压
const MEMORY_PRESSURE_RATIO: f64 = 0.9;

/// 资源监控
///
/// 按需采样，不在后台持续运行。
pub trait ResourceMonitor: Send + Sync {
    fn sample(&self) -> ResourceSample;
}

/// 根据上限判断采样是否在允许范围内
pub fn evaluate(limits: &ResourceSettings, memory_used_mb: f64, cpu_percent: f64) -> ResourceSample {
    let memory_pressure = memory_used_mb > limits.max_memory_mb as f64 * MEMORY_PRESSURE_RATIO;
    let cpu_pressure = cpu_percent > limits.max_cpu_percent;
    ResourceSample {
        memory_used_mb,
        cpu_percent,
        within_limits: !(memory_pressure || cpu_pressure),
    }
}

/// 基于 sysinfo 的当前进程资源监控
///
/// CPU 占用需要两次刷新之间的差值，第一次采样恒为 0。
pub struct SystemResourceMonitor {
    system: Mutex<System>,
    pid: Option<Pid>,
    limits: ResourceSettings,
}

impl SystemResourceMonitor {
    pub fn new(limits: ResourceSettings) -> Self {
        let pid = match get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("无法获取当前进程号，资源监控将始终放行: {}", e);
                None
            }
        };
        Self {
            system: Mutex::new(System::new()),
            pid,
            limits,
        }
    }
}

impl ResourceMonitor for SystemResourceMonitor {
    fn sample(&self) -> ResourceSample {
        let Some(pid) = self.pid else {
            return evaluate(&self.limits, 0.0, 0.0);
        };

        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );
        let (memory_mb, cpu) = system
            .process(pid)
            .map(|p| (p.memory() as f64 / (1024.0 * 1024.0), p.cpu_usage() as f64))
            .unwrap_or((0.0, 0.0));

        let sample = evaluate(&self.limits, memory_mb, cpu);
        debug!(
            memory_mb = sample.memory_used_mb,
            cpu_percent = sample.cpu_percent,
            within_limits = sample.within_limits,
            "资源采样"
        );
        sample
    }
}
