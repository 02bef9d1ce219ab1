//! Best-effort resource accounting around one execution.
//!
//! Measurement only: nothing here aborts a running handler. The sandbox's
//! hard timeout is the enforcement mechanism. CPU usage is not sampled and is
//! always reported as zero.

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};
use tokio::time::Instant;
use toolgate_core::LimitsConfig;

const MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct ResourceSnapshot {
    pub started_at: Instant,
    pub memory_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    pub elapsed: Duration,
    pub memory_delta_bytes: i64,
    pub cpu_usage: f32,
    pub network_requests: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_execution_time: Duration,
    pub max_memory_mb: u64,
    pub max_network_requests: u32,
}

impl ResourceLimits {
    /// Saturates instead of overflowing for absurd configured limits.
    pub fn max_memory_bytes(&self) -> i64 {
        i64::try_from(self.max_memory_mb.saturating_mul(MB)).unwrap_or(i64::MAX)
    }
}

impl From<&LimitsConfig> for ResourceLimits {
    fn from(config: &LimitsConfig) -> Self {
        Self {
            max_execution_time: Duration::from_millis(config.max_execution_time_ms),
            max_memory_mb: config.max_memory_mb,
            max_network_requests: config.max_network_requests,
        }
    }
}

/// Substitutable so a platform with real CPU/memory instrumentation can plug in.
pub trait ResourceMonitor: Send + Sync {
    fn start(&self) -> ResourceSnapshot;

    fn stop(&self, snapshot: ResourceSnapshot) -> ResourceUsage;

    /// True when `usage` is within every limit.
    fn check_limits(&self, usage: &ResourceUsage, limits: &ResourceLimits) -> bool {
        usage.elapsed <= limits.max_execution_time
            && usage.memory_delta_bytes <= limits.max_memory_bytes()
            && usage.network_requests <= limits.max_network_requests
    }
}

/// Samples the resident memory of the current process through `sysinfo`.
pub struct SystemResourceMonitor {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SystemResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    fn memory_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|p| p.memory())
    }
}

impl Default for SystemResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMonitor for SystemResourceMonitor {
    fn start(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            started_at: Instant::now(),
            memory_bytes: self.memory_bytes(),
        }
    }

    fn stop(&self, snapshot: ResourceSnapshot) -> ResourceUsage {
        let elapsed = snapshot.started_at.elapsed();
        let memory_delta_bytes = match (snapshot.memory_bytes, self.memory_bytes()) {
            (Some(before), Some(after)) => after as i64 - before as i64,
            _ => 0,
        };
        ResourceUsage {
            elapsed,
            memory_delta_bytes,
            cpu_usage: 0.0,
            network_requests: 0,
        }
    }
}

/// Wall-clock only; for hosts where process sampling is unavailable or too costly.
#[derive(Debug, Default, Clone, Copy)]
pub struct ElapsedMonitor;

impl ResourceMonitor for ElapsedMonitor {
    fn start(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            started_at: Instant::now(),
            memory_bytes: None,
        }
    }

    fn stop(&self, snapshot: ResourceSnapshot) -> ResourceUsage {
        ResourceUsage {
            elapsed: snapshot.started_at.elapsed(),
            ..Default::default()
        }
    }
}
