//! Host resource sampling for live snapshots.
//!
//! Readings that cannot be taken never fail a run: the sampler falls back to
//! the last successful reading (or zero) and logs a warning.

use std::time::Instant;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, MINIMUM_CPU_UPDATE_INTERVAL};

use crate::types::SystemMetrics;

/// Source of host resource readings.
///
/// The monitor sampler owns one probe for the duration of a run.
pub trait SystemProbe: Send {
    /// Take one reading. Must not block for long and must not fail.
    fn sample(&mut self) -> SystemMetrics;
}

/// Resource usage of the current process.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessUsage {
    pub cpu_percent: f32,
    pub memory_rss_mb: f64,
}

/// [`SystemProbe`] backed by `sysinfo`.
///
/// CPU usage is computed between consecutive refreshes, so the first reading
/// after construction is relative to the priming refresh in [`new`](Self::new).
/// Refreshes closer together than [`MINIMUM_CPU_UPDATE_INTERVAL`] are skipped
/// and repeat the previous CPU reading.
pub struct SystemSampler {
    system: System,
    pid: Pid,
    last: Option<SystemMetrics>,
    last_cpu: Option<f64>,
    cpu_refreshed_at: Instant,
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system,
            pid: Pid::from_u32(std::process::id()),
            last: None,
            last_cpu: None,
            cpu_refreshed_at: Instant::now(),
        }
    }

    /// Last successful host reading, if any.
    pub fn last(&self) -> Option<SystemMetrics> {
        self.last
    }

    /// Usage of this process, or `None` when the process table is unreadable.
    pub fn sample_process(&mut self) -> Option<ProcessUsage> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::everything(),
        );
        self.system.process(self.pid).map(|process| ProcessUsage {
            cpu_percent: process.cpu_usage(),
            memory_rss_mb: process.memory() as f64 / (1024.0 * 1024.0),
        })
    }

    fn read_cpu(&mut self) -> Option<f64> {
        if self.cpu_refreshed_at.elapsed() < MINIMUM_CPU_UPDATE_INTERVAL {
            return self.last_cpu;
        }
        self.system.refresh_cpu_usage();
        self.cpu_refreshed_at = Instant::now();
        if self.system.cpus().is_empty() {
            return None;
        }
        let usage = f64::from(self.system.global_cpu_usage());
        self.last_cpu = usage.is_finite().then_some(usage);
        self.last_cpu
    }

    fn read_memory(&mut self) -> Option<f64> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return None;
        }
        Some(self.system.used_memory() as f64 / total as f64 * 100.0)
    }
}

impl SystemProbe for SystemSampler {
    fn sample(&mut self) -> SystemMetrics {
        let cpu = self.read_cpu();
        let memory = self.read_memory();
        let reading = resolve_reading(cpu, memory, self.last);
        if cpu.is_some() && memory.is_some() {
            self.last = Some(reading);
        }
        reading
    }
}

/// Combine fresh readings with the fallback policy.
///
/// A missing value is replaced by the corresponding last-known value, or zero
/// when there is none. Each substitution is logged at warn level.
pub fn resolve_reading(
    cpu: Option<f64>,
    memory: Option<f64>,
    last: Option<SystemMetrics>,
) -> SystemMetrics {
    let fallback = last.unwrap_or_default();
    let cpu_usage = cpu.unwrap_or_else(|| {
        tracing::warn!(
            fallback = fallback.cpu_usage,
            "cpu usage unavailable, using last known value"
        );
        fallback.cpu_usage
    });
    let memory_usage = memory.unwrap_or_else(|| {
        tracing::warn!(
            fallback = fallback.memory_usage,
            "memory usage unavailable, using last known value"
        );
        fallback.memory_usage
    });
    SystemMetrics::new(cpu_usage, memory_usage)
}

/// Probe that always returns the same reading. Useful for tests and for
/// embedding hosts that report resources themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedProbe(pub SystemMetrics);

impl SystemProbe for FixedProbe {
    fn sample(&mut self) -> SystemMetrics {
        self.0
    }
}
