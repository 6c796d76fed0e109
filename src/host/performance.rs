use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::config::PerformanceConfig;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSnapshot {
    pub system_memory: SystemMemory,
    pub system_cpu: SystemCpu,
    pub app_memory: AppMemory,
    pub app_cpu: AppCpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMemory {
    pub total: u64,
    pub free: u64,
    pub used: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemCpu {
    /// Percent across all cores, 0..=100.
    pub average_usage: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppMemory {
    pub rss: u64,
    pub virtual_memory: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AppCpu {
    /// Percent of one core; can exceed 100 on multi-threaded load.
    pub usage: f32,
}

impl PerformanceSnapshot {
    pub fn memory_used_percent(&self) -> f32 {
        if self.system_memory.total == 0 {
            return 0.0;
        }
        (self.system_memory.used as f64 / self.system_memory.total as f64 * 100.0) as f32
    }

    /// Display lines for the dashboard, one reading per line.
    pub fn describe(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Total Memory", format_gib(self.system_memory.total)),
            ("Free Memory", format_gib(self.system_memory.free)),
            ("Used Memory", format_gib(self.system_memory.used)),
            ("Average CPU Usage", format_percent(self.system_cpu.average_usage)),
            ("App Memory (RSS)", format_mib(self.app_memory.rss)),
            ("App Virtual Memory", format_mib(self.app_memory.virtual_memory)),
            ("App CPU", format_percent(self.app_cpu.usage)),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertKind {
    Memory,
    Cpu,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceAlert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub message: String,
}

pub fn format_gib(bytes: u64) -> String {
    format!("{:.2} GB", bytes as f64 / GIB)
}

pub fn format_mib(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / MIB)
}

pub fn format_percent(value: f32) -> String {
    format!("{value:.2}%")
}

#[derive(Debug, Clone, Copy)]
pub struct AlertThresholds {
    pub memory_percent: f32,
    pub cpu_percent: f32,
}

impl From<&PerformanceConfig> for AlertThresholds {
    fn from(config: &PerformanceConfig) -> Self {
        Self {
            memory_percent: config.memory_alert_percent,
            cpu_percent: config.cpu_alert_percent,
        }
    }
}

impl AlertThresholds {
    pub fn evaluate(&self, snapshot: &PerformanceSnapshot) -> Vec<PerformanceAlert> {
        let mut alerts = Vec::new();
        let memory = snapshot.memory_used_percent();
        if memory > self.memory_percent {
            alerts.push(PerformanceAlert {
                kind: AlertKind::Memory,
                message: format!(
                    "High memory usage: {} of system memory in use",
                    format_percent(memory)
                ),
            });
        }
        let cpu = snapshot.system_cpu.average_usage;
        if cpu > self.cpu_percent {
            alerts.push(PerformanceAlert {
                kind: AlertKind::Cpu,
                message: format!("High CPU usage: {}", format_percent(cpu)),
            });
        }
        alerts
    }
}

/// Anything that can produce a reading; the host holds one behind a box.
pub trait PerformanceSource: Send {
    fn sample(&mut self) -> PerformanceSnapshot;
}

pub struct SystemSampler {
    system: System,
    pid: Option<Pid>,
}

impl SystemSampler {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(err) => {
                tracing::warn!(%err, "cannot resolve own pid, app readings will be zero");
                None
            }
        };
        let mut system = System::new();
        // CPU usage is a delta; prime it so the first tick reports something meaningful.
        system.refresh_cpu_usage();
        Self { system, pid }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceSource for SystemSampler {
    fn sample(&mut self) -> PerformanceSnapshot {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();

        let (rss, virtual_memory, app_cpu) = match self.pid {
            Some(pid) => {
                self.system.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[pid]),
                    true,
                    ProcessRefreshKind::nothing().with_memory().with_cpu(),
                );
                self.system
                    .process(pid)
                    .map(|process| {
                        (
                            process.memory(),
                            process.virtual_memory(),
                            process.cpu_usage(),
                        )
                    })
                    .unwrap_or_default()
            }
            None => (0, 0, 0.0),
        };

        let total = self.system.total_memory();
        let free = self.system.available_memory();
        PerformanceSnapshot {
            system_memory: SystemMemory {
                total,
                free,
                used: total.saturating_sub(free),
            },
            system_cpu: SystemCpu {
                average_usage: self.system.global_cpu_usage(),
            },
            app_memory: AppMemory {
                rss,
                virtual_memory,
            },
            app_cpu: AppCpu { usage: app_cpu },
        }
    }
}

pub struct PerformanceMonitor {
    source: Box<dyn PerformanceSource>,
    thresholds: AlertThresholds,
}

impl PerformanceMonitor {
    pub fn new(source: Box<dyn PerformanceSource>, thresholds: AlertThresholds) -> Self {
        Self { source, thresholds }
    }

    pub fn from_config(config: &PerformanceConfig) -> Self {
        Self::new(Box::new(SystemSampler::new()), AlertThresholds::from(config))
    }

    pub fn tick(&mut self) -> (PerformanceSnapshot, Vec<PerformanceAlert>) {
        let snapshot = self.source.sample();
        let alerts = self.thresholds.evaluate(&snapshot);
        for alert in &alerts {
            tracing::warn!(kind = ?alert.kind, message = %alert.message, "performance alert");
        }
        (snapshot, alerts)
    }
}
