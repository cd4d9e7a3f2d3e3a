//! Resource Probes
//!
//! The heartbeat loop only needs a handful of numbers about the host. Anything that
//! can supply them implements [`ResourceProbe`]; [`SystemProbe`] reads the real
//! machine through `sysinfo`, [`StaticProbe`] returns fixed figures.

use super::types::Capacity;

use std::sync::Mutex;
use sysinfo::{CpuExt, DiskExt, System, SystemExt};

const HIGH_CPU_CORES: u32 = 8;
const HIGH_MEMORY_BYTES: u64 = 16 * 1024 * 1024 * 1024;

/// One reading of the dynamic host figures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    /// One-minute load average divided by the core count.
    pub load_average: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

pub trait ResourceProbe: Send + Sync {
    fn sample(&self) -> ResourceSample;

    fn capacity(&self) -> Capacity;

    fn capabilities(&self) -> Vec<String> {
        capabilities_for(&self.capacity())
    }
}

/// Capability tags derived from hardware size.
pub fn capabilities_for(capacity: &Capacity) -> Vec<String> {
    let mut tags = vec!["general_computing".to_string()];
    if capacity.cpu_cores >= HIGH_CPU_CORES {
        tags.push("high_cpu".to_string());
    }
    if capacity.memory_bytes >= HIGH_MEMORY_BYTES {
        tags.push("high_memory".to_string());
    }
    tags
}

pub struct SystemProbe {
    system: Mutex<System>,
}

impl SystemProbe {
    pub fn new() -> Self {
        let mut system = System::new_all();
        system.refresh_disks_list();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SystemProbe {
    fn sample(&self) -> ResourceSample {
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_cpu();
        system.refresh_memory();

        let cores = system.cpus().len().max(1) as f64;
        let total_memory = system.total_memory();
        let memory_percent = if total_memory > 0 {
            system.used_memory() as f64 / total_memory as f64 * 100.0
        } else {
            0.0
        };

        ResourceSample {
            load_average: system.load_average().one / cores,
            cpu_percent: f64::from(system.global_cpu_info().cpu_usage()),
            memory_percent,
        }
    }

    fn capacity(&self) -> Capacity {
        let system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        Capacity {
            cpu_cores: system.cpus().len() as u32,
            memory_bytes: system.total_memory(),
            disk_bytes: system.disks().iter().map(|disk| disk.total_space()).sum(),
        }
    }
}

/// Fixed readings, for tests and for hosts where probing is not wanted.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe {
    pub sample: ResourceSample,
    pub capacity: Capacity,
}

impl StaticProbe {
    pub fn idle(cpu_cores: u32) -> Self {
        Self {
            sample: ResourceSample {
                load_average: 0.0,
                cpu_percent: 0.0,
                memory_percent: 0.0,
            },
            capacity: Capacity {
                cpu_cores,
                memory_bytes: 8 * 1024 * 1024 * 1024,
                disk_bytes: 100 * 1024 * 1024 * 1024,
            },
        }
    }
}

impl ResourceProbe for StaticProbe {
    fn sample(&self) -> ResourceSample {
        self.sample
    }

    fn capacity(&self) -> Capacity {
        self.capacity
    }
}
