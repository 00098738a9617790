//! Process and host resource snapshot

use serde::Serialize;
use sysinfo::{Pid, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSnapshot {
    pub total_memory_mb: f64,
    pub used_memory_mb: f64,
    /// Resident memory of the gateway process
    pub process_memory_mb: f64,
    pub cpu_count: usize,
    pub load_average: [f64; 3],
    /// Seconds since the monitoring service started
    pub uptime_seconds: u64,
}

/// Take a snapshot of host memory and this process' footprint
pub fn snapshot(uptime_seconds: u64) -> SystemSnapshot {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu();

    let pid = Pid::from_u32(std::process::id());
    sys.refresh_process(pid);
    let process_memory = sys.process(pid).map(|p| p.memory()).unwrap_or(0);
    let load = System::load_average();

    SystemSnapshot {
        total_memory_mb: sys.total_memory() as f64 / BYTES_PER_MB,
        used_memory_mb: sys.used_memory() as f64 / BYTES_PER_MB,
        process_memory_mb: process_memory as f64 / BYTES_PER_MB,
        cpu_count: sys.cpus().len(),
        load_average: [load.one, load.five, load.fifteen],
        uptime_seconds,
    }
}
