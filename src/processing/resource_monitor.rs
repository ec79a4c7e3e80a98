//! Host resource snapshot taken while a workflow's batches run.

use crate::error::{BatchflowError, Result};
use crate::execution::ExecutionContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, Networks, System};
use tokio::time::Instant;
use tracing::info;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuUsage {
    pub utilization_percent: f64,
    pub core_count: usize,
    pub load_average: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub utilization_percent: f64,
    pub total_gb: f64,
    pub available_gb: f64,
    pub used_gb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub utilization_percent: f64,
    pub total_gb: f64,
    pub free_gb: f64,
    pub used_gb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkUsage {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub monitoring_time_seconds: f64,
    pub cpu: CpuUsage,
    pub memory: MemoryUsage,
    pub disk: DiskUsage,
    pub network: NetworkUsage,
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

fn sample() -> (CpuUsage, MemoryUsage, DiskUsage, NetworkUsage) {
    let mut system = System::new();
    system.refresh_memory();
    // cpu usage is a delta between two refreshes
    system.refresh_cpu_usage();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    system.refresh_cpu_usage();

    let load = System::load_average();
    let cpu = CpuUsage {
        utilization_percent: f64::from(system.global_cpu_usage()),
        core_count: system.cpus().len(),
        load_average: [load.one, load.five, load.fifteen],
    };

    let total_memory = system.total_memory() as f64;
    let memory = MemoryUsage {
        utilization_percent: percent(system.used_memory() as f64, total_memory),
        total_gb: total_memory / BYTES_PER_GB,
        available_gb: system.available_memory() as f64 / BYTES_PER_GB,
        used_gb: system.used_memory() as f64 / BYTES_PER_GB,
    };

    let disks = Disks::new_with_refreshed_list();
    let (total_space, free_space) = disks
        .list()
        .iter()
        .fold((0u64, 0u64), |(total, free), disk| {
            (total + disk.total_space(), free + disk.available_space())
        });
    let used_space = total_space.saturating_sub(free_space);
    let disk = DiskUsage {
        utilization_percent: percent(used_space as f64, total_space as f64),
        total_gb: total_space as f64 / BYTES_PER_GB,
        free_gb: free_space as f64 / BYTES_PER_GB,
        used_gb: used_space as f64 / BYTES_PER_GB,
    };

    let networks = Networks::new_with_refreshed_list();
    let network = networks.list().values().fold(
        NetworkUsage {
            bytes_sent: 0,
            bytes_received: 0,
            packets_sent: 0,
            packets_received: 0,
        },
        |acc, data| NetworkUsage {
            bytes_sent: acc.bytes_sent + data.total_transmitted(),
            bytes_received: acc.bytes_received + data.total_received(),
            packets_sent: acc.packets_sent + data.total_packets_transmitted(),
            packets_received: acc.packets_received + data.total_packets_received(),
        },
    );

    (cpu, memory, disk, network)
}

/// Sample CPU, memory, disk and network counters off the async runtime
pub async fn monitor_system_resources(ctx: &dyn ExecutionContext) -> Result<ResourceSnapshot> {
    let started = Instant::now();
    ctx.heartbeat("Sampling system resources");

    let (cpu, memory, disk, network) =
        tokio::task::spawn_blocking(sample)
            .await
            .map_err(|join_error| BatchflowError::ActivityExecutionError {
                message: format!("Resource sampling failed: {join_error}"),
                activity_type: Some("monitor_system_resources".to_string()),
                attempt: Some(ctx.attempt()),
            })?;

    let snapshot = ResourceSnapshot {
        timestamp: Utc::now(),
        monitoring_time_seconds: started.elapsed().as_secs_f64(),
        cpu,
        memory,
        disk,
        network,
    };

    info!(
        cpu_percent = snapshot.cpu.utilization_percent,
        memory_percent = snapshot.memory.utilization_percent,
        disk_percent = snapshot.disk.utilization_percent,
        "System resources sampled"
    );

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::UnitContext;

    #[tokio::test]
    async fn test_snapshot_is_well_formed() {
        let ctx = UnitContext::standalone("monitor_system_resources", None);
        let snapshot = monitor_system_resources(&ctx).await.unwrap();

        assert_eq!(ctx.heartbeat_count(), 1);
        assert!(snapshot.cpu.core_count > 0);
        assert!(snapshot.memory.total_gb > 0.0);
        for value in [
            snapshot.memory.utilization_percent,
            snapshot.disk.utilization_percent,
        ] {
            assert!((0.0..=100.0).contains(&value));
        }

        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json["network"]["bytes_sent"].is_u64());
    }

    #[test]
    fn test_percent_is_zero_safe() {
        assert_eq!(percent(5.0, 0.0), 0.0);
        assert_eq!(percent(1.0, 4.0), 25.0);
    }
}
