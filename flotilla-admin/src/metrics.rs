//! Host metrics for `/status`
//!
//! - CPU temperature from the thermal zone file
//! - CPU and memory usage from sysinfo
//! - Root filesystem usage from `df -h /`
//!
//! Every probe degrades to a zero value on failure; collection itself never fails.

use serde::Serialize;
use std::path::Path;
use sysinfo::System;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

pub const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemMetrics {
    /// Degrees Celsius.
    pub cpu_temp: f64,
    pub cpu_usage: f64,
    pub memory_usage: MemoryUsage,
    pub disk_usage: DiskUsage,
}

/// Megabytes, percent rounded to one decimal.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryUsage {
    pub total: u64,
    pub used: u64,
    pub percent: f64,
}

/// Human-readable `df` columns, e.g. `"29G"`, `"12G"`, `"43%"`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskUsage {
    pub total: String,
    pub used: String,
    pub percent: String,
}

impl Default for DiskUsage {
    fn default() -> Self {
        Self {
            total: "0G".into(),
            used: "0G".into(),
            percent: "0%".into(),
        }
    }
}

impl SystemMetrics {
    pub async fn collect() -> Self {
        debug!("Collecting system metrics...");
        let cpu_temp = read_cpu_temp(Path::new(THERMAL_ZONE)).await;

        let mut sys = System::new();
        sys.refresh_cpu_usage();
        // usage is a delta between two refreshes
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let cpu_usage = f64::from(sys.global_cpu_info().cpu_usage());
        let cpu_usage = if cpu_usage.is_finite() { round1(cpu_usage) } else { 0.0 };
        let memory_usage = memory_usage(sys.total_memory(), sys.used_memory());
        let disk_usage = disk_usage().await;

        Self { cpu_temp, cpu_usage, memory_usage, disk_usage }
    }
}

async fn read_cpu_temp(path: &Path) -> f64 {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => parse_millidegrees(&raw).unwrap_or(0.0),
        Err(e) => {
            debug!("no thermal zone: {e}");
            0.0
        }
    }
}

fn parse_millidegrees(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().map(|m| m / 1000.0)
}

pub fn memory_usage(total_bytes: u64, used_bytes: u64) -> MemoryUsage {
    if total_bytes == 0 {
        return MemoryUsage::default();
    }
    let total = total_bytes / (1024 * 1024);
    let used = used_bytes / (1024 * 1024);
    let percent = if total > 0 {
        round1(used as f64 / total as f64 * 100.0)
    } else {
        0.0
    };
    MemoryUsage { total, used, percent }
}

async fn disk_usage() -> DiskUsage {
    let output = match AsyncCommand::new("df").args(["-h", "/"]).output().await {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            debug!("df exited with {}", output.status);
            return DiskUsage::default();
        }
        Err(e) => {
            debug!("df unavailable: {e}");
            return DiskUsage::default();
        }
    };
    parse_df(&String::from_utf8_lossy(&output.stdout)).unwrap_or_default()
}

/// Second line of `df -h /`: filesystem, size, used, avail, use%, mount.
fn parse_df(stdout: &str) -> Option<DiskUsage> {
    let line = stdout.lines().nth(1)?;
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 5 {
        return None;
    }
    Some(DiskUsage {
        total: parts[1].to_string(),
        used: parts[2].to_string(),
        percent: parts[4].to_string(),
    })
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
