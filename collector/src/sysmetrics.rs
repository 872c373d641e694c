//! Process-level metric probes.

use std::io;
use std::time::Duration;

/// Percentage of system memory in use, read from `/proc/meminfo`.
#[cfg(target_os = "linux")]
pub fn memory_used_percent() -> io::Result<f64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo")?;
    parse_meminfo(&meminfo).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            "MemTotal/MemAvailable missing from /proc/meminfo",
        )
    })
}

#[cfg(not(target_os = "linux"))]
pub fn memory_used_percent() -> io::Result<f64> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "memory sampling is only implemented for linux",
    ))
}

#[cfg(any(target_os = "linux", test))]
fn parse_meminfo(meminfo: &str) -> Option<f64> {
    let mut total = None;
    let mut available = None;
    for line in meminfo.lines() {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some("MemTotal:"), Some(value)) => total = value.parse::<u64>().ok(),
            (Some("MemAvailable:"), Some(value)) => available = value.parse::<u64>().ok(),
            _ => {}
        }
    }

    let (total, available) = (total?, available?);
    if total == 0 {
        return None;
    }
    Some(total.saturating_sub(available) as f64 / total as f64 * 100.0)
}

/// Spawns a detached task emitting `mem.used_percent` through the global
/// capture API every `interval`.
pub fn spawn_memory_sampler(interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match memory_used_percent() {
                Ok(used) => crate::api::capture_metric("mem.used_percent", used as f32),
                Err(e) => tracing::debug!("memory probe failed: {e}"),
            }
        }
    })
}
