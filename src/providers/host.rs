// Host resources: memory, disk, uptime. The sysinfo backend is the default; the procfs
// backend reads /proc and shells out to `df` for machines where sysinfo is not wanted.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use sysinfo::{Disks, System};
use tokio::process::Command;

use super::Provider;
use crate::models::Payload;

pub const SOURCE_ID: &str = "host";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MemoryFigures {
    pub total: u64,
    pub available: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DiskFigures {
    pub total: u64,
    pub available: u64,
}

#[derive(Debug, Clone, Serialize)]
struct MountUsage {
    mount: String,
    total_bytes: u64,
    used_bytes: u64,
    usage_percent: f64,
}

fn percent(used: u64, total: u64) -> f64 {
    if total > 0 {
        (used as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

fn host_payload(memory: MemoryFigures, disk: Option<DiskFigures>, uptime_secs: u64) -> Payload {
    let mut payload = Payload::new();
    let memory_used = memory.total.saturating_sub(memory.available);
    payload.insert("memory_total_bytes".into(), memory.total.into());
    payload.insert("memory_available_bytes".into(), memory.available.into());
    payload.insert("memory_used_bytes".into(), memory_used.into());
    payload.insert(
        "memory_usage_percent".into(),
        percent(memory_used, memory.total).into(),
    );
    if let Some(disk) = disk {
        let disk_used = disk.total.saturating_sub(disk.available);
        payload.insert("disk_total_bytes".into(), disk.total.into());
        payload.insert("disk_used_bytes".into(), disk_used.into());
        payload.insert(
            "disk_usage_percent".into(),
            percent(disk_used, disk.total).into(),
        );
    }
    payload.insert("uptime_secs".into(), uptime_secs.into());
    payload
}

pub struct SysinfoHostProvider {
    sys: Arc<Mutex<System>>,
    disks: Arc<Mutex<Disks>>,
}

impl Default for SysinfoHostProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoHostProvider {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_all();
        Self {
            sys: Arc::new(Mutex::new(sys)),
            disks: Arc::new(Mutex::new(Disks::new_with_refreshed_list())),
        }
    }

    async fn sample(&self) -> anyhow::Result<Payload> {
        let sys = self.sys.clone();
        let disks = self.disks.clone();
        tokio::task::spawn_blocking(move || {
            let mut sys = sys
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo lock poisoned: {}", e))?;
            sys.refresh_memory();
            sys.refresh_cpu_all();
            let memory = MemoryFigures {
                total: sys.total_memory(),
                available: sys.available_memory(),
            };

            let mut disks = disks
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo disks lock poisoned: {}", e))?;
            disks.refresh(false);
            let mounts: Vec<MountUsage> = disks
                .list()
                .iter()
                .map(|d| {
                    let total = d.total_space();
                    let used = total.saturating_sub(d.available_space());
                    MountUsage {
                        mount: d.mount_point().to_string_lossy().into_owned(),
                        total_bytes: total,
                        used_bytes: used,
                        usage_percent: percent(used, total),
                    }
                })
                .collect();
            let disk = DiskFigures {
                total: disks.list().iter().map(|d| d.total_space()).sum(),
                available: disks.list().iter().map(|d| d.available_space()).sum(),
            };

            let mut payload = host_payload(memory, Some(disk), System::uptime());
            let load = System::load_average();
            payload.insert(
                "cpu_usage_percent".into(),
                (sys.global_cpu_usage() as f64).clamp(0.0, 100.0).into(),
            );
            payload.insert("load_one".into(), load.one.into());
            payload.insert("load_five".into(), load.five.into());
            payload.insert("load_fifteen".into(), load.fifteen.into());
            payload.insert("mounts".into(), serde_json::to_value(&mounts)?);
            Ok(payload)
        })
        .await
        .map_err(|e| anyhow::anyhow!("sysinfo task join: {}", e))?
    }
}

impl Provider for SysinfoHostProvider {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    fn collect(&self) -> BoxFuture<'_, anyhow::Result<Payload>> {
        self.sample().boxed()
    }
}

/// Parse MemTotal/MemAvailable (kB) from /proc/meminfo into bytes.
pub(crate) fn parse_meminfo(content: &str) -> Option<MemoryFigures> {
    let field = |name: &str| -> Option<u64> {
        content
            .lines()
            .find_map(|line| line.strip_prefix(name)?.strip_prefix(':'))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
    };
    Some(MemoryFigures {
        total: field("MemTotal")?,
        available: field("MemAvailable")?,
    })
}

/// First field of /proc/uptime, truncated to whole seconds.
pub(crate) fn parse_uptime(content: &str) -> Option<u64> {
    content
        .split_whitespace()
        .next()?
        .parse::<f64>()
        .ok()
        .map(|secs| secs as u64)
}

/// Parse `df -kP <mount>` output: the data row's 1024-blocks and available columns.
pub(crate) fn parse_df(stdout: &str) -> Option<DiskFigures> {
    let row = stdout.lines().nth(1)?;
    let cols: Vec<&str> = row.split_whitespace().collect();
    let total_kb = cols.get(1)?.parse::<u64>().ok()?;
    let available_kb = cols.get(3)?.parse::<u64>().ok()?;
    Some(DiskFigures {
        total: total_kb * 1024,
        available: available_kb * 1024,
    })
}

pub struct ProcfsHostProvider {
    proc_dir: PathBuf,
    mount: String,
    df_binary: String,
}

impl ProcfsHostProvider {
    pub fn new(mount: impl Into<String>) -> Self {
        Self {
            proc_dir: PathBuf::from("/proc"),
            mount: mount.into(),
            df_binary: "df".into(),
        }
    }

    /// Read meminfo/uptime from another directory (tests, containers with a mounted host /proc).
    pub fn with_proc_dir(mut self, proc_dir: impl Into<PathBuf>) -> Self {
        self.proc_dir = proc_dir.into();
        self
    }

    async fn disk(&self) -> Option<DiskFigures> {
        let output = Command::new(&self.df_binary)
            .args(["-kP", &self.mount])
            .kill_on_drop(true)
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => parse_df(&String::from_utf8_lossy(&out.stdout)),
            Ok(out) => {
                tracing::debug!(status = %out.status, mount = %self.mount, "df failed; omitting disk figures");
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "df unavailable; omitting disk figures");
                None
            }
        }
    }

    async fn sample(&self) -> anyhow::Result<Payload> {
        let meminfo = tokio::fs::read_to_string(self.proc_dir.join("meminfo"))
            .await
            .map_err(|e| anyhow::anyhow!("read meminfo: {}", e))?;
        let memory = parse_meminfo(&meminfo)
            .ok_or_else(|| anyhow::anyhow!("meminfo lacks MemTotal/MemAvailable"))?;
        let uptime = tokio::fs::read_to_string(self.proc_dir.join("uptime"))
            .await
            .map_err(|e| anyhow::anyhow!("read uptime: {}", e))?;
        let uptime_secs =
            parse_uptime(&uptime).ok_or_else(|| anyhow::anyhow!("malformed uptime: {:?}", uptime))?;
        Ok(host_payload(memory, self.disk().await, uptime_secs))
    }
}

impl Provider for ProcfsHostProvider {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    fn collect(&self) -> BoxFuture<'_, anyhow::Result<Payload>> {
        self.sample().boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal:       16314156 kB\nMemFree:         1203412 kB\nMemAvailable:    8157078 kB\nBuffers:          402112 kB\n";

    #[test]
    fn parse_meminfo_reads_total_and_available() {
        let m = parse_meminfo(MEMINFO).unwrap();
        assert_eq!(m.total, 16314156 * 1024);
        assert_eq!(m.available, 8157078 * 1024);
    }

    #[test]
    fn parse_meminfo_missing_field_is_none() {
        assert!(parse_meminfo("MemTotal: 100 kB\n").is_none());
    }

    #[test]
    fn parse_uptime_truncates_fraction() {
        assert_eq!(parse_uptime("350735.47 234388.90\n"), Some(350735));
        assert_eq!(parse_uptime(""), None);
    }

    #[test]
    fn parse_df_reads_data_row() {
        let out = "Filesystem     1024-blocks      Used Available Capacity Mounted on\n/dev/sda1        102400000  40960000  61440000      40% /\n";
        let d = parse_df(out).unwrap();
        assert_eq!(d.total, 102400000 * 1024);
        assert_eq!(d.available, 61440000 * 1024);
        assert!(parse_df("header only\n").is_none());
    }

    #[test]
    fn host_payload_computes_usage() {
        let p = host_payload(
            MemoryFigures {
                total: 1000,
                available: 250,
            },
            None,
            42,
        );
        assert_eq!(p["memory_used_bytes"], 750);
        assert_eq!(p["memory_usage_percent"], 75.0);
        assert_eq!(p["uptime_secs"], 42);
        assert!(!p.contains_key("disk_total_bytes"));
    }

    #[tokio::test]
    async fn procfs_provider_reads_proc_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("meminfo"), MEMINFO).unwrap();
        std::fs::write(dir.path().join("uptime"), "120.5 80.0\n").unwrap();
        let provider = ProcfsHostProvider::new("/").with_proc_dir(dir.path());
        let payload = provider.collect().await.unwrap();
        assert_eq!(payload["uptime_secs"], 120);
        assert_eq!(payload["memory_total_bytes"], 16314156u64 * 1024);
    }
}
