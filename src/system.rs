//! Host metrics read from the /proc filesystem.
//!
//! Readers come in pairs: a `read_*` function that touches the filesystem and
//! a `parse_*` function over the file content, so parsing stays testable
//! without a live /proc.

use ahash::AHashMap as HashMap;
use std::ffi::CString;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Instant;

use thiserror::Error;
use tracing::debug;

/// Scheduler clock ticks per second used for /proc/<pid>/stat times.
const JIFFIES_PER_SECOND: f64 = 100.0;

/// Filesystem types reported as drives.
const DRIVE_FS_TYPES: &[&str] = &["ext2", "ext3", "ext4", "xfs", "btrfs", "zfs", "f2fs", "vfat", "ntfs"];

#[derive(Debug, Error)]
pub enum SystemError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unexpected content in {file}: {detail}")]
    Parse { file: &'static str, detail: String },
    #[error("statvfs failed for {mount}: {source}")]
    Statvfs {
        mount: String,
        #[source]
        source: std::io::Error,
    },
    #[error("lock poisoned")]
    Poisoned,
}

fn read_file(path: impl AsRef<Path>) -> Result<String, SystemError> {
    let path = path.as_ref();
    fs::read_to_string(path).map_err(|source| SystemError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Kernel host name, used as the default node name.
pub fn read_hostname() -> Result<String, SystemError> {
    let name = read_file("/proc/sys/kernel/hostname")?.trim().to_string();
    if name.is_empty() {
        return Err(SystemError::Parse {
            file: "/proc/sys/kernel/hostname",
            detail: "empty host name".into(),
        });
    }
    Ok(name)
}

/// Memory totals in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemoryInfo {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }

    pub fn used_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.used_bytes() as f64 * 100.0 / self.total_bytes as f64
        }
    }
}

pub fn read_memory_info() -> Result<MemoryInfo, SystemError> {
    parse_memory_info(&read_file("/proc/meminfo")?)
}

/// Parses MemTotal and MemAvailable from /proc/meminfo content.
pub fn parse_memory_info(content: &str) -> Result<MemoryInfo, SystemError> {
    let mut total = None;
    let mut available = None;

    for line in content.lines() {
        if let Some(v) = line.strip_prefix("MemTotal:") {
            total = parse_kb_value(v).map(|kb| kb * 1024);
        } else if let Some(v) = line.strip_prefix("MemAvailable:") {
            available = parse_kb_value(v).map(|kb| kb * 1024);
        }
        if total.is_some() && available.is_some() {
            break;
        }
    }

    match (total, available) {
        (Some(total_bytes), Some(available_bytes)) => Ok(MemoryInfo {
            total_bytes,
            available_bytes,
        }),
        _ => Err(SystemError::Parse {
            file: "/proc/meminfo",
            detail: "missing MemTotal or MemAvailable".into(),
        }),
    }
}

/// Parses kilobyte values such as `"   16384000 kB"`.
fn parse_kb_value(v: &str) -> Option<u64> {
    v.split_whitespace().next()?.parse().ok()
}

/// Aggregate CPU jiffies from the `cpu` line of /proc/stat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuStat {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuStat {
    pub fn total(&self) -> u64 {
        self.user + self.nice + self.system + self.idle + self.iowait + self.irq + self.softirq + self.steal
    }

    /// Idle plus iowait.
    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }
}

pub fn read_cpu_stat() -> Result<CpuStat, SystemError> {
    parse_cpu_stat(&read_file("/proc/stat")?)
}

pub fn parse_cpu_stat(content: &str) -> Result<CpuStat, SystemError> {
    let line = content
        .lines()
        .find(|l| l.split_whitespace().next() == Some("cpu"))
        .ok_or(SystemError::Parse {
            file: "/proc/stat",
            detail: "no aggregate cpu line".into(),
        })?;

    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|f| f.parse().unwrap_or(0))
        .collect();
    if fields.len() < 7 {
        return Err(SystemError::Parse {
            file: "/proc/stat",
            detail: format!("expected at least 7 cpu fields, got {}", fields.len()),
        });
    }

    Ok(CpuStat {
        user: fields[0],
        nice: fields[1],
        system: fields[2],
        idle: fields[3],
        iowait: fields[4],
        irq: fields[5],
        softirq: fields[6],
        steal: fields.get(7).copied().unwrap_or(0),
    })
}

/// Host CPU usage as the busy share of jiffies elapsed since the previous call.
#[derive(Default)]
pub struct CpuStatsCache {
    previous: RwLock<Option<CpuStat>>,
}

impl CpuStatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns usage in percent. The first call establishes the baseline and
    /// reports 0.
    pub fn usage_percent(&self) -> Result<f64, SystemError> {
        let current = read_cpu_stat()?;
        let mut previous = self.previous.write().map_err(|_| SystemError::Poisoned)?;
        let percent = previous
            .map(|prev| busy_percent(&prev, &current))
            .unwrap_or(0.0);
        *previous = Some(current);
        Ok(percent)
    }
}

fn busy_percent(previous: &CpuStat, current: &CpuStat) -> f64 {
    let delta_total = current.total().saturating_sub(previous.total());
    let delta_idle = current.idle_total().saturating_sub(previous.idle_total());
    if delta_total == 0 {
        0.0
    } else {
        delta_total.saturating_sub(delta_idle) as f64 * 100.0 / delta_total as f64
    }
}

/// A mounted block filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub device: String,
    pub mount_point: String,
}

pub fn read_mounts() -> Result<Vec<Mount>, SystemError> {
    Ok(parse_mounts(&read_file("/proc/mounts")?))
}

/// Keeps device-backed mounts of known drive filesystems, one per device.
pub fn parse_mounts(content: &str) -> Vec<Mount> {
    let mut out: Vec<Mount> = Vec::new();
    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(device), Some(mount_point), Some(fs_type)) =
            (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        if !device.starts_with("/dev/") || !DRIVE_FS_TYPES.contains(&fs_type) {
            continue;
        }
        if out.iter().any(|m| m.device == device) {
            continue;
        }
        out.push(Mount {
            device: device.to_string(),
            mount_point: mount_point.replace("\\040", " "),
        });
    }
    out
}

/// Total and available space of the filesystem mounted at `mount_point`, in bytes.
pub fn filesystem_space(mount_point: &str) -> Result<(u64, u64), SystemError> {
    let statvfs_err = |source| SystemError::Statvfs {
        mount: mount_point.to_string(),
        source,
    };
    let path = CString::new(mount_point)
        .map_err(|e| statvfs_err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;

    // SAFETY: `path` is a valid NUL-terminated string and `stat` is a plain
    // C struct that statvfs fully initialises on success.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(statvfs_err(std::io::Error::last_os_error()));
    }

    let block = stat.f_frsize as u64;
    Ok((
        stat.f_blocks as u64 * block,
        stat.f_bavail as u64 * block,
    ))
}

/// A numeric directory under /proc.
#[derive(Debug, Clone)]
pub struct ProcEntry {
    pub pid: u32,
    pub proc_path: PathBuf,
}

/// Scans `root` for process directories.
pub fn collect_proc_entries(root: &Path) -> Vec<ProcEntry> {
    let mut out = Vec::new();
    if let Ok(entries) = fs::read_dir(root) {
        for entry in entries.flatten() {
            let p = entry.path();
            let pid = match p
                .file_name()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u32>().ok())
            {
                Some(pid) => pid,
                None => continue,
            };
            out.push(ProcEntry { pid, proc_path: p });
        }
    }
    out
}

/// Reads the process name from `comm`, falling back to the executable in `cmdline`.
pub fn read_process_name(proc_path: &Path) -> Option<String> {
    if let Ok(s) = fs::read_to_string(proc_path.join("comm")) {
        let t = s.trim();
        if !t.is_empty() {
            return Some(t.into());
        }
    }

    let content = fs::read(proc_path.join("cmdline")).ok()?;
    let first = content.split(|&b| b == 0u8).next()?;
    let exe = std::str::from_utf8(first).ok()?;
    Path::new(exe)
        .file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string())
}

/// Direct children of a process, from every thread's `children` file.
pub fn read_child_pids(proc_path: &Path) -> Vec<u32> {
    let mut pids = Vec::new();
    let Ok(tasks) = fs::read_dir(proc_path.join("task")) else {
        return pids;
    };
    for task in tasks.flatten() {
        if let Ok(content) = fs::read_to_string(task.path().join("children")) {
            pids.extend(content.split_whitespace().filter_map(|p| p.parse::<u32>().ok()));
        }
    }
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Total user+system CPU time of a process in seconds.
pub fn parse_cpu_time_seconds(stat_content: &str) -> Result<f64, SystemError> {
    // The command name may contain spaces; fields are counted after its closing paren.
    let after_comm = stat_content
        .rfind(')')
        .map(|i| &stat_content[i + 1..])
        .ok_or(SystemError::Parse {
            file: "/proc/<pid>/stat",
            detail: "missing command name".into(),
        })?;
    let parts: Vec<&str> = after_comm.split_whitespace().collect();
    if parts.len() < 13 {
        return Err(SystemError::Parse {
            file: "/proc/<pid>/stat",
            detail: format!("expected at least 13 fields after comm, got {}", parts.len()),
        });
    }
    let utime: f64 = parts[11].parse().unwrap_or(0.0);
    let stime: f64 = parts[12].parse().unwrap_or(0.0);
    Ok((utime + stime) / JIFFIES_PER_SECOND)
}

/// Resident set size of a process in bytes.
///
/// Uses `smaps_rollup` when the kernel provides it and `status` otherwise.
pub fn read_rss_bytes(proc_path: &Path) -> Result<u64, SystemError> {
    let rollup = proc_path.join("smaps_rollup");
    if let Ok(file) = fs::File::open(&rollup) {
        let reader = BufReader::new(file);
        let mut rss_kb = 0;
        for line in reader.lines().map_while(Result::ok) {
            if let Some(v) = line.strip_prefix("Rss:") {
                rss_kb += parse_kb_value(v).unwrap_or(0);
            }
        }
        return Ok(rss_kb * 1024);
    }

    let status = read_file(proc_path.join("status"))?;
    status
        .lines()
        .find_map(|l| l.strip_prefix("VmRSS:"))
        .and_then(parse_kb_value)
        .map(|kb| kb * 1024)
        .ok_or(SystemError::Parse {
            file: "/proc/<pid>/status",
            detail: "missing VmRSS".into(),
        })
}

struct CpuSample {
    cpu_time_seconds: f64,
    taken_at: Instant,
}

/// Per-process CPU usage from the delta between successive samples.
#[derive(Default)]
pub struct ProcessCpuCache {
    samples: RwLock<HashMap<u32, CpuSample>>,
}

impl ProcessCpuCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Percent of one core used by `pid` since its previous sample, 0 on the first.
    pub fn usage_percent(&self, pid: u32, proc_path: &Path) -> Result<f64, SystemError> {
        let now = Instant::now();
        let cpu_time_seconds = parse_cpu_time_seconds(&read_file(proc_path.join("stat"))?)?;

        let mut samples = self.samples.write().map_err(|_| SystemError::Poisoned)?;
        let percent = match samples.get(&pid) {
            Some(prev) => {
                let dt = now.duration_since(prev.taken_at).as_secs_f64();
                let delta = cpu_time_seconds - prev.cpu_time_seconds;
                if dt > 0.0 && delta > 0.0 {
                    delta / dt * 100.0
                } else {
                    0.0
                }
            }
            None => {
                debug!(pid, "first cpu sample for process");
                0.0
            }
        };
        samples.insert(
            pid,
            CpuSample {
                cpu_time_seconds,
                taken_at: now,
            },
        );
        Ok(percent)
    }

    pub fn has_sample(&self, pid: u32) -> bool {
        self.samples
            .read()
            .map(|samples| samples.contains_key(&pid))
            .unwrap_or(false)
    }

    /// Drops samples for pids that no longer exist.
    pub fn retain(&self, live: &[u32]) {
        if let Ok(mut samples) = self.samples.write() {
            samples.retain(|pid, _| live.contains(pid));
        }
    }
}
