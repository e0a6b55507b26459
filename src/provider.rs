//! Access to raw cluster metrics.
//!
//! Collectors and the aggregator never read the platform directly; they are
//! handed an `Arc<dyn ClusterInfoProvider>`. [`LocalClusterInfo`] answers for
//! the node it runs on from /proc and a static service map taken from the
//! configuration.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use ahash::AHashMap as HashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::records::{Counts, Drive, Hardware};
use crate::system::{self, CpuStatsCache, ProcEntry, ProcessCpuCache, SystemError};

const BYTES_PER_MB: u64 = 1024 * 1024;
const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Process names treated as platform-owned when none are configured.
pub const DEFAULT_PLATFORM_PROCESSES: &[&str] = &[
    "systemd",
    "systemd-journald",
    "containerd",
    "dockerd",
    "kubelet",
    "sshd",
];

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    System(#[from] SystemError),
    #[error("node '{0}' is not served by this provider")]
    UnknownNode(String),
}

/// A service hosted on the cluster and the executables that implement it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Service identity, e.g. `fabric:/App/Service`.
    pub name: String,
    pub process_names: Vec<String>,
    #[serde(default)]
    pub primary: u64,
    #[serde(default)]
    pub replica: u64,
    #[serde(default)]
    pub instance: u64,
}

impl ServiceSpec {
    pub fn counts(&self) -> Counts {
        Counts::new(self.primary, self.replica, self.instance)
    }
}

/// A running process that hosts one or more services.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceProcess {
    pub process_id: i64,
    pub service_identities: Vec<String>,
    pub child_process_names: BTreeSet<String>,
    pub counts: Counts,
}

/// Point-in-time usage of a single process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessUsage {
    /// Share of total host CPU.
    pub cpu_percent: f64,
    pub ram_mb: u64,
    pub ram_percent: f64,
}

/// Source of raw node and cluster metrics. Calls may block.
pub trait ClusterInfoProvider: Send + Sync {
    fn list_nodes(&self) -> Result<Vec<String>, ProviderError>;

    /// Service-hosting processes on `node`.
    fn list_processes(&self, node: &str) -> Result<Vec<ServiceProcess>, ProviderError>;

    /// `None` when the process no longer exists.
    fn resource_usage_for_process(&self, pid: i64) -> Result<Option<ProcessUsage>, ProviderError>;

    fn hardware(&self, node: &str) -> Result<Hardware, ProviderError>;

    /// Usage attributable to platform-owned processes on `node`.
    fn platform_hardware(&self, node: &str) -> Result<Hardware, ProviderError>;

    fn cluster_counts(&self) -> Result<Counts, ProviderError>;
}

/// Settings for [`LocalClusterInfo`].
#[derive(Debug, Clone)]
pub struct LocalClusterConfig {
    pub node_name: String,
    /// Cluster membership. Defaults to the local node alone when empty.
    pub nodes: Vec<String>,
    pub services: Vec<ServiceSpec>,
    pub platform_processes: Vec<String>,
    pub proc_root: PathBuf,
}

impl LocalClusterConfig {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            nodes: Vec::new(),
            services: Vec::new(),
            platform_processes: DEFAULT_PLATFORM_PROCESSES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            proc_root: PathBuf::from("/proc"),
        }
    }
}

/// Provider for the node this process runs on.
pub struct LocalClusterInfo {
    cfg: LocalClusterConfig,
    cores: f64,
    host_cpu: CpuStatsCache,
    /// Per-process cpu samples for service processes and for platform
    /// processes. A pid in both sets is sampled once per set and collection.
    service_cpu: ProcessCpuCache,
    platform_cpu: ProcessCpuCache,
}

struct NamedEntry {
    entry: ProcEntry,
    name: String,
}

impl LocalClusterInfo {
    pub fn new(cfg: LocalClusterConfig) -> Self {
        // SAFETY: sysconf has no preconditions.
        let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        Self {
            cfg,
            cores: if online > 0 { online as f64 } else { 1.0 },
            host_cpu: CpuStatsCache::new(),
            service_cpu: ProcessCpuCache::new(),
            platform_cpu: ProcessCpuCache::new(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.cfg.node_name
    }

    fn ensure_local(&self, node: &str) -> Result<(), ProviderError> {
        if node == self.cfg.node_name {
            Ok(())
        } else {
            Err(ProviderError::UnknownNode(node.to_string()))
        }
    }

    fn proc_path(&self, pid: u32) -> PathBuf {
        self.cfg.proc_root.join(pid.to_string())
    }

    /// Lists live processes with their names, in parallel.
    fn scan(&self) -> Vec<NamedEntry> {
        let entries = system::collect_proc_entries(&self.cfg.proc_root);
        let named: Vec<NamedEntry> = entries
            .into_par_iter()
            .filter_map(|entry| {
                let name = system::read_process_name(&entry.proc_path)?;
                Some(NamedEntry { entry, name })
            })
            .collect();

        let live: Vec<u32> = named.iter().map(|n| n.entry.pid).collect();
        self.service_cpu.retain(&live);
        self.platform_cpu.retain(&live);
        debug!("scanned {} processes under {}", named.len(), self.cfg.proc_root.display());
        named
    }

    fn usage_at(
        &self,
        cpu_cache: &ProcessCpuCache,
        pid: u32,
        path: &Path,
        total_memory: u64,
    ) -> Option<ProcessUsage> {
        let cpu = match cpu_cache.usage_percent(pid, path) {
            Ok(v) => v / self.cores,
            Err(e) => {
                debug!(pid, "process vanished while sampling cpu: {}", e);
                return None;
            }
        };
        let rss = match system::read_rss_bytes(path) {
            Ok(v) => v,
            Err(e) => {
                debug!(pid, "process vanished while sampling memory: {}", e);
                return None;
            }
        };
        Some(ProcessUsage {
            cpu_percent: cpu,
            ram_mb: rss / BYTES_PER_MB,
            ram_percent: if total_memory == 0 {
                0.0
            } else {
                rss as f64 * 100.0 / total_memory as f64
            },
        })
    }

    fn drives(&self) -> Vec<Drive> {
        let mounts = match system::read_mounts() {
            Ok(m) => m,
            Err(e) => {
                warn!("cannot list mounts, reporting no drives: {}", e);
                return Vec::new();
            }
        };
        mounts
            .into_iter()
            .filter_map(|m| match system::filesystem_space(&m.mount_point) {
                Ok((total, available)) => Some(Drive {
                    name: m.mount_point,
                    total_space_gb: total / BYTES_PER_GB,
                    available_space_gb: available / BYTES_PER_GB,
                }),
                Err(e) => {
                    debug!("skipping drive {}: {}", m.device, e);
                    None
                }
            })
            .collect()
    }
}

impl ClusterInfoProvider for LocalClusterInfo {
    fn list_nodes(&self) -> Result<Vec<String>, ProviderError> {
        if self.cfg.nodes.is_empty() {
            Ok(vec![self.cfg.node_name.clone()])
        } else {
            Ok(self.cfg.nodes.clone())
        }
    }

    fn list_processes(&self, node: &str) -> Result<Vec<ServiceProcess>, ProviderError> {
        self.ensure_local(node)?;
        let scanned = self.scan();
        let names_by_pid: HashMap<u32, &str> = scanned
            .iter()
            .map(|n| (n.entry.pid, n.name.as_str()))
            .collect();

        let mut out = Vec::new();
        for n in &scanned {
            let hosted: Vec<&ServiceSpec> = self
                .cfg
                .services
                .iter()
                .filter(|s| s.process_names.iter().any(|p| p == &n.name))
                .collect();
            if hosted.is_empty() {
                continue;
            }

            let child_process_names = system::read_child_pids(&n.entry.proc_path)
                .into_iter()
                .filter_map(|pid| names_by_pid.get(&pid).map(|s| s.to_string()))
                .collect();

            out.push(ServiceProcess {
                process_id: n.entry.pid as i64,
                service_identities: hosted.iter().map(|s| s.name.clone()).collect(),
                child_process_names,
                counts: hosted
                    .iter()
                    .fold(Counts::default(), |acc, s| acc.add(&s.counts())),
            });
        }
        debug!(node, "found {} service processes", out.len());
        Ok(out)
    }

    fn resource_usage_for_process(&self, pid: i64) -> Result<Option<ProcessUsage>, ProviderError> {
        let Ok(pid) = u32::try_from(pid) else {
            return Ok(None);
        };
        let path = self.proc_path(pid);
        if !path.exists() {
            return Ok(None);
        }
        let total_memory = system::read_memory_info()?.total_bytes;
        Ok(self.usage_at(&self.service_cpu, pid, &path, total_memory))
    }

    fn hardware(&self, node: &str) -> Result<Hardware, ProviderError> {
        self.ensure_local(node)?;
        let mem = system::read_memory_info()?;
        Ok(Hardware {
            cpu_percent: self.host_cpu.usage_percent()?,
            total_memory_gb: mem.total_bytes / BYTES_PER_GB,
            memory_in_use_mb: mem.used_bytes() / BYTES_PER_MB,
            percent_memory_in_use: mem.used_percent(),
            drives: self.drives(),
        })
    }

    fn platform_hardware(&self, node: &str) -> Result<Hardware, ProviderError> {
        self.ensure_local(node)?;
        let mem = system::read_memory_info()?;
        let usages: Vec<ProcessUsage> = self
            .scan()
            .iter()
            .filter(|n| self.cfg.platform_processes.iter().any(|p| p == &n.name))
            .filter_map(|n| {
                self.usage_at(&self.platform_cpu, n.entry.pid, &n.entry.proc_path, mem.total_bytes)
            })
            .collect();

        Ok(Hardware {
            cpu_percent: usages.iter().map(|u| u.cpu_percent).sum(),
            total_memory_gb: mem.total_bytes / BYTES_PER_GB,
            memory_in_use_mb: usages.iter().map(|u| u.ram_mb).sum(),
            percent_memory_in_use: usages.iter().map(|u| u.ram_percent).sum(),
            drives: Vec::new(),
        })
    }

    fn cluster_counts(&self) -> Result<Counts, ProviderError> {
        Ok(self
            .cfg
            .services
            .iter()
            .fold(Counts::default(), |acc, s| acc.add(&s.counts())))
    }
}
