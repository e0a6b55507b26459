//! Configuration loading, merging and validation.
//!
//! Precedence: CLI (if provided) > config file > defaults.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cli::{Args, ConfigFormat};
use crate::provider::{LocalClusterConfig, ServiceSpec};
use crate::records::{MergeOptions, ProcessGrouping};
use crate::system;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9216;
pub const DEFAULT_AGGREGATOR_URL: &str = "http://127.0.0.1:9216";
pub const DEFAULT_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const MIN_INTERVAL_MS: u64 = 10;

/// Locations searched, in order, when no config file is given.
static DEFAULT_CONFIG_PATHS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    let mut paths = vec![
        PathBuf::from("./herakles-cluster-snapshot.yaml"),
        PathBuf::from("./herakles-cluster-snapshot.yml"),
        PathBuf::from("./herakles-cluster-snapshot.json"),
        PathBuf::from("./herakles-cluster-snapshot.toml"),
    ];
    if let Some(home) = std::env::var_os("HOME") {
        paths.push(PathBuf::from(home).join(".config/herakles/cluster-snapshot.yaml"));
    }
    paths.extend([
        PathBuf::from("/etc/herakles/cluster-snapshot.yaml"),
        PathBuf::from("/etc/herakles/cluster-snapshot.yml"),
        PathBuf::from("/etc/herakles/cluster-snapshot.json"),
        PathBuf::from("/etc/herakles/cluster-snapshot.toml"),
    ]);
    paths
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // Server
    pub bind: Option<String>,
    pub port: Option<u16>,

    // Collectors
    pub aggregator_url: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub interval_ms: Option<u64>,
    /// Defaults to the host name.
    pub node_name: Option<String>,
    pub nodes: Option<Vec<String>>,
    pub platform_processes: Option<Vec<String>>,
    pub process_grouping: Option<ProcessGrouping>,
    pub parallelism: Option<usize>,

    // Storage, in-memory when unset
    pub data_dir: Option<PathBuf>,

    // Logging
    pub log_level: Option<String>,

    // Feature flags
    pub enable_health: Option<bool>,
    pub enable_telemetry: Option<bool>,
    pub enable_tls: Option<bool>,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,

    // Kept last: TOML needs tables after plain values
    pub services: Option<Vec<ServiceSpec>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            port: Some(DEFAULT_PORT),
            aggregator_url: Some(DEFAULT_AGGREGATOR_URL.to_string()),
            request_timeout_ms: Some(DEFAULT_REQUEST_TIMEOUT_MS),
            interval_ms: Some(DEFAULT_INTERVAL_MS),
            node_name: None,
            nodes: None,
            platform_processes: None,
            process_grouping: Some(ProcessGrouping::default()),
            parallelism: None,
            data_dir: None,
            log_level: Some("info".into()),
            enable_health: Some(true),
            enable_telemetry: Some(true),
            enable_tls: Some(false),
            tls_cert_path: None,
            tls_key_path: None,
            services: None,
        }
    }
}

impl Config {
    pub fn interval_ms(&self) -> u64 {
        self.interval_ms.unwrap_or(DEFAULT_INTERVAL_MS)
    }

    pub fn aggregator_url(&self) -> &str {
        self.aggregator_url.as_deref().unwrap_or(DEFAULT_AGGREGATOR_URL)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(
            self.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
        )
    }

    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            grouping: self.process_grouping.unwrap_or_default(),
        }
    }

    /// Configured node name, falling back to the host name.
    pub fn node_name(&self) -> anyhow::Result<String> {
        match &self.node_name {
            Some(name) => Ok(name.clone()),
            None => system::read_hostname().context("node_name is not set and the host name is unavailable"),
        }
    }

    pub fn local_cluster_config(&self) -> anyhow::Result<LocalClusterConfig> {
        let mut cfg = LocalClusterConfig::new(self.node_name()?);
        cfg.nodes = self.nodes.clone().unwrap_or_default();
        cfg.services = self.services.clone().unwrap_or_default();
        if let Some(platform) = &self.platform_processes {
            cfg.platform_processes = platform.clone();
        }
        Ok(cfg)
    }
}

/// Validates effective config (used by --check-config and at startup).
pub fn validate_effective_config(cfg: &Config) -> anyhow::Result<()> {
    if let Some(bind) = cfg.bind.as_deref() {
        bind.parse::<IpAddr>()
            .with_context(|| format!("Invalid bind address '{}'", bind))?;
    }
    if cfg.port == Some(0) {
        bail!("port must be greater than 0");
    }

    let interval = cfg.interval_ms();
    if interval < MIN_INTERVAL_MS {
        bail!(
            "interval_ms must be at least {} (got {})",
            MIN_INTERVAL_MS,
            interval
        );
    }

    let url = cfg.aggregator_url();
    match reqwest::Url::parse(url) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => {}
        _ => bail!("aggregator_url '{}' is not an http(s) URL", url),
    }

    if matches!(cfg.node_name.as_deref(), Some(n) if n.trim().is_empty()) {
        bail!("node_name must not be empty");
    }
    if let Some(nodes) = &cfg.nodes {
        if nodes.iter().any(|n| n.trim().is_empty()) {
            bail!("nodes must not contain empty names");
        }
    }

    for service in cfg.services.iter().flatten() {
        if service.name.trim().is_empty() {
            bail!("every service needs a name");
        }
        if service.process_names.is_empty() {
            bail!("service '{}' lists no process_names", service.name);
        }
    }

    if cfg.enable_tls.unwrap_or(false) {
        match (&cfg.tls_cert_path, &cfg.tls_key_path) {
            (Some(_), Some(_)) => {}
            _ => bail!("enable_tls requires tls_cert_path and tls_key_path"),
        }
    }

    if let Some(level) = cfg.log_level.as_deref() {
        if !matches!(level, "off" | "error" | "warn" | "info" | "debug" | "trace") {
            bail!("Invalid log_level '{}'", level);
        }
    }

    Ok(())
}

/// Loads a config file, or the first default location that exists.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match DEFAULT_CONFIG_PATHS.iter().find(|p| p.exists()) {
            Some(p) => p.clone(),
            None => return Ok(Config::default()),
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config = parse_config(&content, path.extension().and_then(|s| s.to_str()))
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}

/// Parses config content by file extension, defaulting to YAML.
pub fn parse_config(content: &str, extension: Option<&str>) -> anyhow::Result<Config> {
    Ok(match extension {
        Some("json") => serde_json::from_str(content)?,
        Some("toml") => toml::from_str(content)?,
        _ => serde_yaml::from_str(content)?,
    })
}

/// Resolves configuration from CLI args, config file, and defaults.
pub fn resolve_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(port) = args.port {
        config.port = Some(port);
    }
    if let Some(url) = &args.aggregator_url {
        config.aggregator_url = Some(url.clone());
    }
    if let Some(interval) = args.interval_ms {
        config.interval_ms = Some(interval);
    }
    if let Some(node) = &args.node_name {
        config.node_name = Some(node.clone());
    }
    if let Some(dir) = &args.data_dir {
        config.data_dir = Some(dir.clone());
    }
    if let Some(grouping) = args.process_grouping {
        config.process_grouping = Some(grouping);
    }
    if let Some(level) = args.log_level {
        config.log_level = Some(level.as_str().to_string());
    }
    if let Some(n) = args.parallelism {
        config.parallelism = Some(n);
    }

    if args.disable_health {
        config.enable_health = Some(false);
    }
    if args.disable_telemetry {
        config.enable_telemetry = Some(false);
    }
    if args.enable_tls {
        config.enable_tls = Some(true);
    }
    if let Some(cert) = &args.tls_cert {
        config.tls_cert_path = Some(cert.clone());
    }
    if let Some(key) = &args.tls_key {
        config.tls_key_path = Some(key.clone());
    }

    Ok(config)
}

pub fn render_config(config: &Config, format: &ConfigFormat) -> anyhow::Result<String> {
    Ok(match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    })
}

/// Prints the effective configuration in the requested format.
pub fn show_config(config: &Config, format: &ConfigFormat) -> anyhow::Result<()> {
    println!("{}", render_config(config, format)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_default_config_is_valid() {
        validate_effective_config(&Config::default()).unwrap();
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut cfg = Config {
            interval_ms: Some(5),
            ..Config::default()
        };
        assert!(validate_effective_config(&cfg).is_err());

        cfg = Config {
            aggregator_url: Some("ftp://host".into()),
            ..Config::default()
        };
        assert!(validate_effective_config(&cfg).is_err());

        cfg = Config {
            enable_tls: Some(true),
            tls_cert_path: Some("cert.pem".into()),
            ..Config::default()
        };
        assert!(validate_effective_config(&cfg).is_err());

        cfg = Config {
            services: Some(vec![ServiceSpec {
                name: "fabric:/App/Svc".into(),
                process_names: Vec::new(),
                primary: 1,
                replica: 0,
                instance: 0,
            }]),
            ..Config::default()
        };
        assert!(validate_effective_config(&cfg).is_err());

        cfg = Config {
            bind: Some("not-an-ip".into()),
            ..Config::default()
        };
        assert!(validate_effective_config(&cfg).is_err());
    }

    #[test]
    fn test_parse_yaml_with_services() {
        let yaml = r#"
interval_ms: 5000
node_name: node-0
process_grouping: all_identities
services:
  - name: "fabric:/App/Web"
    process_names: ["web"]
    primary: 1
    replica: 2
"#;
        let cfg = parse_config(yaml, Some("yaml")).unwrap();
        assert_eq!(cfg.interval_ms(), 5000);
        assert_eq!(cfg.merge_options().grouping, ProcessGrouping::AllIdentities);
        let services = cfg.services.unwrap();
        assert_eq!(services[0].counts().total, 3);
        // keys missing from the file stay unset
        assert_eq!(cfg.port, None);
    }

    #[test]
    fn test_packaged_demo_config_is_valid() {
        let cfg = parse_config(include_str!("../demos/herakles-cluster-snapshot.yaml"), Some("yaml"))
            .unwrap();
        validate_effective_config(&cfg).unwrap();
        assert_eq!(cfg.nodes.as_ref().map(Vec::len), Some(3));
        assert_eq!(cfg.local_cluster_config().unwrap().services.len(), 2);
    }

    #[test]
    fn test_every_format_round_trips() {
        let mut cfg = Config::default();
        cfg.services = Some(vec![ServiceSpec {
            name: "fabric:/App/Web".into(),
            process_names: vec!["web".into()],
            primary: 1,
            replica: 2,
            instance: 0,
        }]);
        cfg.node_name = Some("node-0".into());

        for (format, ext) in [
            (ConfigFormat::Yaml, "yaml"),
            (ConfigFormat::Json, "json"),
            (ConfigFormat::Toml, "toml"),
        ] {
            let text = render_config(&cfg, &format).unwrap();
            assert_eq!(parse_config(&text, Some(ext)).unwrap(), cfg, "{}", ext);
        }
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        fs::write(&path, r#"{"port": 9999, "interval_ms": 2000}"#).unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.port, Some(9999));
        assert_eq!(cfg.interval_ms(), 2000);

        assert!(load_config(Some(&dir.path().join("missing.yaml"))).is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.yaml");
        fs::write(&path, "port: 9999\ninterval_ms: 2000\nenable_health: true\n").unwrap();

        let args = Args::parse_from([
            "herakles-cluster-snapshot",
            "-c",
            path.to_str().unwrap(),
            "--port",
            "7000",
            "--disable-health",
        ]);
        let cfg = resolve_config(&args).unwrap();
        assert_eq!(cfg.port, Some(7000));
        assert_eq!(cfg.interval_ms(), 2000);
        assert_eq!(cfg.enable_health, Some(false));

        let args = Args::parse_from(["herakles-cluster-snapshot", "--no-config"]);
        assert_eq!(resolve_config(&args).unwrap(), Config::default());
    }
}
