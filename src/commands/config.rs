//! Config file generation.

use std::fs;
use std::path::PathBuf;

use crate::cli::ConfigFormat;
use crate::config::{render_config, Config};

/// Writes the default configuration to `output` (`-` for stdout).
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> anyhow::Result<()> {
    let config = Config::default();
    let output = output.unwrap_or_else(|| PathBuf::from("herakles-cluster-snapshot.yaml"));

    let mut content = render_config(&config, &format)?;
    if commented && matches!(format, ConfigFormat::Yaml) {
        content = add_config_comments(content);
    }

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Adds comments to YAML configuration
pub fn add_config_comments(yaml: String) -> String {
    let comments = r#"# Herakles Cluster Snapshot Configuration
# =======================================
#
# Server (aggregator)
# -------------------
# bind: "0.0.0.0"              # Bind IP (0.0.0.0 = all interfaces)
# port: 9216                   # HTTP port
# data_dir: null               # Queue journal directory (null = in-memory)
#
# Collectors
# ----------
# aggregator_url: "http://127.0.0.1:9216"
# request_timeout_ms: 10000    # Per-request timeout towards the aggregator
# interval_ms: 60000           # Publish/aggregation interval; sampling runs at interval/10
# node_name: null              # null = host name
# nodes: null                  # Every node of the cluster (collect-cluster, aggregator)
# platform_processes: null     # Processes counted as platform overhead
# process_grouping: first_identity  # or all_identities
# parallelism: null            # /proc scanning threads (null = auto)
#
# Services
# --------
# services:
#   - name: "fabric:/App/Web"
#     process_names: ["web"]
#     primary: 1
#     replica: 2
#     instance: 0
#
# Feature Flags
# -------------
# enable_health: true          # Enable /health endpoint
# enable_telemetry: true       # Enable /metrics endpoint
# enable_tls: false            # Serve HTTPS
# tls_cert_path: null          # PEM certificate
# tls_key_path: null           # PEM private key
#
# Logging
# -------
# log_level: "info"            # off, error, warn, info, debug, trace
"#;

    format!("{comments}\n{yaml}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_written_config_parses_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.yaml");
        command_config(Some(path.clone()), ConfigFormat::Yaml, true).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# Herakles Cluster Snapshot Configuration"));
        assert_eq!(parse_config(&content, Some("yaml")).unwrap(), Config::default());
    }
}
