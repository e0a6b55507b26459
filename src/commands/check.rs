//! System check command implementation.

use std::path::Path;

use anyhow::bail;

use crate::config::{validate_effective_config, Config};
use crate::store::{open_store, CLUSTER_QUEUE, SNAPSHOT_QUEUE};
use crate::system;

/// Validates system requirements and configuration.
pub async fn command_check(proc: bool, store: bool, all: bool, config: &Config) -> anyhow::Result<()> {
    println!("🔍 Herakles Cluster Snapshot - System Check");
    println!("===========================================");

    let mut all_ok = true;

    if proc || all {
        all_ok &= check_proc();
    }

    if store || all {
        all_ok &= check_store(config).await;
    }

    println!("\n⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(()) => println!("   ✅ Configuration is valid"),
        Err(e) => {
            println!("   ❌ Configuration invalid: {:#}", e);
            all_ok = false;
        }
    }
    match config.node_name() {
        Ok(name) => println!("   ✅ Node name: {}", name),
        Err(e) => {
            println!("   ❌ {:#}", e);
            all_ok = false;
        }
    }
    let services = config.services.as_ref().map_or(0, Vec::len);
    if services == 0 {
        println!("   ⚠️  No services configured, only platform usage will be reported");
    } else {
        println!("   ✅ {} services configured", services);
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - system is ready");
        Ok(())
    } else {
        println!("   ❌ Some checks failed - please review warnings");
        bail!("system check failed")
    }
}

fn check_proc() -> bool {
    let mut ok = true;
    println!("\n📁 Checking /proc filesystem...");

    let entries = system::collect_proc_entries(Path::new("/proc"));
    if entries.is_empty() {
        println!("   ❌ Cannot read any process entries from /proc");
        ok = false;
    } else {
        println!("   ✅ Can read {} process entries", entries.len());
    }

    match system::read_memory_info() {
        Ok(mem) => println!(
            "   ✅ /proc/meminfo: {} MB total, {:.1}% in use",
            mem.total_bytes / 1024 / 1024,
            mem.used_percent()
        ),
        Err(e) => {
            println!("   ❌ {}", e);
            ok = false;
        }
    }

    match system::read_cpu_stat() {
        Ok(_) => println!("   ✅ /proc/stat readable"),
        Err(e) => {
            println!("   ❌ {}", e);
            ok = false;
        }
    }

    let own = Path::new("/proc").join(std::process::id().to_string());
    match system::read_rss_bytes(&own) {
        Ok(rss) => println!("   ✅ Process memory readable (own RSS {} MB)", rss / 1024 / 1024),
        Err(e) => {
            println!("   ❌ Process memory not readable: {}", e);
            ok = false;
        }
    }

    match system::read_mounts() {
        Ok(mounts) if mounts.is_empty() => {
            println!("   ⚠️  No block-device mounts found, disk usage will be unavailable")
        }
        Ok(mounts) => println!("   ✅ {} drives found", mounts.len()),
        Err(e) => {
            println!("   ❌ {}", e);
            ok = false;
        }
    }

    ok
}

async fn check_store(config: &Config) -> bool {
    println!("\n💾 Checking queue store...");
    match &config.data_dir {
        Some(dir) => println!("   ℹ️  File store at {}", dir.display()),
        None => println!("   ℹ️  In-memory store (data is lost on restart)"),
    }

    let store = open_store(config.data_dir.as_deref());
    let mut ok = true;
    for queue in [CLUSTER_QUEUE, SNAPSHOT_QUEUE] {
        match store.open_queue(queue).await {
            Ok(()) => {
                let depth = store.len(queue).await.unwrap_or(0);
                println!("   ✅ Queue {} ready ({} items)", queue, depth);
            }
            Err(e) => {
                println!("   ❌ Queue {}: {}", queue, e);
                ok = false;
            }
        }
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_check_uses_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: Some(dir.path().join("queues")),
            ..Config::default()
        };
        assert!(check_store(&config).await);
        assert!(dir.path().join("queues").is_dir());
    }
}
