//! Snapshot query and deletion commands.

use std::fmt::Write as FmtWrite;
use std::io::{self, BufRead, Write};

use anyhow::Context;
use chrono::{TimeZone, Utc};

use crate::cli::OutputFormat;
use crate::client::AggregatorClient;
use crate::clock;
use crate::query::average_across_snapshots;
use crate::records::{MergeOptions, Snapshot, Timestamped, NO_DISK_DATA};

/// Fetches snapshots in `[from, to]` and prints them, or their average.
pub async fn command_query(
    client: &dyn AggregatorClient,
    from: f64,
    to: Option<f64>,
    average: bool,
    format: OutputFormat,
    merge: &MergeOptions,
) -> anyhow::Result<()> {
    let to = to.unwrap_or_else(clock::now_ms);
    let snapshots = client
        .get_snapshots(from, to)
        .await
        .context("Failed to fetch snapshots")?;

    let snapshots = if average {
        average_across_snapshots(&snapshots, merge).into_iter().collect()
    } else {
        snapshots
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshots)?),
        OutputFormat::Table => print!("{}", render_snapshot_table(&snapshots)),
    }
    Ok(())
}

/// Deletes every stored snapshot after confirmation.
pub async fn command_delete_snapshots(client: &dyn AggregatorClient, yes: bool) -> anyhow::Result<()> {
    if !yes && !confirm("Delete ALL stored snapshots?")? {
        println!("Aborted");
        return Ok(());
    }
    client
        .delete_all_snapshots()
        .await
        .context("Failed to delete snapshots")?;
    println!("✅ All snapshots deleted");
    Ok(())
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn format_timestamp(ms: f64) -> String {
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| format!("{ms}"))
}

fn render_snapshot_table(snapshots: &[Snapshot]) -> String {
    let mut out = String::new();
    writeln!(
        out,
        "{:23} | {:>5} | {:>7} | {:>7} | {:>7} | {:>8}",
        "timestamp (UTC)", "nodes", "cpu %", "ram %", "disk %", "capacity"
    )
    .ok();
    writeln!(out, "{}", "-".repeat(23 + 5 * 3 + 5 + 7 * 3 + 8)).ok();

    for s in snapshots {
        let disk = s.average_disk_percent();
        let disk = if disk == NO_DISK_DATA {
            "n/a".to_string()
        } else {
            format!("{:.1}", disk)
        };
        let capacity = s
            .capacity_estimate()
            .map_or_else(|| "n/a".to_string(), |c| c.to_string());
        writeln!(
            out,
            "{:23} | {:>5} | {:>7.1} | {:>7.1} | {:>7} | {:>8}",
            format_timestamp(s.timestamp_ms()),
            s.nodes().len(),
            s.average_cpu_percent(),
            s.average_ram_percent(),
            disk,
            capacity
        )
        .ok();
    }
    writeln!(out, "\n{} snapshots", snapshots.len()).ok();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::records::fixtures::{cluster, node};
    use crate::service::SnapshotService;
    use crate::store::{MemoryQueueStore, SNAPSHOT_QUEUE};
    use std::sync::Arc;

    #[test]
    fn test_table_lists_every_snapshot() {
        let snapshots = vec![
            Snapshot::new(0.0, cluster(0.0), vec![node("node-0", 0.0)]),
            Snapshot::new(60_000.0, cluster(60_000.0), Vec::new()),
        ];
        let table = render_snapshot_table(&snapshots);
        assert!(table.contains("1970-01-01 00:00:00.000"));
        assert!(table.contains("1970-01-01 00:01:00.000"));
        assert!(table.contains("n/a"));
        assert!(table.contains("2 snapshots"));
    }

    #[tokio::test]
    async fn test_delete_with_yes_clears_store() {
        let svc = SnapshotService::new(Arc::new(MemoryQueueStore::new()));
        let s = Snapshot::new(1.0, cluster(1.0), vec![node("node-0", 1.0)]);
        svc.put_data(SNAPSHOT_QUEUE, codec::encode(&s).unwrap())
            .await
            .unwrap();

        command_delete_snapshots(&svc, true).await.unwrap();
        assert!(svc.get_snapshots(0.0, 10.0).await.unwrap().is_empty());
    }
}
