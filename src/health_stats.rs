//! Running health statistics rendered at `/health`.

use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use tracing::warn;

#[derive(Clone, Copy, Default)]
struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    fn add(&mut self, value: f64) {
        if self.count == 0 {
            *self = RunningStat {
                count: 1,
                sum: value,
                min: value,
                max: value,
                last: value,
            };
            return;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

/// Point-in-time view of a [`Stat`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatView {
    pub current: f64,
    pub average: f64,
    pub max: f64,
    pub min: f64,
    pub count: u64,
}

#[derive(Default)]
pub struct Stat {
    inner: Mutex<RunningStat>,
}

impl Stat {
    pub fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    pub fn view(&self) -> StatView {
        self.inner
            .lock()
            .map(|s| StatView {
                current: s.last,
                average: s.avg(),
                max: s.max,
                min: s.min,
                count: s.count,
            })
            .unwrap_or_default()
    }
}

/// Health counters shared by the aggregator loop, collectors and HTTP handlers.
pub struct HealthStats {
    pub drain_duration_seconds: Stat,
    pub snapshots_per_drain: Stat,
    pub published_batch_size: Stat,
    total_drains: AtomicU64,
    total_publishes: AtomicU64,
    warnings: AtomicU64,
    http_requests: AtomicU64,
    started: Instant,
}

impl Default for HealthStats {
    fn default() -> Self {
        Self {
            drain_duration_seconds: Stat::default(),
            snapshots_per_drain: Stat::default(),
            published_batch_size: Stat::default(),
            total_drains: AtomicU64::new(0),
            total_publishes: AtomicU64::new(0),
            warnings: AtomicU64::new(0),
            http_requests: AtomicU64::new(0),
            started: Instant::now(),
        }
    }
}

impl HealthStats {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn record_drain(&self, produced: u64, duration_seconds: f64) {
        self.snapshots_per_drain.add_sample(produced as f64);
        self.drain_duration_seconds.add_sample(duration_seconds);
        self.total_drains.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish(&self, batch_size: usize) {
        self.published_batch_size.add_sample(batch_size as f64);
        self.total_publishes.fetch_add(1, Ordering::Relaxed);
    }

    /// Emits a health warning on the `health` target and counts it.
    pub fn report_warning(&self, source: &str, message: &str) {
        warn!(target: "health", source, "{}", message);
        self.warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn warnings(&self) -> u64 {
        self.warnings.load(Ordering::Relaxed)
    }

    pub fn total_drains(&self) -> u64 {
        self.total_drains.load(Ordering::Relaxed)
    }

    pub fn render_table(&self) -> String {
        let left_col = 26usize;
        let col_w = 12usize;
        let mut out = String::new();

        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "metric",
            "current",
            "average",
            "max",
            "min",
            left = left_col,
            col = col_w
        )
        .ok();
        writeln!(out, "{}", "-".repeat(left_col + 3 + (col_w + 3) * 4)).ok();

        let rows = [
            ("snapshots per drain", self.snapshots_per_drain.view(), 0usize),
            ("drain duration (s)", self.drain_duration_seconds.view(), 3),
            ("published batch size", self.published_batch_size.view(), 0),
        ];
        for (label, v, precision) in rows {
            writeln!(
                out,
                "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
                label,
                format!("{:.*}", precision, v.current),
                format!("{:.*}", precision.max(1), v.average),
                format!("{:.*}", precision, v.max),
                format!("{:.*}", precision, v.min),
                left = left_col,
                col = col_w
            )
            .ok();
        }

        writeln!(out).ok();
        writeln!(out, "number of drains: {}", self.total_drains()).ok();
        writeln!(
            out,
            "number of publishes: {}",
            self.total_publishes.load(Ordering::Relaxed)
        )
        .ok();
        writeln!(out, "health warnings: {}", self.warnings()).ok();
        writeln!(
            out,
            "http requests: {}",
            self.http_requests.load(Ordering::Relaxed)
        )
        .ok();
        writeln!(out, "uptime (s): {}", self.started.elapsed().as_secs()).ok();

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stat() {
        let s = Stat::default();
        assert_eq!(s.view(), StatView::default());
        for v in [4.0, 2.0, 6.0] {
            s.add_sample(v);
        }
        let v = s.view();
        assert_eq!(v.current, 6.0);
        assert_eq!(v.average, 4.0);
        assert_eq!(v.max, 6.0);
        assert_eq!(v.min, 2.0);
        assert_eq!(v.count, 3);
    }

    #[test]
    fn test_render_table() {
        let h = HealthStats::new();
        h.record_drain(3, 0.25);
        h.record_publish(10);
        h.report_warning("test", "something degraded");
        h.record_request();

        let table = h.render_table();
        assert!(table.contains("snapshots per drain"));
        assert!(table.contains("number of drains: 1"));
        assert!(table.contains("health warnings: 1"));
        assert!(table.contains("http requests: 1"));
    }
}
