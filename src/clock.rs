//! Wall-clock helpers for interval-aligned loops.

use std::time::Duration;

use chrono::Utc;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> f64 {
    Utc::now().timestamp_millis() as f64
}

/// Time left until the next multiple of `interval_ms` on the wall clock.
pub fn until_next_boundary(interval_ms: u64) -> Duration {
    let now = Utc::now().timestamp_millis().max(0) as u64;
    Duration::from_millis(millis_to_boundary(now, interval_ms))
}

/// `interval - (now mod interval)`, always in `1..=interval`.
pub fn millis_to_boundary(now_ms: u64, interval_ms: u64) -> u64 {
    if interval_ms == 0 {
        return 0;
    }
    interval_ms - now_ms % interval_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_to_boundary() {
        assert_eq!(millis_to_boundary(12_345, 1_000), 655);
        assert_eq!(millis_to_boundary(12_000, 1_000), 1_000);
        assert_eq!(millis_to_boundary(12_999, 1_000), 1);
        assert_eq!(millis_to_boundary(5, 0), 0);
    }

    #[test]
    fn test_until_next_boundary_is_bounded() {
        let d = until_next_boundary(250);
        assert!(d > Duration::ZERO && d <= Duration::from_millis(250));
    }
}
