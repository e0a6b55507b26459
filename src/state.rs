//! Application state shared by HTTP handlers and the aggregator task.

use prometheus::Registry;
use std::sync::Arc;

use crate::config::Config;
use crate::health_stats::HealthStats;
use crate::metrics::AggregatorMetrics;
use crate::service::SnapshotService;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub registry: Registry,
    pub metrics: AggregatorMetrics,
    pub service: SnapshotService,
    pub config: Arc<Config>,
    pub health_stats: Arc<HealthStats>,
}
