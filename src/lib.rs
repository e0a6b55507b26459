//! herakles-cluster-snapshot
//!
//! Per-node collectors sample hardware and service process usage, average
//! each batch and push it to a central aggregator. The aggregator aligns the
//! node queues and the cluster topology queue on a shared interval and
//! persists fused [`records::Snapshot`]s that can be queried by time range.

pub mod aggregator;
pub mod cli;
pub mod client;
pub mod clock;
pub mod codec;
pub mod collector;
pub mod commands;
pub mod config;
pub mod handlers;
pub mod health_stats;
pub mod metrics;
pub mod provider;
pub mod query;
pub mod records;
pub mod service;
pub mod state;
pub mod store;
pub mod system;
