//! CLI command implementations for herakles-cluster-snapshot.
//!
//! - `check`: configuration, `/proc` and queue store validation
//! - `config`: configuration file generation
//! - `query`: snapshot range queries and deletion
//! - `generate`: synthetic NodeData / ClusterData records

pub mod check;
pub mod config;
pub mod generate;
pub mod query;

pub use check::command_check;
pub use config::command_config;
pub use generate::command_generate_testdata;
pub use query::{command_delete_snapshots, command_query};
