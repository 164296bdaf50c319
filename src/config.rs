//! Static scheduler configuration (spec §6 "Configuration").
//!
//! This is deliberately a plain, validated struct and nothing more: reading
//! it from a file or environment is configuration *loading*, which spec §2
//! lists as an external collaborator's job, not the core's.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Avalanche generation / ranking mode. An empty string disables rank-based
/// ordering of DATAREADY algorithms (spec §6, §4.6 step 2b).
pub type OptimizationMode = String;

/// Static settings read once at `SchedulerCore::initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Number of concurrent in-flight events. Usually derived from the
    /// event store's reported slot count (`EventStoreService::number_of_stores`),
    /// but overridable for tests.
    #[serde(default = "default_max_events_in_flight")]
    pub max_events_in_flight: usize,

    /// `-100` selects an in-thread mode that bypasses the arena and runs the
    /// algorithm body directly on the control task; any other positive value
    /// is advisory capacity information only (the arena itself is owned by
    /// the embedder, per spec §2).
    #[serde(default = "default_thread_pool_size")]
    pub thread_pool_size: i64,

    /// When empty, rank-based scheduling ordering is disabled.
    #[serde(default)]
    pub optimization_mode: OptimizationMode,

    /// Whether blocking algorithms preempt onto dedicated OS threads.
    #[serde(default)]
    pub enable_preemptive_blocking_tasks: bool,

    /// Cap on concurrently in-flight blocking tasks.
    #[serde(default = "default_max_blocking")]
    pub max_blocking_algos_in_flight: usize,

    /// Whether condition-algorithm scheduling is enabled.
    #[serde(default)]
    pub enable_cond_svc: bool,

    /// Whether unmet data dependencies are checked (and optionally healed
    /// via a data loader) at startup.
    #[serde(default)]
    pub check_deps: bool,

    /// Name of the data-loader algorithm to attribute unmet input
    /// dependencies to, if any.
    #[serde(default)]
    pub use_data_loader: Option<String>,

    /// Dump the control-flow graph at startup.
    #[serde(default)]
    pub show_control_flow: bool,

    /// Dump the data-flow graph at startup.
    #[serde(default)]
    pub show_data_flow: bool,

    /// Dump resolved data dependencies at startup.
    #[serde(default)]
    pub show_data_deps: bool,

    /// Run one `PrecedenceService::simulate` pass at startup.
    #[serde(default)]
    pub simulate_execution: bool,

    /// Occupancy sampling interval in milliseconds. Negative disables
    /// sampling; zero samples on every `iterate()` pass.
    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: i64,
}

const fn default_max_events_in_flight() -> usize {
    1
}

const fn default_thread_pool_size() -> i64 {
    -1
}

const fn default_max_blocking() -> usize {
    1
}

const fn default_snapshot_interval_ms() -> i64 {
    -1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_events_in_flight: default_max_events_in_flight(),
            thread_pool_size: default_thread_pool_size(),
            optimization_mode: String::new(),
            enable_preemptive_blocking_tasks: false,
            max_blocking_algos_in_flight: default_max_blocking(),
            enable_cond_svc: false,
            check_deps: false,
            use_data_loader: None,
            show_control_flow: false,
            show_data_flow: false,
            show_data_deps: false,
            simulate_execution: false,
            snapshot_interval_ms: default_snapshot_interval_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Whether rank-based scheduling ordering is active.
    #[must_use]
    pub fn ranking_enabled(&self) -> bool {
        !self.optimization_mode.is_empty()
    }

    /// Whether the in-thread (no-arena) scheduling mode is selected.
    #[must_use]
    pub fn in_thread_mode(&self) -> bool {
        self.thread_pool_size == -100
    }

    /// Validate this configuration, returning the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_events_in_flight == 0 {
            return Err(ConfigError::InvalidMaxEventsInFlight(self.max_events_in_flight));
        }
        if self.max_blocking_algos_in_flight == 0 && self.enable_preemptive_blocking_tasks {
            return Err(ConfigError::InvalidMaxBlocking(self.max_blocking_algos_in_flight));
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid max_events_in_flight: {0}. Must be at least 1")]
    InvalidMaxEventsInFlight(usize),

    #[error("invalid max_blocking_algos_in_flight: {0}. Must be at least 1 when blocking tasks are enabled")]
    InvalidMaxBlocking(usize),
}
