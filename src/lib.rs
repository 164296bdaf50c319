//! Concurrent event-processing task scheduler core: per-event algorithm
//! state machines, an action-queue-driven control task, worker dispatch,
//! and slot reconciliation over a directed algorithm graph whose topology
//! and execution semantics are supplied by the embedder.

pub mod action_queue;
pub mod alg_state;
pub mod algorithm;
pub mod config;
pub mod error;
pub mod event_slot;
pub mod event_store;
pub mod occupancy;
pub mod precedence;
pub mod reconciler;
pub mod resource_pool;
pub mod scheduler;
pub mod status;
pub mod task_spec;

pub use alg_state::{AlgIndex, AlgState, AlgStateSet};
pub use algorithm::{Algorithm, AlgorithmOutcome};
pub use config::SchedulerConfig;
pub use error::{SchedulerError, SchedulerResult};
pub use event_slot::{EventContext, EventSlot, SubSlot};
pub use event_store::EventStoreService;
pub use occupancy::{OccupancyCallback, OccupancySnapshot};
pub use precedence::{AlgorithmNode, Cause, PrecedenceClient, PrecedenceService};
pub use resource_pool::{AlgorithmHandle, AlgorithmResourcePool};
pub use scheduler::{FinishedEvent, SchedulerCore, SchedulerHandle};
pub use status::{AlgExecState, EventStatus, ExecutionStatusService};
