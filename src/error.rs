//! Error kinds for the scheduler core (spec §7).

use thiserror::Error;

use crate::alg_state::AlgState;

/// Errors surfaced at the scheduler's public API boundary.
///
/// Per-event outcomes (`AlgorithmFailure`, `AlgStall`) are *not* represented
/// here: they are recorded against the event's status and delivered through
/// the finished-events queue, matching spec §7's description that they are
/// outcomes of an event, not failures of a scheduler call.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `pushNewEvent` with no free slot.
    #[error("no free processing slot available")]
    NoCapacity,

    /// The target slot was not `complete` when a new event was pushed onto it.
    #[error("slot {0} is not complete; cannot accept a new event")]
    SlotNotComplete(usize),

    /// A state transition was attempted that is not in the AlgState transition table.
    #[error("invalid transition for algorithm {alg_index} from {from:?} to {to:?}")]
    InvalidTransition {
        alg_index: usize,
        from: AlgState,
        to: AlgState,
    },

    /// `popFinishedEvent`/`tryPopFinishedEvent` called with nothing available,
    /// or called while the scheduler is inactive with all slots free.
    #[error("no finished event available")]
    NoFinishedEvent,

    /// A required collaborator (precedence service, resource pool, ...) returned
    /// failure at a point the core treats as unrecoverable for the whole run.
    #[error("fatal scheduler error: {0}")]
    Fatal(String),

    /// The scheduler is not active (deactivated or never initialized).
    #[error("scheduler is not active")]
    Inactive,
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
