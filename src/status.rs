//! Per-event execution status tracking, grounded on the original's
//! `IAlgExecStateSvc`/`EventStatus` enum referenced from `signoff()` and
//! `eventFailed()` (spec §4.6 step 4, §7).

use crate::alg_state::AlgIndex;

/// Outcome recorded against a finished event, surfaced through
/// `popFinishedEvent`/`tryPopFinishedEvent` (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// Every algorithm accepted (or rejected by filter, which is not itself
    /// a failure) and all control-flow rules resolved cleanly.
    Success,
    /// At least one algorithm transitioned to `Error`.
    AlgorithmFailure,
    /// The slot could make no further progress although algorithms remain
    /// unresolved — detected by the stall test (spec §4.6 step 4, "isStalled").
    AlgStall,
}

/// Per-algorithm execution record the status service accumulates across a
/// slot's lifetime — enough to answer "did anything fail" at sign-off
/// without re-scanning the whole `AlgStateSet` history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgExecState {
    Ok,
    Failed,
}

/// Tracks per-slot, per-algorithm execution outcomes across a run.
///
/// Kept separate from `AlgStateSet` because state-set membership is
/// overwritten as an algorithm cycles through retries (`Resourceless` ->
/// `DataReady` -> ...), whereas the status service must remember a failure
/// even after the algorithm's *current* state has moved on.
pub trait ExecutionStatusService: Send + Sync {
    /// Record the outcome of running `alg_index` in `slot_index`.
    fn update_event_status(&self, slot_index: usize, alg_index: AlgIndex, outcome: AlgExecState);

    /// Roll up every recorded outcome for `slot_index` into one status.
    fn event_status(&self, slot_index: usize) -> EventStatus;

    /// Clear recorded state for `slot_index`, called on slot reuse.
    fn reset(&self, slot_index: usize);
}
