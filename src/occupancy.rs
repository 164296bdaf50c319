//! Occupancy sampling, grounded on `AvalancheSchedulerSvc::recordOccupancy`
//! and the per-iterate-pass occupancy snapshot built in `iterate()` (spec
//! §4.6 step 3, §4.9).

use std::sync::Arc;

use crate::alg_state::{AlgState, NUM_STATES};

/// A subscriber registered via `SchedulerHandle::record_occupancy`, invoked
/// from the control task with each freshly-built snapshot.
pub type OccupancyCallback = Arc<dyn Fn(&OccupancySnapshot) + Send + Sync>;

/// One sample of how many algorithms sit in each state, per slot, taken
/// during a single `iterate()` pass.
///
/// `states[slot_index][state.slot()]` gives the count. Kept as a flat `Vec`
/// indexed by slot rather than a `HashMap` since slot indices are dense and
/// known at `initialize` time.
#[derive(Debug, Clone)]
pub struct OccupancySnapshot {
    /// Milliseconds since the scheduler was activated; monotonic, not wall-clock.
    pub timestamp_ms: u64,
    pub states: Vec<[usize; NUM_STATES]>,
}

impl OccupancySnapshot {
    /// Count of algorithms in `state` for `slot_index`.
    #[must_use]
    pub fn count(&self, slot_index: usize, state: AlgState) -> usize {
        self.states[slot_index][state.slot()]
    }

    /// Total algorithms in `state` across every slot.
    #[must_use]
    pub fn total(&self, state: AlgState) -> usize {
        self.states.iter().map(|row| row[state.slot()]).sum()
    }
}

/// Builds an `OccupancySnapshot` from the live slot table. Kept as a
/// free function rather than a method on `SchedulerCore` so the reconciler
/// and any standalone diagnostics can share it.
///
/// Sub-slot populations are folded into their parent's row: spec §4.6 step 2a
/// accumulates per-state counts "as the slot is visited (including
/// sub-slots)" rather than giving each sub-slot its own row in the snapshot.
#[must_use]
pub fn sample(timestamp_ms: u64, slots: &[crate::event_slot::EventSlot]) -> OccupancySnapshot {
    let states = slots
        .iter()
        .map(|slot| {
            let mut row = [0usize; NUM_STATES];
            for (state, count) in slot.algorithms.state_counts() {
                row[state.slot()] += count;
            }
            for sub in &slot.sub_slots {
                for (state, count) in sub.algorithms.state_counts() {
                    row[state.slot()] += count;
                }
            }
            row
        })
        .collect();
    OccupancySnapshot { timestamp_ms, states }
}
