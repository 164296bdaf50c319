//! Per-slot algorithm finite-state machine set (spec §3, §4.1).

use serde::{Deserialize, Serialize};

use crate::error::{SchedulerError, SchedulerResult};

/// Dense integer index identifying an algorithm, stable for the lifetime of
/// the run (spec §3 "Algorithm identity").
pub type AlgIndex = usize;

/// Finite states an algorithm can occupy for a given slot (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgState {
    /// Not yet considered for this event.
    Initial,
    /// Control flow has reached it but data predecessors unresolved.
    ControlReady,
    /// Data dependencies satisfied; eligible for dispatch.
    DataReady,
    /// Dispatched to the arena (or blocking thread); running.
    Scheduled,
    /// `DataReady` but no instance available from the pool; awaits retry.
    Resourceless,
    /// Finished successfully with filter pass.
    EvtAccepted,
    /// Finished successfully, filter rejected.
    EvtRejected,
    /// Execution failed.
    Error,
}

/// Number of distinct states; used to size the membership index.
pub const NUM_STATES: usize = 8;

const ALL_STATES: [AlgState; NUM_STATES] = [
    AlgState::Initial,
    AlgState::ControlReady,
    AlgState::DataReady,
    AlgState::Scheduled,
    AlgState::Resourceless,
    AlgState::EvtAccepted,
    AlgState::EvtRejected,
    AlgState::Error,
];

impl AlgState {
    /// Dense index into the membership tables, `0..NUM_STATES`.
    #[must_use]
    pub const fn slot(self) -> usize {
        match self {
            Self::Initial => 0,
            Self::ControlReady => 1,
            Self::DataReady => 2,
            Self::Scheduled => 3,
            Self::Resourceless => 4,
            Self::EvtAccepted => 5,
            Self::EvtRejected => 6,
            Self::Error => 7,
        }
    }

    /// Whether `self -> to` is a permitted transition per spec §3's table:
    ///
    /// `INITIAL -> CONTROLREADY -> DATAREADY -> SCHEDULED ->
    ///  {EVTACCEPTED | EVTREJECTED | ERROR}`, plus `DATAREADY <-> RESOURCELESS`.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Initial, Self::ControlReady)
                | (Self::ControlReady, Self::DataReady)
                | (Self::DataReady, Self::Scheduled)
                | (Self::DataReady, Self::Resourceless)
                | (Self::Resourceless, Self::DataReady)
                | (Self::Resourceless, Self::Scheduled)
                | (Self::Scheduled, Self::EvtAccepted)
                | (Self::Scheduled, Self::EvtRejected)
                | (Self::Scheduled, Self::Error)
        )
    }

    /// Whether this is one of the terminal, successfully-completed states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::EvtAccepted | Self::EvtRejected | Self::Error)
    }
}

/// Fixed-index set of algorithm FSMs for one slot (or sub-slot).
///
/// Maintains a dense `state[i]` array plus, for each state, a sibling
/// membership list so that `algs_in_state` and `size_of_subset` are O(1)/O(k)
/// without scanning the full algorithm count on every call — the "one
/// natural realization" spec §4.1 describes.
#[derive(Debug, Clone)]
pub struct AlgStateSet {
    state: Vec<AlgState>,
    /// `membership[state.slot()]` holds the algorithm indices currently in
    /// that state, in no particular order. `position` inverts this in O(1)
    /// so `set` can swap-remove without scanning.
    membership: [Vec<AlgIndex>; NUM_STATES],
    /// `position[i] = (state_slot, index_within_membership_vec)` for algorithm `i`.
    position: Vec<(usize, usize)>,
}

impl AlgStateSet {
    /// Create a set of `n` algorithms, all starting `Initial`.
    #[must_use]
    pub fn new(n: usize) -> Self {
        let mut membership: [Vec<AlgIndex>; NUM_STATES] = Default::default();
        membership[AlgState::Initial.slot()] = (0..n).collect();
        let position = (0..n).map(|i| (AlgState::Initial.slot(), i)).collect();
        Self {
            state: vec![AlgState::Initial; n],
            membership,
            position,
        }
    }

    /// Number of algorithms tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Reset every algorithm back to `Initial`, as on slot reuse.
    pub fn reset(&mut self) {
        let n = self.state.len();
        *self = Self::new(n);
    }

    /// Current state of algorithm `alg_index`.
    #[must_use]
    pub fn state_of(&self, alg_index: AlgIndex) -> AlgState {
        self.state[alg_index]
    }

    /// Attempt `alg_index -> new_state`. Fails with `InvalidTransition` if
    /// the pair is not in the permitted table.
    pub fn set(&mut self, alg_index: AlgIndex, new_state: AlgState) -> SchedulerResult<()> {
        let old_state = self.state[alg_index];
        if !old_state.can_transition_to(new_state) {
            return Err(SchedulerError::InvalidTransition {
                alg_index,
                from: old_state,
                to: new_state,
            });
        }

        // Remove from old membership list via swap-remove, fixing up the
        // position of whichever element got swapped into the vacated slot.
        let (old_slot, old_pos) = self.position[alg_index];
        let old_vec = &mut self.membership[old_slot];
        old_vec.swap_remove(old_pos);
        if old_pos < old_vec.len() {
            let moved = old_vec[old_pos];
            self.position[moved] = (old_slot, old_pos);
        }

        let new_slot = new_state.slot();
        self.membership[new_slot].push(alg_index);
        self.position[alg_index] = (new_slot, self.membership[new_slot].len() - 1);
        self.state[alg_index] = new_state;

        Ok(())
    }

    /// Snapshot of algorithm indices currently in `state`.
    ///
    /// Returns an owned `Vec` rather than a borrow: the reconciler mutates
    /// the set (via `set`) while walking this list (dispatching algorithms
    /// moves them DataReady -> Scheduled), so the iteration must be
    /// insulated from those in-progress mutations, per spec §4.1's
    /// copy-on-iterate requirement.
    #[must_use]
    pub fn algs_in_state(&self, state: AlgState) -> Vec<AlgIndex> {
        self.membership[state.slot()].clone()
    }

    /// O(1) population count for `state`.
    #[must_use]
    pub fn size_of_subset(&self, state: AlgState) -> usize {
        self.membership[state.slot()].len()
    }

    /// True iff any algorithm is currently in any of `states`.
    #[must_use]
    pub fn contains_any(&self, states: &[AlgState]) -> bool {
        states.iter().any(|s| !self.membership[s.slot()].is_empty())
    }

    /// Iterate `(state, count)` for every tracked state, in a fixed order —
    /// used by `OccupancySnapshot` sampling.
    pub fn state_counts(&self) -> impl Iterator<Item = (AlgState, usize)> + '_ {
        ALL_STATES.iter().map(move |s| (*s, self.size_of_subset(*s)))
    }
}
