//! Event processing slots and their sub-slots ("event views"), spec §3/§4.2.

use crate::alg_state::AlgStateSet;
use crate::error::{SchedulerError, SchedulerResult};

/// Identity of the event occupying a slot, separate from the slot's own
/// index so a slot can be reused across runs without reallocating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventContext {
    /// Index of the owning top-level slot.
    pub slot_index: usize,
    /// Monotonically increasing event number assigned by the caller.
    pub event_number: u64,
    /// Incremented each time the slot is reused, distinguishing events that
    /// have occupied the same physical slot over the life of the run.
    pub epoch: u64,
    /// `Some(name)` when this context belongs to a sub-slot (event view)
    /// rather than the top-level slot; names the entry-point node that owns it.
    pub sub_slot_entry_point: Option<String>,
}

impl EventContext {
    #[must_use]
    pub fn new(slot_index: usize, event_number: u64, epoch: u64) -> Self {
        Self {
            slot_index,
            event_number,
            epoch,
            sub_slot_entry_point: None,
        }
    }

    /// True when this context describes a sub-slot rather than a root slot.
    #[must_use]
    pub fn is_sub_slot(&self) -> bool {
        self.sub_slot_entry_point.is_some()
    }
}

/// One sub-slot ("event view"): a nested algorithm graph spawned by an
/// entry-point node in the root slot (e.g. one view per reconstructed jet).
#[derive(Debug, Clone)]
pub struct SubSlot {
    /// Name of the entry-point node that created this view.
    pub entry_point: String,
    pub context: EventContext,
    pub algorithms: AlgStateSet,
    pub complete: bool,
}

/// One top-level processing slot: the unit of concurrency the scheduler
/// manages. At most one event occupies a slot at a time (spec §3 "single
/// mutator invariant": only the control task ever calls mutating methods).
#[derive(Debug, Clone)]
pub struct EventSlot {
    pub slot_index: usize,
    pub context: Option<EventContext>,
    pub algorithms: AlgStateSet,
    pub sub_slots: Vec<SubSlot>,
    /// Whether the current event (if any) is done, or the slot is free and
    /// available for reuse. A freshly constructed slot starts `complete`,
    /// mirroring the original's slots being built already-available before
    /// any event occupies them.
    pub complete: bool,
}

impl EventSlot {
    /// Construct a free slot for `slot_index` tracking `n_algorithms`
    /// top-level algorithms. Starts `complete = true`: an empty slot is, by
    /// definition, already done with whatever it was last doing.
    #[must_use]
    pub fn new(slot_index: usize, n_algorithms: usize) -> Self {
        Self {
            slot_index,
            context: None,
            algorithms: AlgStateSet::new(n_algorithms),
            sub_slots: Vec::new(),
            complete: true,
        }
    }

    /// Whether this slot currently holds a live event.
    #[must_use]
    pub fn is_occupied(&self) -> bool {
        self.context.is_some() && !self.complete
    }

    /// Reset to the free state, ready to accept a new event.
    pub fn reset(&mut self, n_algorithms: usize) {
        self.context = None;
        self.algorithms = AlgStateSet::new(n_algorithms);
        self.sub_slots.clear();
        self.complete = true;
    }

    /// Install a new event into this (previously complete) slot.
    pub fn occupy(&mut self, event_number: u64, epoch: u64) -> SchedulerResult<()> {
        if !self.complete {
            return Err(SchedulerError::SlotNotComplete(self.slot_index));
        }
        self.context = Some(EventContext::new(self.slot_index, event_number, epoch));
        self.complete = false;
        Ok(())
    }

    /// Add a new sub-slot ("event view") for `entry_point`, tracking
    /// `n_algorithms` algorithms in the nested graph.
    ///
    /// Sub-slots may not themselves carry sub-slots (spec §3 "no nested
    /// event views"); since `SubSlot` has no `sub_slots` field at all, that
    /// invariant is enforced by the type rather than checked at runtime.
    pub fn add_sub_slot(
        &mut self,
        entry_point: impl Into<String>,
        n_algorithms: usize,
    ) -> SchedulerResult<usize> {
        let entry_point = entry_point.into();
        let context = self.context.ok_or(SchedulerError::SlotNotComplete(self.slot_index))?;
        let mut sub_context = context;
        sub_context.sub_slot_entry_point = Some(entry_point.clone());

        self.sub_slots.push(SubSlot {
            entry_point,
            context: sub_context,
            algorithms: AlgStateSet::new(n_algorithms),
            complete: false,
        });
        Ok(self.sub_slots.len() - 1)
    }

    /// Mark every sub-slot for `entry_point` complete without running them,
    /// used when the entry-point node is disabled for this event rather
    /// than scheduled (spec §4.8 `scheduleEventView`).
    pub fn disable_sub_slots(&mut self, entry_point: &str) {
        for sub in &mut self.sub_slots {
            if sub.entry_point == entry_point {
                sub.complete = true;
            }
        }
    }

    /// Whether any sub-slot algorithm is in one of `states` — used by the
    /// completion test (spec §4.6 step 4) to hold the root slot open while a
    /// spawned view is still running.
    #[must_use]
    pub fn sub_slot_algs_in_states(&self, states: &[crate::alg_state::AlgState]) -> bool {
        self.sub_slots
            .iter()
            .any(|s| !s.complete && s.algorithms.contains_any(states))
    }

    /// Whether every sub-slot has finished.
    #[must_use]
    pub fn all_sub_slots_complete(&self) -> bool {
        self.sub_slots.iter().all(|s| s.complete)
    }
}
