//! Event-store (whiteboard) adapter, grounded on the original's
//! `IHiveWhiteBoard` collaborator referenced from `initialize()`'s slot-count
//! derivation and `TaskDispatch`'s store-partition selection (spec §4.4).

/// The embedder's data store, partitioned per concurrent slot.
///
/// The scheduler core never touches stored event data itself — it only
/// needs to know how many partitions exist (to size the slot table) and
/// which partition a dispatched task should select before running.
pub trait EventStoreService: Send + Sync {
    /// Number of store partitions, i.e. the maximum number of events that
    /// may be in flight concurrently. `SchedulerConfig::max_events_in_flight`
    /// is normally derived from this at `initialize`.
    fn number_of_stores(&self) -> usize;

    /// Make partition `slot_index` current for the calling thread. Called
    /// by `TaskDispatch` before invoking an algorithm's `run`.
    fn select_store(&self, slot_index: usize) -> Result<(), StoreSelectionError>;

    /// Partitions not currently bound to any in-flight event.
    fn free_slots(&self) -> usize;
}

#[derive(Debug, thiserror::Error)]
#[error("store partition {0} could not be selected")]
pub struct StoreSelectionError(pub usize);
