//! Algorithm instance pool adapter, grounded on `AlgResourcePool.h`'s
//! `acquireAlgorithm`/`releaseAlgorithm` contract (spec §4.4).

use crate::alg_state::AlgIndex;

/// Opaque handle to a checked-out algorithm instance. Carries nothing the
/// scheduler core interprets; it is only ever handed back to `release`.
pub struct AlgorithmHandle {
    pub alg_index: AlgIndex,
    pub instance_id: usize,
}

/// Pool of reusable algorithm instances (clone-per-slot or clone-per-thread,
/// depending on the embedder's cloneability policy — opaque to the core).
pub trait AlgorithmResourcePool: Send + Sync {
    /// Attempt to check out an instance of `alg_index`. `None` means no
    /// instance is currently available; the caller (`TaskDispatch::schedule`)
    /// must push the algorithm onto the retry queue and transition it to
    /// `Resourceless` rather than treat this as an error.
    fn acquire(&self, alg_index: AlgIndex) -> Option<AlgorithmHandle>;

    /// Return a previously acquired instance.
    fn release(&self, handle: AlgorithmHandle);

    /// Flat list of every algorithm index the pool knows about, used at
    /// `SchedulerCore::initialize` to build the per-slot `AlgStateSet` sized
    /// correctly without the core hardcoding algorithm counts.
    fn get_flat_alg_list(&self) -> Vec<AlgIndex>;
}
