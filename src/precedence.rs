//! Precedence service adapter (spec §4.5), grounded on
//! `AvalancheSchedulerSvc`'s `m_precSvc` collaborator and the original
//! `PrecedenceSvc`/`IGraph` interface it calls through.

use crate::alg_state::{AlgIndex, AlgStateSet};
use crate::error::SchedulerResult;

/// Why a `revise` or `iterate` call happened — carried through so the
/// precedence service's own bookkeeping (e.g. ranking statistics) can
/// distinguish a normal state advance from a retry-queue-driven one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    /// An algorithm finished (successfully or not) and signed off.
    SignOff { alg_index: AlgIndex },
    /// A scheduling pass reconsidered a slot with no specific triggering algorithm.
    Iteration,
}

/// Node metadata the precedence service exposes about one algorithm, used
/// by `TaskDispatch` and the reconciler without either needing to know the
/// graph's internal representation.
#[derive(Debug, Clone)]
pub struct AlgorithmNode {
    pub name: String,
    pub is_blocking: bool,
    pub rank: i64,
}

/// Thin adapter over whatever precedence-rule engine the embedder plugs in.
///
/// The scheduler core never encodes graph topology itself — spec §4.5
/// requires every question about what's next, what outranks what, and
/// whether a node may run be delegated here, mirroring the original's
/// `m_precSvc->iterate(...)` / `m_precSvc->CFRulesResolved(...)` calls.
pub trait PrecedenceService: Send + Sync {
    /// Advance control-flow-ready algorithms to `DataReady` (or beyond) for
    /// `slot_index`, mutating `states` in place. Returns the number of
    /// algorithms whose state changed, so the caller can decide whether a
    /// further `iterate` pass is warranted.
    fn iterate(&self, slot_index: usize, states: &mut AlgStateSet, cause: Cause) -> usize;

    /// Whether every control-flow rule for `slot_index` has resolved to a
    /// definite pass/fail, i.e. no further algorithm in this slot can ever
    /// become eligible. Used by the completion test (spec §4.6 step 4).
    fn cf_rules_resolved(&self, slot_index: usize, states: &AlgStateSet) -> bool;

    /// Scheduling priority for `alg_index`; higher runs first when the
    /// configuration's `optimization_mode` enables rank ordering.
    fn priority(&self, alg_index: AlgIndex) -> i64;

    /// Whether `alg_index` should be dispatched onto a dedicated blocking
    /// thread rather than the arena (spec §4.4).
    fn is_blocking(&self, alg_index: AlgIndex) -> bool;

    /// Node metadata for diagnostics and `TaskDispatch` thread selection.
    fn get_algorithm_node(&self, alg_index: AlgIndex) -> AlgorithmNode;

    /// Dry-run the control-flow graph against hypothetical event data
    /// without touching live slots — used at startup when
    /// `SchedulerConfig::simulate_execution` is set.
    fn simulate(&self, states: &AlgStateSet) -> SchedulerResult<()>;

    /// Render a human-readable dump of the current precedence state for a
    /// slot, used by `eventFailed`-style diagnostics.
    fn print_state(&self, slot_index: usize, states: &AlgStateSet) -> String;

    /// Render the static precedence rules (the graph itself), used at
    /// startup when `show_control_flow`/`show_data_flow`/`show_data_deps`
    /// are set.
    fn dump_precedence_rules(&self) -> String;
}

/// Pass-through client the scheduler core holds; exists as a named type so
/// `SchedulerCore` can be generic over `P: PrecedenceService` while still
/// giving call sites a concrete, documented handle to reach for.
pub struct PrecedenceClient<P: PrecedenceService> {
    inner: P,
}

impl<P: PrecedenceService> PrecedenceClient<P> {
    pub const fn new(inner: P) -> Self {
        Self { inner }
    }

    pub fn iterate(&self, slot_index: usize, states: &mut AlgStateSet, cause: Cause) -> usize {
        self.inner.iterate(slot_index, states, cause)
    }

    pub fn cf_rules_resolved(&self, slot_index: usize, states: &AlgStateSet) -> bool {
        self.inner.cf_rules_resolved(slot_index, states)
    }

    pub fn priority(&self, alg_index: AlgIndex) -> i64 {
        self.inner.priority(alg_index)
    }

    pub fn is_blocking(&self, alg_index: AlgIndex) -> bool {
        self.inner.is_blocking(alg_index)
    }

    pub fn get_algorithm_node(&self, alg_index: AlgIndex) -> AlgorithmNode {
        self.inner.get_algorithm_node(alg_index)
    }

    pub fn simulate(&self, states: &AlgStateSet) -> SchedulerResult<()> {
        self.inner.simulate(states)
    }

    pub fn print_state(&self, slot_index: usize, states: &AlgStateSet) -> String {
        self.inner.print_state(slot_index, states)
    }

    pub fn dump_precedence_rules(&self) -> String {
        self.inner.dump_precedence_rules()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alg_state::AlgState;

    struct LinearPrecedence;

    impl PrecedenceService for LinearPrecedence {
        fn iterate(&self, _slot_index: usize, states: &mut AlgStateSet, _cause: Cause) -> usize {
            let mut advanced = 0;
            for alg in states.algs_in_state(AlgState::Initial) {
                states.set(alg, AlgState::ControlReady).unwrap();
                states.set(alg, AlgState::DataReady).unwrap();
                advanced += 1;
            }
            advanced
        }

        fn cf_rules_resolved(&self, _slot_index: usize, states: &AlgStateSet) -> bool {
            states.size_of_subset(AlgState::Initial) == 0
                && states.size_of_subset(AlgState::ControlReady) == 0
        }

        fn priority(&self, _alg_index: AlgIndex) -> i64 {
            0
        }

        fn is_blocking(&self, _alg_index: AlgIndex) -> bool {
            false
        }

        fn get_algorithm_node(&self, alg_index: AlgIndex) -> AlgorithmNode {
            AlgorithmNode {
                name: format!("alg{alg_index}"),
                is_blocking: false,
                rank: 0,
            }
        }

        fn simulate(&self, _states: &AlgStateSet) -> SchedulerResult<()> {
            Ok(())
        }

        fn print_state(&self, slot_index: usize, _states: &AlgStateSet) -> String {
            format!("slot {slot_index}")
        }

        fn dump_precedence_rules(&self) -> String {
            "linear".to_string()
        }
    }

    #[test]
    fn client_delegates_to_inner_service() {
        let client = PrecedenceClient::new(LinearPrecedence);
        let mut states = AlgStateSet::new(3);
        let advanced = client.iterate(0, &mut states, Cause::Iteration);
        assert_eq!(advanced, 3);
        assert!(client.cf_rules_resolved(0, &states));
        assert_eq!(client.get_algorithm_node(1).name, "alg1");
    }
}
