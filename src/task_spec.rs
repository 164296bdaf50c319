//! Worker dispatch contract (spec §4.4), grounded on `AlgoExecutionTask.cpp`'s
//! `execute()`: thread-local one-shot init, `RetCodeGuard`, the triple catch
//! around the algorithm body, and the sign-off closure pushed back onto the
//! action queue afterward.

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{error, warn};

use crate::action_queue::{Action, ActionQueueSender, SchedulerMutator};
use crate::alg_state::AlgIndex;
use crate::algorithm::{Algorithm, AlgorithmOutcome};
use crate::event_slot::EventContext;
use crate::event_store::EventStoreService;
use crate::resource_pool::{AlgorithmHandle, AlgorithmResourcePool};
use crate::status::{AlgExecState, ExecutionStatusService};

thread_local! {
    /// Gates the one-shot per-worker-thread setup (analogous to the
    /// original's `Gaudi::Concurrency::ThreadInitDone` check): selecting a
    /// thread-local context is cheap to repeat, but we still only want to
    /// log it once per thread.
    static THREAD_INIT_DONE: Cell<bool> = const { Cell::new(false) };
}

/// Everything a worker needs to run one algorithm instance against one
/// event, analogous to the original's `AlgsExecutionTask::m_ts`.
pub struct TaskSpec {
    pub alg_index: AlgIndex,
    pub context: EventContext,
}

/// Marks the run dirty on construction; `disarm` clears that before drop.
/// If a worker thread panics mid-task and unwinds past this guard without
/// disarming it, `Drop` observes the still-armed flag — the Rust analogue
/// of the original's `RetCodeGuard` defaulting to `UnhandledException`
/// unless explicitly told the task returned cleanly.
struct AbnormalExitGuard<'a> {
    armed: bool,
    on_abnormal_exit: Box<dyn FnMut() + 'a>,
}

impl<'a> AbnormalExitGuard<'a> {
    fn new(on_abnormal_exit: impl FnMut() + 'a) -> Self {
        Self {
            armed: true,
            on_abnormal_exit: Box::new(on_abnormal_exit),
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbnormalExitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            (self.on_abnormal_exit)();
        }
    }
}

/// Collaborators a worker needs to run one `TaskSpec` to completion and
/// report the result back to the control task. Bundled behind `Arc` so
/// cloning a `TaskDispatch` to move it into a spawned task is cheap.
#[derive(Clone)]
pub struct TaskDispatch {
    pub algorithms: Arc<dyn Algorithm>,
    pub store: Arc<dyn EventStoreService>,
    pub status: Arc<dyn ExecutionStatusService>,
    pub pool: Arc<dyn AlgorithmResourcePool>,
    pub actions: ActionQueueSender,
}

impl TaskDispatch {
    /// Run `spec` to completion: select the store partition, execute the
    /// algorithm body under panic containment, update the status service,
    /// release the pool handle, and push the sign-off action.
    ///
    /// This is the body every worker (arena task or dedicated blocking
    /// thread) runs; spec §4.4 describes the same steps regardless of which
    /// thread pool dispatched them.
    pub fn run(&self, spec: TaskSpec, handle: AlgorithmHandle) {
        THREAD_INIT_DONE.with(|done| {
            if !done.get() {
                tracing::debug!("worker thread initialized");
                done.set(true);
            }
        });

        if let Err(e) = self.store.select_store(spec.context.slot_index) {
            error!(error = %e, "failed to select store partition; treating as algorithm error");
            self.status
                .update_event_status(spec.context.slot_index, spec.alg_index, AlgExecState::Failed);
            self.pool.release(handle);
            self.signoff(spec.alg_index, spec.context, AlgorithmOutcome::Failed);
            return;
        }

        let mut exit_status = AlgExecState::Failed;
        let mut guard = AbnormalExitGuard::new(|| {
            warn!("algorithm exited abnormally without reporting a clean outcome");
        });

        let outcome = match catch_unwind(AssertUnwindSafe(|| self.algorithms.run(&spec.context))) {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(alg_index = spec.alg_index, "algorithm panicked during execution");
                AlgorithmOutcome::Failed
            }
        };

        if matches!(outcome, AlgorithmOutcome::Success { .. }) {
            exit_status = AlgExecState::Ok;
        }
        guard.disarm();
        drop(guard);

        self.status
            .update_event_status(spec.context.slot_index, spec.alg_index, exit_status);
        self.pool.release(handle);
        self.signoff(spec.alg_index, spec.context, outcome);
    }

    /// Push the sign-off closure onto the action queue so the control task
    /// performs the FSM transition (spec §4.4's final step: "push sign-off
    /// action"; the actual transition logic lives in `SchedulerCore::signoff`
    /// since only the control task may mutate `AlgStateSet`).
    fn signoff(&self, alg_index: AlgIndex, context: EventContext, outcome: AlgorithmOutcome) {
        let action: Action = Box::new(move |mutator: &mut dyn SchedulerMutator| {
            mutator.signoff(alg_index, context, outcome);
        });
        if self.actions.push(action).is_err() {
            warn!(alg_index, "dropped sign-off action: control task already shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_queue::action_queue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAlgorithm {
        calls: AtomicUsize,
        fail: bool,
    }

    impl Algorithm for CountingAlgorithm {
        fn name(&self) -> &str {
            "counting"
        }

        fn run(&self, _context: &EventContext) -> AlgorithmOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                panic!("forced failure");
            }
            AlgorithmOutcome::Success { filter_passed: true }
        }
    }

    struct AlwaysStore;
    impl EventStoreService for AlwaysStore {
        fn number_of_stores(&self) -> usize {
            1
        }
        fn select_store(&self, _slot_index: usize) -> Result<(), crate::event_store::StoreSelectionError> {
            Ok(())
        }
        fn free_slots(&self) -> usize {
            1
        }
    }

    #[derive(Default)]
    struct RecordingStatus {
        last: std::sync::Mutex<Option<AlgExecState>>,
    }
    impl ExecutionStatusService for RecordingStatus {
        fn update_event_status(&self, _slot_index: usize, _alg_index: AlgIndex, outcome: AlgExecState) {
            *self.last.lock().unwrap() = Some(outcome);
        }
        fn event_status(&self, _slot_index: usize) -> crate::status::EventStatus {
            crate::status::EventStatus::Success
        }
        fn reset(&self, _slot_index: usize) {}
    }

    struct NoopPool;
    impl AlgorithmResourcePool for NoopPool {
        fn acquire(&self, alg_index: AlgIndex) -> Option<AlgorithmHandle> {
            Some(AlgorithmHandle {
                alg_index,
                instance_id: 0,
            })
        }
        fn release(&self, _handle: AlgorithmHandle) {}
        fn get_flat_alg_list(&self) -> Vec<AlgIndex> {
            vec![0]
        }
    }

    #[test]
    fn successful_run_reports_ok_and_signs_off() {
        let (tx, mut rx) = action_queue();
        let dispatch = TaskDispatch {
            algorithms: Arc::new(CountingAlgorithm {
                calls: AtomicUsize::new(0),
                fail: false,
            }),
            store: Arc::new(AlwaysStore),
            status: Arc::new(RecordingStatus::default()),
            pool: Arc::new(NoopPool),
            actions: tx,
        };
        dispatch.run(
            TaskSpec {
                alg_index: 0,
                context: EventContext::new(0, 1, 0),
            },
            AlgorithmHandle {
                alg_index: 0,
                instance_id: 0,
            },
        );
        assert!(rx.try_pop().is_some());
    }

    #[test]
    fn panicking_algorithm_is_contained() {
        let (tx, mut rx) = action_queue();
        let status = Arc::new(RecordingStatus::default());
        let dispatch = TaskDispatch {
            algorithms: Arc::new(CountingAlgorithm {
                calls: AtomicUsize::new(0),
                fail: true,
            }),
            store: Arc::new(AlwaysStore),
            status: status.clone(),
            pool: Arc::new(NoopPool),
            actions: tx,
        };
        dispatch.run(
            TaskSpec {
                alg_index: 0,
                context: EventContext::new(0, 1, 0),
            },
            AlgorithmHandle {
                alg_index: 0,
                instance_id: 0,
            },
        );
        assert_eq!(*status.last.lock().unwrap(), Some(AlgExecState::Failed));
        assert!(rx.try_pop().is_some());
    }
}
