//! MPSC action queue consumed by the control task (spec §4.3).
//!
//! Grounded on the original's `concurrent_queue<action>` fed by many
//! producers (worker callbacks, public API calls) and drained by exactly one
//! consumer (the control loop in `SchedulerCore::activate`). The tokio
//! unbounded mpsc channel is the natural analogue: `Sender` is `Clone` and
//! cheaply shareable across tasks, `Receiver` is owned by the single
//! control task.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;

use crate::alg_state::AlgIndex;
use crate::algorithm::AlgorithmOutcome;
use crate::error::SchedulerResult;
use crate::event_slot::EventContext;
use crate::occupancy::OccupancyCallback;

/// Interface the control task exposes to queued actions — both the
/// sign-off closures workers push and the request/reply closures
/// `SchedulerHandle`'s public methods push.
///
/// Implemented by `SchedulerCore`. Actions take `&mut dyn SchedulerMutator`
/// rather than capturing a raw pointer back to the scheduler the way the
/// original's `std::function<void()>` actions captured `this` — the
/// original's single-mutator invariant held by convention alone; this
/// signature makes the control task the only caller who can ever supply the
/// `&mut` that makes one of these callable.
pub trait SchedulerMutator: Send {
    fn signoff(&mut self, alg_index: AlgIndex, context: EventContext, outcome: AlgorithmOutcome);

    fn push_new_event_now(&mut self, event_number: u64) -> SchedulerResult<()>;

    fn schedule_event_view_now(
        &mut self,
        slot_index: usize,
        entry_point: String,
        n_algorithms: usize,
    ) -> SchedulerResult<usize>;

    fn record_occupancy_now(&mut self, interval_ms: i64, callback: Option<OccupancyCallback>);
}

/// A queued unit of work: a closure run on the control task against its own
/// scheduler state.
///
/// Matching the original's `std::function<void()>` actions, these run
/// entirely on the control task and must not block — long-running work
/// belongs on the arena or a dedicated blocking thread (spec §4.4), not
/// inside an action body.
pub type Action = Box<dyn FnOnce(&mut dyn SchedulerMutator) + Send + 'static>;

/// Producer handle. Cheaply cloned; held by worker callbacks and by anyone
/// calling into the scheduler's public API.
#[derive(Clone)]
pub struct ActionQueueSender {
    tx: mpsc::UnboundedSender<Action>,
    len: std::sync::Arc<AtomicUsize>,
}

impl ActionQueueSender {
    /// Enqueue `action` for the control task. Fails only once the control
    /// task has dropped its receiver (scheduler fully finalized).
    pub fn push(&self, action: Action) -> Result<(), ActionQueueClosed> {
        self.tx.send(action).map_err(|_| ActionQueueClosed)?;
        self.len.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Approximate queue depth — a sampling aid, not a consistency point
    /// (spec §4.3 "approximate size"): producers and the single consumer
    /// race this counter independently of the channel's internal state.
    #[must_use]
    pub fn size(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }
}

/// Returned when `push` is attempted after the control task has shut down.
#[derive(Debug, thiserror::Error)]
#[error("action queue is closed")]
pub struct ActionQueueClosed;

/// Consumer half, owned exclusively by the control task.
pub struct ActionQueueReceiver {
    rx: mpsc::UnboundedReceiver<Action>,
    len: std::sync::Arc<AtomicUsize>,
}

impl ActionQueueReceiver {
    /// Block until an action is available, run it to get it off the queue.
    /// Returns `None` once every sender has been dropped and the queue is
    /// drained, i.e. the control loop should terminate.
    pub async fn pop(&mut self) -> Option<Action> {
        let action = self.rx.recv().await;
        if action.is_some() {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
        action
    }

    /// Non-blocking variant used by `deactivate`'s drain loop (spec §4.7).
    pub fn try_pop(&mut self) -> Option<Action> {
        match self.rx.try_recv() {
            Ok(action) => {
                self.len.fetch_sub(1, Ordering::Relaxed);
                Some(action)
            }
            Err(_) => None,
        }
    }

    /// Approximate queue depth, as seen from the consumer side.
    #[must_use]
    pub fn size(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }
}

/// Build a fresh sender/receiver pair.
#[must_use]
pub fn action_queue() -> (ActionQueueSender, ActionQueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let len = std::sync::Arc::new(AtomicUsize::new(0));
    (
        ActionQueueSender {
            tx,
            len: len.clone(),
        },
        ActionQueueReceiver { rx, len },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    struct NullMutator;
    impl SchedulerMutator for NullMutator {
        fn signoff(&mut self, _alg_index: AlgIndex, _context: EventContext, _outcome: AlgorithmOutcome) {}

        fn push_new_event_now(&mut self, _event_number: u64) -> SchedulerResult<()> {
            Ok(())
        }

        fn schedule_event_view_now(
            &mut self,
            _slot_index: usize,
            _entry_point: String,
            _n_algorithms: usize,
        ) -> SchedulerResult<usize> {
            Ok(0)
        }

        fn record_occupancy_now(&mut self, _interval_ms: i64, _callback: Option<OccupancyCallback>) {}
    }

    #[tokio::test]
    async fn push_then_pop_runs_action() {
        let (tx, mut rx) = action_queue();
        let flag = Arc::new(AtomicBool::new(false));
        let flag2 = flag.clone();
        tx.push(Box::new(move |_mutator| flag2.store(true, Ordering::SeqCst)))
            .unwrap();

        let action = rx.pop().await.expect("action present");
        action(&mut NullMutator);
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn size_tracks_pending_actions() {
        let (tx, mut rx) = action_queue();
        assert_eq!(tx.size(), 0);
        tx.push(Box::new(|_| {})).unwrap();
        tx.push(Box::new(|_| {})).unwrap();
        assert_eq!(tx.size(), 2);

        rx.pop().await.unwrap();
        assert_eq!(rx.size(), 1);
    }

    #[tokio::test]
    async fn try_pop_returns_none_when_empty() {
        let (_tx, mut rx) = action_queue();
        assert!(rx.try_pop().is_none());
    }

    #[tokio::test]
    async fn push_after_receiver_dropped_fails() {
        let (tx, rx) = action_queue();
        drop(rx);
        assert!(tx.push(Box::new(|_| {})).is_err());
    }
}
