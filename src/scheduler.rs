//! Top-level scheduler core (spec §4.7), grounded on
//! `AvalancheSchedulerSvc`'s public surface: `initialize`/`activate`/
//! `deactivate`/`finalize`, `pushNewEvent`/`pushNewEvents`,
//! `popFinishedEvent`/`tryPopFinishedEvent`, `scheduleEventView`,
//! `recordOccupancy`, and the `iterate()`-driven control loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::action_queue::{action_queue, ActionQueueReceiver, ActionQueueSender, SchedulerMutator};
use crate::alg_state::{AlgIndex, AlgState};
use crate::algorithm::{Algorithm, AlgorithmOutcome};
use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::event_slot::{EventContext, EventSlot};
use crate::event_store::EventStoreService;
use crate::occupancy::{self, OccupancyCallback, OccupancySnapshot};
use crate::precedence::{Cause, PrecedenceClient, PrecedenceService};
use crate::reconciler::{RetryEntry, RetryQueue, SlotOutcome, SlotReconciler};
use crate::resource_pool::AlgorithmResourcePool;
use crate::status::{EventStatus, ExecutionStatusService};
use crate::task_spec::{TaskDispatch, TaskSpec};

/// An event that has left the scheduler, successfully or otherwise
/// (spec §4.7 "egress").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishedEvent {
    pub event_number: u64,
    pub slot_index: usize,
    pub status: EventStatus,
}

/// Cheaply cloned front door to a running scheduler. Every mutating
/// operation is marshalled onto the control task via the action queue; the
/// only state a handle touches directly is the small set of atomics the
/// control task publishes for fast, lock-free reads (`free_slots`,
/// `active`).
#[derive(Clone)]
pub struct SchedulerHandle {
    actions: ActionQueueSender,
    finished_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<FinishedEvent>>>,
    free_slots: Arc<AtomicI64>,
    active: Arc<AtomicBool>,
}

impl SchedulerHandle {
    /// Processing slots not currently occupied by a live event. Never
    /// negative to callers even though the internal counter can dip below
    /// zero transiently under a burst of concurrent pushes (spec §4.7
    /// `freeSlots()`: `std::max(0, counter)`).
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.free_slots.load(Ordering::Acquire).max(0) as usize
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Admit one new event. Fails fast with `NoCapacity` without round-
    /// tripping to the control task when no slot is free.
    pub async fn push_new_event(&self, event_number: u64) -> SchedulerResult<()> {
        if self.free_slots.load(Ordering::Acquire) <= 0 {
            return Err(SchedulerError::NoCapacity);
        }
        self.free_slots.fetch_sub(1, Ordering::AcqRel);

        let (reply_tx, reply_rx) = oneshot::channel();
        let action = Box::new(move |mutator: &mut dyn SchedulerMutator| {
            let result = mutator.push_new_event_now(event_number);
            let _ = reply_tx.send(result);
        });
        if self.actions.push(action).is_err() {
            self.free_slots.fetch_add(1, Ordering::AcqRel);
            return Err(SchedulerError::Inactive);
        }
        match reply_rx.await {
            Ok(result) => {
                if result.is_err() {
                    self.free_slots.fetch_add(1, Ordering::AcqRel);
                }
                result
            }
            Err(_) => {
                self.free_slots.fetch_add(1, Ordering::AcqRel);
                Err(SchedulerError::Inactive)
            }
        }
    }

    /// Admit a batch of events, stopping at the first one that doesn't fit.
    pub async fn push_new_events(&self, event_numbers: &[u64]) -> SchedulerResult<usize> {
        for (i, &event_number) in event_numbers.iter().enumerate() {
            if let Err(e) = self.push_new_event(event_number).await {
                if i == 0 {
                    return Err(e);
                }
                return Ok(i);
            }
        }
        Ok(event_numbers.len())
    }

    /// Block until a finished event is available.
    pub async fn pop_finished_event(&self) -> SchedulerResult<FinishedEvent> {
        let mut rx = self.finished_rx.lock().await;
        rx.recv().await.ok_or(SchedulerError::NoFinishedEvent)
    }

    /// Non-blocking variant of `pop_finished_event`.
    pub async fn try_pop_finished_event(&self) -> SchedulerResult<FinishedEvent> {
        let mut rx = self.finished_rx.lock().await;
        rx.try_recv().map_err(|_| SchedulerError::NoFinishedEvent)
    }

    /// Spawn a sub-slot ("event view") rooted at `entry_point` within
    /// `slot_index`.
    pub async fn schedule_event_view(
        &self,
        slot_index: usize,
        entry_point: impl Into<String>,
        n_algorithms: usize,
    ) -> SchedulerResult<usize> {
        let entry_point = entry_point.into();
        let (reply_tx, reply_rx) = oneshot::channel();
        let action = Box::new(move |mutator: &mut dyn SchedulerMutator| {
            let result = mutator.schedule_event_view_now(slot_index, entry_point, n_algorithms);
            let _ = reply_tx.send(result);
        });
        self.actions.push(action).map_err(|_| SchedulerError::Inactive)?;
        reply_rx.await.map_err(|_| SchedulerError::Inactive)?
    }

    /// Install (or change) the occupancy sampling interval, in milliseconds.
    /// A negative value disables sampling. `callback` is invoked on the
    /// control task with each snapshot taken at or after `interval_ms` has
    /// elapsed since the last one (spec §4.9); pass `None` to keep sampling
    /// into `last_occupancy()` without a subscriber.
    pub async fn record_occupancy(
        &self,
        interval_ms: i64,
        callback: Option<OccupancyCallback>,
    ) -> SchedulerResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let action = Box::new(move |mutator: &mut dyn SchedulerMutator| {
            mutator.record_occupancy_now(interval_ms, callback);
            let _ = reply_tx.send(());
        });
        self.actions.push(action).map_err(|_| SchedulerError::Inactive)?;
        reply_rx.await.map_err(|_| SchedulerError::Inactive)
    }

    /// Request shutdown: stop admitting new free-slot capacity and let the
    /// control task drain its queue before exiting its loop.
    ///
    /// The original's `deactivate()` drains the action queue synchronously
    /// on the calling thread via repeated `try_pop`. tokio's mpsc `Receiver`
    /// is owned exclusively by the control task, so this port instead flips
    /// `active` false here and lets the control task itself pop-and-discard
    /// every remaining entry without running it (spec §4.7: "drain the
    /// action queue of any pending entries (without executing them)") —
    /// `control_loop` checks `active` before calling an action, not after.
    /// The final no-op pushed below is itself one of the discarded entries;
    /// it exists only to wake a control task that might otherwise be
    /// blocked on an empty queue's `pop().await`.
    pub fn deactivate(&self) {
        self.free_slots.store(0, Ordering::Release);
        self.active.store(false, Ordering::Release);
        let action = Box::new(|_: &mut dyn SchedulerMutator| {});
        let _ = self.actions.push(action);
    }
}

/// Owns all mutable scheduler state; driven exclusively by its own control
/// task once `activate`d. Only the control task ever calls a `&mut self`
/// method on this type, which is what lets `AlgStateSet`/`EventSlot`
/// mutation go through plain `&mut` borrows instead of a `Mutex`.
pub struct SchedulerCore<P: PrecedenceService + 'static> {
    config: SchedulerConfig,
    slots: Vec<EventSlot>,
    epochs: Vec<u64>,
    retry_queue: RetryQueue,
    precedence: PrecedenceClient<P>,
    pool: Arc<dyn AlgorithmResourcePool>,
    store: Arc<dyn EventStoreService>,
    status: Arc<dyn ExecutionStatusService>,
    algorithms: HashMap<AlgIndex, Arc<dyn Algorithm>>,

    actions_tx: ActionQueueSender,
    actions_rx: ActionQueueReceiver,
    finished_tx: mpsc::UnboundedSender<FinishedEvent>,

    free_slots: Arc<AtomicI64>,
    active: Arc<AtomicBool>,
    needs_update: Arc<AtomicBool>,
    blocking_in_flight: usize,
    activated_at: Option<std::time::Instant>,
    occupancy_interval_ms: i64,
    last_sample_at: Option<std::time::Instant>,
    last_occupancy: Option<OccupancySnapshot>,
    occupancy_callback: Option<OccupancyCallback>,
}

impl<P: PrecedenceService + 'static> SchedulerCore<P> {
    /// Build a scheduler core from its collaborators (spec §4.7
    /// `initialize`). Slot count is taken from the event store; the
    /// per-slot algorithm table is taken from the resource pool's flat
    /// algorithm list, matching the original's algorithm-index table
    /// construction against the precedence service at startup.
    pub fn initialize(
        config: SchedulerConfig,
        precedence: P,
        pool: Arc<dyn AlgorithmResourcePool>,
        store: Arc<dyn EventStoreService>,
        status: Arc<dyn ExecutionStatusService>,
        algorithms: HashMap<AlgIndex, Arc<dyn Algorithm>>,
    ) -> SchedulerResult<(Self, SchedulerHandle)> {
        config.validate().map_err(|e| SchedulerError::Fatal(e.to_string()))?;

        let n_slots = store.number_of_stores().max(config.max_events_in_flight);
        let n_algorithms = pool.get_flat_alg_list().len();
        let slots: Vec<EventSlot> = (0..n_slots).map(|i| EventSlot::new(i, n_algorithms)).collect();
        let epochs = vec![0u64; n_slots];

        if config.simulate_execution {
            let probe = crate::alg_state::AlgStateSet::new(n_algorithms);
            precedence
                .simulate(&probe)
                .map_err(|e| SchedulerError::Fatal(format!("simulation failed: {e}")))?;
        }
        if config.show_control_flow || config.show_data_flow || config.show_data_deps {
            debug!(rules = %precedence.dump_precedence_rules(), "precedence rules at startup");
        }

        let (actions_tx, actions_rx) = action_queue();
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();

        let free_slots = Arc::new(AtomicI64::new(n_slots as i64));
        let active = Arc::new(AtomicBool::new(false));
        let needs_update = Arc::new(AtomicBool::new(false));

        let handle = SchedulerHandle {
            actions: actions_tx.clone(),
            finished_rx: Arc::new(AsyncMutex::new(finished_rx)),
            free_slots: free_slots.clone(),
            active: active.clone(),
        };

        let core = Self {
            config,
            slots,
            epochs,
            retry_queue: RetryQueue::new(),
            precedence: PrecedenceClient::new(precedence),
            pool,
            store,
            status,
            algorithms,
            actions_tx,
            actions_rx,
            finished_tx,
            free_slots,
            active,
            needs_update,
            blocking_in_flight: 0,
            activated_at: None,
            occupancy_interval_ms: -1,
            last_sample_at: None,
            last_occupancy: None,
            occupancy_callback: None,
        };
        Ok((core, handle))
    }

    /// Start the control loop on a dedicated tokio task (spec §4.7
    /// `activate`). Consumes `self`: only the spawned task ever touches
    /// scheduler state from here on.
    pub fn activate(mut self) -> tokio::task::JoinHandle<()> {
        self.active.store(true, Ordering::Release);
        self.activated_at = Some(std::time::Instant::now());
        tokio::spawn(async move { self.control_loop().await })
    }

    /// Release any precedence-service or pool resources held across the
    /// run (spec §4.7 `finalize`). A no-op beyond dropping `self` in this
    /// port, since every collaborator is `Arc`-shared rather than owned
    /// uniquely by the core.
    pub fn finalize(self) {
        info!("scheduler core finalized");
    }

    async fn control_loop(&mut self) {
        loop {
            let should_continue = self.active.load(Ordering::Acquire) || self.actions_rx.size() != 0;
            if !should_continue {
                break;
            }
            let Some(action) = self.actions_rx.pop().await else {
                break;
            };
            // Once deactivate() has flipped `active` false, the control task
            // is still the queue's sole consumer (see the type's doc comment
            // above), so it can drain everything queued before it without
            // executing any of it: pop and discard instead of running it,
            // per spec §4.7's "drain the action queue of any pending entries
            // (without executing them)".
            if self.active.load(Ordering::Acquire) {
                action(self);
            }

            if self.needs_update.load(Ordering::Acquire) && self.actions_rx.size() == 0 {
                self.iterate();
                self.needs_update.store(false, Ordering::Release);
            }
        }
        debug!("control loop exited");
    }

    /// One reconciliation pass (spec §4.6): drain the retry queue, advance
    /// control flow and dispatch newly `DataReady` algorithms for every
    /// slot, sample occupancy if due, then run the completion/stall test.
    fn iterate(&mut self) {
        for entry in self.retry_queue.drain_snapshot() {
            self.retry_schedule(entry);
        }

        for slot_index in 0..self.slots.len() {
            {
                let reconciler = SlotReconciler::new(&self.precedence);
                reconciler.advance_control_flow(&mut self.slots[slot_index]);
            }

            let ready = self.slots[slot_index].algorithms.algs_in_state(AlgState::DataReady);
            for alg_index in self.ready_in_priority_order(ready) {
                self.schedule(slot_index, None, alg_index);
            }

            let sub_slot_count = self.slots[slot_index].sub_slots.len();
            for sub_idx in 0..sub_slot_count {
                if self.slots[slot_index].sub_slots[sub_idx].complete {
                    continue;
                }
                let ready = self.slots[slot_index].sub_slots[sub_idx]
                    .algorithms
                    .algs_in_state(AlgState::DataReady);
                for alg_index in self.ready_in_priority_order(ready) {
                    self.schedule(slot_index, Some(sub_idx), alg_index);
                }
            }
        }

        self.sample_occupancy_if_due();

        for slot_index in 0..self.slots.len() {
            let outcome = {
                let reconciler = SlotReconciler::new(&self.precedence);
                reconciler.test_slot(&self.slots[slot_index])
            };
            match outcome {
                SlotOutcome::StillRunning => {}
                SlotOutcome::Complete => {
                    let status = self.status.event_status(slot_index);
                    match status {
                        EventStatus::Success => self.complete_slot(slot_index, status),
                        _ => self.fail_slot(slot_index, status),
                    }
                }
                SlotOutcome::Stalled => self.fail_slot(slot_index, EventStatus::AlgStall),
            }
        }
    }

    /// Order `ready` by descending precedence-service rank when
    /// `SchedulerConfig::ranking_enabled` is set, otherwise leave it in
    /// `AlgStateSet`'s natural (insertion) order.
    fn ready_in_priority_order(&self, mut ready: Vec<AlgIndex>) -> Vec<AlgIndex> {
        if self.config.ranking_enabled() {
            ready.sort_by_key(|&alg| std::cmp::Reverse(self.precedence.priority(alg)));
        }
        ready
    }

    fn retry_schedule(&mut self, entry: RetryEntry) {
        if entry.slot_index >= self.slots.len() {
            return;
        }
        self.schedule(entry.slot_index, entry.sub_slot_index, entry.alg_index);
    }

    /// Dispatch one `DataReady`/`Resourceless` algorithm (spec §4.4
    /// `schedule`): blocking-cap check, pool acquisition, FSM transition,
    /// then hand off to the arena or a dedicated blocking thread.
    fn schedule(&mut self, slot_index: usize, sub_slot_index: Option<usize>, alg_index: AlgIndex) {
        let is_blocking = self.precedence.is_blocking(alg_index);
        if is_blocking
            && self.config.enable_preemptive_blocking_tasks
            && self.blocking_in_flight >= self.config.max_blocking_algos_in_flight
        {
            // Must leave DataReady here, same as the pool-exhaustion branch
            // below: otherwise the next iterate() pass's algs_in_state(DataReady)
            // snapshot would rediscover this algorithm and schedule() it a
            // second time while it's already sitting in the retry queue,
            // producing two concurrent TaskDispatches for one (slot, alg).
            self.transition_to_resourceless_if_needed(slot_index, sub_slot_index, alg_index);
            self.retry_queue.push(RetryEntry {
                slot_index,
                sub_slot_index,
                alg_index,
            });
            return;
        }

        let Some(handle) = self.pool.acquire(alg_index) else {
            self.transition_to_resourceless_if_needed(slot_index, sub_slot_index, alg_index);
            self.retry_queue.push(RetryEntry {
                slot_index,
                sub_slot_index,
                alg_index,
            });
            return;
        };

        self.transition(slot_index, sub_slot_index, alg_index, AlgState::Scheduled);

        let context = self.context_for(slot_index, sub_slot_index);
        let Some(algorithm) = self.algorithms.get(&alg_index).cloned() else {
            warn!(alg_index, "no algorithm registered for index; dropping task");
            self.pool.release(handle);
            return;
        };

        let dispatch = TaskDispatch {
            algorithms: algorithm,
            store: self.store.clone(),
            status: self.status.clone(),
            pool: self.pool.clone(),
            actions: self.actions_tx.clone(),
        };
        let spec = TaskSpec { alg_index, context };

        if self.config.in_thread_mode() {
            // thread_pool_size == -100: bypass the arena entirely and run the
            // algorithm body inline on the control task, the way the original
            // does for single-threaded debugging runs.
            dispatch.run(spec, handle);
        } else if is_blocking && self.config.enable_preemptive_blocking_tasks {
            self.blocking_in_flight += 1;
            tokio::task::spawn_blocking(move || dispatch.run(spec, handle));
        } else {
            // The algorithm body is synchronous and may be CPU-bound; running
            // it under `tokio::spawn` would tie up a runtime worker thread for
            // its full duration. `spawn_blocking` is the arena's realization
            // here, same as the dedicated-blocking-thread branch above.
            tokio::task::spawn_blocking(move || dispatch.run(spec, handle));
        }
    }

    fn state_of(&self, slot_index: usize, sub_slot_index: Option<usize>, alg_index: AlgIndex) -> AlgState {
        match sub_slot_index {
            Some(sub_idx) => self.slots[slot_index].sub_slots[sub_idx].algorithms.state_of(alg_index),
            None => self.slots[slot_index].algorithms.state_of(alg_index),
        }
    }

    /// Move `alg_index` to `Resourceless` unless it's already there. Called
    /// from both the pool-exhaustion and blocking-cap branches of `schedule`
    /// before queuing a retry, so a deferred algorithm is never left sitting
    /// in `DataReady` where the next `iterate()` pass's ready-scan would
    /// rediscover and reschedule it while it's already queued (`AlgState` has
    /// no `Resourceless -> Resourceless` entry, so re-attempting the same
    /// transition every retry would otherwise log a spurious warning).
    fn transition_to_resourceless_if_needed(
        &mut self,
        slot_index: usize,
        sub_slot_index: Option<usize>,
        alg_index: AlgIndex,
    ) {
        if self.state_of(slot_index, sub_slot_index, alg_index) != AlgState::Resourceless {
            self.transition(slot_index, sub_slot_index, alg_index, AlgState::Resourceless);
        }
    }

    fn transition(
        &mut self,
        slot_index: usize,
        sub_slot_index: Option<usize>,
        alg_index: AlgIndex,
        new_state: AlgState,
    ) {
        let states = match sub_slot_index {
            Some(sub_idx) => &mut self.slots[slot_index].sub_slots[sub_idx].algorithms,
            None => &mut self.slots[slot_index].algorithms,
        };
        if let Err(e) = states.set(alg_index, new_state) {
            warn!(error = %e, "rejected transition during schedule");
        }
    }

    fn context_for(&self, slot_index: usize, sub_slot_index: Option<usize>) -> EventContext {
        match sub_slot_index {
            Some(sub_idx) => self.slots[slot_index].sub_slots[sub_idx].context,
            None => self.slots[slot_index]
                .context
                .expect("scheduling against an unoccupied slot"),
        }
    }

    fn sample_occupancy_if_due(&mut self) {
        if self.occupancy_interval_ms < 0 {
            return;
        }
        let now = std::time::Instant::now();
        let due = match self.last_sample_at {
            None => true,
            Some(last) => now.duration_since(last).as_millis() as i64 >= self.occupancy_interval_ms,
        };
        if !due {
            return;
        }
        self.last_sample_at = Some(now);
        let timestamp_ms = self
            .activated_at
            .map_or(0, |start| now.duration_since(start).as_millis() as u64);
        let snapshot = occupancy::sample(timestamp_ms, &self.slots);
        if let Some(callback) = &self.occupancy_callback {
            callback(&snapshot);
        }
        self.last_occupancy = Some(snapshot);
    }

    /// Most recent occupancy sample taken by the control task, if sampling
    /// is enabled and at least one pass has run.
    #[must_use]
    pub fn last_occupancy(&self) -> Option<&OccupancySnapshot> {
        self.last_occupancy.as_ref()
    }

    fn complete_slot(&mut self, slot_index: usize, status: EventStatus) {
        let Some(context) = self.slots[slot_index].context else {
            return;
        };
        self.status.reset(slot_index);
        let n_algorithms = self.slots[slot_index].algorithms.len();
        self.slots[slot_index].reset(n_algorithms);
        self.epochs[slot_index] += 1;
        self.free_slots.fetch_add(1, Ordering::AcqRel);

        let _ = self.finished_tx.send(FinishedEvent {
            event_number: context.event_number,
            slot_index,
            status,
        });
    }

    /// Mark a stalled or failed slot done with a non-`Success` status,
    /// mirroring the original's `eventFailed`: dump diagnostic state, then
    /// complete the slot so the caller can still retrieve it.
    fn fail_slot(&mut self, slot_index: usize, status: EventStatus) {
        let dump = self.precedence.print_state(slot_index, &self.slots[slot_index].algorithms);
        warn!(slot = slot_index, state = %dump, "event failed");
        self.complete_slot(slot_index, status);
    }
}

impl<P: PrecedenceService + 'static> SchedulerMutator for SchedulerCore<P> {
    fn push_new_event_now(&mut self, event_number: u64) -> SchedulerResult<()> {
        let slot_index = self
            .slots
            .iter()
            .position(|s| s.complete)
            .ok_or(SchedulerError::NoCapacity)?;

        self.slots[slot_index].occupy(event_number, self.epochs[slot_index])?;
        self.status.reset(slot_index);
        self.needs_update.store(true, Ordering::Release);
        Ok(())
    }

    fn schedule_event_view_now(
        &mut self,
        slot_index: usize,
        entry_point: String,
        n_algorithms: usize,
    ) -> SchedulerResult<usize> {
        if slot_index >= self.slots.len() {
            return Err(SchedulerError::Fatal(format!("no such slot {slot_index}")));
        }
        let idx = self.slots[slot_index].add_sub_slot(entry_point, n_algorithms)?;
        self.needs_update.store(true, Ordering::Release);
        Ok(idx)
    }

    fn record_occupancy_now(&mut self, interval_ms: i64, callback: Option<OccupancyCallback>) {
        self.occupancy_interval_ms = interval_ms;
        self.last_sample_at = None;
        self.occupancy_callback = callback;
    }

    fn signoff(&mut self, alg_index: AlgIndex, context: EventContext, outcome: AlgorithmOutcome) {
        if context.slot_index >= self.slots.len() {
            return;
        }
        if self.precedence.is_blocking(alg_index) && self.config.enable_preemptive_blocking_tasks {
            self.blocking_in_flight = self.blocking_in_flight.saturating_sub(1);
        }

        let new_state = match outcome {
            AlgorithmOutcome::Success { filter_passed: true } => AlgState::EvtAccepted,
            AlgorithmOutcome::Success { filter_passed: false } => AlgState::EvtRejected,
            AlgorithmOutcome::Failed => AlgState::Error,
        };

        let sub_slot_index = context.sub_slot_entry_point.as_ref().and_then(|entry_point| {
            self.slots[context.slot_index]
                .sub_slots
                .iter()
                .position(|s| &s.entry_point == entry_point)
        });
        self.transition(context.slot_index, sub_slot_index, alg_index, new_state);

        self.precedence.iterate(
            context.slot_index,
            match sub_slot_index {
                Some(idx) => &mut self.slots[context.slot_index].sub_slots[idx].algorithms,
                None => &mut self.slots[context.slot_index].algorithms,
            },
            Cause::SignOff { alg_index },
        );

        self.needs_update.store(true, Ordering::Release);
    }
}

