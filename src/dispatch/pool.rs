//! Dispatcher core: the single-owner task holding all pool state.
//!
//! Every map, queue, and worker slot lives inside [`PoolCore`], which runs
//! as one tokio task. The public [`Dispatcher`](super::Dispatcher) handle
//! and the per-worker I/O tasks reach it exclusively through channels, so
//! no state is ever touched from two threads. This is the message-passing
//! rendition of an everything-in-reactor-callbacks design.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::call::{Call, CallError, CallId, CallResult, ResultCallback};
use crate::config::{AllocationPolicy, DispatcherConfig};
use crate::error::{DispatchError, Result};
use crate::protocol::wire_format::encode_call_payload;
use crate::protocol::{CallCode, CallEnvelope, Frame, Opcode, MAX_CALL_ID, MIN_CALL_ID};
use crate::worker::{EventSender, WorkerEvent, WorkerFactory, WorkerId, WorkerSession};

/// Commands from `Dispatcher` handles to the core.
pub(crate) enum Command {
    Call {
        procedure: String,
        payload: Bytes,
        on_result: ResultCallback,
        reply: oneshot::Sender<Result<CallId>>,
    },
    Cancel {
        id: CallId,
    },
    Stats {
        reply: oneshot::Sender<PoolStats>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// A point-in-time snapshot of pool and call state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Live workers (idle + busy).
    pub workers: usize,
    /// Workers with no call in flight.
    pub idle_workers: usize,
    /// Accepted calls not yet allocated to a worker.
    pub queued: usize,
    /// Calls currently assigned to a worker.
    pub in_flight: usize,
    /// Workers spawned over the dispatcher's lifetime, respawns included.
    pub total_spawned: u64,
}

/// One accepted, not-yet-completed call plus its dispatch bookkeeping.
struct CallState {
    call: Call,
    /// Encoded request frame, kept for reallocation after a worker loss.
    frame: Frame,
    /// Owning worker, `None` while queued.
    worker: Option<WorkerId>,
    /// Deadline registered in the timeout schedule, if timeouts are on.
    deadline: Option<Instant>,
}

/// One live worker and its dispatch bookkeeping.
struct WorkerSlot {
    id: WorkerId,
    session: WorkerSession,
    /// In-flight calls, oldest first.
    calls: VecDeque<CallId>,
    tasks_executed: u32,
    idle_since: Instant,
}

pub(crate) struct PoolCore<F> {
    factory: F,
    config: DispatcherConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: EventSender,
    events_rx: mpsc::UnboundedReceiver<WorkerEvent>,

    /// Worker arena; a respawn reuses a vacant slot under a new generation.
    slots: Vec<Option<WorkerSlot>>,
    /// Idle-pool FIFO of slot indices; entries are validated on pop.
    idle: VecDeque<usize>,
    calls: HashMap<CallId, CallState>,
    /// Pending calls in submission order (Fifo policy only).
    queue: VecDeque<CallId>,
    /// Deadline schedule; insertion order coincides with deadline order
    /// because the timeout duration is constant per dispatcher.
    timeouts: VecDeque<(CallId, Instant)>,

    next_call_id: u32,
    generation: u32,
    total_spawned: u64,
}

impl<F: WorkerFactory> PoolCore<F> {
    pub(crate) fn new(
        factory: F,
        config: DispatcherConfig,
        commands: mpsc::UnboundedReceiver<Command>,
        events_tx: EventSender,
        events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    ) -> Self {
        Self {
            factory,
            config,
            commands,
            events_tx,
            events_rx,
            slots: Vec::new(),
            idle: VecDeque::new(),
            calls: HashMap::new(),
            queue: VecDeque::new(),
            timeouts: VecDeque::new(),
            next_call_id: MIN_CALL_ID,
            generation: 0,
            total_spawned: 0,
        }
    }

    /// Spawn the initial `pool_min` workers. Failures propagate to the
    /// builder: an unspawnable worker command is a configuration error.
    pub(crate) fn fill_pool(&mut self) -> Result<()> {
        while self.live_workers() < self.config.pool_min {
            self.spawn_worker()?;
        }
        Ok(())
    }

    /// Core event loop. Runs until `stop()` or until every handle is gone.
    pub(crate) async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.config.timeout_check_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Call { procedure, payload, on_result, reply }) => {
                        if let Err(e) = self.accept_call(procedure, payload, on_result, reply) {
                            self.abort_with(e);
                            break;
                        }
                    }
                    Some(Command::Cancel { id }) => {
                        if let Err(e) = self.cancel(id) {
                            self.abort_with(e);
                            break;
                        }
                    }
                    Some(Command::Stats { reply }) => {
                        let _ = reply.send(self.stats());
                    }
                    Some(Command::Stop { reply }) => {
                        self.shutdown_workers();
                        let _ = reply.send(());
                        break;
                    }
                    // Every handle dropped: tear down like stop().
                    None => {
                        self.shutdown_workers();
                        break;
                    }
                },
                Some(event) = self.events_rx.recv() => {
                    let outcome = match event {
                        WorkerEvent::Frame { worker, frame } => self.handle_frame(worker, frame),
                        WorkerEvent::Failed { worker, reason } => self.fail_worker(worker, reason),
                    };
                    if let Err(e) = outcome {
                        self.abort_with(e);
                        break;
                    }
                }
                _ = sweep.tick() => {
                    if let Err(e) = self.sweep() {
                        self.abort_with(e);
                        break;
                    }
                }
            }
        }
    }

    // ---- call intake ----------------------------------------------------

    fn accept_call(
        &mut self,
        procedure: String,
        payload: Bytes,
        on_result: ResultCallback,
        reply: oneshot::Sender<Result<CallId>>,
    ) -> Result<()> {
        let cap = self.config.max_outstanding;
        if cap > 0 && self.calls.len() >= cap {
            let _ = reply.send(Err(DispatchError::TooBusy(self.calls.len())));
            return Ok(());
        }

        let id = self.next_call_id();
        let frame = Frame::data(encode_call_payload(id.0, &procedure, &payload));
        let deadline = self.config.call_timeout.map(|t| Instant::now() + t);

        self.calls.insert(
            id,
            CallState {
                call: Call::new(id, procedure, payload, on_result),
                frame,
                worker: None,
                deadline,
            },
        );
        if let Some(deadline) = deadline {
            self.timeouts.push_back((id, deadline));
        }

        // The id is the caller's receipt; the callback carries the result.
        let _ = reply.send(Ok(id));

        match self.config.allocation {
            AllocationPolicy::Fifo => {
                self.queue.push_back(id);
                self.drain_queue()
            }
            AllocationPolicy::LeastLoaded => self.allocate_least_loaded(id),
        }
    }

    /// Issue the next call id, wrapping at [`MAX_CALL_ID`] and skipping ids
    /// still attached to an outstanding call.
    fn next_call_id(&mut self) -> CallId {
        loop {
            let id = self.next_call_id;
            self.next_call_id = if id >= MAX_CALL_ID { MIN_CALL_ID } else { id + 1 };
            if !self.calls.contains_key(&CallId(id)) {
                return CallId(id);
            }
        }
    }

    // ---- allocation -----------------------------------------------------

    /// Match queued calls with idle workers, in submission order. The
    /// queue-nonempty and worker-available checks happen in one step, so a
    /// wakeup can never be dropped between them.
    fn drain_queue(&mut self) -> Result<()> {
        while !self.queue.is_empty() {
            let slot_idx = match self.pop_idle() {
                Some(idx) => idx,
                None => {
                    if self.live_workers() < self.config.pool_max {
                        self.spawn_worker()?;
                        continue;
                    }
                    return Ok(());
                }
            };
            if let Some(id) = self.queue.pop_front() {
                self.assign(id, slot_idx);
            }
        }
        Ok(())
    }

    /// Pop the first idle-pool entry that still refers to a live, idle
    /// worker. Entries go stale when workers die or get retired.
    fn pop_idle(&mut self) -> Option<usize> {
        while let Some(idx) = self.idle.pop_front() {
            if let Some(slot) = self.slots.get(idx).and_then(|s| s.as_ref()) {
                if slot.calls.is_empty() {
                    return Some(idx);
                }
            }
        }
        None
    }

    /// Allocate to the worker with the fewest in-flight calls, growing the
    /// pool first when every worker is occupied and headroom remains.
    fn allocate_least_loaded(&mut self, id: CallId) -> Result<()> {
        let all_busy = self
            .slots
            .iter()
            .flatten()
            .all(|slot| !slot.calls.is_empty());
        if (self.live_workers() == 0 || all_busy) && self.live_workers() < self.config.pool_max {
            self.spawn_worker()?;
        }

        let slot_idx = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|s| (idx, s.calls.len())))
            .min_by_key(|&(_, load)| load)
            .map(|(idx, _)| idx);

        match slot_idx {
            Some(idx) => {
                self.assign(id, idx);
                Ok(())
            }
            None => Err(DispatchError::Resource(
                "no live workers to allocate to".to_string(),
            )),
        }
    }

    fn assign(&mut self, call_id: CallId, slot_idx: usize) {
        let Some(state) = self.calls.get_mut(&call_id) else {
            return;
        };
        let Some(slot) = self.slots.get_mut(slot_idx).and_then(|s| s.as_mut()) else {
            return;
        };

        state.worker = Some(slot.id);
        slot.calls.push_back(call_id);

        if !slot.session.send(state.frame.clone()) {
            // Writer task already died; its Failed event is in flight and
            // will reallocate or fail this call.
            tracing::debug!(worker = %slot.id, call = %call_id, "send to dead writer");
        }
    }

    /// Re-dispatch a call that survived its worker's death.
    fn reallocate(&mut self, id: CallId) -> Result<()> {
        if let Some(state) = self.calls.get_mut(&id) {
            state.worker = None;
            // The replacement re-executes from scratch; fragments received
            // from the dead worker must not survive into the new result.
            state.call.result_buf.clear();
        } else {
            return Ok(());
        }

        match self.config.allocation {
            AllocationPolicy::Fifo => {
                self.queue.push_front(id);
                self.drain_queue()
            }
            AllocationPolicy::LeastLoaded => self.allocate_least_loaded(id),
        }
    }

    // ---- worker events --------------------------------------------------

    fn handle_frame(&mut self, worker: WorkerId, frame: Frame) -> Result<()> {
        // Stale events from a replaced generation are dropped here.
        let Some(slot_idx) = self.find_slot(worker) else {
            return Ok(());
        };

        match frame.opcode {
            Opcode::Data => self.handle_data(worker, slot_idx, frame),
            Opcode::Close => {
                tracing::debug!(worker = %worker, "worker announced shutdown");
                self.fail_worker_slot(
                    slot_idx,
                    DispatchError::Resource("worker closed its session".to_string()),
                )
            }
            Opcode::Error => {
                // Non-fatal: the worker reports an exception for its
                // current call and stays usable.
                let oldest = self
                    .slots
                    .get(slot_idx)
                    .and_then(|s| s.as_ref())
                    .and_then(|s| s.calls.front().copied());
                match oldest {
                    Some(id) => {
                        let message = String::from_utf8_lossy(frame.payload()).into_owned();
                        self.complete_call(id, Err(CallError::Application(message)));
                        self.after_task(slot_idx)
                    }
                    None => {
                        tracing::debug!(worker = %worker, "ERROR frame with no call in flight");
                        Ok(())
                    }
                }
            }
        }
    }

    fn handle_data(&mut self, worker: WorkerId, slot_idx: usize, frame: Frame) -> Result<()> {
        let envelope = match CallEnvelope::decode(&frame.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Desynchronized stream; the session cannot be trusted.
                tracing::error!(worker = %worker, "malformed DATA payload: {e}");
                return self.fail_worker_slot(slot_idx, e);
            }
        };

        if envelope.code == CallCode::Call {
            return self.fail_worker_slot(
                slot_idx,
                DispatchError::Protocol("worker sent a CALL envelope".to_string()),
            );
        }

        let call_id = CallId(envelope.call_id);
        let belongs = self.calls.get(&call_id).and_then(|s| s.worker) == Some(worker);
        if !belongs {
            // Result for a call that timed out, was cancelled, or never
            // existed. Matching the original: dropped.
            tracing::trace!(worker = %worker, call = %call_id, "dropping frame for unknown call");
            return Ok(());
        }

        if !frame.fin {
            if let Some(state) = self.calls.get_mut(&call_id) {
                state.call.result_buf.extend_from_slice(&envelope.body);
            }
            return Ok(());
        }

        let outcome = {
            let Some(state) = self.calls.get_mut(&call_id) else {
                return Ok(());
            };
            let body = if state.call.result_buf.is_empty() {
                envelope.body.clone()
            } else {
                state.call.result_buf.extend_from_slice(&envelope.body);
                state.call.result_buf.split().freeze()
            };
            match envelope.code {
                CallCode::CallResult => Ok(body),
                CallCode::CallError => Err(CallError::Application(
                    String::from_utf8_lossy(&body).into_owned(),
                )),
                CallCode::Call => unreachable!("rejected above"),
            }
        };

        self.complete_call(call_id, outcome);
        self.after_task(slot_idx)
    }

    /// Bookkeeping after a worker finishes a call: execution-limit
    /// recycling, idle-pool checkin, and queue drain in one step.
    fn after_task(&mut self, slot_idx: usize) -> Result<()> {
        let now = Instant::now();
        let limit = self.config.execution_limit;

        let (recycle, idle) = match self.slots.get_mut(slot_idx).and_then(|s| s.as_mut()) {
            Some(slot) => {
                slot.tasks_executed += 1;
                slot.idle_since = now;
                let idle = slot.calls.is_empty();
                // Recycling never interrupts in-flight work.
                let recycle = limit > 0 && slot.tasks_executed >= limit && idle;
                (recycle, idle)
            }
            None => return Ok(()),
        };

        if recycle {
            if let Some(slot) = self.slots[slot_idx].take() {
                tracing::debug!(worker = %slot.id, executed = slot.tasks_executed,
                    "recycling worker at execution limit");
                slot.session.shutdown();
            }
            self.spawn_worker()?;
        } else if idle && self.config.allocation == AllocationPolicy::Fifo {
            // The idle pool only feeds the Fifo policy; least-loaded
            // allocation scans slot loads directly.
            self.idle.push_back(slot_idx);
        }

        self.drain_queue()
    }

    fn fail_worker(&mut self, worker: WorkerId, reason: DispatchError) -> Result<()> {
        let Some(slot_idx) = self.find_slot(worker) else {
            return Ok(());
        };
        self.fail_worker_slot(slot_idx, reason)
    }

    /// Tear a worker down and restore the pool. Only the oldest in-flight
    /// call on the dead worker fails; younger in-flight calls are
    /// reallocated to live workers. Queued calls are untouched.
    fn fail_worker_slot(&mut self, slot_idx: usize, reason: DispatchError) -> Result<()> {
        let Some(slot) = self.slots[slot_idx].take() else {
            return Ok(());
        };

        tracing::warn!(worker = %slot.id, %reason, "worker session lost, respawning");

        let mut in_flight: Vec<CallId> = slot.calls.iter().copied().collect();
        slot.session.shutdown();

        let doomed = if in_flight.is_empty() {
            None
        } else {
            Some(in_flight.remove(0))
        };

        self.spawn_worker()?;

        for id in in_flight {
            self.reallocate(id)?;
        }
        if let Some(id) = doomed {
            self.complete_call(id, Err(CallError::Resource(reason.to_string())));
        }

        self.drain_queue()
    }

    // ---- timeouts, cancellation, decay ----------------------------------

    fn sweep(&mut self) -> Result<()> {
        let now = Instant::now();
        let mut expired = Vec::new();

        // Insertion order is deadline order (constant timeout), so the
        // scan stops at the first unexpired entry.
        while let Some(&(id, deadline)) = self.timeouts.front() {
            if deadline > now {
                break;
            }
            self.timeouts.pop_front();
            let live = self
                .calls
                .get(&id)
                .is_some_and(|s| s.deadline == Some(deadline));
            if live {
                expired.push(id);
            }
        }

        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "expiring timed-out calls");
            self.cancel_calls(expired, CallError::Timeout)?;
        }

        self.idle_decay();
        Ok(())
    }

    /// Fail `doomed` calls with `error`. Queued ones are simply dequeued;
    /// in-flight ones cost their worker a teardown + respawn, since the
    /// protocol has no mid-call cancellation signal.
    fn cancel_calls(&mut self, doomed: Vec<CallId>, error: CallError) -> Result<()> {
        let mut affected: Vec<usize> = Vec::new();
        for id in &doomed {
            if let Some(worker) = self.calls.get(id).and_then(|s| s.worker) {
                if let Some(idx) = self.find_slot(worker) {
                    if !affected.contains(&idx) {
                        affected.push(idx);
                    }
                }
            }
        }

        let mut survivors: Vec<CallId> = Vec::new();
        for &idx in &affected {
            if let Some(slot) = self.slots[idx].take() {
                tracing::warn!(worker = %slot.id, "tearing down worker holding expired call");
                survivors.extend(slot.calls.iter().copied().filter(|c| !doomed.contains(c)));
                slot.session.shutdown();
            }
        }

        for _ in &affected {
            self.spawn_worker()?;
        }
        for id in survivors {
            self.reallocate(id)?;
        }
        for id in doomed {
            self.complete_call(id, Err(error.clone()));
        }

        self.drain_queue()
    }

    fn cancel(&mut self, id: CallId) -> Result<()> {
        if self.calls.contains_key(&id) {
            self.cancel_calls(vec![id], CallError::Cancelled)?;
        }
        Ok(())
    }

    /// Retire at most one idle worker per sweep while above `pool_min`.
    fn idle_decay(&mut self) {
        let Some(idle_timeout) = self.config.idle_timeout else {
            return;
        };
        if self.live_workers() <= self.config.pool_min {
            return;
        }

        let candidate = self.slots.iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|s| s.calls.is_empty() && s.idle_since.elapsed() >= idle_timeout)
        });

        if let Some(idx) = candidate {
            if let Some(slot) = self.slots[idx].take() {
                tracing::debug!(worker = %slot.id, "retiring idle worker");
                slot.session.shutdown();
            }
        }
    }

    // ---- completion and teardown ----------------------------------------

    fn complete_call(&mut self, id: CallId, outcome: std::result::Result<Bytes, CallError>) {
        let Some(mut state) = self.calls.remove(&id) else {
            return;
        };

        match state.worker {
            Some(worker) => {
                if let Some(idx) = self.find_slot(worker) {
                    if let Some(slot) = self.slots[idx].as_mut() {
                        slot.calls.retain(|c| *c != id);
                    }
                }
            }
            None => self.queue.retain(|c| *c != id),
        }

        let result = match outcome {
            Ok(data) => CallResult::ok(id, data),
            Err(error) => CallResult::err(id, error),
        };
        state.call.complete(result);
    }

    /// Unrecoverable condition (a respawn failed): every outstanding call
    /// fails, the pool is torn down, and the core exits.
    fn abort_with(&mut self, error: DispatchError) {
        tracing::error!("dispatcher aborting: {error}");

        let outstanding: Vec<CallId> = self.calls.keys().copied().collect();
        let message = error.to_string();
        for id in outstanding {
            self.complete_call(id, Err(CallError::Resource(message.clone())));
        }
        self.shutdown_workers();
    }

    fn shutdown_workers(&mut self) {
        for slot in self.slots.iter_mut() {
            if let Some(slot) = slot.take() {
                slot.session.shutdown();
            }
        }
        self.idle.clear();
        self.queue.clear();
        self.timeouts.clear();
    }

    // ---- helpers ---------------------------------------------------------

    fn spawn_worker(&mut self) -> Result<usize> {
        let channels = self.factory.spawn()?;

        let slot_idx = match self.slots.iter().position(|s| s.is_none()) {
            Some(idx) => idx,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };

        self.generation += 1;
        let id = WorkerId {
            slot: slot_idx as u32,
            generation: self.generation,
        };

        let session = WorkerSession::launch(
            id,
            channels,
            self.events_tx.clone(),
            self.config.granularity,
        );

        tracing::debug!(worker = %id, "spawned worker");

        self.slots[slot_idx] = Some(WorkerSlot {
            id,
            session,
            calls: VecDeque::new(),
            tasks_executed: 0,
            idle_since: Instant::now(),
        });
        self.total_spawned += 1;
        self.idle.push_back(slot_idx);

        Ok(slot_idx)
    }

    fn find_slot(&self, id: WorkerId) -> Option<usize> {
        let idx = id.slot as usize;
        match self.slots.get(idx).and_then(|s| s.as_ref()) {
            Some(slot) if slot.id == id => Some(idx),
            _ => None,
        }
    }

    fn live_workers(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    fn stats(&self) -> PoolStats {
        let idle_workers = self
            .slots
            .iter()
            .flatten()
            .filter(|s| s.calls.is_empty())
            .count();
        let queued = self
            .calls
            .values()
            .filter(|s| s.worker.is_none())
            .count();

        PoolStats {
            workers: self.live_workers(),
            idle_workers,
            queued,
            in_flight: self.calls.len() - queued,
            total_spawned: self.total_spawned,
        }
    }
}
