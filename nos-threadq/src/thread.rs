//! Thread wait state and the thread table
//!
//! The thread queue core needs a narrow contract from the thread and
//! scheduler subsystem: read and modify a thread's priority, block a
//! thread, make it ready again. [`ThreadTable`] provides exactly that
//! surface, together with the per-thread wait bookkeeping the queue
//! operations mutate: the spare queue heads, the wait queue
//! back-pointer, the cached container key, the armed alarm and the
//! wait outcome.

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use hashbrown::HashMap;
use spin::{Mutex, RwLock};

use crate::dispatch::DispatchLevel;
use crate::gate::WaitLock;
use crate::heads::{Heads, PriorityKey};
use crate::queue::ThreadQueue;
use crate::types::{Priority, QueueId, SchedulerIndex, Tid, WaitOutcome};
use crate::watchdog::{AlarmDriver, AlarmId, NullAlarmDriver};

/// Scheduler-level state of a thread, as far as this subsystem is
/// concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Ready to run
    Ready,
    /// Blocked on a thread queue
    Blocked,
}

/// Reference from a blocked thread back to the queue it waits on.
#[derive(Debug, Clone)]
pub struct QueueRef {
    /// Stable identity of the queue, for comparisons.
    pub id: QueueId,
    /// The queue itself.
    pub queue: Weak<ThreadQueue>,
}

/// Mutable per-thread state, protected by the handle's control lock.
#[derive(Debug)]
pub struct ThreadControl {
    /// Thread identifier
    pub tid: Tid,
    /// Priority assigned by the application
    pub real_priority: Priority,
    /// Effective priority including inherited boosts
    pub current_priority: Priority,
    /// Scheduler instance the thread belongs to
    pub scheduler: SchedulerIndex,
    /// Ready / blocked state
    pub state: ThreadState,
    /// Spare queue heads; present exactly while not enqueued
    pub spare: Option<Box<Heads>>,
    /// The queue this thread is blocked on, if any
    pub wait_queue: Option<QueueRef>,
    /// Queues this thread currently owns
    pub owned_queues: Vec<QueueRef>,
    /// Sort key inside a priority container, cached for O(log n) removal
    pub queue_key: Option<PriorityKey>,
    /// Alarm armed for the current wait, if any
    pub alarm: Option<AlarmId>,
    /// Outcome of the last completed wait
    pub outcome: WaitOutcome,
    /// Whether this control is a proxy for a thread on a remote node
    #[cfg(feature = "mp")]
    pub is_proxy: bool,
}

/// One thread known to the table: the gate-ordered wait lock plus the
/// spin-lock protected control block.
#[derive(Debug)]
pub struct ThreadHandle {
    /// Thread identifier
    pub tid: Tid,
    /// Gate-ordered admission lock for the wait state
    pub wait_lock: WaitLock,
    /// The wait state itself
    pub control: Mutex<ThreadControl>,
}

/// A wait-queue reference counts only if the queue is still alive; a
/// queue dropped with waiters leaves a dangling reference behind.
fn still_on_live_queue(control: &ThreadControl) -> bool {
    matches!(&control.wait_queue, Some(r) if r.queue.upgrade().is_some())
}

/// Registry of all threads participating in thread queue operations.
pub struct ThreadTable {
    threads: RwLock<HashMap<Tid, Arc<ThreadHandle>>>,
    next_tid: AtomicUsize,
    scheduler_count: usize,
    alarm: Arc<dyn AlarmDriver>,
    dispatch: DispatchLevel,
}

impl ThreadTable {
    /// Create a table for `scheduler_count` scheduler instances with
    /// the no-op alarm driver.
    pub fn new(scheduler_count: usize) -> Self {
        Self::with_alarm(scheduler_count, Arc::new(NullAlarmDriver))
    }

    /// Create a table with an explicit alarm driver.
    pub fn with_alarm(scheduler_count: usize, alarm: Arc<dyn AlarmDriver>) -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
            next_tid: AtomicUsize::new(1),
            scheduler_count: scheduler_count.max(1),
            alarm,
            dispatch: DispatchLevel::new(),
        }
    }

    /// Number of scheduler instances the table was sized for.
    pub fn scheduler_count(&self) -> usize {
        self.scheduler_count
    }

    /// The alarm driver shared by all queues of this table.
    pub fn alarm(&self) -> &Arc<dyn AlarmDriver> {
        &self.alarm
    }

    /// The dispatch-disable level of this table.
    pub fn dispatch(&self) -> &DispatchLevel {
        &self.dispatch
    }

    /// Create a thread on scheduler instance 0.
    pub fn create_thread(&self, priority: Priority) -> Tid {
        self.create_thread_on(priority, 0)
    }

    /// Create a thread on the given scheduler instance. The thread is
    /// born ready and carries its one spare queue heads object.
    pub fn create_thread_on(&self, priority: Priority, scheduler: SchedulerIndex) -> Tid {
        debug_assert!(scheduler < self.scheduler_count);
        let tid = self.next_tid.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(ThreadHandle {
            tid,
            wait_lock: WaitLock::new(),
            control: Mutex::new(ThreadControl {
                tid,
                real_priority: priority,
                current_priority: priority,
                scheduler,
                state: ThreadState::Ready,
                spare: Some(Box::new(Heads::new())),
                wait_queue: None,
                owned_queues: Vec::new(),
                queue_key: None,
                alarm: None,
                outcome: WaitOutcome::Success,
                #[cfg(feature = "mp")]
                is_proxy: false,
            }),
        });
        self.threads.write().insert(tid, handle);
        tid
    }

    /// Create a proxy control for a thread living on a remote node.
    /// Extracting a proxy routes through the MP callout instead of the
    /// local unblock path.
    #[cfg(feature = "mp")]
    pub fn create_proxy(&self, priority: Priority, scheduler: SchedulerIndex) -> Tid {
        let tid = self.create_thread_on(priority, scheduler);
        if let Some(handle) = self.get(tid) {
            handle.control.lock().is_proxy = true;
        }
        tid
    }

    /// Destroy a thread, releasing its spare heads. Fails while the
    /// thread is enqueued somewhere.
    pub fn destroy_thread(&self, tid: Tid) -> bool {
        let mut threads = self.threads.write();
        let enqueued = match threads.get(&tid) {
            Some(handle) => handle.control.lock().wait_queue.is_some(),
            None => return false,
        };
        if enqueued {
            return false;
        }
        threads.remove(&tid).is_some()
    }

    /// Look up a thread handle.
    pub fn get(&self, tid: Tid) -> Option<Arc<ThreadHandle>> {
        self.threads.read().get(&tid).cloned()
    }

    /// The thread's effective priority.
    pub fn current_priority(&self, tid: Tid) -> Option<Priority> {
        self.get(tid).map(|h| h.control.lock().current_priority)
    }

    /// The thread's ready/blocked state.
    pub fn state(&self, tid: Tid) -> Option<ThreadState> {
        self.get(tid).map(|h| h.control.lock().state)
    }

    /// Outcome of the thread's last completed wait.
    pub fn wait_outcome(&self, tid: Tid) -> Option<WaitOutcome> {
        self.get(tid).map(|h| h.control.lock().outcome)
    }

    /// Whether the thread currently owns a spare heads object. True
    /// exactly while the thread is not enqueued.
    pub fn has_spare_heads(&self, tid: Tid) -> Option<bool> {
        self.get(tid).map(|h| h.control.lock().spare.is_some())
    }

    /// Set the thread's priority.
    ///
    /// Replaces both the base and the effective priority (an explicit
    /// priority change overrides any inherited boost), re-keys the
    /// thread inside its wait queue under priority disciplines, and
    /// propagates the new value down the ownership chain.
    pub fn set_priority(&self, tid: Tid, new_priority: Priority) -> bool {
        let Some(handle) = self.get(tid) else {
            return false;
        };
        loop {
            let waiting = {
                let mut control = handle.control.lock();
                control.real_priority = new_priority;
                control.wait_queue.clone()
            };
            match waiting.and_then(|r| r.queue.upgrade()) {
                None => {
                    let mut control = handle.control.lock();
                    if still_on_live_queue(&control) {
                        // Raced onto a queue between the two lock
                        // sections; retry with the queue held.
                        continue;
                    }
                    control.current_priority = new_priority;
                    return true;
                }
                Some(queue) => {
                    if queue.requeue_waiter(&handle, new_priority).is_none() {
                        continue;
                    }
                    self.propagate_boost(tid, new_priority);
                    return true;
                }
            }
        }
    }

    /// Raise (only) the effective priority of `tid` to `priority`,
    /// re-keying it inside its wait queue. Returns true if the
    /// priority actually changed.
    pub(crate) fn boost(&self, tid: Tid, priority: Priority) -> bool {
        let Some(handle) = self.get(tid) else {
            return false;
        };
        loop {
            let waiting = { handle.control.lock().wait_queue.clone() };
            match waiting.and_then(|r| r.queue.upgrade()) {
                None => {
                    let mut control = handle.control.lock();
                    if still_on_live_queue(&control) {
                        continue;
                    }
                    if priority < control.current_priority {
                        control.current_priority = priority;
                        return true;
                    }
                    return false;
                }
                Some(queue) => match queue.boost_waiter(&handle, priority) {
                    Some(changed) => return changed,
                    // The thread left that queue in the meantime.
                    None => continue,
                },
            }
        }
    }

    /// Walk the ownership chain starting at the queue `tid` waits on,
    /// boosting each owner to `priority` until the boost stops taking
    /// effect or the chain ends.
    pub(crate) fn propagate_boost(&self, start: Tid, priority: Priority) {
        let mut tid = start;
        loop {
            let Some(handle) = self.get(tid) else {
                return;
            };
            let queue = { handle.control.lock().wait_queue.clone() };
            let Some(queue) = queue.and_then(|r| r.queue.upgrade()) else {
                return;
            };
            let Some(owner) = queue.owner() else {
                return;
            };
            if owner == tid || !self.boost(owner, priority) {
                return;
            }
            tid = owner;
        }
    }

    /// Recompute a thread's effective priority after it gave up a
    /// queue: the base priority, lowered to the most urgent waiter on
    /// any queue the thread still owns. A boost inherited through a
    /// queue the thread keeps survives the surrender of another.
    pub(crate) fn recompute_priority(&self, tid: Tid) {
        let Some(handle) = self.get(tid) else {
            return;
        };
        let (mut priority, owned) = {
            let control = handle.control.lock();
            (control.real_priority, control.owned_queues.clone())
        };
        for queue in owned.iter().filter_map(|r| r.queue.upgrade()) {
            if let Some(waiter) = queue.min_waiter_priority() {
                priority = priority.min(waiter);
            }
        }
        loop {
            let waiting = { handle.control.lock().wait_queue.clone() };
            match waiting.and_then(|r| r.queue.upgrade()) {
                None => {
                    let mut control = handle.control.lock();
                    if still_on_live_queue(&control) {
                        continue;
                    }
                    control.current_priority = priority;
                    return;
                }
                // Blocked threads must be re-keyed, not just updated.
                Some(queue) => {
                    if queue.requeue_waiter(&handle, priority).is_some() {
                        return;
                    }
                }
            }
        }
    }
}

impl core::fmt::Debug for ThreadTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ThreadTable")
            .field("scheduler_count", &self.scheduler_count)
            .finish_non_exhaustive()
    }
}
