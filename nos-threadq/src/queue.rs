//! The thread queue core
//!
//! A [`ThreadQueue`] binds a discipline, its operation table and a
//! thread table. The queue itself stores only a lock, the owner
//! snapshot and the currently donated heads; the blocked-set storage
//! lives in the heads objects the enqueued threads bring along, so
//! queues are cheap no matter how many exist.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::{Mutex, MutexGuard};

use crate::context::{DeadlockAction, EnqueueContext};
use crate::error::{Error, Result};
use crate::gate::Gate;
use crate::heads::{Heads, QueueConfig};
use crate::links;
use crate::operations::{
    QueueOperations, FIFO_OPERATIONS, FIFO_SMP_OPERATIONS, PRIORITY_OPERATIONS,
    PRIORITY_SMP_OPERATIONS,
};
use crate::thread::{QueueRef, ThreadControl, ThreadHandle, ThreadState, ThreadTable};
use crate::types::{Discipline, QueueId, Tid, WaitOutcome, INVALID_TID};
#[cfg(feature = "mp")]
use crate::types::ObjectId;
use crate::watchdog::TimeoutDiscipline;

struct QueueInner {
    heads: Option<Box<Heads>>,
    config: QueueConfig,
}

/// A blocking point threads wait on, with optional ownership.
pub struct ThreadQueue {
    inner: Mutex<QueueInner>,
    /// Owner snapshot, readable without the queue lock. Written only
    /// while `inner` is held.
    owner: AtomicUsize,
    id: QueueId,
    name: &'static str,
    ops: &'static dyn QueueOperations,
    discipline: Discipline,
    threads: Arc<ThreadTable>,
    #[cfg(feature = "mp")]
    mp_id: ObjectId,
}

fn ops_for(discipline: Discipline) -> &'static dyn QueueOperations {
    match discipline {
        Discipline::Fifo => &FIFO_OPERATIONS,
        Discipline::FifoSmp => &FIFO_SMP_OPERATIONS,
        Discipline::Priority => &PRIORITY_OPERATIONS,
        Discipline::PrioritySmp => &PRIORITY_SMP_OPERATIONS,
    }
}

impl ThreadQueue {
    /// Create a queue with the given discipline over `threads`.
    pub fn new(discipline: Discipline, threads: Arc<ThreadTable>) -> Arc<Self> {
        Self::with_name(discipline, threads, "threadq")
    }

    /// Create a named queue; the name only shows up in logging.
    pub fn with_name(
        discipline: Discipline,
        threads: Arc<ThreadTable>,
        name: &'static str,
    ) -> Arc<Self> {
        let config = QueueConfig {
            discipline,
            scheduler_count: threads.scheduler_count(),
        };
        Arc::new(Self {
            inner: Mutex::new(QueueInner {
                heads: None,
                config,
            }),
            owner: AtomicUsize::new(INVALID_TID),
            id: QueueId::next(),
            name,
            ops: ops_for(discipline),
            discipline,
            threads,
            #[cfg(feature = "mp")]
            mp_id: 0,
        })
    }

    /// Create a queue representing an object visible to remote nodes.
    #[cfg(feature = "mp")]
    pub fn with_mp_id(
        discipline: Discipline,
        threads: Arc<ThreadTable>,
        mp_id: ObjectId,
    ) -> Arc<Self> {
        let queue = Self::with_name(discipline, threads, "threadq-mp");
        // Arc::get_mut is safe here, the queue has not been shared yet.
        let mut queue = queue;
        if let Some(inner) = Arc::get_mut(&mut queue) {
            inner.mp_id = mp_id;
        }
        queue
    }

    /// Stable identity of this queue.
    pub fn id(&self) -> QueueId {
        self.id
    }

    /// The discipline bound at construction.
    pub fn discipline(&self) -> Discipline {
        self.discipline
    }

    /// The current owner, if any.
    pub fn owner(&self) -> Option<Tid> {
        match self.owner.load(Ordering::SeqCst) {
            INVALID_TID => None,
            tid => Some(tid),
        }
    }

    /// Install or clear the owner without waking anyone. Used when a
    /// thread acquires the protected resource without contention.
    pub fn set_owner(self: &Arc<Self>, owner: Option<Tid>) {
        let _inner = self.inner.lock();
        self.transfer_ownership(owner);
    }

    /// Move this queue between the owners' owned-queue lists and
    /// refresh the owner snapshot. Caller holds `inner`.
    fn transfer_ownership(self: &Arc<Self>, next: Option<Tid>) {
        let previous = self.owner();
        if previous == next {
            return;
        }
        if let Some(handle) = previous.and_then(|tid| self.threads.get(tid)) {
            handle
                .control
                .lock()
                .owned_queues
                .retain(|r| r.id != self.id);
        }
        if let Some(handle) = next.and_then(|tid| self.threads.get(tid)) {
            handle.control.lock().owned_queues.push(QueueRef {
                id: self.id,
                queue: Arc::downgrade(self),
            });
        }
        self.store_owner(next);
    }

    fn store_owner(&self, owner: Option<Tid>) {
        self.owner
            .store(owner.unwrap_or(INVALID_TID), Ordering::SeqCst);
    }

    /// Number of threads currently blocked on this queue.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.heads.as_ref().map_or(0, |heads| heads.set.len())
    }

    /// Whether no thread is blocked on this queue.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The thread the discipline would dequeue next.
    pub fn first(&self) -> Option<Tid> {
        let inner = self.inner.lock();
        inner.heads.as_ref().and_then(|heads| self.ops.first(heads))
    }

    /// Block `tid` on this queue.
    ///
    /// The caller must hold the dispatch disable level recorded in
    /// `ctx`; a mismatch is fatal. If the queue has an owner the
    /// ownership chain is checked first and a wait that would close a
    /// cycle is rejected (or fatal, per the context). On success the
    /// thread is blocked, its timeout armed and its priority lent to
    /// every owner on the chain.
    pub fn enqueue(self: &Arc<Self>, ctx: &EnqueueContext, tid: Tid) -> Result<()> {
        let actual = self.threads.dispatch().current();
        if actual != ctx.expected_level() {
            panic!(
                "thread queue {}: enqueue at dispatch level {} but caller expected {}",
                self.name,
                actual,
                ctx.expected_level()
            );
        }
        let handle = self.threads.get(tid).ok_or(Error::UnknownThread(tid))?;

        // Admission: one enqueue of this thread at a time, in gate
        // order with any competing requests.
        let gate = Arc::new(Gate::new());
        handle.wait_lock.acquire(&gate);

        let result = self.enqueue_locked(ctx, &handle);

        handle.wait_lock.release();
        match result {
            Ok(boost) => {
                if !boost.is_empty() {
                    let priority = handle.control.lock().current_priority;
                    for owner in boost {
                        self.threads.boost(owner, priority);
                    }
                }
                Ok(())
            }
            Err(Error::Deadlock(t)) => {
                if let Some(callout) = ctx.deadlock_callout() {
                    callout(t);
                }
                if ctx.deadlock_action() == DeadlockAction::Fatal {
                    panic!(
                        "thread queue {}: deadlock while enqueuing thread {}",
                        self.name, t
                    );
                }
                Err(Error::Deadlock(t))
            }
            Err(err) => Err(err),
        }
    }

    /// Enqueue body, entered with the thread's wait lock held. Returns
    /// the owners to boost afterwards.
    fn enqueue_locked(
        self: &Arc<Self>,
        ctx: &EnqueueContext,
        handle: &Arc<ThreadHandle>,
    ) -> Result<alloc::vec::Vec<Tid>> {
        let tid = handle.tid;
        let mut inner = self.inner.lock();

        // Publish the wait relation before walking the ownership
        // graph, so concurrent walks see this thread as waiting here.
        {
            let mut control = handle.control.lock();
            if control.wait_queue.is_some() {
                return Err(Error::AlreadyWaiting(tid));
            }
            control.wait_queue = Some(QueueRef {
                id: self.id,
                queue: Arc::downgrade(self),
            });
            control.state = ThreadState::Blocked;
            control.outcome = WaitOutcome::Success;
        }

        let path = match self.owner() {
            Some(owner) => match links::acquire_path(&self.threads, self.id, owner, tid) {
                Ok(path) => Some(path),
                Err(err) => {
                    let mut control = handle.control.lock();
                    control.wait_queue = None;
                    control.state = ThreadState::Ready;
                    return Err(err);
                }
            },
            None => None,
        };

        {
            let mut control = handle.control.lock();
            let Some(spare) = control.spare.take() else {
                panic!("thread {} has no spare heads on enqueue", tid);
            };
            match inner.heads.as_mut() {
                None => {
                    let mut donated = spare;
                    donated.configure(inner.config);
                    inner.heads = Some(donated);
                }
                Some(live) => live.free.push(spare),
            }
            // Donation above guarantees the live heads exist.
            if let Some(heads) = inner.heads.as_mut() {
                self.ops.enqueue(heads, &mut control);
            }
            if ctx.timeout_discipline() != TimeoutDiscipline::None {
                let queue = Arc::downgrade(self);
                let alarm = self.threads.alarm().arm(
                    ctx.timeout_discipline(),
                    ctx.timeout(),
                    Box::new(move || {
                        if let Some(queue) = queue.upgrade() {
                            queue.timeout_expired(tid);
                        }
                    }),
                );
                control.alarm = Some(alarm);
            }
        }
        log::trace!("threadq {}: blocked thread {}", self.name, tid);

        let boost = match path {
            Some(path) => {
                let update = path.update.clone();
                path.release();
                update
            }
            None => alloc::vec::Vec::new(),
        };
        drop(inner);
        Ok(boost)
    }

    /// Remove `tid` from this queue without making it the owner.
    /// Returns false if the thread was not blocked here.
    pub fn extract(&self, tid: Tid) -> bool {
        let Some(handle) = self.threads.get(tid) else {
            return false;
        };
        let mut inner = self.inner.lock();
        let mut control = handle.control.lock();
        if !Self::waits_here(self.id, &control) {
            return false;
        }
        if let Some(heads) = inner.heads.as_mut() {
            self.ops.extract(heads, &mut control);
        }
        self.finish_dequeue(&mut inner, &mut control, WaitOutcome::Success);
        true
    }

    /// Remove a waiting proxy thread on behalf of a remote node,
    /// notifying it through the context's MP callout.
    #[cfg(feature = "mp")]
    pub fn extract_with_context(&self, ctx: &EnqueueContext, tid: Tid) -> bool {
        if !self.extract(tid) {
            return false;
        }
        let proxy = self
            .threads
            .get(tid)
            .map(|handle| handle.control.lock().is_proxy)
            .unwrap_or(false);
        if proxy {
            if let Some(callout) = ctx.mp_callout() {
                callout(tid, self.mp_id);
            }
        }
        true
    }

    /// Hand the queue to the next waiter.
    ///
    /// The dequeued thread becomes the new owner and is made ready.
    /// The previous owner's priority is recomputed from the waiters on
    /// the queues it still owns, so a boost lent through another
    /// contested resource survives. With no waiters the queue just
    /// becomes unowned.
    pub fn surrender(self: &Arc<Self>) -> Option<Tid> {
        let mut inner = self.inner.lock();
        let previous = self.owner();
        let next = inner
            .heads
            .as_mut()
            .and_then(|heads| self.ops.surrender(heads));
        match next {
            None => {
                self.transfer_ownership(None);
                drop(inner);
                if let Some(previous) = previous {
                    self.threads.recompute_priority(previous);
                }
                None
            }
            Some(next) => {
                let handle = self.threads.get(next)?;
                {
                    let mut control = handle.control.lock();
                    self.finish_dequeue(&mut inner, &mut control, WaitOutcome::Success);
                }
                self.transfer_ownership(Some(next));
                drop(inner);
                if let Some(previous) = previous {
                    self.threads.recompute_priority(previous);
                }
                log::trace!("threadq {}: ownership passed to thread {}", self.name, next);
                Some(next)
            }
        }
    }

    /// Unblock every waiter with [`WaitOutcome::Flushed`]. Ownership
    /// is not transferred. Returns the number of threads released.
    pub fn flush(&self) -> usize {
        let mut inner = self.inner.lock();
        let mut count = 0;
        loop {
            let next = inner
                .heads
                .as_mut()
                .and_then(|heads| self.ops.surrender(heads));
            let Some(tid) = next else {
                break;
            };
            let Some(handle) = self.threads.get(tid) else {
                continue;
            };
            let mut control = handle.control.lock();
            self.finish_dequeue(&mut inner, &mut control, WaitOutcome::Flushed);
            count += 1;
        }
        count
    }

    /// Alarm callback target: time out a blocked thread. A stale alarm
    /// that fires after the thread already left the queue is ignored.
    fn timeout_expired(&self, tid: Tid) {
        let Some(handle) = self.threads.get(tid) else {
            return;
        };
        let mut inner = self.inner.lock();
        let mut control = handle.control.lock();
        if !Self::waits_here(self.id, &control) {
            return;
        }
        if let Some(heads) = inner.heads.as_mut() {
            self.ops.extract(heads, &mut control);
        }
        control.alarm = None;
        self.finish_dequeue(&mut inner, &mut control, WaitOutcome::TimedOut);
        log::trace!("threadq {}: thread {} timed out", self.name, tid);
    }

    fn waits_here(id: QueueId, control: &ThreadControl) -> bool {
        matches!(&control.wait_queue, Some(r) if r.id == id)
    }

    /// The most urgent effective priority among the current waiters.
    pub(crate) fn min_waiter_priority(&self) -> Option<crate::types::Priority> {
        let inner = self.inner.lock();
        let heads = inner.heads.as_ref()?;
        heads
            .set
            .waiters()
            .into_iter()
            .filter_map(|tid| self.threads.get(tid))
            .map(|handle| handle.control.lock().current_priority)
            .min()
    }

    /// Common tail of every dequeue: reclaim a heads object, clear the
    /// wait state, cancel a pending alarm and record the outcome.
    fn finish_dequeue(
        &self,
        inner: &mut MutexGuard<'_, QueueInner>,
        control: &mut ThreadControl,
        outcome: WaitOutcome,
    ) {
        let last = inner
            .heads
            .as_ref()
            .is_none_or(|heads| heads.set.is_empty());
        let spare = if last {
            inner.heads.take().map(|mut live| {
                live.reset_idle();
                live
            })
        } else {
            // One spare per remaining waiter is parked on the free
            // chain, so this cannot be empty.
            inner.heads.as_mut().and_then(|heads| heads.free.pop())
        };
        debug_assert!(spare.is_some());
        control.spare = spare;
        control.wait_queue = None;
        control.queue_key = None;
        control.state = ThreadState::Ready;
        control.outcome = outcome;
        if let Some(alarm) = control.alarm.take() {
            self.threads.alarm().cancel(alarm);
        }
    }

    /// Raise a waiter's effective priority and re-key it, if it still
    /// waits here. `None` means the thread is no longer on this queue.
    pub(crate) fn boost_waiter(
        &self,
        handle: &Arc<ThreadHandle>,
        priority: crate::types::Priority,
    ) -> Option<bool> {
        let mut inner = self.inner.lock();
        let mut control = handle.control.lock();
        if !Self::waits_here(self.id, &control) {
            return None;
        }
        if priority >= control.current_priority {
            return Some(false);
        }
        control.current_priority = priority;
        if let Some(heads) = inner.heads.as_mut() {
            self.ops.priority_change(heads, &mut control, priority);
        }
        Some(true)
    }

    /// Set a waiter's effective priority (up or down) and re-key it.
    /// `None` means the thread is no longer on this queue.
    pub(crate) fn requeue_waiter(
        &self,
        handle: &Arc<ThreadHandle>,
        priority: crate::types::Priority,
    ) -> Option<()> {
        let mut inner = self.inner.lock();
        let mut control = handle.control.lock();
        if !Self::waits_here(self.id, &control) {
            return None;
        }
        control.current_priority = priority;
        if let Some(heads) = inner.heads.as_mut() {
            self.ops.priority_change(heads, &mut control, priority);
        }
        Some(())
    }
}

impl core::fmt::Debug for ThreadQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ThreadQueue")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("discipline", &self.discipline)
            .field("owner", &self.owner())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::ThreadTable;

    fn setup(discipline: Discipline) -> (Arc<ThreadTable>, Arc<ThreadQueue>) {
        let table = Arc::new(ThreadTable::new(2));
        let queue = ThreadQueue::new(discipline, table.clone());
        (table, queue)
    }

    #[test]
    fn test_enqueue_surrender_fifo() {
        let (table, queue) = setup(Discipline::Fifo);
        let a = table.create_thread(10);
        let b = table.create_thread(5);
        let ctx = EnqueueContext::new(1);
        {
            let _guard = table.dispatch().disable();
            queue.enqueue(&ctx, a).unwrap();
            queue.enqueue(&ctx, b).unwrap();
        }
        assert_eq!(queue.len(), 2);
        // FIFO ignores priorities.
        assert_eq!(queue.surrender(), Some(a));
        assert_eq!(queue.owner(), Some(a));
        assert_eq!(queue.surrender(), Some(b));
        assert_eq!(queue.surrender(), None);
        assert_eq!(queue.owner(), None);
    }

    #[test]
    fn test_heads_donation_and_reclaim() {
        let (table, queue) = setup(Discipline::Priority);
        let a = table.create_thread(10);
        let b = table.create_thread(20);
        let ctx = EnqueueContext::new(1);
        {
            let _guard = table.dispatch().disable();
            queue.enqueue(&ctx, a).unwrap();
            queue.enqueue(&ctx, b).unwrap();
        }
        assert_eq!(table.has_spare_heads(a), Some(false));
        assert_eq!(table.has_spare_heads(b), Some(false));
        assert_eq!(queue.surrender(), Some(a));
        assert_eq!(table.has_spare_heads(a), Some(true));
        assert_eq!(queue.surrender(), Some(b));
        assert_eq!(table.has_spare_heads(b), Some(true));
        assert!(queue.is_empty());
    }

    #[test]
    #[should_panic(expected = "dispatch level")]
    fn test_enqueue_outside_critical_section_is_fatal() {
        let (table, queue) = setup(Discipline::Fifo);
        let a = table.create_thread(10);
        let ctx = EnqueueContext::new(1);
        // No dispatch guard held.
        let _ = queue.enqueue(&ctx, a);
    }

    #[test]
    fn test_extract_and_flush() {
        let (table, queue) = setup(Discipline::Fifo);
        let a = table.create_thread(10);
        let b = table.create_thread(10);
        let c = table.create_thread(10);
        let ctx = EnqueueContext::new(1);
        {
            let _guard = table.dispatch().disable();
            for tid in [a, b, c] {
                queue.enqueue(&ctx, tid).unwrap();
            }
        }
        assert!(queue.extract(b));
        assert!(!queue.extract(b));
        assert_eq!(table.wait_outcome(b), Some(WaitOutcome::Success));
        assert_eq!(queue.flush(), 2);
        assert_eq!(table.wait_outcome(a), Some(WaitOutcome::Flushed));
        assert_eq!(table.wait_outcome(c), Some(WaitOutcome::Flushed));
        assert!(queue.is_empty());
        // Everyone got a spare heads back.
        for tid in [a, b, c] {
            assert_eq!(table.has_spare_heads(tid), Some(true));
        }
    }

    #[cfg(feature = "mp")]
    #[test]
    fn test_mp_callout_fires_only_for_proxy_extraction() {
        let table = Arc::new(ThreadTable::new(1));
        let queue = ThreadQueue::with_mp_id(Discipline::Fifo, table.clone(), 7);
        let proxy = table.create_proxy(10, 0);
        let local = table.create_thread(10);
        let calls = Arc::new(spin::Mutex::new(alloc::vec::Vec::new()));
        let recorded = calls.clone();
        let mut ctx = EnqueueContext::new(1);
        ctx.set_mp_callout(alloc::boxed::Box::new(move |tid, object| {
            recorded.lock().push((tid, object));
        }));
        {
            let _guard = table.dispatch().disable();
            queue.enqueue(&ctx, proxy).unwrap();
            queue.enqueue(&ctx, local).unwrap();
        }
        // Blocking is a local affair, even for a proxy.
        assert!(calls.lock().is_empty());
        assert!(queue.extract_with_context(&ctx, proxy));
        assert!(queue.extract_with_context(&ctx, local));
        // Only the proxy extraction notifies the remote node.
        assert_eq!(calls.lock().as_slice(), &[(proxy, 7)]);
    }

    #[test]
    fn test_self_deadlock_reported() {
        let (table, queue) = setup(Discipline::Priority);
        let a = table.create_thread(10);
        queue.set_owner(Some(a));
        let ctx = EnqueueContext::new(1);
        let _guard = table.dispatch().disable();
        assert!(matches!(
            queue.enqueue(&ctx, a),
            Err(Error::Deadlock(t)) if t == a
        ));
        // The failed enqueue left no trace.
        assert!(queue.is_empty());
        assert_eq!(table.has_spare_heads(a), Some(true));
        assert_eq!(table.state(a), Some(ThreadState::Ready));
    }
}
