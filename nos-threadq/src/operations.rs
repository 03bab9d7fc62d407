//! Per-discipline queue operations
//!
//! A queue binds one of these operation tables at construction and
//! never changes it. The operations manipulate the blocked-set
//! container inside the live heads and the per-thread key cache; all
//! locking, heads donation and state transitions happen in the caller.

use crate::heads::{BlockedSet, Heads};
use crate::thread::ThreadControl;
use crate::types::{Priority, Tid};

/// Discipline-specific container operations of a thread queue.
pub trait QueueOperations: Send + Sync {
    /// Re-key `control`'s thread after its priority changed to
    /// `new_priority`. The thread is enqueued in `heads`.
    fn priority_change(&self, heads: &mut Heads, control: &mut ThreadControl, new_priority: Priority);

    /// Add `control`'s thread to the container.
    fn enqueue(&self, heads: &mut Heads, control: &mut ThreadControl);

    /// Remove `control`'s thread from the container.
    fn extract(&self, heads: &mut Heads, control: &mut ThreadControl);

    /// Remove and return the thread the discipline picks next.
    fn surrender(&self, heads: &mut Heads) -> Option<Tid>;

    /// The thread the discipline would pick next, without removing it.
    fn first(&self, heads: &Heads) -> Option<Tid>;
}

/// FIFO operations, used for both the uniprocessor and the SMP FIFO
/// disciplines. Arrival order is the only ordering criterion, so
/// priority changes are deliberately ignored.
pub struct FifoOperations;

impl QueueOperations for FifoOperations {
    fn priority_change(&self, _heads: &mut Heads, _control: &mut ThreadControl, _new: Priority) {
        // FIFO order is immune to priority changes.
    }

    fn enqueue(&self, heads: &mut Heads, control: &mut ThreadControl) {
        let BlockedSet::Fifo(fifo) = &mut heads.set else {
            unreachable!("fifo operations bound to non-fifo heads");
        };
        fifo.push_back(control.tid);
    }

    fn extract(&self, heads: &mut Heads, control: &mut ThreadControl) {
        let BlockedSet::Fifo(fifo) = &mut heads.set else {
            unreachable!("fifo operations bound to non-fifo heads");
        };
        if let Some(position) = fifo.iter().position(|&tid| tid == control.tid) {
            fifo.remove(position);
        }
    }

    fn surrender(&self, heads: &mut Heads) -> Option<Tid> {
        let BlockedSet::Fifo(fifo) = &mut heads.set else {
            unreachable!("fifo operations bound to non-fifo heads");
        };
        fifo.pop_front()
    }

    fn first(&self, heads: &Heads) -> Option<Tid> {
        let BlockedSet::Fifo(fifo) = &heads.set else {
            unreachable!("fifo operations bound to non-fifo heads");
        };
        fifo.front().copied()
    }
}

/// Uniprocessor priority operations: one priority queue, FIFO among
/// equal priorities by arrival sequence.
pub struct PriorityOperations;

impl QueueOperations for PriorityOperations {
    fn priority_change(&self, heads: &mut Heads, control: &mut ThreadControl, new: Priority) {
        let key = heads.arrival_key(new);
        let BlockedSet::Priority(queue) = &mut heads.set else {
            unreachable!("priority operations bound to non-priority heads");
        };
        if let Some(old) = control.queue_key.take() {
            queue.remove(&old);
        }
        queue.insert(key, control.tid);
        control.queue_key = Some(key);
    }

    fn enqueue(&self, heads: &mut Heads, control: &mut ThreadControl) {
        let key = heads.arrival_key(control.current_priority);
        let BlockedSet::Priority(queue) = &mut heads.set else {
            unreachable!("priority operations bound to non-priority heads");
        };
        queue.insert(key, control.tid);
        control.queue_key = Some(key);
    }

    fn extract(&self, heads: &mut Heads, control: &mut ThreadControl) {
        let BlockedSet::Priority(queue) = &mut heads.set else {
            unreachable!("priority operations bound to non-priority heads");
        };
        if let Some(key) = control.queue_key.take() {
            queue.remove(&key);
        }
    }

    fn surrender(&self, heads: &mut Heads) -> Option<Tid> {
        let BlockedSet::Priority(queue) = &mut heads.set else {
            unreachable!("priority operations bound to non-priority heads");
        };
        queue.pop_min()
    }

    fn first(&self, heads: &Heads) -> Option<Tid> {
        let BlockedSet::Priority(queue) = &heads.set else {
            unreachable!("priority operations bound to non-priority heads");
        };
        queue.min()
    }
}

/// SMP priority operations: one priority queue per scheduler instance,
/// instances served in FIFO order of becoming non-empty and rotated
/// after each surrender so no instance starves another.
pub struct PrioritySmpOperations;

impl QueueOperations for PrioritySmpOperations {
    fn priority_change(&self, heads: &mut Heads, control: &mut ThreadControl, new: Priority) {
        let key = heads.arrival_key(new);
        let BlockedSet::PrioritySmp { queues, .. } = &mut heads.set else {
            unreachable!("smp priority operations bound to wrong heads");
        };
        let queue = &mut queues[control.scheduler];
        if let Some(old) = control.queue_key.take() {
            queue.remove(&old);
        }
        queue.insert(key, control.tid);
        control.queue_key = Some(key);
    }

    fn enqueue(&self, heads: &mut Heads, control: &mut ThreadControl) {
        let key = heads.arrival_key(control.current_priority);
        let BlockedSet::PrioritySmp { active, queues } = &mut heads.set else {
            unreachable!("smp priority operations bound to wrong heads");
        };
        let queue = &mut queues[control.scheduler];
        let was_empty = queue.is_empty();
        queue.insert(key, control.tid);
        control.queue_key = Some(key);
        if was_empty {
            active.push_back(control.scheduler);
        }
    }

    fn extract(&self, heads: &mut Heads, control: &mut ThreadControl) {
        let BlockedSet::PrioritySmp { active, queues } = &mut heads.set else {
            unreachable!("smp priority operations bound to wrong heads");
        };
        let queue = &mut queues[control.scheduler];
        if let Some(key) = control.queue_key.take() {
            queue.remove(&key);
        }
        if queue.is_empty() {
            active.retain(|&index| index != control.scheduler);
        }
    }

    fn surrender(&self, heads: &mut Heads) -> Option<Tid> {
        let BlockedSet::PrioritySmp { active, queues } = &mut heads.set else {
            unreachable!("smp priority operations bound to wrong heads");
        };
        let index = active.pop_front()?;
        let tid = queues[index].pop_min();
        if !queues[index].is_empty() {
            // Rotate the served instance behind the others.
            active.push_back(index);
        }
        tid
    }

    fn first(&self, heads: &Heads) -> Option<Tid> {
        let BlockedSet::PrioritySmp { active, queues } = &heads.set else {
            unreachable!("smp priority operations bound to wrong heads");
        };
        active.front().and_then(|&index| queues[index].min())
    }
}

/// Operations for uniprocessor FIFO queues.
pub static FIFO_OPERATIONS: FifoOperations = FifoOperations;
/// Operations for SMP FIFO queues. Arrival order needs no
/// per-scheduler splitting, so this shares the FIFO implementation.
pub static FIFO_SMP_OPERATIONS: FifoOperations = FifoOperations;
/// Operations for uniprocessor priority queues.
pub static PRIORITY_OPERATIONS: PriorityOperations = PriorityOperations;
/// Operations for SMP priority queues.
pub static PRIORITY_SMP_OPERATIONS: PrioritySmpOperations = PrioritySmpOperations;
