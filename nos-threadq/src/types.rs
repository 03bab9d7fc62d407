//! Core types shared by the thread queue subsystem

use core::sync::atomic::{AtomicU64, Ordering};

use static_assertions::const_assert;

/// Thread ID type - for POSIX compatibility
pub type Tid = usize;

/// Invalid thread ID
pub const INVALID_TID: Tid = 0;

/// Thread priority value.
///
/// Lower values are more urgent. Queues with a priority discipline
/// dequeue the thread with the numerically smallest priority first,
/// ties broken by arrival order.
pub type Priority = u64;

/// Most urgent usable priority
pub const PRIORITY_MINIMUM: Priority = 1;

/// Default priority for newly created threads
pub const PRIORITY_DEFAULT: Priority = 100;

/// Least urgent usable priority
pub const PRIORITY_MAXIMUM: Priority = 255;

const_assert!(PRIORITY_MINIMUM <= PRIORITY_DEFAULT);
const_assert!(PRIORITY_DEFAULT <= PRIORITY_MAXIMUM);

/// Identifier of a scheduler instance.
///
/// On SMP configurations each scheduler instance gets its own priority
/// sub-queue inside the queue heads; uniprocessor configurations use
/// instance 0 throughout.
pub type SchedulerIndex = usize;

/// Object identifier of the synchronization object containing a thread
/// queue. Handed to the MP callout when a proxy thread is extracted.
pub type ObjectId = u32;

/// Stable identity of a thread queue.
///
/// Used as the key of the ownership-link registry; never reused for
/// the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueId(pub u64);

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

impl QueueId {
    /// Allocate a fresh queue identity.
    pub fn next() -> Self {
        QueueId(NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Outcome of a thread's last wait on a thread queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The wait was satisfied by a surrender.
    Success,
    /// The armed timeout fired before a surrender occurred.
    TimedOut,
    /// The queue was flushed (e.g. the containing object was deleted).
    Flushed,
}

/// Queueing discipline of a thread queue, selected once at
/// construction together with the processor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    /// Arrival order, uniprocessor
    Fifo,
    /// Arrival order, SMP
    FifoSmp,
    /// Priority order with FIFO tie-break, uniprocessor
    Priority,
    /// Priority order with FIFO tie-break and per-scheduler-instance
    /// sub-queues, SMP
    PrioritySmp,
}

impl Discipline {
    /// Whether this variant uses the SMP ownership-graph machinery
    /// (gates, links, path registry) during enqueue.
    pub fn is_smp(self) -> bool {
        matches!(self, Discipline::FifoSmp | Discipline::PrioritySmp)
    }
}
