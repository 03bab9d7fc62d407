//! Thread queue heads - recyclable blocked-set storage
//!
//! Each thread is equipped with one spare `Heads` object while it is
//! not enqueued. The first thread to enqueue on a queue donates its
//! spare to the queue; later arrivals park theirs on the live heads'
//! free chain. Every dequeued thread takes a spare back from the free
//! chain, and the last one out takes the live heads itself, so the
//! wait/wake path never allocates.

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

use crate::types::{Discipline, Priority, SchedulerIndex, Tid};

/// Configuration a queue applies to a donated heads object.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Discipline variant bound at queue construction
    pub discipline: Discipline,
    /// Number of scheduler instances (sizes the SMP sub-queue array)
    pub scheduler_count: usize,
}

/// Sort key of a thread inside a priority queue: priority first,
/// arrival sequence as the FIFO tie-break.
pub type PriorityKey = (Priority, u64);

/// Balanced thread priority queue.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    tree: BTreeMap<PriorityKey, Tid>,
}

impl PriorityQueue {
    /// Create an empty priority queue.
    pub fn new() -> Self {
        Self {
            tree: BTreeMap::new(),
        }
    }

    /// Insert a thread under its sort key.
    pub fn insert(&mut self, key: PriorityKey, tid: Tid) {
        self.tree.insert(key, tid);
    }

    /// Remove the thread stored under `key`.
    pub fn remove(&mut self, key: &PriorityKey) -> Option<Tid> {
        self.tree.remove(key)
    }

    /// The most urgent thread, without removing it.
    pub fn min(&self) -> Option<Tid> {
        self.tree.values().next().copied()
    }

    /// Dequeue the most urgent thread.
    pub fn pop_min(&mut self) -> Option<Tid> {
        self.tree.pop_first().map(|(_, tid)| tid)
    }

    /// Whether no thread is enqueued.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Number of enqueued threads.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Iterate the enqueued threads in key order.
    pub fn tids(&self) -> impl Iterator<Item = Tid> + '_ {
        self.tree.values().copied()
    }
}

/// The blocked-set container of one heads object.
///
/// The variant is chosen when the heads object is donated to a queue,
/// from that queue's discipline; a spare heads object is `Idle`.
#[derive(Debug)]
pub enum BlockedSet {
    /// Spare heads owned by an idle thread; holds no container.
    Idle,
    /// FIFO list of threads (FIFO discipline, any configuration).
    Fifo(VecDeque<Tid>),
    /// Single priority queue (priority discipline, uniprocessor).
    Priority(PriorityQueue),
    /// Per-scheduler-instance priority queues (priority discipline,
    /// SMP). `active` chains the indices of non-empty sub-queues in
    /// FIFO order of their empty-to-non-empty transitions.
    PrioritySmp {
        active: VecDeque<SchedulerIndex>,
        queues: Vec<PriorityQueue>,
    },
}

impl BlockedSet {
    /// Number of threads in the container.
    pub fn len(&self) -> usize {
        match self {
            BlockedSet::Idle => 0,
            BlockedSet::Fifo(fifo) => fifo.len(),
            BlockedSet::Priority(queue) => queue.len(),
            BlockedSet::PrioritySmp { queues, .. } => queues.iter().map(PriorityQueue::len).sum(),
        }
    }

    /// Whether the container holds no thread.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The blocked thread ids, in container order.
    pub fn waiters(&self) -> Vec<Tid> {
        match self {
            BlockedSet::Idle => Vec::new(),
            BlockedSet::Fifo(fifo) => fifo.iter().copied().collect(),
            BlockedSet::Priority(queue) => queue.tids().collect(),
            BlockedSet::PrioritySmp { queues, .. } => {
                queues.iter().flat_map(|queue| queue.tids()).collect()
            }
        }
    }
}

/// Recyclable storage for the blocked set of one thread queue.
#[derive(Debug)]
pub struct Heads {
    /// The blocked-set container, configured at donation time.
    pub set: BlockedSet,
    /// Spare heads objects of the other currently enqueued threads.
    pub free: Vec<Box<Heads>>,
    /// Arrival sequence source for FIFO tie-breaking.
    next_arrival: u64,
}

impl Heads {
    /// Create a spare (idle) heads object.
    pub fn new() -> Self {
        Self {
            set: BlockedSet::Idle,
            free: Vec::new(),
            next_arrival: 0,
        }
    }

    /// Configure a freshly donated heads object for `config`.
    pub fn configure(&mut self, config: QueueConfig) {
        debug_assert!(self.free.is_empty());
        self.next_arrival = 0;
        self.set = match config.discipline {
            Discipline::Fifo | Discipline::FifoSmp => BlockedSet::Fifo(VecDeque::new()),
            Discipline::Priority => BlockedSet::Priority(PriorityQueue::new()),
            Discipline::PrioritySmp => BlockedSet::PrioritySmp {
                active: VecDeque::new(),
                queues: (0..config.scheduler_count.max(1))
                    .map(|_| PriorityQueue::new())
                    .collect(),
            },
        };
    }

    /// Return the heads object to its idle (spare) state.
    pub fn reset_idle(&mut self) {
        debug_assert!(self.set.is_empty());
        debug_assert!(self.free.is_empty());
        self.set = BlockedSet::Idle;
        self.next_arrival = 0;
    }

    /// Mint the sort key for a thread arriving with `priority`.
    pub fn arrival_key(&mut self, priority: Priority) -> PriorityKey {
        let key = (priority, self.next_arrival);
        self.next_arrival += 1;
        key
    }
}

impl Default for Heads {
    fn default() -> Self {
        Self::new()
    }
}
